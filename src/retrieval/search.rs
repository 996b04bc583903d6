//! Dual-Index Search - dense(벡터) + lexical(FTS5) 두 패스 동시 실행

use anyhow::Result;

use crate::error::RagError;
use crate::knowledge::{ChunkHit, ChunkStore, Corpus, ScopeFilter};

/// 한 코퍼스에 대한 두 패스 결과
#[derive(Debug, Clone, Default)]
pub struct DualPass {
    pub dense: Vec<ChunkHit>,
    pub lexical: Vec<ChunkHit>,
}

impl DualPass {
    pub fn is_empty(&self) -> bool {
        self.dense.is_empty() && self.lexical.is_empty()
    }
}

/// 두 패스 검색
///
/// - `query_embedding`이 None이면 dense 패스는 빈 결과
/// - 임베딩 길이가 저장소 차원과 다르면 검색 전에 Configuration 에러
/// - 두 패스 모두 같은 `scope`로 제한
pub async fn dual_index_search(
    store: &dyn ChunkStore,
    corpus: Corpus,
    query_text: &str,
    query_embedding: Option<&[f32]>,
    top_k: usize,
    scope: &ScopeFilter,
) -> Result<DualPass> {
    if let Some(embedding) = query_embedding {
        if embedding.len() != store.dimension() {
            return Err(
                RagError::dimension_mismatch("query", store.dimension(), embedding.len()).into(),
            );
        }
    }

    let dense = async {
        match query_embedding {
            Some(embedding) => store.dense_search(corpus, embedding, top_k, scope).await,
            None => Ok(vec![]),
        }
    };
    let lexical = store.lexical_search(corpus, query_text, top_k, scope);

    let (dense, lexical) = tokio::try_join!(dense, lexical)?;

    tracing::debug!(
        "{}: dense={} lexical={} (top_k={})",
        corpus,
        dense.len(),
        lexical.len(),
        top_k
    );

    Ok(DualPass { dense, lexical })
}
