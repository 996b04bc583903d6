//! Context Assembler - 쿼리 하나에 대한 티켓/매뉴얼 검색 결과 조립
//!
//! 코퍼스별로 dual-index 검색 → RRF → min_score 필터 → 상한 적용 후
//! 메타데이터를 붙여 [`RetrievalContext`]를 만듭니다.
//! 생성(LLM) 단계는 호출하지 않습니다.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};

use super::fusion::{reciprocal_rank_fusion, RankedCandidate};
use super::search::{dual_index_search, DualPass};
use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::RagError;
use crate::knowledge::{ChunkHit, ChunkStore, Corpus, ScopeFilter};

// ============================================================================
// Types
// ============================================================================

/// 과거 티켓 근거
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketContext {
    /// 티켓 ID
    pub id: String,
    /// RRF 점수
    pub score: f64,
    /// 검색된 청크 텍스트 (프롬프트 구성용, 직렬화 제외)
    #[serde(skip_serializing, default)]
    pub text: String,
}

/// 매뉴얼 근거 (청크 단위)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualContext {
    /// 청크 ID
    pub id: i64,
    pub url: Option<String>,
    pub page_number: Option<i64>,
    pub doctype: Option<String>,
    #[serde(skip_serializing, default)]
    pub score: f64,
    #[serde(skip_serializing, default)]
    pub text: String,
}

/// 생성 단계로 넘기는 검색 컨텍스트
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalContext {
    pub tickets: Vec<TicketContext>,
    pub manuals: Vec<ManualContext>,
}

impl RetrievalContext {
    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty() && self.manuals.is_empty()
    }
}

// ============================================================================
// Retriever
// ============================================================================

/// 검색기 (Chunk Store + 임베딩 프로바이더)
pub struct Retriever {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: RetrievalConfig,
}

impl Retriever {
    /// 생성 (임베딩 차원과 저장소 차원이 다르면 Configuration 에러)
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: RetrievalConfig,
    ) -> Result<Self> {
        if embedder.dimension() != store.dimension() {
            return Err(RagError::dimension_mismatch(
                embedder.name(),
                store.dimension(),
                embedder.dimension(),
            )
            .into());
        }

        Ok(Self {
            store,
            embedder,
            config,
        })
    }

    /// 쿼리 컨텍스트 조립
    ///
    /// # Arguments
    /// * `query_text` - 검색 문장
    /// * `device_type` - 장비 유형 (매뉴얼 검색 범위)
    pub async fn retrieve(&self, query_text: &str, device_type: Option<&str>) -> Result<RetrievalContext> {
        let embedding = self
            .embedder
            .embed_query(query_text)
            .await
            .context("Failed to embed query")?;

        self.retrieve_with_embedding(query_text, Some(&embedding), device_type)
            .await
    }

    /// 이미 계산된 쿼리 임베딩으로 조립
    pub async fn retrieve_with_embedding(
        &self,
        query_text: &str,
        embedding: Option<&[f32]>,
        device_type: Option<&str>,
    ) -> Result<RetrievalContext> {
        let ticket_scope = match device_type {
            Some(d) if self.config.tickets.scope_by_device => ScopeFilter::device(d),
            _ => ScopeFilter::none(),
        };
        let manual_scope = ScopeFilter {
            device_type: device_type.map(str::to_string),
            exact_model_only: self.config.manuals.exact_model_only,
        };

        let top_k = self.config.top_k;
        let store = self.store.as_ref();
        let (ticket_passes, manual_passes) = tokio::try_join!(
            dual_index_search(store, Corpus::Tickets, query_text, embedding, top_k, &ticket_scope),
            dual_index_search(store, Corpus::Manuals, query_text, embedding, top_k, &manual_scope),
        )?;

        let context = RetrievalContext {
            tickets: self.assemble_tickets(ticket_passes),
            manuals: self.assemble_manuals(manual_passes),
        };

        tracing::info!(
            "Assembled context: {} tickets, {} manual chunks",
            context.tickets.len(),
            context.manuals.len()
        );

        Ok(context)
    }

    /// 티켓: 청크를 티켓 ID(source_key)로 묶어서 융합
    fn assemble_tickets(&self, passes: DualPass) -> Vec<TicketContext> {
        let cfg = &self.config.tickets;

        let mut texts: HashMap<String, Vec<String>> = HashMap::new();
        for hit in passes.dense.iter().chain(&passes.lexical) {
            let entry = texts.entry(hit.chunk.source_key.clone()).or_default();
            if !entry.contains(&hit.chunk.text) {
                entry.push(hit.chunk.text.clone());
            }
        }

        let to_ranked = |hits: &[ChunkHit]| {
            hits.iter()
                .map(|h| RankedCandidate::new(h.chunk.source_key.clone(), h.rank, h.raw_score))
                .collect::<Vec<_>>()
        };
        let fused = reciprocal_rank_fusion(
            &[to_ranked(&passes.dense), to_ranked(&passes.lexical)],
            self.config.rrf_k,
        );

        fused
            .into_iter()
            .filter(|f| f.fused_score >= cfg.min_score)
            .take(cfg.limit)
            .map(|f| TicketContext {
                text: texts.remove(&f.entity_id).unwrap_or_default().join("\n\n"),
                id: f.entity_id,
                score: f.fused_score,
            })
            .collect()
    }

    /// 매뉴얼: 청크 ID 단위로 융합
    fn assemble_manuals(&self, passes: DualPass) -> Vec<ManualContext> {
        let cfg = &self.config.manuals;

        let to_ranked = |hits: &[ChunkHit]| {
            hits.iter()
                .map(|h| RankedCandidate::new(h.chunk.id, h.rank, h.raw_score))
                .collect::<Vec<_>>()
        };
        let fused = reciprocal_rank_fusion(
            &[to_ranked(&passes.dense), to_ranked(&passes.lexical)],
            self.config.rrf_k,
        );

        let mut chunks: HashMap<i64, ChunkHit> = HashMap::new();
        for hit in passes.dense.into_iter().chain(passes.lexical) {
            chunks.entry(hit.chunk.id).or_insert(hit);
        }

        fused
            .into_iter()
            .filter(|f| f.fused_score >= cfg.min_score)
            .take(cfg.limit)
            .filter_map(|f| {
                let hit = chunks.remove(&f.entity_id)?;
                Some(ManualContext {
                    id: f.entity_id,
                    url: hit.chunk.url,
                    page_number: hit.chunk.page_number,
                    doctype: hit.chunk.doctype,
                    score: f.fused_score,
                    text: hit.chunk.text,
                })
            })
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::testing::HashEmbedding;
    use crate::error::is_fatal;
    use crate::knowledge::{MemoryChunkStore, NewChunk};

    const DIM: usize = 32;

    fn ticket_row(embedder: &HashEmbedding, text: &str) -> NewChunk {
        NewChunk {
            text: text.to_string(),
            embedding: embedder.vector(text),
            device_type: Some("printer".into()),
            ..Default::default()
        }
    }

    fn manual_row(embedder: &HashEmbedding, text: &str, device_type: &str, page: i64) -> NewChunk {
        NewChunk {
            text: text.to_string(),
            embedding: embedder.vector(text),
            device_type: Some(device_type.into()),
            url: Some(format!("https://manuals.example.com/{}.pdf", device_type)),
            page_number: Some(page),
            doctype: Some("pdf".into()),
            device_model_used: page % 2 == 0,
        }
    }

    async fn setup(config: RetrievalConfig) -> (Arc<MemoryChunkStore>, Retriever) {
        let embedder = HashEmbedding::new(DIM);
        let store = Arc::new(MemoryChunkStore::new(DIM));

        for i in 0..8 {
            let key = format!("T-{}", i);
            let rows = vec![
                ticket_row(&embedder, &format!("fuser error {} on printer", i)),
                ticket_row(&embedder, "replaced fuser unit"),
            ];
            store.insert_chunks(Corpus::Tickets, &key, &rows).await.unwrap();
        }
        store
            .insert_chunks(
                Corpus::Manuals,
                "printer",
                &(1..=12)
                    .map(|p| manual_row(&embedder, &format!("fuser maintenance step {}", p), "printer", p))
                    .collect::<Vec<_>>(),
            )
            .await
            .unwrap();
        store
            .insert_chunks(
                Corpus::Manuals,
                "laptop",
                &[manual_row(&embedder, "fuser is not a laptop part", "laptop", 1)],
            )
            .await
            .unwrap();

        let retriever = Retriever::new(store.clone(), Arc::new(embedder), config).unwrap();
        (store, retriever)
    }

    #[tokio::test]
    async fn test_caps_and_metadata() {
        let (_store, retriever) = setup(RetrievalConfig::default()).await;
        let context = retriever.retrieve("fuser error", Some("printer")).await.unwrap();

        assert_eq!(context.tickets.len(), 5);
        assert_eq!(context.manuals.len(), 10);

        // 같은 티켓의 여러 청크는 하나로 합쳐짐
        let mut ids: Vec<&str> = context.tickets.iter().map(|t| t.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 5);

        assert!(context
            .manuals
            .iter()
            .all(|m| m.url.as_deref() == Some("https://manuals.example.com/printer.pdf")));
        assert!(context.manuals.iter().all(|m| m.page_number.is_some()));

        // 점수 내림차순
        assert!(context.tickets.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_min_score_drops_everything() {
        let mut config = RetrievalConfig::default();
        config.tickets.min_score = 1.0;
        config.manuals.min_score = 1.0;
        let (_store, retriever) = setup(config).await;

        let context = retriever.retrieve("fuser", Some("printer")).await.unwrap();
        assert!(context.is_empty());
    }

    #[tokio::test]
    async fn test_exact_model_only() {
        let mut config = RetrievalConfig::default();
        config.manuals.exact_model_only = true;
        let (_store, retriever) = setup(config).await;

        let context = retriever.retrieve("fuser maintenance", Some("printer")).await.unwrap();
        assert!(!context.manuals.is_empty());
        assert!(context
            .manuals
            .iter()
            .all(|m| m.page_number.map(|p| p % 2 == 0).unwrap_or(false)));
    }

    #[tokio::test]
    async fn test_serialized_shape() {
        let (_store, retriever) = setup(RetrievalConfig::default()).await;
        let context = retriever.retrieve("fuser", Some("printer")).await.unwrap();

        let json = serde_json::to_value(&context).unwrap();
        let ticket = &json["tickets"][0];
        assert!(ticket.get("id").is_some() && ticket.get("score").is_some());
        assert!(ticket.get("text").is_none());

        let manual = &json["manuals"][0];
        let mut keys: Vec<&str> = manual.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        keys.sort();
        assert_eq!(keys, vec!["doctype", "id", "page_number", "url"]);
    }

    #[tokio::test]
    async fn test_empty_store_is_not_error() {
        let store = Arc::new(MemoryChunkStore::new(DIM));
        let retriever = Retriever::new(
            store,
            Arc::new(HashEmbedding::new(DIM)),
            RetrievalConfig::default(),
        )
        .unwrap();
        let context = retriever.retrieve("anything", None).await.unwrap();
        assert!(context.is_empty());
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let result = Retriever::new(
            Arc::new(MemoryChunkStore::new(DIM)),
            Arc::new(HashEmbedding::new(DIM * 2)),
            RetrievalConfig::default(),
        );
        assert!(is_fatal(&result.err().unwrap()));
    }

    #[tokio::test]
    async fn test_store_unavailable_propagates() {
        let (store, retriever) = setup(RetrievalConfig::default()).await;
        store.set_available(false);
        let err = retriever.retrieve("fuser", None).await.unwrap_err();
        assert!(is_fatal(&err));
    }
}
