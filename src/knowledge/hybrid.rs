//! 하이브리드 Chunk Store - SQLite(텍스트 + FTS5) + LanceDB(벡터)
//!
//! 두 저장소를 chunk id로 묶어 하나의 [`ChunkStore`]로 노출합니다.
//!
//! 쓰기 순서:
//! 1. SQLite 행 삽입 (id 부여)
//! 2. LanceDB 벡터 추가 (실패 시 1의 행을 보상 삭제)
//! 3. source_key 완료 기록
//!
//! 3 이전에 중단되면 행은 "partial"로 남고, 다음 동기화에서 정리됩니다.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::chunk::{ChunkHit, ChunkStore, Corpus, CorpusStats, NewChunk, ScopeFilter};
use super::lance::{LanceVectorStore, VectorRow};
use super::store::ChunkTextStore;
use crate::config::StoreConfig;
use crate::error::{find_rag_error, RagError};

// ============================================================================
// HybridChunkStore
// ============================================================================

/// SQLite + LanceDB Chunk Store
pub struct HybridChunkStore {
    text: ChunkTextStore,
    vector: LanceVectorStore,
}

impl HybridChunkStore {
    /// 설정으로 열기
    pub async fn open(config: &StoreConfig, dimension: usize) -> Result<Self> {
        let uri = config.vector_uri()?;
        Self::open_at(&config.db_path(), &uri, dimension).await
    }

    /// 경로를 직접 지정해서 열기
    ///
    /// 기존 벡터 테이블의 차원이 `dimension`과 다르면 Configuration 에러입니다.
    pub async fn open_at(db_path: &Path, vector_uri: &str, dimension: usize) -> Result<Self> {
        let text = ChunkTextStore::open(db_path).context("Failed to open chunk text store")?;
        let vector = LanceVectorStore::connect(vector_uri, dimension)
            .await
            .context("Failed to open vector store")?;

        for corpus in Corpus::ALL {
            if let Some(stored) = vector.stored_dimension(corpus).await? {
                if stored != dimension {
                    return Err(
                        RagError::dimension_mismatch(corpus.table_name(), stored, dimension).into(),
                    );
                }
            }
            vector.ensure_table(corpus).await?;
        }

        tracing::info!(
            "Opened chunk store (db={:?}, vectors={}, dim={})",
            db_path,
            vector_uri,
            dimension
        );

        Ok(Self { text, vector })
    }

    /// ANN 인덱스 및 FTS5 인덱스 정비
    pub async fn rebuild_indexes(&self, corpus: Corpus) -> Result<bool> {
        self.text.optimize_fts(corpus)?;
        self.vector.create_index(corpus).await
    }

    /// 내부 텍스트 저장소 접근
    pub fn text_store(&self) -> &ChunkTextStore {
        &self.text
    }
}

#[async_trait]
impl ChunkStore for HybridChunkStore {
    fn dimension(&self) -> usize {
        self.vector.dimension()
    }

    async fn stored_dimension(&self, corpus: Corpus) -> Result<Option<usize>> {
        self.vector.stored_dimension(corpus).await
    }

    async fn insert_chunks(
        &self,
        corpus: Corpus,
        source_key: &str,
        rows: &[NewChunk],
    ) -> Result<usize> {
        let dimension = self.dimension();
        if let Some(bad) = rows.iter().find(|r| r.embedding.len() != dimension) {
            return Err(
                RagError::dimension_mismatch(source_key, dimension, bad.embedding.len()).into(),
            );
        }

        let ids = self
            .text
            .insert_rows(corpus, source_key, rows)
            .map_err(|e| store_failure(e, format!("writing rows for {}", source_key)))?;

        let vector_rows: Vec<VectorRow> = ids
            .iter()
            .zip(rows)
            .map(|(id, row)| VectorRow {
                chunk_id: *id,
                source_key: source_key.to_string(),
                device_type: row.device_type.clone(),
                device_model_used: row.device_model_used,
                embedding: row.embedding.clone(),
            })
            .collect();

        if let Err(e) = self.vector.add(corpus, &vector_rows).await {
            // 벡터 쓰기 실패: 텍스트 행 되돌리기
            if let Err(rollback) = self.text.delete_rows(corpus, &ids) {
                tracing::warn!("Failed to roll back rows for {}: {}", source_key, rollback);
            }
            return Err(store_failure(e, format!("writing vectors for {}", source_key)));
        }

        self.text
            .mark_complete(corpus, source_key, rows.len())
            .map_err(|e| store_failure(e, format!("marking {} complete", source_key)))?;

        tracing::debug!("Inserted {} chunks into {} ({})", rows.len(), corpus, source_key);
        Ok(rows.len())
    }

    async fn delete_by_source_key(&self, corpus: Corpus, source_key: &str) -> Result<usize> {
        // 벡터 먼저 삭제 (검색에 고아 벡터가 잡히지 않도록)
        self.vector
            .delete_by_source_key(corpus, source_key)
            .await
            .map_err(|e| store_failure(e, format!("deleting vectors for {}", source_key)))?;
        self.text
            .delete_by_source_key(corpus, source_key)
            .map_err(|e| store_failure(e, format!("deleting rows for {}", source_key)))
    }

    async fn dense_search(
        &self,
        corpus: Corpus,
        query_embedding: &[f32],
        top_k: usize,
        scope: &ScopeFilter,
    ) -> Result<Vec<ChunkHit>> {
        let matches = self
            .vector
            .search(corpus, query_embedding, top_k, scope)
            .await?;

        let ids: Vec<i64> = matches.iter().map(|m| m.chunk_id).collect();
        let mut records = self.text.get_chunks(corpus, &ids)?;

        let mut hits = Vec::with_capacity(matches.len());
        for m in matches {
            // 텍스트 행이 없는 벡터는 건너뜀 (중단된 쓰기)
            let Some(chunk) = records.remove(&m.chunk_id) else {
                tracing::debug!("Dropping orphan vector {} in {}", m.chunk_id, corpus);
                continue;
            };
            hits.push(ChunkHit {
                chunk,
                rank: hits.len() + 1,
                raw_score: m.similarity,
            });
        }

        Ok(hits)
    }

    async fn lexical_search(
        &self,
        corpus: Corpus,
        query_text: &str,
        top_k: usize,
        scope: &ScopeFilter,
    ) -> Result<Vec<ChunkHit>> {
        self.text.search_fts(corpus, query_text, top_k, scope)
    }

    async fn list_source_keys(&self, corpus: Corpus) -> Result<HashSet<String>> {
        self.text.complete_source_keys(corpus)
    }

    async fn list_partial_source_keys(&self, corpus: Corpus) -> Result<HashSet<String>> {
        self.text.partial_source_keys(corpus)
    }

    async fn stats(&self, corpus: Corpus) -> Result<CorpusStats> {
        let (chunk_count, source_key_count) = self.text.counts(corpus)?;
        let vector_count = self.vector.count(corpus).await?;

        Ok(CorpusStats {
            chunk_count,
            vector_count,
            source_key_count,
        })
    }
}

/// 쓰기/삭제 경로의 저장소 에러를 [`RagError::StoreUnavailable`]로 분류
///
/// 이미 분류된 에러(차원 불일치 등)는 그대로 둡니다.
fn store_failure(err: anyhow::Error, action: String) -> anyhow::Error {
    if find_rag_error(&err).is_some() {
        return err.context(format!("Failed {}", action));
    }
    RagError::StoreUnavailable(format!("{}: {:#}", action, err)).into()
}

// ============================================================================
// Tests
// ============================================================================
