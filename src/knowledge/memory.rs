//! In-memory [`ChunkStore`] 구현 (테스트용)
//!
//! `RwLock` 뒤의 `HashMap`/`Vec`로 동작합니다.
//! 벡터 검색은 전체 코사인 비교, 키워드 검색은 단순 단어 빈도 점수입니다.
//! 장애 주입 훅(접속 불가, 키별 삭제/삽입 실패)을 제공합니다.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use super::chunk::{
    cosine_similarity, ChunkHit, ChunkRecord, ChunkStore, Corpus, CorpusStats, NewChunk,
    ScopeFilter,
};
use crate::error::RagError;

struct StoredChunk {
    record: ChunkRecord,
    embedding: Vec<f32>,
}

#[derive(Default)]
struct CorpusData {
    chunks: Vec<StoredChunk>,
    complete: HashSet<String>,
}

/// 메모리 Chunk Store
pub struct MemoryChunkStore {
    dimension: usize,
    corpora: RwLock<HashMap<Corpus, CorpusData>>,
    next_id: AtomicI64,
    available: AtomicBool,
    failing_keys: RwLock<HashSet<String>>,
    offline_after: RwLock<Option<usize>>,
    insert_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl MemoryChunkStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            corpora: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            available: AtomicBool::new(true),
            failing_keys: RwLock::new(HashSet::new()),
            offline_after: RwLock::new(None),
            insert_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    /// 접속 불가 상태 전환
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// 해당 source_key의 삽입/삭제가 실패하도록 설정
    pub fn fail_key(&self, source_key: &str) {
        if let Ok(mut keys) = self.failing_keys.write() {
            keys.insert(source_key.to_string());
        }
    }

    /// insert_chunks가 `inserts`번 호출된 뒤 접속 불가로 전환
    pub fn go_offline_after(&self, inserts: usize) {
        if let Ok(mut limit) = self.offline_after.write() {
            *limit = Some(inserts);
        }
    }

    /// insert_chunks 호출 횟수
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    /// delete_by_source_key 호출 횟수
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// 완료 기록 없이 행만 쓰기 (중단된 실행 재현)
    pub fn insert_partial(&self, corpus: Corpus, source_key: &str, rows: &[NewChunk]) -> Result<()> {
        self.write_rows(corpus, source_key, rows)
    }

    /// 저장된 청크 전체 (id 순)
    pub fn chunks(&self, corpus: Corpus) -> Vec<ChunkRecord> {
        self.corpora
            .read()
            .map(|c| {
                c.get(&corpus)
                    .map(|d| d.chunks.iter().map(|s| s.record.clone()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RagError::StoreUnavailable("memory store offline".into()).into())
        }
    }

    fn check_key(&self, source_key: &str) -> Result<()> {
        let failing = self
            .failing_keys
            .read()
            .map(|keys| keys.contains(source_key))
            .unwrap_or(false);
        if failing {
            anyhow::bail!("injected failure for {}", source_key);
        }
        Ok(())
    }

    fn write_rows(&self, corpus: Corpus, source_key: &str, rows: &[NewChunk]) -> Result<()> {
        let mut corpora = self
            .corpora
            .write()
            .map_err(|e| RagError::StoreUnavailable(format!("Lock error: {}", e)))?;
        let data = corpora.entry(corpus).or_default();

        for row in rows {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            data.chunks.push(StoredChunk {
                record: ChunkRecord {
                    id,
                    source_key: source_key.to_string(),
                    text: row.text.clone(),
                    device_type: row.device_type.clone(),
                    device_model_used: row.device_model_used,
                    url: row.url.clone(),
                    page_number: row.page_number,
                    doctype: row.doctype.clone(),
                    created_at: Utc::now(),
                },
                embedding: row.embedding.clone(),
            });
        }
        Ok(())
    }

    fn ranked(mut scored: Vec<(f64, ChunkRecord)>, top_k: usize) -> Vec<ChunkHit> {
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.id.cmp(&b.1.id)));
        scored
            .into_iter()
            .take(top_k)
            .enumerate()
            .map(|(i, (score, chunk))| ChunkHit {
                chunk,
                rank: i + 1,
                raw_score: score,
            })
            .collect()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn stored_dimension(&self, corpus: Corpus) -> Result<Option<usize>> {
        self.check_available()?;
        let corpora = self
            .corpora
            .read()
            .map_err(|e| RagError::StoreUnavailable(format!("Lock error: {}", e)))?;
        Ok(corpora.get(&corpus).map(|_| self.dimension))
    }

    async fn insert_chunks(
        &self,
        corpus: Corpus,
        source_key: &str,
        rows: &[NewChunk],
    ) -> Result<usize> {
        let calls = self.insert_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let limit = self.offline_after.read().map(|l| *l).unwrap_or(None);
        if limit.is_some_and(|n| calls > n) {
            self.set_available(false);
        }
        self.check_available()?;
        self.check_key(source_key)?;

        if let Some(bad) = rows.iter().find(|r| r.embedding.len() != self.dimension) {
            return Err(RagError::dimension_mismatch(
                source_key,
                self.dimension,
                bad.embedding.len(),
            )
            .into());
        }

        self.write_rows(corpus, source_key, rows)?;

        let mut corpora = self
            .corpora
            .write()
            .map_err(|e| RagError::StoreUnavailable(format!("Lock error: {}", e)))?;
        corpora
            .entry(corpus)
            .or_default()
            .complete
            .insert(source_key.to_string());

        Ok(rows.len())
    }

    async fn delete_by_source_key(&self, corpus: Corpus, source_key: &str) -> Result<usize> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.check_key(source_key)?;

        let mut corpora = self
            .corpora
            .write()
            .map_err(|e| RagError::StoreUnavailable(format!("Lock error: {}", e)))?;
        let Some(data) = corpora.get_mut(&corpus) else {
            return Ok(0);
        };

        let before = data.chunks.len();
        data.chunks.retain(|c| c.record.source_key != source_key);
        data.complete.remove(source_key);
        Ok(before - data.chunks.len())
    }

    async fn dense_search(
        &self,
        corpus: Corpus,
        query_embedding: &[f32],
        top_k: usize,
        scope: &ScopeFilter,
    ) -> Result<Vec<ChunkHit>> {
        self.check_available()?;
        if query_embedding.len() != self.dimension {
            return Err(RagError::dimension_mismatch(
                "query",
                self.dimension,
                query_embedding.len(),
            )
            .into());
        }

        let corpora = self
            .corpora
            .read()
            .map_err(|e| RagError::StoreUnavailable(format!("Lock error: {}", e)))?;
        let Some(data) = corpora.get(&corpus) else {
            return Ok(vec![]);
        };

        let scored = data
            .chunks
            .iter()
            .filter(|c| scope.matches(&c.record))
            .map(|c| {
                (
                    cosine_similarity(query_embedding, &c.embedding) as f64,
                    c.record.clone(),
                )
            })
            .collect();

        Ok(Self::ranked(scored, top_k))
    }

    async fn lexical_search(
        &self,
        corpus: Corpus,
        query_text: &str,
        top_k: usize,
        scope: &ScopeFilter,
    ) -> Result<Vec<ChunkHit>> {
        self.check_available()?;
        let terms: HashSet<String> = tokenize(query_text).into_iter().collect();
        if terms.is_empty() {
            return Ok(vec![]);
        }

        let corpora = self
            .corpora
            .read()
            .map_err(|e| RagError::StoreUnavailable(format!("Lock error: {}", e)))?;
        let Some(data) = corpora.get(&corpus) else {
            return Ok(vec![]);
        };

        let scored = data
            .chunks
            .iter()
            .filter(|c| scope.matches(&c.record))
            .filter_map(|c| {
                let hits = tokenize(&c.record.text)
                    .iter()
                    .filter(|w| terms.contains(*w))
                    .count();
                (hits > 0).then(|| (hits as f64, c.record.clone()))
            })
            .collect();

        Ok(Self::ranked(scored, top_k))
    }

    async fn list_source_keys(&self, corpus: Corpus) -> Result<HashSet<String>> {
        self.check_available()?;
        let corpora = self
            .corpora
            .read()
            .map_err(|e| RagError::StoreUnavailable(format!("Lock error: {}", e)))?;
        Ok(corpora
            .get(&corpus)
            .map(|d| d.complete.clone())
            .unwrap_or_default())
    }

    async fn list_partial_source_keys(&self, corpus: Corpus) -> Result<HashSet<String>> {
        self.check_available()?;
        let corpora = self
            .corpora
            .read()
            .map_err(|e| RagError::StoreUnavailable(format!("Lock error: {}", e)))?;
        Ok(corpora
            .get(&corpus)
            .map(|d| {
                d.chunks
                    .iter()
                    .map(|c| &c.record.source_key)
                    .filter(|k| !d.complete.contains(*k))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn stats(&self, corpus: Corpus) -> Result<CorpusStats> {
        self.check_available()?;
        let corpora = self
            .corpora
            .read()
            .map_err(|e| RagError::StoreUnavailable(format!("Lock error: {}", e)))?;
        Ok(corpora
            .get(&corpus)
            .map(|d| CorpusStats {
                chunk_count: d.chunks.len(),
                vector_count: d.chunks.len(),
                source_key_count: d.complete.len(),
            })
            .unwrap_or_default())
    }
}

// ============================================================================
// Tests
// ============================================================================
