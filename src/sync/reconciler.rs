//! Sync Reconciler - Source of Truth와 Chunk Store 동기화
//!
//! ```text
//! Discover ──▶ Diff ──┬──▶ Delete phase ──┐
//!                     └──▶ Insert phase ──┴──▶ SyncReport
//! ```
//!
//! - 키 단위 실패는 기록 후 건너뜀 (다음 실행에서 재시도)
//! - 저장소 접속 불가/설정 오류는 실행 중단
//! - 변하지 않은 키는 다시 처리하지 않음

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;

use super::manual::build_manual_chunks;
use super::source::SourceOfTruth;
use super::ticket::build_ticket_chunks;
use crate::config::SyncConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{is_fatal, RagError};
use crate::knowledge::{ChunkStore, Corpus};

// ============================================================================
// Plan
// ============================================================================

/// 코퍼스 하나의 동기화 계획
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    /// 외부에는 있고 저장소에 완료 기록이 없는 키
    pub to_insert: BTreeSet<String>,
    /// 저장소에는 있고(완료 또는 잔여 행) 외부에는 없는 키
    pub to_delete: BTreeSet<String>,
    /// 양쪽에 모두 있는 키 수
    pub unchanged: usize,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_delete.is_empty()
    }
}

/// 키 집합 diff
///
/// 잔여 행만 있는 키는 외부에 있으면 재삽입(삽입 전 삭제로 정리), 없으면 삭제 대상입니다.
pub fn plan_sync(
    external: &HashSet<String>,
    complete: &HashSet<String>,
    partial: &HashSet<String>,
) -> SyncPlan {
    let to_insert = external.difference(complete).cloned().collect();
    let to_delete = complete
        .union(partial)
        .filter(|key| !external.contains(*key))
        .cloned()
        .collect();
    let unchanged = external.intersection(complete).count();

    SyncPlan {
        to_insert,
        to_delete,
        unchanged,
    }
}

// ============================================================================
// Report
// ============================================================================

/// 코퍼스별 결과 (키 단위)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorpusReport {
    pub inserted: usize,
    pub deleted: usize,
    pub failed: usize,
    /// 행 없이 완료 처리된 키 (불량 티켓, 관련 매뉴얼 없음)
    pub skipped: usize,
    pub unchanged: usize,
    pub failed_keys: Vec<String>,
}

/// 동기화 완료 보고서
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub tickets: CorpusReport,
    pub manuals: CorpusReport,
}

impl SyncReport {
    pub fn inserted(&self) -> usize {
        self.tickets.inserted + self.manuals.inserted
    }

    pub fn deleted(&self) -> usize {
        self.tickets.deleted + self.manuals.deleted
    }

    pub fn failed(&self) -> usize {
        self.tickets.failed + self.manuals.failed
    }

    pub fn corpus(&self, corpus: Corpus) -> &CorpusReport {
        match corpus {
            Corpus::Tickets => &self.tickets,
            Corpus::Manuals => &self.manuals,
        }
    }
}

#[derive(Debug)]
enum KeyOutcome {
    Inserted,
    Skipped,
    Deleted,
    Failed,
}

// ============================================================================
// Reconciler
// ============================================================================

/// 동기화 실행기
pub struct Reconciler {
    store: Arc<dyn ChunkStore>,
    source: Arc<dyn SourceOfTruth>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: SyncConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        source: Arc<dyn SourceOfTruth>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            source,
            embedder,
            config,
        }
    }

    /// 두 코퍼스 동기화 1회 실행
    pub async fn run(&self) -> Result<SyncReport> {
        self.check_dimension().await?;

        let tickets = self.sync_corpus(Corpus::Tickets).await?;
        let manuals = self.sync_corpus(Corpus::Manuals).await?;

        let report = SyncReport { tickets, manuals };
        tracing::info!(
            "Sync finished: {} inserted, {} deleted, {} failed",
            report.inserted(),
            report.deleted(),
            report.failed()
        );
        Ok(report)
    }

    /// 임베딩 차원 검증 (설정, 기존 테이블)
    async fn check_dimension(&self) -> Result<()> {
        let expected = self.store.dimension();
        if self.embedder.dimension() != expected {
            return Err(RagError::dimension_mismatch(
                self.embedder.name(),
                expected,
                self.embedder.dimension(),
            )
            .into());
        }

        for corpus in Corpus::ALL {
            if let Some(stored) = self.store.stored_dimension(corpus).await? {
                if stored != expected {
                    return Err(RagError::dimension_mismatch(corpus.table_name(), expected, stored).into());
                }
            }
        }
        Ok(())
    }

    async fn sync_corpus(&self, corpus: Corpus) -> Result<CorpusReport> {
        let external = match corpus {
            Corpus::Tickets => self.source.list_active_tickets().await,
            Corpus::Manuals => self.source.list_active_devices().await,
        }
        .with_context(|| format!("Failed to list external {} keys", corpus))?;

        let complete = self.store.list_source_keys(corpus).await?;
        let partial = self.store.list_partial_source_keys(corpus).await?;

        let plan = plan_sync(&external, &complete, &partial);
        tracing::info!(
            "[{}] external={} stored={} partial={} → insert={} delete={} unchanged={}",
            corpus,
            external.len(),
            complete.len(),
            partial.len(),
            plan.to_insert.len(),
            plan.to_delete.len(),
            plan.unchanged
        );

        // 두 키 집합은 서로소
        let (deleted, inserted) = tokio::try_join!(
            self.delete_phase(corpus, &plan.to_delete),
            self.insert_phase(corpus, &plan.to_insert),
        )?;

        let mut report = CorpusReport {
            unchanged: plan.unchanged,
            ..Default::default()
        };
        for (key, outcome) in deleted.into_iter().chain(inserted) {
            match outcome {
                KeyOutcome::Inserted => report.inserted += 1,
                KeyOutcome::Skipped => report.skipped += 1,
                KeyOutcome::Deleted => report.deleted += 1,
                KeyOutcome::Failed => {
                    report.failed += 1;
                    report.failed_keys.push(key);
                }
            }
        }
        report.failed_keys.sort();

        Ok(report)
    }

    async fn delete_phase(
        &self,
        corpus: Corpus,
        keys: &BTreeSet<String>,
    ) -> Result<Vec<(String, KeyOutcome)>> {
        stream::iter(keys.iter().cloned())
            .map(|key| async move {
                let result = self.store.delete_by_source_key(corpus, &key).await;
                let outcome = isolate(corpus, &key, result.map(|removed| {
                    tracing::info!("[{}] deleted {} ({} chunks)", corpus, key, removed);
                    KeyOutcome::Deleted
                }))?;
                Ok::<_, anyhow::Error>((key, outcome))
            })
            .buffer_unordered(self.config.workers.max(1))
            .try_collect()
            .await
    }

    async fn insert_phase(
        &self,
        corpus: Corpus,
        keys: &BTreeSet<String>,
    ) -> Result<Vec<(String, KeyOutcome)>> {
        stream::iter(keys.iter().cloned())
            .map(|key| async move {
                let result = self.insert_key(corpus, &key).await;
                let outcome = isolate(corpus, &key, result)?;
                Ok::<_, anyhow::Error>((key, outcome))
            })
            .buffer_unordered(self.config.workers.max(1))
            .try_collect()
            .await
    }

    /// 키 하나 가져오기 → 청크/임베딩 → 기존 행 삭제 → 삽입
    async fn insert_key(&self, corpus: Corpus, key: &str) -> Result<KeyOutcome> {
        let rows = match corpus {
            Corpus::Tickets => {
                let ticket = self.source.fetch_ticket_content(key).await?;
                build_ticket_chunks(&ticket, self.embedder.as_ref(), self.config.min_ticket_chars)
                    .await?
                    .unwrap_or_default()
            }
            Corpus::Manuals => {
                let bundle = self.source.fetch_manual_document(key).await?;
                build_manual_chunks(bundle, self.embedder.as_ref()).await?
            }
        };

        // 중단된 실행의 잔여 행 정리
        self.store.delete_by_source_key(corpus, key).await?;
        let written = self.store.insert_chunks(corpus, key, &rows).await?;

        if written == 0 {
            tracing::info!("[{}] {} recorded without chunks", corpus, key);
            Ok(KeyOutcome::Skipped)
        } else {
            tracing::info!("[{}] inserted {} ({} chunks)", corpus, key, written);
            Ok(KeyOutcome::Inserted)
        }
    }
}

/// 치명적 에러는 전파, 나머지는 키 실패로 기록
fn isolate(corpus: Corpus, key: &str, result: Result<KeyOutcome>) -> Result<KeyOutcome> {
    match result {
        Ok(outcome) => Ok(outcome),
        Err(e) if is_fatal(&e) => Err(e),
        Err(e) => {
            tracing::warn!("[{}] {} failed: {:#}", corpus, key, e);
            Ok(KeyOutcome::Failed)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::testing::HashEmbedding;
    use crate::extractor::DocType;
    use crate::knowledge::{MemoryChunkStore, NewChunk};
    use crate::sync::source::{DeviceKey, ManualBundle, ManualDocument, TicketContent};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const DIM: usize = 16;

    #[derive(Default)]
    struct StubSource {
        tickets: Mutex<HashMap<String, TicketContent>>,
        devices: Mutex<HashMap<String, ManualBundle>>,
        failing: Mutex<HashSet<String>>,
    }

    impl StubSource {
        fn with_tickets(ids: &[&str]) -> Self {
            let source = Self::default();
            for id in ids {
                source.add_ticket(id);
            }
            source
        }

        fn add_ticket(&self, id: &str) {
            let ticket = TicketContent {
                ticket_id: id.to_string(),
                description: format!(
                    "Ticket {} - the printer reports error 50.4 during warm up and stops printing. \
                     The customer restarted the device twice without success and needs onsite help.",
                    id
                ),
                worknote: "Replaced fuser".into(),
                device_type: "printer".into(),
                device_model: None,
                remote_fix: false,
                success: true,
                spare_parts: vec!["Fuser".into()],
            };
            self.tickets.lock().unwrap().insert(id.to_string(), ticket);
        }

        fn remove_ticket(&self, id: &str) {
            self.tickets.lock().unwrap().remove(id);
        }

        fn fail(&self, key: &str) {
            self.failing.lock().unwrap().insert(key.to_string());
        }

        fn heal(&self) {
            self.failing.lock().unwrap().clear();
        }

        fn check(&self, key: &str) -> Result<()> {
            if self.failing.lock().unwrap().contains(key) {
                return Err(RagError::TransientFetch {
                    key: key.to_string(),
                    message: "timeout".into(),
                }
                .into());
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SourceOfTruth for StubSource {
        async fn list_active_tickets(&self) -> Result<HashSet<String>> {
            Ok(self.tickets.lock().unwrap().keys().cloned().collect())
        }

        async fn list_active_devices(&self) -> Result<HashSet<String>> {
            Ok(self.devices.lock().unwrap().keys().cloned().collect())
        }

        async fn fetch_ticket_content(&self, key: &str) -> Result<TicketContent> {
            self.check(key)?;
            self.tickets
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("missing {}", key))
        }

        async fn fetch_manual_document(&self, key: &str) -> Result<ManualBundle> {
            self.check(key)?;
            self.devices
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("missing {}", key))
        }
    }

    struct Fixture {
        store: Arc<MemoryChunkStore>,
        source: Arc<StubSource>,
        embedder: Arc<HashEmbedding>,
        reconciler: Reconciler,
    }

    fn fixture(source: StubSource) -> Fixture {
        let store = Arc::new(MemoryChunkStore::new(DIM));
        let source = Arc::new(source);
        let embedder = Arc::new(HashEmbedding::new(DIM));
        let reconciler = Reconciler::new(
            store.clone(),
            source.clone(),
            embedder.clone(),
            SyncConfig {
                workers: 2,
                ..Default::default()
            },
        );
        Fixture {
            store,
            source,
            embedder,
            reconciler,
        }
    }

    fn keys(store: &MemoryChunkStore, corpus: Corpus) -> BTreeSet<String> {
        store
            .chunks(corpus)
            .into_iter()
            .map(|c| c.source_key)
            .collect()
    }

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn sorted(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_plan_sync() {
        let plan = plan_sync(&set(&["a", "b", "c"]), &set(&["b", "d"]), &set(&["c", "e"]));
        assert_eq!(plan.to_insert, sorted(&["a", "c"]));
        assert_eq!(plan.to_delete, sorted(&["d", "e"]));
        assert_eq!(plan.unchanged, 1);

        let same = plan_sync(&set(&["a"]), &set(&["a"]), &HashSet::new());
        assert!(same.is_empty());
    }

    #[tokio::test]
    async fn test_initial_sync_inserts_all() {
        let f = fixture(StubSource::with_tickets(&["T-1", "T-2", "T-3"]));

        let report = f.reconciler.run().await.unwrap();
        assert_eq!(report.tickets.inserted, 3);
        assert_eq!(report.failed(), 0);
        assert_eq!(
            keys(&f.store, Corpus::Tickets),
            sorted(&["T-1", "T-2", "T-3"])
        );
    }

    #[tokio::test]
    async fn test_no_reembedding_when_keys_match() {
        let f = fixture(StubSource::with_tickets(&["T-1", "T-2"]));
        f.reconciler.run().await.unwrap();

        let embed_calls = f.embedder.calls();
        let insert_calls = f.store.insert_calls();
        let delete_calls = f.store.delete_calls();

        let report = f.reconciler.run().await.unwrap();
        assert_eq!(report.inserted(), 0);
        assert_eq!(report.deleted(), 0);
        assert_eq!(report.tickets.unchanged, 2);
        assert_eq!(f.embedder.calls(), embed_calls);
        assert_eq!(f.store.insert_calls(), insert_calls);
        assert_eq!(f.store.delete_calls(), delete_calls);
    }

    #[tokio::test]
    async fn test_idempotent() {
        let f = fixture(StubSource::with_tickets(&["T-1", "T-2"]));
        f.reconciler.run().await.unwrap();
        let first = f.store.chunks(Corpus::Tickets);

        f.reconciler.run().await.unwrap();
        assert_eq!(f.store.chunks(Corpus::Tickets), first);
    }

    #[tokio::test]
    async fn test_stale_keys_deleted() {
        let f = fixture(StubSource::with_tickets(&["T-1", "T-2"]));
        f.reconciler.run().await.unwrap();

        f.source.remove_ticket("T-2");
        f.source.add_ticket("T-3");

        let report = f.reconciler.run().await.unwrap();
        assert_eq!(report.tickets.deleted, 1);
        assert_eq!(report.tickets.inserted, 1);
        assert_eq!(
            keys(&f.store, Corpus::Tickets),
            sorted(&["T-1", "T-3"])
        );
    }

    #[tokio::test]
    async fn test_partial_failure_isolated() {
        let source = StubSource::with_tickets(&["T-1", "T-2", "T-3", "T-4"]);
        source.fail("T-3");
        let f = fixture(source);

        let report = f.reconciler.run().await.unwrap();
        assert_eq!(report.tickets.inserted, 3);
        assert_eq!(report.tickets.failed, 1);
        assert_eq!(report.tickets.failed_keys, vec!["T-3".to_string()]);
        assert!(!keys(&f.store, Corpus::Tickets).contains("T-3"));

        // 다음 실행에서 재시도
        f.source.heal();
        let report = f.reconciler.run().await.unwrap();
        assert_eq!(report.tickets.inserted, 1);
        assert_eq!(report.tickets.unchanged, 3);
        assert!(keys(&f.store, Corpus::Tickets).contains("T-3"));
    }

    #[tokio::test]
    async fn test_embedding_failure_isolated() {
        let store = Arc::new(MemoryChunkStore::new(DIM));
        let source = Arc::new(StubSource::with_tickets(&["T-1", "T-2", "T-3"]));
        let embedder = Arc::new(HashEmbedding::new(DIM).failing_on("Ticket T-2"));
        let reconciler = Reconciler::new(store.clone(), source, embedder, SyncConfig::default());

        let report = reconciler.run().await.unwrap();
        assert_eq!(report.tickets.inserted, 2);
        assert_eq!(report.tickets.failed_keys, vec!["T-2".to_string()]);
        assert_eq!(keys(&store, Corpus::Tickets), sorted(&["T-1", "T-3"]));
    }

    #[tokio::test]
    async fn test_partial_rows_cleaned_up() {
        let f = fixture(StubSource::with_tickets(&["T-1"]));
        let leftover = vec![NewChunk {
            text: "half written".into(),
            embedding: vec![0.25; DIM],
            ..Default::default()
        }];
        // 외부에 있는 키: 재삽입, 외부에 없는 키: 삭제
        f.store.insert_partial(Corpus::Tickets, "T-1", &leftover).unwrap();
        f.store.insert_partial(Corpus::Tickets, "T-9", &leftover).unwrap();

        let report = f.reconciler.run().await.unwrap();
        assert_eq!(report.tickets.inserted, 1);
        assert_eq!(report.tickets.deleted, 1);

        let chunks = f.store.chunks(Corpus::Tickets);
        assert!(chunks.iter().all(|c| c.text != "half written"));
        assert!(chunks.iter().all(|c| c.source_key == "T-1"));
    }

    #[tokio::test]
    async fn test_rejected_ticket_not_retried() {
        let source = StubSource::with_tickets(&["T-1"]);
        source.tickets.lock().unwrap().get_mut("T-1").unwrap().description = "broken".into();
        let f = fixture(source);

        let report = f.reconciler.run().await.unwrap();
        assert_eq!(report.tickets.skipped, 1);
        assert!(f.store.chunks(Corpus::Tickets).is_empty());

        let report = f.reconciler.run().await.unwrap();
        assert_eq!(report.tickets.unchanged, 1);
        assert_eq!(report.tickets.skipped, 0);
    }

    #[tokio::test]
    async fn test_store_unavailable_aborts() {
        let f = fixture(StubSource::with_tickets(&["T-1"]));
        f.store.set_available(false);

        let err = f.reconciler.run().await.unwrap_err();
        assert!(is_fatal(&err));
    }

    #[tokio::test]
    async fn test_store_lost_mid_insert_aborts() {
        let f = fixture(StubSource::with_tickets(&["T-1", "T-2", "T-3", "T-4", "T-5", "T-6"]));
        f.store.go_offline_after(2);

        let err = f.reconciler.run().await.unwrap_err();
        assert!(is_fatal(&err));
        assert!(keys(&f.store, Corpus::Tickets).len() <= 2);
    }

    #[tokio::test]
    async fn test_missing_source_dir_keeps_store() {
        let f = fixture(StubSource::with_tickets(&["T-1", "T-2", "T-3"]));
        f.reconciler.run().await.unwrap();
        let delete_calls = f.store.delete_calls();

        let dir = tempfile::TempDir::new().unwrap();
        let source = Arc::new(crate::sync::FileSource::new(dir.path().join("typo_dir")).unwrap());
        let reconciler = Reconciler::new(
            f.store.clone(),
            source,
            f.embedder.clone(),
            SyncConfig::default(),
        );

        let err = reconciler.run().await.unwrap_err();
        assert!(matches!(
            crate::error::find_rag_error(&err),
            Some(RagError::SourceUnavailable(_))
        ));
        assert_eq!(f.store.delete_calls(), delete_calls);
        assert_eq!(
            keys(&f.store, Corpus::Tickets),
            sorted(&["T-1", "T-2", "T-3"])
        );
    }

    #[tokio::test]
    async fn test_dimension_mismatch_before_any_fetch() {
        let store = Arc::new(MemoryChunkStore::new(DIM));
        let source = Arc::new(StubSource::with_tickets(&["T-1"]));
        source.fail("T-1");
        let embedder = Arc::new(HashEmbedding::new(DIM / 2));
        let reconciler = Reconciler::new(store.clone(), source, embedder.clone(), SyncConfig::default());

        let err = reconciler.run().await.unwrap_err();
        assert!(matches!(
            crate::error::find_rag_error(&err),
            Some(RagError::Configuration(_))
        ));
        assert_eq!(embedder.calls(), 0);
        assert_eq!(store.insert_calls(), 0);
    }

    #[tokio::test]
    async fn test_manual_sync() {
        let source = StubSource::default();
        let device = DeviceKey::new("printer", Some("M404".into()));
        source.devices.lock().unwrap().insert(
            device.to_key(),
            ManualBundle {
                device: device.clone(),
                device_model_used: true,
                documents: vec![ManualDocument {
                    url: "https://support.example.com/m404".into(),
                    doctype: DocType::Html,
                    bytes: b"<html><body><main><h2>Fuser</h2><p>Replace the fuser.</p></main></body></html>"
                        .to_vec(),
                }],
            },
        );
        source.devices.lock().unwrap().insert(
            "scanner".into(),
            ManualBundle {
                device: DeviceKey::new("scanner", None),
                device_model_used: false,
                documents: vec![],
            },
        );
        let f = fixture(source);

        let report = f.reconciler.run().await.unwrap();
        assert_eq!(report.manuals.inserted, 1);
        assert_eq!(report.manuals.skipped, 1);

        let chunks = f.store.chunks(Corpus::Manuals);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_key, "printer::M404");
        assert!(chunks[0].device_model_used);

        let report = f.reconciler.run().await.unwrap();
        assert_eq!(report.manuals.unchanged, 2);
    }
}
