//! Chunk Text Store - rusqlite 기반 청크 텍스트 저장소
//!
//! 코퍼스별 청크 행(텍스트 + 출처 메타데이터)과 FTS5 키워드 검색을 담당합니다.
//! 임베딩 벡터는 LanceDB 쪽([`super::lance`])에 chunk id로 연결됩니다.
//!
//! 테이블 구성 (코퍼스마다):
//! - `{corpus}`: 청크 행
//! - `{corpus}_fts`: FTS5 인덱스 (porter 스테밍, 트리거로 동기화)
//! - `{corpus}_sources`: 완료된 source_key 기록

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};

use super::chunk::{ChunkHit, ChunkRecord, Corpus, NewChunk, ScopeFilter};
use crate::error::RagError;

const CHUNK_COLUMNS: &str =
    "c.id, c.source_key, c.chunk, c.device_type, c.device_model_used, c.url, c.page_number, c.doctype, c.created_at";

// ============================================================================
// ChunkTextStore
// ============================================================================

/// 청크 텍스트 저장소
///
/// 한 연결을 Mutex로 공유합니다. 잠금은 await 경계를 넘지 않습니다.
pub struct ChunkTextStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl ChunkTextStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| RagError::StoreUnavailable(format!("{:?}: {}", path, e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RagError::StoreUnavailable(format!("Lock error: {}", e)).into())
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        for corpus in Corpus::ALL {
            let t = corpus.table_name();

            conn.execute_batch(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {t} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    source_key TEXT NOT NULL,
                    chunk TEXT NOT NULL DEFAULT '',
                    device_type TEXT,
                    device_model_used INTEGER NOT NULL DEFAULT 0,
                    url TEXT,
                    page_number INTEGER,
                    doctype TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_{t}_source_key ON {t}(source_key);
                CREATE INDEX IF NOT EXISTS idx_{t}_device_type ON {t}(device_type);

                CREATE TABLE IF NOT EXISTS {t}_sources (
                    source_key TEXT PRIMARY KEY,
                    chunk_count INTEGER NOT NULL,
                    synced_at TEXT NOT NULL
                );
                "#
            ))
            .with_context(|| format!("Failed to create {} tables", t))?;

            // FTS5 가상 테이블 (키워드 검색용)
            // source: https://www.sqlite.org/fts5.html
            conn.execute_batch(&format!(
                r#"
                CREATE VIRTUAL TABLE IF NOT EXISTS {t}_fts USING fts5(
                    chunk,
                    content={t},
                    content_rowid=id,
                    tokenize='porter unicode61'
                );

                CREATE TRIGGER IF NOT EXISTS {t}_ai AFTER INSERT ON {t} BEGIN
                    INSERT INTO {t}_fts(rowid, chunk) VALUES (new.id, new.chunk);
                END;

                CREATE TRIGGER IF NOT EXISTS {t}_ad AFTER DELETE ON {t} BEGIN
                    INSERT INTO {t}_fts({t}_fts, rowid, chunk)
                    VALUES('delete', old.id, old.chunk);
                END;
                "#
            ))
            .with_context(|| format!("Failed to create {}_fts index", t))?;
        }

        tracing::debug!("Chunk text store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 청크 행 삽입 (단일 트랜잭션)
    ///
    /// 삽입된 행 id를 입력 순서대로 반환합니다.
    pub fn insert_rows(&self, corpus: Corpus, source_key: &str, rows: &[NewChunk]) -> Result<Vec<i64>> {
        let mut conn = self.lock()?;
        let t = corpus.table_name();
        let now = Utc::now().to_rfc3339();

        let tx = conn.transaction().context("Failed to begin transaction")?;
        let mut ids = Vec::with_capacity(rows.len());
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {t} (source_key, chunk, device_type, device_model_used, url, page_number, doctype, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ))?;

            for row in rows {
                stmt.execute(params![
                    source_key,
                    row.text,
                    row.device_type,
                    row.device_model_used,
                    row.url,
                    row.page_number,
                    row.doctype,
                    now,
                ])
                .with_context(|| format!("Failed to insert chunk for {}", source_key))?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit().context("Failed to commit chunk rows")?;

        Ok(ids)
    }

    /// id로 행 삭제 (벡터 쓰기 실패 시 보상용)
    pub fn delete_rows(&self, corpus: Corpus, ids: &[i64]) -> Result<usize> {
        let mut conn = self.lock()?;
        let t = corpus.table_name();

        let tx = conn.transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare(&format!("DELETE FROM {t} WHERE id = ?1"))?;
            for id in ids {
                deleted += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;

        Ok(deleted)
    }

    /// source_key 완료 기록
    pub fn mark_complete(&self, corpus: Corpus, source_key: &str, chunk_count: usize) -> Result<()> {
        let conn = self.lock()?;
        let t = corpus.table_name();

        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {t}_sources (source_key, chunk_count, synced_at)
                 VALUES (?1, ?2, ?3)"
            ),
            params![source_key, chunk_count as i64, Utc::now().to_rfc3339()],
        )
        .with_context(|| format!("Failed to mark {} complete", source_key))?;

        Ok(())
    }

    /// source_key의 모든 행 및 완료 기록 삭제
    pub fn delete_by_source_key(&self, corpus: Corpus, source_key: &str) -> Result<usize> {
        let mut conn = self.lock()?;
        let t = corpus.table_name();

        let tx = conn.transaction()?;
        let rows = tx.execute(
            &format!("DELETE FROM {t} WHERE source_key = ?1"),
            params![source_key],
        )?;
        tx.execute(
            &format!("DELETE FROM {t}_sources WHERE source_key = ?1"),
            params![source_key],
        )?;
        tx.commit()?;

        Ok(rows)
    }

    /// id 목록으로 청크 조회
    pub fn get_chunks(&self, corpus: Corpus, ids: &[i64]) -> Result<HashMap<i64, ChunkRecord>> {
        let conn = self.lock()?;
        let t = corpus.table_name();

        let mut stmt = conn.prepare(&format!(
            "SELECT {CHUNK_COLUMNS} FROM {t} c WHERE c.id = ?1"
        ))?;

        let mut found = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = stmt.query_row(params![id], map_chunk_row).optional()? {
                found.insert(*id, record);
            }
        }

        Ok(found)
    }

    /// FTS5 키워드 검색
    ///
    /// BM25 점수 순(관련도 내림차순)으로 반환합니다.
    /// source: https://www.sqlite.org/fts5.html#the_bm25_function
    pub fn search_fts(
        &self,
        corpus: Corpus,
        query: &str,
        limit: usize,
        scope: &ScopeFilter,
    ) -> Result<Vec<ChunkHit>> {
        let match_expr = build_fts5_query(query);
        if match_expr.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let conn = self.lock()?;
        let t = corpus.table_name();

        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {CHUNK_COLUMNS}, bm25({t}_fts) AS score
            FROM {t}_fts
            JOIN {t} c ON c.id = {t}_fts.rowid
            WHERE {t}_fts MATCH ?1
              AND (?2 IS NULL OR c.device_type = ?2)
              AND (?3 = 0 OR c.device_model_used = 1)
            ORDER BY score, c.id
            LIMIT ?4
            "#
        ))?;

        let rows = stmt.query_map(
            params![
                match_expr,
                scope.device_type,
                scope.exact_model_only,
                limit as i64
            ],
            |row| {
                let chunk = map_chunk_row(row)?;
                let bm25: f64 = row.get(9)?;
                Ok((chunk, bm25))
            },
        )?;

        let mut hits = Vec::new();
        for row in rows {
            let (chunk, bm25) = row?;
            hits.push(ChunkHit {
                chunk,
                rank: hits.len() + 1,
                // SQLite bm25()는 낮을수록 관련도가 높음
                raw_score: -bm25,
            });
        }

        Ok(hits)
    }

    /// 완료된 source_key 목록
    pub fn complete_source_keys(&self, corpus: Corpus) -> Result<HashSet<String>> {
        let conn = self.lock()?;
        let t = corpus.table_name();

        let mut stmt = conn.prepare(&format!("SELECT source_key FROM {t}_sources"))?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;

        Ok(keys)
    }

    /// 행은 있지만 완료 기록이 없는 source_key 목록
    pub fn partial_source_keys(&self, corpus: Corpus) -> Result<HashSet<String>> {
        let conn = self.lock()?;
        let t = corpus.table_name();

        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT c.source_key FROM {t} c
             LEFT JOIN {t}_sources s ON s.source_key = c.source_key
             WHERE s.source_key IS NULL"
        ))?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;

        Ok(keys)
    }

    /// 청크 수 및 완료된 source_key 수
    pub fn counts(&self, corpus: Corpus) -> Result<(usize, usize)> {
        let conn = self.lock()?;
        let t = corpus.table_name();

        let chunks: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {t}"), [], |row| row.get(0))?;
        let keys: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {t}_sources"), [], |row| row.get(0))?;

        Ok((chunks as usize, keys as usize))
    }

    /// FTS5 인덱스 최적화 (세그먼트 병합)
    pub fn optimize_fts(&self, corpus: Corpus) -> Result<()> {
        let conn = self.lock()?;
        let t = corpus.table_name();

        conn.execute(&format!("INSERT INTO {t}_fts({t}_fts) VALUES('optimize')"), [])
            .with_context(|| format!("Failed to optimize {}_fts", t))?;

        tracing::info!("Optimized FTS5 index for {}", t);
        Ok(())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn map_chunk_row(row: &Row<'_>) -> rusqlite::Result<ChunkRecord> {
    Ok(ChunkRecord {
        id: row.get(0)?,
        source_key: row.get(1)?,
        text: row.get(2)?,
        device_type: row.get(3)?,
        device_model_used: row.get(4)?,
        url: row.get(5)?,
        page_number: row.get(6)?,
        doctype: row.get(7)?,
        created_at: parse_datetime(row.get::<_, String>(8)?),
    })
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// FTS5 MATCH 식 생성
///
/// 단어별로 따옴표로 감싸 OR로 연결합니다.
/// unicode61 토크나이저처럼 영숫자가 아닌 문자에서 끊습니다 (`50.4` → `50`, `4`).
/// source: https://www.sqlite.org/fts5.html#full_text_query_syntax
fn build_fts5_query(query: &str) -> String {
    let mut seen = HashSet::new();

    query
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| !w.is_empty() && seen.insert(w.clone()))
        .map(|w| format!("\"{}\"", w))
        .collect::<Vec<_>>()
        .join(" OR ")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, ChunkTextStore) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let store = ChunkTextStore::open(&db_path).unwrap();
        (dir, store)
    }

    fn manual_chunk(text: &str, device_type: &str, model_used: bool) -> NewChunk {
        NewChunk {
            text: text.to_string(),
            device_type: Some(device_type.to_string()),
            device_model_used: model_used,
            url: Some("https://example.com/manual.pdf".to_string()),
            page_number: Some(3),
            doctype: Some("pdf".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_and_get_chunks() {
        let (_dir, store) = create_test_store();

        let ids = store
            .insert_rows(
                Corpus::Manuals,
                "printer::M404",
                &[manual_chunk("Replace the fuser unit", "printer", true)],
            )
            .unwrap();
        assert_eq!(ids.len(), 1);

        let found = store.get_chunks(Corpus::Manuals, &ids).unwrap();
        let record = &found[&ids[0]];
        assert_eq!(record.source_key, "printer::M404");
        assert_eq!(record.page_number, Some(3));
        assert!(record.device_model_used);

        // 다른 코퍼스에는 없음
        assert!(store.get_chunks(Corpus::Tickets, &ids).unwrap().is_empty());
    }

    #[test]
    fn test_complete_and_partial_keys() {
        let (_dir, store) = create_test_store();

        store
            .insert_rows(Corpus::Tickets, "T-1", &[manual_chunk("a", "printer", false)])
            .unwrap();
        store.mark_complete(Corpus::Tickets, "T-1", 1).unwrap();

        // 완료 기록 없이 남은 행
        store
            .insert_rows(Corpus::Tickets, "T-2", &[manual_chunk("b", "printer", false)])
            .unwrap();

        // 행 없이 완료된 키
        store.mark_complete(Corpus::Tickets, "T-3", 0).unwrap();

        let complete = store.complete_source_keys(Corpus::Tickets).unwrap();
        assert_eq!(complete.len(), 2);
        assert!(complete.contains("T-1") && complete.contains("T-3"));

        let partial = store.partial_source_keys(Corpus::Tickets).unwrap();
        assert_eq!(partial, HashSet::from(["T-2".to_string()]));
    }

    #[test]
    fn test_delete_by_source_key() {
        let (_dir, store) = create_test_store();

        store
            .insert_rows(
                Corpus::Manuals,
                "printer",
                &[
                    manual_chunk("first page", "printer", false),
                    manual_chunk("second page", "printer", false),
                ],
            )
            .unwrap();
        store.mark_complete(Corpus::Manuals, "printer", 2).unwrap();

        let deleted = store.delete_by_source_key(Corpus::Manuals, "printer").unwrap();
        assert_eq!(deleted, 2);
        assert!(store.complete_source_keys(Corpus::Manuals).unwrap().is_empty());
        assert_eq!(store.counts(Corpus::Manuals).unwrap(), (0, 0));

        // FTS 인덱스도 트리거로 정리됨
        let hits = store
            .search_fts(Corpus::Manuals, "page", 10, &ScopeFilter::none())
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_search_fts_ranking_and_scope() {
        let (_dir, store) = create_test_store();

        store
            .insert_rows(
                Corpus::Manuals,
                "printer",
                &[
                    manual_chunk("Paper jam in tray two. Clear the paper jam.", "printer", false),
                    manual_chunk("Toner cartridge replacement", "printer", true),
                ],
            )
            .unwrap();
        store
            .insert_rows(
                Corpus::Manuals,
                "laptop",
                &[manual_chunk("Keyboard jammed keys", "laptop", false)],
            )
            .unwrap();

        // 스테밍: "jams", "jam", "jammed" 모두 "jam"
        let hits = store
            .search_fts(Corpus::Manuals, "jams", 10, &ScopeFilter::none())
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].rank, 1);
        let keys: HashSet<_> = hits.iter().map(|h| h.chunk.source_key.as_str()).collect();
        assert_eq!(keys, HashSet::from(["printer", "laptop"]));

        let hits = store
            .search_fts(Corpus::Manuals, "keyboards", 10, &ScopeFilter::none())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].chunk.text.contains("Keyboard"));

        let hits = store
            .search_fts(Corpus::Manuals, "jam keyboard toner", 10, &ScopeFilter::device("printer"))
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.chunk.device_type.as_deref() == Some("printer")));
        assert_eq!(hits[1].rank, 2);

        let exact = ScopeFilter {
            device_type: Some("printer".into()),
            exact_model_only: true,
        };
        let hits = store
            .search_fts(Corpus::Manuals, "jam toner", 10, &exact)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].chunk.text.contains("Toner"));
    }

    #[test]
    fn test_search_fts_empty_query() {
        let (_dir, store) = create_test_store();
        let hits = store
            .search_fts(Corpus::Tickets, "  !!  ", 10, &ScopeFilter::none())
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_build_fts5_query() {
        assert_eq!(build_fts5_query("hello world"), "\"hello\" OR \"world\"");
        assert_eq!(build_fts5_query("  "), "");
        assert_eq!(build_fts5_query("error:50.4"), "\"error\" OR \"50\" OR \"4\"");
        assert_eq!(build_fts5_query("E-102"), "\"e\" OR \"102\"");
        assert_eq!(build_fts5_query("Fuser fuser"), "\"fuser\"");
    }

    #[test]
    fn test_search_fts_fault_codes() {
        let (_dir, store) = create_test_store();

        store
            .insert_rows(
                Corpus::Tickets,
                "T-1",
                &[manual_chunk("Printer shows error 50.4 at warm up", "printer", false)],
            )
            .unwrap();
        store
            .insert_rows(
                Corpus::Tickets,
                "T-2",
                &[manual_chunk("Fault E-102 on display", "printer", false)],
            )
            .unwrap();

        for (query, key) in [("50.4", "T-1"), ("error:50.4", "T-1"), ("E-102", "T-2")] {
            let hits = store
                .search_fts(Corpus::Tickets, query, 10, &ScopeFilter::none())
                .unwrap();
            assert_eq!(hits.len(), 1, "query {}", query);
            assert_eq!(hits[0].chunk.source_key, key);
        }
    }

    #[test]
    fn test_get_chunks_propagates_sql_errors() {
        let (dir, store) = create_test_store();
        let ids = store
            .insert_rows(Corpus::Tickets, "T-1", &[manual_chunk("a", "printer", false)])
            .unwrap();

        // 없는 id는 조용히 빠짐
        assert!(store.get_chunks(Corpus::Tickets, &[ids[0] + 100]).unwrap().is_empty());

        // 타입이 맞지 않는 행은 "없음"이 아니라 에러
        let other = Connection::open(dir.path().join("test.db")).unwrap();
        other
            .execute("UPDATE tickets SET page_number = 'three' WHERE id = ?1", params![ids[0]])
            .unwrap();
        assert!(store.get_chunks(Corpus::Tickets, &ids).is_err());
    }
}
