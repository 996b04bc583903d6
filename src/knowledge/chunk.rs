//! Chunk 타입 및 ChunkStore 트레이트
//!
//! 두 코퍼스(과거 티켓, 제조사 매뉴얼)의 청크 저장소 공통 인터페이스입니다.
//! - source_key: 출처 식별자 (동기화 diff 전용, 랭킹에는 사용하지 않음)
//! - 청크는 임베딩 후 불변, 갱신은 같은 source_key로 삭제 후 재삽입

use std::collections::HashSet;
use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

// ============================================================================
// Corpus
// ============================================================================

/// 코퍼스 선택자
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Corpus {
    /// 과거 티켓
    Tickets,
    /// 제조사 매뉴얼
    Manuals,
}

impl Corpus {
    pub const ALL: [Corpus; 2] = [Corpus::Tickets, Corpus::Manuals];

    /// SQLite 테이블 이름
    pub fn table_name(&self) -> &'static str {
        match self {
            Corpus::Tickets => "tickets",
            Corpus::Manuals => "manuals",
        }
    }

    /// LanceDB 테이블 이름
    pub fn vector_table_name(&self) -> &'static str {
        match self {
            Corpus::Tickets => "tickets_vectors",
            Corpus::Manuals => "manuals_vectors",
        }
    }
}

impl fmt::Display for Corpus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

// ============================================================================
// Types
// ============================================================================

/// 새 청크 입력 (저장소가 id, source_key, created_at 부여)
#[derive(Debug, Clone, Default)]
pub struct NewChunk {
    /// 청크 텍스트 (임베딩 전용이면 빈 문자열)
    pub text: String,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
    pub device_type: Option<String>,
    /// 정확한 장비 모델로 찾은 매뉴얼인지 여부
    pub device_model_used: bool,
    /// 매뉴얼 원본 URL
    pub url: Option<String>,
    /// 매뉴얼 페이지 번호 (1부터)
    pub page_number: Option<i64>,
    /// pdf / html
    pub doctype: Option<String>,
}

/// 저장된 청크 (임베딩 제외)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkRecord {
    pub id: i64,
    pub source_key: String,
    pub text: String,
    pub device_type: Option<String>,
    pub device_model_used: bool,
    pub url: Option<String>,
    pub page_number: Option<i64>,
    pub doctype: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 단일 검색 패스 결과 (1-based rank)
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub chunk: ChunkRecord,
    /// 패스 내 순위 (1 = 최상위)
    pub rank: usize,
    /// 패스별 원점수 (패스 간 비교 불가)
    pub raw_score: f64,
}

/// 검색 범위 제한
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeFilter {
    /// 장비 유형 제한
    pub device_type: Option<String>,
    /// device_model_used = true 청크만
    pub exact_model_only: bool,
}

impl ScopeFilter {
    /// 제한 없음
    pub fn none() -> Self {
        Self::default()
    }

    /// 장비 유형으로 제한
    pub fn device(device_type: impl Into<String>) -> Self {
        Self {
            device_type: Some(device_type.into()),
            exact_model_only: false,
        }
    }

    /// 청크가 범위에 포함되는지 확인
    pub fn matches(&self, chunk: &ChunkRecord) -> bool {
        if let Some(ref device_type) = self.device_type {
            if chunk.device_type.as_deref() != Some(device_type.as_str()) {
                return false;
            }
        }
        !self.exact_model_only || chunk.device_model_used
    }
}

/// 코퍼스 통계
#[derive(Debug, Clone, Default, Serialize)]
pub struct CorpusStats {
    pub chunk_count: usize,
    pub vector_count: usize,
    /// 완료 처리된 source_key 수
    pub source_key_count: usize,
}

// ============================================================================
// ChunkStore Trait
// ============================================================================

/// Chunk Store 트레이트 (async)
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_chunks`](ChunkStore::insert_chunks) | source_key 단위 삽입 + 완료 기록 |
/// | [`delete_by_source_key`](ChunkStore::delete_by_source_key) | source_key의 모든 청크 삭제 |
/// | [`dense_search`](ChunkStore::dense_search) | 코사인 유사도 최근접 검색 |
/// | [`lexical_search`](ChunkStore::lexical_search) | 전문 검색 (BM25) |
/// | [`list_source_keys`](ChunkStore::list_source_keys) | 완료된 source_key 목록 |
///
/// 접속 불가 에러는 [`RagError::StoreUnavailable`](crate::error::RagError)로 반환해야 합니다.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// 설정된 임베딩 차원
    fn dimension(&self) -> usize;

    /// 이미 저장된 벡터 컬럼 차원 (테이블이 없으면 None)
    async fn stored_dimension(&self, corpus: Corpus) -> Result<Option<usize>>;

    /// source_key로 태그된 청크 삽입
    ///
    /// 모든 행이 기록된 뒤 source_key를 완료로 표시합니다.
    /// 행이 없어도 완료로 기록됩니다.
    async fn insert_chunks(&self, corpus: Corpus, source_key: &str, rows: &[NewChunk])
        -> Result<usize>;

    /// source_key의 모든 청크 및 완료 기록 삭제
    async fn delete_by_source_key(&self, corpus: Corpus, source_key: &str) -> Result<usize>;

    /// 벡터 검색 (유사도 내림차순)
    async fn dense_search(
        &self,
        corpus: Corpus,
        query_embedding: &[f32],
        top_k: usize,
        scope: &ScopeFilter,
    ) -> Result<Vec<ChunkHit>>;

    /// 전문 검색 (관련도 내림차순)
    async fn lexical_search(
        &self,
        corpus: Corpus,
        query_text: &str,
        top_k: usize,
        scope: &ScopeFilter,
    ) -> Result<Vec<ChunkHit>>;

    /// 완료된 source_key 목록
    async fn list_source_keys(&self, corpus: Corpus) -> Result<HashSet<String>>;

    /// 행은 남아 있지만 완료 기록이 없는 source_key (중단된 실행의 잔여물)
    async fn list_partial_source_keys(&self, _corpus: Corpus) -> Result<HashSet<String>> {
        Ok(HashSet::new())
    }

    /// 코퍼스 통계
    async fn stats(&self, corpus: Corpus) -> Result<CorpusStats>;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산 (-1.0 ~ 1.0)
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// SQL 문자열 리터럴 이스케이프 (LanceDB 필터용)
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

// ============================================================================
// Tests
// ============================================================================
