//! 에러 분류
//!
//! 대부분의 경로는 `anyhow::Result`를 그대로 쓰고, 호출자가 분기해야 하는
//! 경우에만 [`RagError`]를 에러 체인에 심어 둡니다.
//!
//! - Configuration: 프로세스 종료 (임베딩 차원 불일치, 잘못된 설정)
//! - TransientFetch: 동기화 중 키 단위로 건너뜀
//! - StoreUnavailable: 현재 동기화/쿼리 중단
//! - SourceUnavailable: 외부 키 목록을 믿을 수 없음, 동기화 중단 (삭제 단계 진입 전)

use thiserror::Error;

/// 호출자가 구분해서 처리해야 하는 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 설정 오류 (복구 불가)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 소스 콘텐츠 조회/파싱 실패 (키 단위 복구 가능)
    #[error("failed to fetch '{key}': {message}")]
    TransientFetch { key: String, message: String },

    /// Chunk Store 접근 불가 (실행 중단)
    #[error("chunk store unavailable: {0}")]
    StoreUnavailable(String),

    /// Source of Truth 목록 조회 불가 (실행 중단)
    #[error("source of truth unavailable: {0}")]
    SourceUnavailable(String),
}

impl RagError {
    /// 임베딩 차원 불일치 에러 생성
    pub fn dimension_mismatch(what: &str, expected: usize, actual: usize) -> Self {
        Self::Configuration(format!(
            "embedding dimension mismatch ({}): expected {}, got {}",
            what, expected, actual
        ))
    }

    /// 실행을 중단해야 하는 에러인지 여부
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::StoreUnavailable(_) | Self::SourceUnavailable(_)
        )
    }
}

/// 에러 체인에서 [`RagError`] 찾기
///
/// `.context()`로 감싼 에러도 찾아냅니다.
pub fn find_rag_error(err: &anyhow::Error) -> Option<&RagError> {
    if let Some(e) = err.downcast_ref::<RagError>() {
        return Some(e);
    }
    err.chain().find_map(|cause| cause.downcast_ref::<RagError>())
}

/// 실행 전체를 중단해야 하는 에러인지 확인
pub fn is_fatal(err: &anyhow::Error) -> bool {
    find_rag_error(err).map(RagError::is_fatal).unwrap_or(false)
}

// ============================================================================
// Tests
// ============================================================================
