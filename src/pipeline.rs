//! 신규 티켓 처리 파이프라인
//!
//! ```text
//! 전처리 → 요약/쿼리 문자열 생성 → 컨텍스트 검색 → 해결책 생성 → 응답
//! ```
//!
//! 생성(LLM) 단계는 [`ResolutionGenerator`] 뒤에 있고 구현은 이 크레이트 밖에 둡니다.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::retrieval::{RetrievalContext, Retriever};
use crate::sync::process_description;

// ============================================================================
// Types
// ============================================================================

/// 신규 티켓 요청
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketRequest {
    pub description: String,
    pub device_type: String,
}

/// 문제 요약과 검색용 쿼리 문자열
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySummary {
    pub description: String,
    pub query_string: String,
}

/// 생성 단계가 돌려주는 해결책
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub issue: String,
    pub cause: String,
    pub remote_fix: bool,
    pub solution: String,
    pub spare_parts: Vec<String>,
}

/// 티켓 처리 응답
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketResponse {
    #[serde(flatten)]
    pub resolution: Resolution,
    pub summary_json: QuerySummary,
    pub context: RetrievalContext,
}

// ============================================================================
// ResolutionGenerator Trait
// ============================================================================

/// 생성 단계 인터페이스
#[async_trait]
pub trait ResolutionGenerator: Send + Sync {
    /// 전처리된 설명 → 요약 + 쿼리 문자열
    async fn summarize(&self, description: &str) -> Result<QuerySummary>;

    /// 설명 + 검색 컨텍스트 → 해결책
    async fn resolve(&self, description: &str, context: &RetrievalContext) -> Result<Resolution>;
}

// ============================================================================
// Pipeline
// ============================================================================

/// 신규 티켓 하나 처리
pub async fn process_ticket(
    request: &TicketRequest,
    retriever: &Retriever,
    generator: &dyn ResolutionGenerator,
) -> Result<TicketResponse> {
    // 쿼리 경로는 최소 길이 제한 없음
    let description = process_description(&request.description, false, 0)
        .context("Ticket description is empty after preprocessing")?;
    tracing::debug!("Preprocessed description ({} chars)", description.len());

    let summary = generator
        .summarize(&description)
        .await
        .context("Failed to generate query summary")?;
    tracing::info!("Query string: {}", summary.query_string);

    let context = retriever
        .retrieve(&summary.query_string, Some(request.device_type.as_str()))
        .await
        .context("Failed to retrieve context")?;
    tracing::info!(
        "Retrieved {} tickets, {} manual chunks",
        context.tickets.len(),
        context.manuals.len()
    );

    let resolution = generator
        .resolve(&description, &context)
        .await
        .context("Failed to generate resolution")?;

    Ok(TicketResponse {
        resolution,
        summary_json: summary,
        context,
    })
}

// ============================================================================
// Tests
// ============================================================================
