//! Google Gemini 임베딩 (remote)
//!
//! source: https://ai.google.dev/gemini-api/docs/embeddings

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::EmbeddingProvider;
use crate::error::RagError;

/// 기본 모델 (MRL 지원)
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-embedding-001";

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Rate Limiter 설정 (Gemini 무료 티어: 60 RPM)
const RATE_LIMIT_RPM: u32 = 60;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
/// 호출 간 최소 딜레이
const MIN_DELAY_MS: u64 = 1000;
/// 429 / 전송 실패 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000;

// ============================================================================
// Rate Limiter
// ============================================================================

/// 슬라이딩 윈도우 + 최소 간격 Rate Limiter
#[derive(Debug)]
struct RateLimiter {
    requests: Vec<Instant>,
    max_requests: u32,
    window: Duration,
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl RateLimiter {
    fn new(max_requests: u32, window: Duration, min_delay: Duration) -> Self {
        Self {
            requests: Vec::new(),
            max_requests,
            window,
            min_delay,
            last_request: None,
        }
    }

    /// 요청 슬롯을 얻을 때까지 대기
    async fn acquire(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                tokio::time::sleep(self.min_delay - elapsed).await;
            }
        }

        let now = Instant::now();
        self.requests.retain(|&t| now.duration_since(t) < self.window);

        if self.requests.len() >= self.max_requests as usize {
            if let Some(&oldest) = self.requests.first() {
                let wait_time = self.window.saturating_sub(now.duration_since(oldest));
                if !wait_time.is_zero() {
                    tracing::debug!("Rate limit reached, waiting {:?}", wait_time);
                    tokio::time::sleep(wait_time).await;
                }
                let now = Instant::now();
                self.requests.retain(|&t| now.duration_since(t) < self.window);
            }
        }

        let now = Instant::now();
        self.requests.push(now);
        self.last_request = Some(now);
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: String,
    content: EmbedContent<'a>,
    #[serde(rename = "taskType")]
    task_type: &'static str,
    #[serde(rename = "outputDimensionality")]
    output_dimensionality: usize,
}

#[derive(Debug, Serialize)]
struct EmbedContent<'a> {
    parts: Vec<EmbedPart<'a>>,
}

#[derive(Debug, Serialize)]
struct EmbedPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

// ============================================================================
// GeminiEmbedding
// ============================================================================

/// Gemini 임베딩 프로바이더
///
/// 문서는 `RETRIEVAL_DOCUMENT`, 쿼리는 `RETRIEVAL_QUERY` 태스크로 임베딩합니다.
#[derive(Debug)]
pub struct GeminiEmbedding {
    api_key: String,
    model: String,
    client: reqwest::Client,
    dimension: usize,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl GeminiEmbedding {
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `model` - 모델 이름 (None이면 gemini-embedding-001)
    /// * `dimension` - 출력 차원 (768, 1536, 3072)
    /// * `timeout` - 요청 타임아웃
    pub fn new(
        api_key: String,
        model: Option<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self> {
        if ![768, 1536, 3072].contains(&dimension) {
            return Err(RagError::Configuration(format!(
                "Invalid Gemini dimension: {}. Must be 768, 1536, or 3072",
                dimension
            ))
            .into());
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            client,
            dimension,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(
                RATE_LIMIT_RPM,
                RATE_LIMIT_WINDOW,
                Duration::from_millis(MIN_DELAY_MS),
            ))),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:embedContent", GEMINI_API_BASE, self.model)
    }

    async fn request(&self, text: &str, task_type: &'static str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let request = EmbedRequest {
            model: format!("models/{}", self.model),
            content: EmbedContent {
                parts: vec![EmbedPart { text }],
            },
            task_type,
            output_dimensionality: self.dimension,
        };

        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=MAX_RETRIES {
            self.rate_limiter.lock().await.acquire().await;
            let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));

            // API 키는 URL이 아닌 헤더로 전송
            let response = match self
                .client
                .post(self.endpoint())
                .header("x-goog-api-key", &self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send embedding request: {}", e));
                    if attempt < MAX_RETRIES {
                        tracing::warn!(
                            "Embedding request failed, retrying in {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    continue;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.is_success() {
                let parsed: EmbedResponse =
                    serde_json::from_str(&body).context("Failed to parse embedding response")?;
                let values = parsed.embedding.values;
                if values.len() != self.dimension {
                    return Err(
                        RagError::dimension_mismatch(&self.model, self.dimension, values.len())
                            .into(),
                    );
                }
                return Ok(values);
            }

            if status.as_u16() == 429 {
                tracing::warn!(
                    "Rate limit hit (429), backing off {:?} (attempt {}/{})",
                    backoff,
                    attempt + 1,
                    MAX_RETRIES
                );
                last_error = Some(anyhow::anyhow!("Rate limit exceeded (429)"));
                if attempt < MAX_RETRIES {
                    tokio::time::sleep(backoff).await;
                }
                continue;
            }

            if let Ok(error) = serde_json::from_str::<GeminiError>(&body) {
                anyhow::bail!(
                    "Gemini API error ({}): {}",
                    error.error.status,
                    error.error.message
                );
            }
            anyhow::bail!("Gemini API error ({}): {}", status, body);
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Embedding failed after {} retries", MAX_RETRIES)))
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.request(text, "RETRIEVAL_DOCUMENT").await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.request(text, "RETRIEVAL_QUERY").await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// 환경변수에서 API 키 로드
///
/// 우선순위: `GEMINI_API_KEY` > `GOOGLE_AI_API_KEY`
pub fn get_api_key() -> Result<String> {
    for var in ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"] {
        if let Ok(key) = std::env::var(var) {
            if !key.is_empty() {
                tracing::debug!("Using API key from {}", var);
                return Ok(key);
            }
        }
    }

    Err(RagError::Configuration(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
            .into(),
    )
    .into())
}

/// API 키 설정 여부
pub fn has_api_key() -> bool {
    ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"]
        .iter()
        .any(|var| std::env::var(var).map(|k| !k.is_empty()).unwrap_or(false))
}

// ============================================================================
// Tests
// ============================================================================
