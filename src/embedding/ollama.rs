//! Ollama 로컬 임베딩 (local)
//!
//! `POST {endpoint}/api/embed` 에 `{model, input: [..]}`를 보내고
//! `{embeddings: [[..]]}`를 받습니다.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::EmbeddingProvider;
use crate::error::RagError;

pub const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "nomic-embed-text";

/// 한 요청에 보내는 최대 입력 수
const MAX_BATCH: usize = 32;

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Ollama 임베딩 프로바이더
#[derive(Debug)]
pub struct OllamaEmbedding {
    base_url: String,
    model: String,
    dimension: usize,
    client: reqwest::Client,
}

impl OllamaEmbedding {
    pub fn new(
        base_url: Option<String>,
        model: Option<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_OLLAMA_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
            dimension,
            client,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&OllamaEmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .with_context(|| format!("Ollama unreachable at {}", self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama returned {}: {}", status, body);
        }

        let parsed: OllamaEmbedResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        if parsed.embeddings.len() != texts.len() {
            anyhow::bail!(
                "Ollama returned {} embeddings for {} inputs",
                parsed.embeddings.len(),
                texts.len()
            );
        }
        if let Some(bad) = parsed.embeddings.iter().find(|v| v.len() != self.dimension) {
            return Err(
                RagError::dimension_mismatch(&self.model, self.dimension, bad.len()).into(),
            );
        }

        Ok(parsed.embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.request(&[text.to_string()]).await?;
        out.pop()
            .ok_or_else(|| anyhow::anyhow!("Ollama returned no embedding"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_BATCH) {
            results.extend(self.request(batch).await?);
        }
        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}
