//! 임베딩 모듈 - 텍스트 벡터화
//!
//! 시작 시 [`create_embedder`]로 한 번 선택해서 `Arc<dyn EmbeddingProvider>`로 주입합니다.
//! - local: Ollama
//! - remote: Google Gemini
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = create_embedder(&config.embedding)?;
//! let embedding = embedder.embed_query("printer shows 50.4").await?;
//! ```

mod gemini;
mod ollama;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{Deployment, EmbeddingConfig};

pub use gemini::{get_api_key, has_api_key, GeminiEmbedding, DEFAULT_GEMINI_MODEL};
pub use ollama::{OllamaEmbedding, DEFAULT_OLLAMA_ENDPOINT, DEFAULT_OLLAMA_MODEL};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 반환 벡터의 길이는 항상 [`dimension`](EmbeddingProvider::dimension)과 같아야 합니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 문서(청크) 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 검색 쿼리 임베딩 (기본: 문서와 동일)
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text).await
    }

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            tracing::debug!("Embedding {}/{}", i + 1, texts.len());
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 따라 임베딩 프로바이더 생성
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let timeout = Duration::from_secs(config.timeout_secs);

    let embedder: Arc<dyn EmbeddingProvider> = match config.deployment {
        Deployment::Local => Arc::new(OllamaEmbedding::new(
            config.endpoint.clone(),
            config.model.clone(),
            config.dimension,
            timeout,
        )?),
        Deployment::Remote => Arc::new(GeminiEmbedding::new(
            get_api_key()?,
            config.model.clone(),
            config.dimension,
            timeout,
        )?),
    };

    tracing::info!(
        "Using {} embedding (dimension: {})",
        embedder.name(),
        embedder.dimension()
    );
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_local_embedder() {
        let config = EmbeddingConfig {
            deployment: Deployment::Local,
            dimension: 512,
            ..Default::default()
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.dimension(), 512);
        assert_eq!(embedder.name(), DEFAULT_OLLAMA_MODEL);
    }

    #[tokio::test]
    async fn test_default_embed_query_and_batch() {
        let embedder = testing::HashEmbedding::new(16);
        let q = embedder.embed_query("fuser error").await.unwrap();
        let d = embedder.embed("fuser error").await.unwrap();
        assert_eq!(q, d);

        let batch = embedder
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|v| v.len() == 16));
    }
}
