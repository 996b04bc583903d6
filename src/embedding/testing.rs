//! 테스트용 결정적 임베딩
//!
//! 단어를 해시 버킷에 누적한 뒤 정규화합니다. 단어가 겹칠수록 코사인 유사도가 높습니다.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;

use super::EmbeddingProvider;

pub struct HashEmbedding {
    dimension: usize,
    calls: AtomicUsize,
    fail_on: Option<String>,
}

impl HashEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
            fail_on: None,
        }
    }

    /// 이 문자열을 포함한 텍스트는 임베딩 실패
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self
    }

    /// embed / embed_query 호출 횟수
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            v[(hasher.finish() as usize) % self.dimension] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ref needle) = self.fail_on {
            if text.contains(needle.as_str()) {
                anyhow::bail!("embedding service rejected input");
            }
        }
        Ok(self.vector(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash"
    }
}
