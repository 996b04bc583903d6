//! 매뉴얼 관련성 판단 및 청크 생성

use anyhow::{Context, Result};

use super::source::{ManualBundle, ManualListing};
use crate::embedding::EmbeddingProvider;
use crate::extractor::{self, DocType};
use crate::knowledge::{NewChunk, PageChunker};

/// 관련 매뉴얼 키워드
const RELEVANT_KEYWORDS: &[&str] = &[
    "maintenance",
    "repair",
    "troubleshooting",
    "service",
    "diagnostics",
    "troubleshoot",
];

/// 카테고리 필드 이름인지 (`cat_name`, `cat1_name`, `cat12_name` ...)
fn is_category_field(name: &str) -> bool {
    name.match_indices("cat").any(|(i, _)| {
        let rest = &name[i + 3..];
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        rest[digits..].starts_with("_name")
    })
}

fn mentions_keyword(value: &str) -> bool {
    let value = value.to_lowercase();
    RELEVANT_KEYWORDS.iter().any(|k| value.contains(k))
}

/// 정비/수리 관련 매뉴얼인지 판단
///
/// `contentType`과 `cat*_name` 필드 중 하나라도 키워드를 포함하면 관련 문서입니다.
pub fn is_relevant(listing: &ManualListing) -> bool {
    if listing.content_type.as_deref().is_some_and(mentions_keyword) {
        return true;
    }
    listing
        .extra
        .iter()
        .filter(|(key, _)| is_category_field(key))
        .any(|(_, value)| value.as_str().is_some_and(mentions_keyword))
}

/// 장비 매뉴얼 묶음을 임베딩된 청크로 변환
///
/// 문서 하나라도 파싱에 실패하면 키 전체가 실패합니다.
pub async fn build_manual_chunks(
    bundle: ManualBundle,
    embedder: &dyn EmbeddingProvider,
) -> Result<Vec<NewChunk>> {
    let chunker = PageChunker::default();
    let device_type = bundle.device.device_type.clone();
    let mut rows = Vec::new();

    for document in bundle.documents {
        let elements = extractor::extract_elements(document.doctype, document.bytes)
            .await
            .with_context(|| format!("Failed to parse manual {}", document.url))?;

        let chunks = chunker.chunk(&elements);
        if chunks.is_empty() {
            tracing::warn!("No text extracted from manual {}", document.url);
            continue;
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = embedder
            .embed_batch(&texts)
            .await
            .with_context(|| format!("Failed to embed manual {}", document.url))?;

        tracing::debug!("{}: {} chunks", document.url, chunks.len());

        for (chunk, embedding) in chunks.into_iter().zip(embeddings) {
            rows.push(NewChunk {
                text: chunk.text,
                embedding,
                device_type: Some(device_type.clone()),
                device_model_used: bundle.device_model_used,
                url: Some(document.url.clone()),
                // HTML은 페이지 개념 없음
                page_number: match document.doctype {
                    DocType::Pdf => Some(chunk.page_number),
                    DocType::Html => None,
                },
                doctype: Some(document.doctype.to_string()),
            });
        }
    }

    Ok(rows)
}

// ============================================================================
// Tests
// ============================================================================
