//! 콘텐츠 추출 모듈 - 매뉴얼 문서를 페이지 요소로 변환
//!
//! - PDF: pdf-extract (spawn_blocking)
//! - HTML: scraper

pub mod html;
pub mod pdf;

use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::knowledge::PageElement;

// ============================================================================
// Document Type
// ============================================================================

/// 매뉴얼 문서 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Pdf,
    Html,
}

impl DocType {
    /// URL/경로와 파일 크기 정보로 형식 추정
    ///
    /// `.pdf`가 들어 있거나 파일 크기가 명시된 항목은 PDF로 봅니다.
    pub fn detect(location: &str, has_file_bytes: bool) -> Self {
        if has_file_bytes || location.to_lowercase().contains("pdf") {
            DocType::Pdf
        } else {
            DocType::Html
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Pdf => "pdf",
            DocType::Html => "html",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Extraction
// ============================================================================

/// 문서 바이트에서 페이지 요소 추출
pub async fn extract_elements(doctype: DocType, bytes: Vec<u8>) -> Result<Vec<PageElement>> {
    match doctype {
        DocType::Pdf => {
            // PDF 추출은 CPU 바운드
            tokio::task::spawn_blocking(move || pdf::extract_elements(&bytes))
                .await
                .context("PDF extraction task failed")?
        }
        DocType::Html => {
            let text = String::from_utf8_lossy(&bytes);
            Ok(html::extract_elements(&text))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_doctype() {
        assert_eq!(DocType::detect("https://x.com/manual.PDF", false), DocType::Pdf);
        assert_eq!(DocType::detect("https://x.com/doc?id=1", true), DocType::Pdf);
        assert_eq!(DocType::detect("https://x.com/doc?id=1", false), DocType::Html);
        assert_eq!(DocType::Html.to_string(), "html");
    }

    #[tokio::test]
    async fn test_extract_html_bytes() {
        let html = b"<html><body><main><h2>Reset</h2><p>Hold the power button.</p></main></body></html>";
        let elements = extract_elements(DocType::Html, html.to_vec()).await.unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].text, "## Reset");
    }

    #[tokio::test]
    async fn test_extract_broken_pdf_is_error() {
        assert!(extract_elements(DocType::Pdf, b"%PDF-garbage".to_vec())
            .await
            .is_err());
    }
}
