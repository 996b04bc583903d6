//! HTML 매뉴얼 파싱
//!
//! 본문 컨테이너를 찾아 제목/문단/목록 항목을 Markdown 스타일 요소로 변환합니다.
//! - `h1`~`h6` → `#` 개수로 깊이 표현
//! - 연속된 `li` → `- item` 줄들을 하나의 요소로
//! - 나머지 블록 → 공백 정리된 텍스트

use scraper::{ElementRef, Html, Selector};

use crate::knowledge::PageElement;

/// 본문 컨테이너 후보 (우선순위 순)
const CONTENT_SELECTORS: &[&str] = &[
    ".document-wapper-container",
    "article",
    "main",
    "[role=main]",
    "#content",
    ".content",
    "body",
];

const BLOCK_SELECTOR: &str = "h1, h2, h3, h4, h5, h6, p, li, td, pre";

/// HTML 문서에서 요소 추출 (HTML은 페이지 개념이 없어 모두 page 1)
pub fn extract_elements(html: &str) -> Vec<PageElement> {
    let document = Html::parse_document(html);
    let Some(root) = find_content_root(&document) else {
        return vec![];
    };

    elements_to_text(root)
        .into_iter()
        .map(|text| PageElement::new(text, 1))
        .collect()
}

fn find_content_root(document: &Html) -> Option<ElementRef<'_>> {
    CONTENT_SELECTORS.iter().find_map(|sel| {
        let selector = Selector::parse(sel).ok()?;
        document
            .select(&selector)
            .find(|el| !collapse(&el.text().collect::<String>()).is_empty())
    })
}

fn elements_to_text(root: ElementRef<'_>) -> Vec<String> {
    let Ok(blocks) = Selector::parse(BLOCK_SELECTOR) else {
        return vec![];
    };

    let mut out = Vec::new();
    let mut current_list: Vec<String> = Vec::new();

    for el in root.select(&blocks) {
        // 중첩 블록(li 안의 p 등)은 바깥 블록에서 이미 처리됨
        if el
            .ancestors()
            .filter_map(ElementRef::wrap)
            .take_while(|a| a.id() != root.id())
            .any(|a| matches!(a.value().name(), "p" | "li" | "td" | "pre" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6"))
        {
            continue;
        }

        let text = collapse(&el.text().collect::<String>());
        if text.is_empty() {
            continue;
        }

        let name = el.value().name();
        if name == "li" {
            current_list.push(format!("- {}", text));
            continue;
        }

        if !current_list.is_empty() {
            out.push(current_list.join("\n"));
            current_list.clear();
        }

        match heading_depth(name) {
            Some(depth) => out.push(format!("{} {}", "#".repeat(depth), text)),
            None => out.push(text),
        }
    }

    if !current_list.is_empty() {
        out.push(current_list.join("\n"));
    }

    out
}

fn heading_depth(name: &str) -> Option<usize> {
    let depth = name.strip_prefix('h')?.parse::<usize>().ok()?;
    (1..=6).contains(&depth).then_some(depth)
}

/// 연속 공백 정리
fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// Tests
// ============================================================================
