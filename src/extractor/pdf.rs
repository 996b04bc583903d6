//! PDF 매뉴얼 파싱
//!
//! pdf-extract로 텍스트를 뽑아 페이지별로 나눈 뒤, 문단 단위 요소로 변환합니다.
//! 본문이 아닌 페이지는 건너뜁니다:
//! - 표지 (첫 페이지가 짧거나 저작권 표기 포함)
//! - 앞쪽 11페이지 안의 notices/acknowledgments 페이지
//! - 목차 페이지와 그 앞의 모든 페이지
//! - 목차에 나온 후반부 섹션 (index, specifications, recycling, acronyms 등)

use std::collections::BTreeSet;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::knowledge::PageElement;

/// 표지로 보는 단어 수 상한
const TITLE_PAGE_MAX_WORDS: usize = 100;

/// notices/acknowledgments를 찾는 마지막 페이지 인덱스
const NOTICE_PAGE_LIMIT: usize = 10;

/// 목차를 찾는 페이지 인덱스 상한 (미포함)
const TOC_PAGE_LIMIT: usize = 20;

struct Patterns {
    toc_line: Regex,
    toc_entry: Regex,
    toc_heading: Regex,
    title_marker: Regex,
    notices: Regex,
    back_matter: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        toc_line: Regex::new(r"\.{2,}\s*\d+\s*$").unwrap(),
        toc_entry: Regex::new(r"^\s*(.*?\S)\s*\.{2,}\s*(\d+)\s*$").unwrap(),
        toc_heading: Regex::new(r"(?im)^\s*(table of )?contents\s*$").unwrap(),
        title_marker: Regex::new(r"(?i)\bauthor\b|\bcopyright\b|all rights reserved|©").unwrap(),
        notices: Regex::new(r"(?i)\b(notices|acknowledge?ments)\b").unwrap(),
        back_matter: Regex::new(
            r"(?i)other resources|additional resources|\bacronyms\b|\babbreviations\b|\babstract\b|\bindex\b|\brecycling\b|\bspecifications\b",
        )
        .unwrap(),
    })
}

/// PDF 바이트에서 페이지 요소 추출
///
/// CPU 바운드라서 호출자는 `spawn_blocking` 안에서 실행해야 합니다.
pub fn extract_elements(bytes: &[u8]) -> Result<Vec<PageElement>> {
    let text = pdf_extract::extract_text_from_mem(bytes).context("Failed to extract text from PDF")?;

    if text.trim().is_empty() {
        tracing::warn!("No text extracted from PDF. It might be a scanned document.");
        return Ok(vec![]);
    }

    let pages = split_pdf_pages(&text);
    let skipped = irrelevant_pages(&pages);
    if !skipped.is_empty() {
        tracing::debug!("Skipping {} of {} PDF pages: {:?}", skipped.len(), pages.len(), skipped);
    }

    let mut elements = Vec::new();
    for (i, page) in pages.iter().enumerate() {
        if skipped.contains(&i) {
            continue;
        }
        let page_number = (i + 1) as i64;
        elements.extend(
            page_to_elements(page)
                .into_iter()
                .map(|text| PageElement::new(text, page_number)),
        );
    }

    Ok(elements)
}

/// PDF 텍스트를 페이지별로 분리 (폼피드 문자 기준)
fn split_pdf_pages(text: &str) -> Vec<String> {
    let pages: Vec<String> = text.split('\x0c').map(|s| s.trim().to_string()).collect();

    if pages.iter().filter(|p| !p.is_empty()).count() > 1 {
        pages
    } else {
        vec![text.trim().to_string()]
    }
}

/// 본문이 아닌 페이지 인덱스 (0부터)
fn irrelevant_pages(pages: &[String]) -> BTreeSet<usize> {
    let p = patterns();
    let mut skipped = BTreeSet::new();

    // 페이지 구분이 없는 문서는 통째로 본문
    if pages.len() < 2 {
        return skipped;
    }

    if pages.first().is_some_and(|first| is_title_page(first)) {
        skipped.insert(0);
    }

    let mut in_toc = false;
    let mut entries = Vec::new();

    for (i, page) in pages.iter().enumerate() {
        if i <= NOTICE_PAGE_LIMIT && p.notices.is_match(page) {
            skipped.insert(i);
        }

        if i >= TOC_PAGE_LIMIT {
            continue;
        }

        // 목차가 여러 페이지면 다음 페이지는 점선 줄만으로 판단
        let toc = is_toc_page(page) || (in_toc && dotted_lines(page) > 2);
        if toc {
            if !in_toc {
                // 첫 목차 페이지 앞은 서문
                skipped.extend(0..i);
            }
            skipped.insert(i);
            entries.extend(toc_entries(page));
        }
        in_toc = toc;
    }

    skipped.extend(back_matter_pages(&entries, pages.len()));
    skipped
}

/// 표지 판별 (단어 수가 적거나 저작권 표기)
fn is_title_page(page: &str) -> bool {
    page.split_whitespace().count() < TITLE_PAGE_MAX_WORDS || patterns().title_marker.is_match(page)
}

fn dotted_lines(page: &str) -> usize {
    page.lines().filter(|l| patterns().toc_line.is_match(l)).count()
}

/// 목차 페이지 판별 ("Contents" 제목 줄, 또는 점선 + 페이지 번호 줄이 다수)
fn is_toc_page(page: &str) -> bool {
    if patterns().toc_heading.is_match(page) {
        return true;
    }
    let lines = page.lines().filter(|l| !l.trim().is_empty()).count();
    let hits = dotted_lines(page);
    hits >= 5 && hits * 2 >= lines
}

/// 목차 항목 (제목, 인쇄된 페이지 번호)
fn toc_entries(page: &str) -> Vec<(String, usize)> {
    page.lines()
        .filter_map(|line| {
            let caps = patterns().toc_entry.captures(line)?;
            let page_number = caps[2].parse().ok()?;
            Some((caps[1].to_string(), page_number))
        })
        .collect()
}

/// 후반부 섹션이 차지하는 페이지 인덱스
///
/// 섹션은 다음 일반 항목의 페이지 직전까지, 뒤에 항목이 없으면 문서 끝까지입니다.
/// 인쇄된 페이지 번호 N은 인덱스 N-1로 봅니다.
fn back_matter_pages(entries: &[(String, usize)], page_count: usize) -> BTreeSet<usize> {
    let back_matter = &patterns().back_matter;
    let mut skipped = BTreeSet::new();

    for (i, (title, start)) in entries.iter().enumerate() {
        if *start == 0 || !back_matter.is_match(title) {
            continue;
        }
        let end = entries[i + 1..]
            .iter()
            .find(|(next, page)| *page > *start && !back_matter.is_match(next))
            .map(|(_, page)| *page)
            .unwrap_or(page_count + 1);

        skipped.extend((start - 1)..(end - 1).min(page_count));
    }

    skipped
}

/// 페이지 텍스트를 문단 요소로 변환
///
/// 짧은 단독 줄 중 제목처럼 보이는 것은 `# `를 붙입니다.
fn page_to_elements(page: &str) -> Vec<String> {
    page.split("\n\n")
        .map(|para| para.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|para| !para.is_empty())
        .map(|para| {
            if looks_like_heading(&para) {
                format!("# {}", para)
            } else {
                para
            }
        })
        .collect()
}

/// 제목 휴리스틱: 짧고, 문장부호로 끝나지 않고, 대문자이거나 번호로 시작
fn looks_like_heading(line: &str) -> bool {
    let len = line.chars().count();
    if !(3..=80).contains(&len) || line.ends_with(['.', ',', ';', ':']) {
        return false;
    }

    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    let all_caps = !letters.is_empty() && letters.iter().all(|c| c.is_uppercase());

    let numbered = line
        .split_whitespace()
        .next()
        .map(|first| {
            first.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false)
                && first.chars().all(|c| c.is_ascii_digit() || c == '.')
        })
        .unwrap_or(false)
        && line.split_whitespace().count() > 1;

    all_caps || numbered
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_pdf_pages_with_formfeed() {
        let pages = split_pdf_pages("Page 1 content\x0cPage 2 content\x0cPage 3 content");
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[1], "Page 2 content");
    }

    #[test]
    fn test_split_keeps_blank_pages_for_numbering() {
        let pages = split_pdf_pages("one\x0c\x0cthree");
        assert_eq!(pages.len(), 3);
        assert!(pages[1].is_empty());
    }

    #[test]
    fn test_split_pdf_pages_no_separator() {
        assert_eq!(split_pdf_pages("Just some text").len(), 1);
    }

    #[test]
    fn test_page_to_elements() {
        let page = "TROUBLESHOOTING\n\nIf the printer shows\nerror 50.4, replace the fuser.\n\n2.1 Fuser removal\n\nOpen the rear door.";
        let elements = page_to_elements(page);
        assert_eq!(
            elements,
            vec![
                "# TROUBLESHOOTING",
                "If the printer shows error 50.4, replace the fuser.",
                "# 2.1 Fuser removal",
                "Open the rear door.",
            ]
        );
    }

    fn filler(words: usize) -> String {
        (0..words)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn pages(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_toc_detection() {
        let toc = (1..=8)
            .map(|i| format!("Chapter {} ............ {}", i, i * 10))
            .collect::<Vec<_>>()
            .join("\n");
        assert!(is_toc_page(&toc));
        assert!(is_toc_page("Table of Contents\nSafety 3"));
        assert!(!is_toc_page("Regular page text.\nAnother line."));
        assert!(!is_toc_page("Check the package contents before setup."));
    }

    #[test]
    fn test_title_page_skipped() {
        let body = filler(150);
        let skipped = irrelevant_pages(&pages(&["LaserJet M404\nUser Guide", body.as_str(), body.as_str()]));
        assert_eq!(skipped, BTreeSet::from([0]));

        // 길어도 저작권 표기가 있으면 표지
        let cover = format!("{} Copyright 2021 HP Development Company", filler(150));
        let skipped = irrelevant_pages(&pages(&[cover.as_str(), body.as_str()]));
        assert_eq!(skipped, BTreeSet::from([0]));

        let skipped = irrelevant_pages(&pages(&[body.as_str(), body.as_str()]));
        assert!(skipped.is_empty());
    }

    #[test]
    fn test_notices_only_in_front_pages() {
        let body = filler(150);
        let notices = format!("Legal notices\n{}", filler(150));

        let mut doc = vec![body.clone(); 14];
        doc[3] = notices.clone();
        doc[12] = notices;
        let skipped = irrelevant_pages(&doc);
        assert_eq!(skipped, BTreeSet::from([3]));
    }

    #[test]
    fn test_preamble_before_toc_skipped() {
        let body = filler(150);
        let toc = "Contents\n1 Setup ........ 4\n2 Troubleshooting ........ 5";
        let skipped = irrelevant_pages(&pages(&[body.as_str(), body.as_str(), toc, body.as_str(), body.as_str()]));
        assert_eq!(skipped, BTreeSet::from([0, 1, 2]));
    }

    #[test]
    fn test_multi_page_toc() {
        let body = filler(150);
        let first = "Contents\n1 Setup ........ 5\n2 Paper ........ 6";
        let second = "3 Fuser ........ 7\n4 Toner ........ 8\n5 Errors ........ 9";
        let skipped = irrelevant_pages(&pages(&[body.as_str(), first, second, body.as_str(), body.as_str()]));
        assert_eq!(skipped, BTreeSet::from([0, 1, 2]));
    }

    #[test]
    fn test_back_matter_sections_skipped() {
        let body = filler(150);
        let toc = "Contents\n\
                   1 Setup ........ 3\n\
                   2 Troubleshooting ........ 4\n\
                   3 Specifications ........ 6\n\
                   4 Recycling ........ 7\n\
                   Index ........ 8";
        let mut doc = vec![body; 8];
        doc[1] = toc.to_string();

        // 0: 서문, 1: 목차, 5..8: 인쇄 페이지 6~8
        let skipped = irrelevant_pages(&doc);
        assert_eq!(skipped, BTreeSet::from([0, 1, 5, 6, 7]));
    }

    #[test]
    fn test_back_matter_ends_at_next_section() {
        let entries = vec![
            ("Specifications".to_string(), 3),
            ("Warranty".to_string(), 5),
        ];
        assert_eq!(back_matter_pages(&entries, 10), BTreeSet::from([2, 3]));
    }

    #[test]
    fn test_single_page_document_kept() {
        assert!(irrelevant_pages(&pages(&["Short note. Copyright 2020"])).is_empty());
    }

    #[test]
    fn test_invalid_pdf_errors() {
        assert!(extract_elements(b"not a pdf").is_err());
    }
}
