//! 과거 티켓 전처리 및 청크 생성
//!
//! 티켓 설명은 두 가지 구조화된 헤드라인 형식으로 들어옵니다.
//!
//! ```text
//! 형식 1                    형식 2
//! PROBLEM:                  =====
//! ========                  Problem description:
//! Paper jam in tray 2       Paper jam in tray 2
//! ```
//!
//! 관리용 섹션(계약, 배송, 연락처 등)은 버리고 나머지를 `key:\nvalue` 텍스트로 정리합니다.

use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;

use super::source::TicketContent;
use crate::embedding::EmbeddingProvider;
use crate::knowledge::{Chunker, MarkdownChunker, NewChunk};

/// 형식 1에서 버리는 섹션
const EXCLUDED_SECTIONS_1: &[&str] = &[
    "AGREEMENT",
    "DELIVERY",
    "PARTORDERS",
    "CONTACT",
    "ENTITLEMENT",
    "PARTS SHIPPED TO",
    "ATTACHMENTS",
    "ALTERNATE CONTACT",
    "WHERE",
];

/// 형식 1에서 `key: value` 줄 목록으로 펼치는 섹션
const NESTED_SECTIONS_1: &[&str] = &["MISC", "WORKORDER", "SKILLSETS", "CASE DETAILS", "CONTACT DETAILS"];

/// 형식 2에서 버리는 섹션
const EXCLUDED_SECTIONS_2: &[&str] = &[
    "BOOKING DETAILS",
    "ACCOUNT",
    "DEVICE",
    "CONTACT",
    "SKILLS",
    "OTHER",
    "PARTS SHIPPED TO",
    "Kontakt Terminabstimmung",
    "Additional info",
    "Contact Details for Onsite would be",
    "DISPATCHERS",
];

// ============================================================================
// Regex
// ============================================================================

struct Patterns {
    mail: Regex,
    detect_1: Regex,
    header_1: Regex,
    detect_2: Regex,
    separator_2: Regex,
    key_2: Regex,
    blank_lines: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        mail: Regex::new(r"[\w\-\.]+@[\w-]+(\.[a-zA-Z]{2,})+").unwrap(),
        detect_1: Regex::new(r"[A-Z]+:\n===+\n").unwrap(),
        header_1: Regex::new(r"([A-Z ]+):\n=+\n").unwrap(),
        detect_2: Regex::new(r"=====\n+[A-Za-z ]+:").unwrap(),
        separator_2: Regex::new(r"=+\n+").unwrap(),
        key_2: Regex::new(r"^([a-zA-Z ]+):").unwrap(),
        blank_lines: Regex::new(r"\n\n\n+").unwrap(),
    })
}

// ============================================================================
// Types
// ============================================================================

/// 헤드라인 섹션 값
#[derive(Debug, Clone, PartialEq)]
enum SectionValue {
    Text(String),
    Fields(Vec<(String, String)>),
}

/// 순서를 유지하는 섹션 목록 (같은 키는 나중 값이 덮어씀)
#[derive(Debug, Default)]
struct Sections(Vec<(String, SectionValue)>);

impl Sections {
    fn insert(&mut self, key: String, value: SectionValue) {
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    fn render(&self) -> String {
        let mut text = String::new();
        for (key, value) in &self.0 {
            match value {
                SectionValue::Fields(fields) => {
                    text.push_str(&format!("{}:\n", key));
                    for (sub_key, sub_value) in fields {
                        text.push_str(&format!("  {}: {}\n", sub_key, sub_value));
                    }
                }
                SectionValue::Text(value) if key.is_empty() => {
                    text.push_str(&format!("{}\n\n", value));
                }
                SectionValue::Text(value) => {
                    text.push_str(&format!("{}:\n{}\n\n", key, value));
                }
            }
        }
        patterns().blank_lines.replace_all(&text, "\n\n").into_owned()
    }
}

// ============================================================================
// Preprocessing
// ============================================================================

/// 이메일 주소를 공백으로 치환
pub fn remove_mail_addresses(text: &str) -> String {
    patterns().mail.replace_all(text, " ").into_owned()
}

/// 티켓 설명 전처리
///
/// - 이메일 주소 제거
/// - 헤드라인 형식이면 섹션 정리
/// - 형식이 없고 `use_min_length`이면 `min_chars` 이하 설명은 `None` (불량 티켓)
pub fn process_description(description: &str, use_min_length: bool, min_chars: usize) -> Option<String> {
    let description = remove_mail_addresses(&description.replace("\r\n", "\n"));
    let p = patterns();

    let processed = if p.detect_1.is_match(&description) {
        parse_headlines_1(&description).render()
    } else if p.detect_2.is_match(&description) {
        parse_headlines_2(&description).render()
    } else if use_min_length && description.chars().count() <= min_chars {
        return None;
    } else {
        description
    };

    let processed = processed.trim().to_string();
    (!processed.is_empty()).then_some(processed)
}

fn is_empty_value(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || trimmed == "null"
}

/// 형식 1: `HEADLINE:\n====\n` 블록
fn parse_headlines_1(text: &str) -> Sections {
    let headers: Vec<_> = patterns().header_1.captures_iter(text).collect();
    let mut sections = Sections::default();

    for (i, caps) in headers.iter().enumerate() {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let end = headers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(text.len(), |m| m.start());
        let body = text[whole.end()..end].strip_suffix('\n').unwrap_or(&text[whole.end()..end]);
        let key = key.as_str().trim().to_string();

        if EXCLUDED_SECTIONS_1.contains(&key.as_str()) || is_empty_value(body) {
            continue;
        }

        let value = if NESTED_SECTIONS_1.contains(&key.as_str()) {
            SectionValue::Fields(parse_fields(body))
        } else {
            SectionValue::Text(body.to_string())
        };
        sections.insert(key, value);
    }

    sections
}

/// 섹션 본문의 `key: value` 줄 파싱 (같은 키는 덮어씀)
fn parse_fields(body: &str) -> Vec<(String, String)> {
    let mut fields: Vec<(String, String)> = Vec::new();
    for line in body.lines() {
        let Some((key, value)) = line.rsplit_once(':') else {
            continue;
        };
        let key = key.trim().to_string();
        let value = value.trim().to_string();
        match fields.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => fields.push((key, value)),
        }
    }
    fields
}

/// 형식 2: `=====` 구분선 뒤에 `Headline:`
fn parse_headlines_2(text: &str) -> Sections {
    let p = patterns();
    let mut sections = Sections::default();

    for segment in p.separator_2.split(text) {
        let segment = segment.trim_start_matches('\n').trim_end_matches('\n');
        let (key, body) = match p.key_2.captures(segment).and_then(|c| c.get(1)) {
            Some(key) => (key.as_str().trim().to_string(), &segment[key.end() + 1..]),
            None => (String::new(), segment),
        };

        if EXCLUDED_SECTIONS_2.contains(&key.as_str()) || is_empty_value(body) {
            continue;
        }
        sections.insert(key, SectionValue::Text(body.trim().to_string()));
    }

    sections
}

// ============================================================================
// Ticket Document
// ============================================================================

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

/// 임베딩할 티켓 문서 (Markdown)
pub fn ticket_document(ticket: &TicketContent, description: &str) -> String {
    let mut doc = format!("# Ticket {}\n\n", ticket.ticket_id);

    doc.push_str(&format!("## Device\n{}", ticket.device_type));
    if let Some(ref model) = ticket.device_model {
        doc.push_str(&format!(" ({})", model));
    }
    doc.push_str("\n\n");

    doc.push_str(&format!("## Description\n{}\n\n", description));

    let worknote = remove_mail_addresses(&ticket.worknote.replace("\r\n", "\n"));
    if !worknote.trim().is_empty() {
        doc.push_str(&format!("## Worknote\n{}\n\n", worknote.trim()));
    }

    doc.push_str(&format!(
        "## Outcome\n- Successful: {}\n- Remote fix: {}\n\n",
        yes_no(ticket.success),
        yes_no(ticket.remote_fix)
    ));

    doc.push_str("## Spare Parts used\n");
    if ticket.spare_parts.is_empty() {
        doc.push_str("- none\n");
    } else {
        for part in &ticket.spare_parts {
            doc.push_str(&format!("- {}\n", part));
        }
    }

    doc
}

/// 티켓을 임베딩된 청크로 변환
///
/// 설명이 불량이면 `None` (저장소에는 빈 키로 기록해서 재시도하지 않음).
pub async fn build_ticket_chunks(
    ticket: &TicketContent,
    embedder: &dyn EmbeddingProvider,
    min_chars: usize,
) -> Result<Option<Vec<NewChunk>>> {
    let Some(description) = process_description(&ticket.description, true, min_chars) else {
        tracing::info!("Ticket {} rejected by preprocessing", ticket.ticket_id);
        return Ok(None);
    };

    let document = ticket_document(ticket, &description);
    let texts = MarkdownChunker::default().chunk(&document);

    let embeddings = embedder
        .embed_batch(&texts)
        .await
        .with_context(|| format!("Failed to embed ticket {}", ticket.ticket_id))?;

    let chunks = texts
        .into_iter()
        .zip(embeddings)
        .map(|(text, embedding)| NewChunk {
            text,
            embedding,
            device_type: Some(ticket.device_type.clone()),
            ..Default::default()
        })
        .collect();

    Ok(Some(chunks))
}

// ============================================================================
// Tests
// ============================================================================
