//! Text Chunking Module
//!
//! - [`MarkdownChunker`]: 티켓 문서용. 헤더/문단 경계를 존중하며 분할
//! - [`PageChunker`]: 매뉴얼용. 페이지 번호가 붙은 요소들을 헤더 기준으로 묶음

use std::collections::HashSet;

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// 최소 청크 크기 (문자 수)
    pub min_characters: usize,
    /// 최대 청크 크기 (문자 수)
    pub max_characters: usize,
    /// 오버랩 크기 (문자 수)
    pub overlap_characters: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            min_characters: 200,
            max_characters: 1200,
            overlap_characters: 100,
        }
    }
}

impl ChunkConfig {
    /// 티켓 문서용 설정
    ///
    /// 티켓은 대부분 짧아서 한 청크로 끝나고, 긴 작업 노트만 나뉩니다.
    pub fn for_tickets() -> Self {
        Self {
            min_characters: 150,
            max_characters: 2000,
            overlap_characters: 0,
        }
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// MarkdownChunker
// ============================================================================

/// Markdown 인식 청커
///
/// - 헤더 경계 유지
/// - 문단 경계 존중
/// - 너무 긴 문단은 줄 단위로 분할
pub struct MarkdownChunker {
    config: ChunkConfig,
}

impl MarkdownChunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// 헤더 기준 섹션 분할
    fn split_sections(&self, text: &str) -> Vec<String> {
        let mut sections = Vec::new();
        let mut current = String::new();

        for line in text.lines() {
            if is_heading(line) && !current.trim().is_empty() {
                sections.push(current.trim().to_string());
                current.clear();
            }
            current.push_str(line);
            current.push('\n');
        }

        if !current.trim().is_empty() {
            sections.push(current.trim().to_string());
        }

        sections
    }

    /// 긴 섹션을 문단 경계에서 분할
    fn split_long_section(&self, section: &str) -> Vec<String> {
        let max = self.config.max_characters;
        if section.chars().count() <= max {
            return vec![section.to_string()];
        }

        let mut pieces = Vec::new();
        for para in section.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            if para.chars().count() <= max {
                pieces.push(para.to_string());
                continue;
            }
            // 문단 자체가 너무 길면 줄 단위로
            let mut buf = String::new();
            for line in para.lines() {
                if !buf.is_empty() && buf.chars().count() + line.chars().count() + 1 > max {
                    pieces.push(std::mem::take(&mut buf));
                }
                if !buf.is_empty() {
                    buf.push('\n');
                }
                buf.push_str(line);
            }
            if !buf.is_empty() {
                pieces.push(buf);
            }
        }

        self.pack(pieces)
    }

    /// 조각들을 최대 크기까지 이어 붙이기 (작은 조각은 앞 청크에 병합)
    fn pack(&self, pieces: Vec<String>) -> Vec<String> {
        let max = self.config.max_characters;
        let min = self.config.min_characters;
        let mut chunks: Vec<String> = Vec::new();

        for piece in pieces {
            if let Some(last) = chunks.last_mut() {
                let combined = last.chars().count() + piece.chars().count() + 2;
                if combined <= max || (last.chars().count() < min && combined <= max * 2) {
                    last.push_str("\n\n");
                    last.push_str(&piece);
                    continue;
                }
            }
            chunks.push(piece);
        }

        chunks
    }

    /// 이전 청크 끝부분을 다음 청크 앞에 붙임
    fn apply_overlap(&self, chunks: Vec<String>) -> Vec<String> {
        let overlap = self.config.overlap_characters;
        if overlap == 0 || chunks.len() < 2 {
            return chunks;
        }

        let mut result = Vec::with_capacity(chunks.len());
        result.push(chunks[0].clone());

        for pair in chunks.windows(2) {
            let (prev, chunk) = (&pair[0], &pair[1]);
            let start = floor_char_boundary(prev, prev.len().saturating_sub(overlap));
            // 단어 중간에서 시작하지 않도록
            let tail = &prev[start..];
            let tail = tail
                .find(char::is_whitespace)
                .map(|p| &tail[p..])
                .unwrap_or(tail)
                .trim();

            if tail.len() > 20 {
                result.push(format!("...\n{}\n---\n{}", tail, chunk));
            } else {
                result.push(chunk.clone());
            }
        }

        result
    }
}

impl Default for MarkdownChunker {
    fn default() -> Self {
        Self::new(ChunkConfig::for_tickets())
    }
}

impl Chunker for MarkdownChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![];
        }

        let chunks: Vec<String> = self
            .split_sections(text)
            .into_iter()
            .flat_map(|s| self.split_long_section(&s))
            .filter(|c| !c.trim().is_empty())
            .collect();

        self.apply_overlap(chunks)
    }

    fn name(&self) -> &'static str {
        "MarkdownChunker"
    }
}

// ============================================================================
// PageChunker
// ============================================================================

/// 매뉴얼 파싱 결과 요소 (페이지 번호 포함)
#[derive(Debug, Clone, PartialEq)]
pub struct PageElement {
    /// 헤더는 `#`으로 시작
    pub text: String,
    /// 1부터 시작
    pub page: i64,
}

impl PageElement {
    pub fn new(text: impl Into<String>, page: i64) -> Self {
        Self {
            text: text.into(),
            page,
        }
    }
}

/// 페이지 번호가 붙은 청크
#[derive(Debug, Clone, PartialEq)]
pub struct PageChunk {
    pub text: String,
    /// 청크가 걸친 페이지 중 가장 작은 번호
    pub page_number: i64,
}

/// 매뉴얼 요소 청커
///
/// - 헤더 요소는 항상 새 청크를 시작
/// - 청크는 `max_characters`까지 요소를 이어 붙임
/// - 넘치면 직전 요소를 오버랩으로 가져가서 새 청크 시작
/// - 같은 텍스트의 청크는 한 번만 출력
#[derive(Debug, Clone)]
pub struct PageChunker {
    pub max_characters: usize,
    pub overlap: bool,
}

impl Default for PageChunker {
    fn default() -> Self {
        Self {
            max_characters: 2500,
            overlap: true,
        }
    }
}

impl PageChunker {
    pub fn chunk(&self, elements: &[PageElement]) -> Vec<PageChunk> {
        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut page: Option<i64> = None;
        let mut last_text = "";

        for element in elements {
            let text = element.text.trim();
            if text.is_empty() {
                continue;
            }

            if text.len() > 1 && text.starts_with('#') {
                if let Some(p) = page {
                    push_chunk(&mut chunks, &current, p);
                }
                current = text.to_string();
                page = Some(element.page);
            } else if current.chars().count() + text.chars().count() <= self.max_characters {
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(text);
                last_text = text;
                page = Some(page.map_or(element.page, |p| p.min(element.page)));
            } else {
                if let Some(p) = page {
                    push_chunk(&mut chunks, &current, p);
                }
                current = if self.overlap && !last_text.is_empty() {
                    format!("{} {}", last_text, text)
                } else {
                    text.to_string()
                };
                last_text = text;
                page = Some(element.page);
            }
        }

        if let Some(p) = page {
            push_chunk(&mut chunks, &current, p);
        }

        let mut seen = HashSet::new();
        chunks.retain(|c: &PageChunk| seen.insert(c.text.clone()));
        chunks
    }
}

fn push_chunk(chunks: &mut Vec<PageChunk>, text: &str, page_number: i64) {
    let text = text.trim();
    if !text.is_empty() {
        chunks.push(PageChunk {
            text: text.to_string(),
            page_number,
        });
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Markdown 헤더 줄인지 확인 (`# ` ~ `###### `)
fn is_heading(line: &str) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes)
        && line[hashes..]
            .chars()
            .next()
            .map(char::is_whitespace)
            .unwrap_or(false)
}

/// UTF-8 경계 조정 (인덱스 이하로)
#[inline]
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        s.len()
    } else {
        let mut i = index;
        while i > 0 && !s.is_char_boundary(i) {
            i -= 1;
        }
        i
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_chunker_empty() {
        assert!(MarkdownChunker::default().chunk("  \n").is_empty());
    }

    #[test]
    fn test_short_ticket_is_single_chunk() {
        let text = "# Ticket description\n\nPrinter shows error 50.4.\n\n# Work note\n\nReplaced fuser.";
        let chunks = MarkdownChunker::default().chunk(text);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with("# Ticket description"));
        assert!(chunks[1].contains("Replaced fuser"));
    }

    #[test]
    fn test_long_section_is_split() {
        let config = ChunkConfig {
            min_characters: 10,
            max_characters: 60,
            overlap_characters: 0,
        };
        let para = "word ".repeat(10);
        let text = format!("# Notes\n\n{p}\n\n{p}\n\n{p}", p = para.trim());
        let chunks = MarkdownChunker::new(config).chunk(&text);
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.chars().count() <= 120));
    }

    #[test]
    fn test_overlap_prefix() {
        let config = ChunkConfig {
            min_characters: 0,
            max_characters: 40,
            overlap_characters: 30,
        };
        let text = "# A\n\nthe first section has a fairly long body\n\n# B\n\nsecond body";
        let chunks = MarkdownChunker::new(config).chunk(text);
        assert!(chunks.len() >= 2);
        assert!(chunks.last().unwrap().starts_with("...\n"));
    }

    #[test]
    fn test_is_heading() {
        assert!(is_heading("# Title"));
        assert!(is_heading("### Sub"));
        assert!(!is_heading("#hashtag"));
        assert!(!is_heading("####### too deep"));
        assert!(!is_heading("plain"));
    }

    #[test]
    fn test_page_chunker_headers_start_chunks() {
        let elements = vec![
            PageElement::new("# Safety", 1),
            PageElement::new("Unplug the device.", 1),
            PageElement::new("# Troubleshooting", 2),
            PageElement::new("Error 50.4 means fuser failure.", 3),
        ];
        let chunks = PageChunker::default().chunk(&elements);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "# Safety Unplug the device.");
        assert_eq!(chunks[0].page_number, 1);
        assert_eq!(chunks[1].page_number, 2);
    }

    #[test]
    fn test_page_chunker_keeps_min_page() {
        let elements = vec![
            PageElement::new("text on page five", 5),
            PageElement::new("text on page four", 4),
        ];
        let chunks = PageChunker::default().chunk(&elements);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page_number, 4);
    }

    #[test]
    fn test_page_chunker_overflow_overlap() {
        let chunker = PageChunker {
            max_characters: 30,
            overlap: true,
        };
        let elements = vec![
            PageElement::new("aaaaaaaaaa", 1),
            PageElement::new("bbbbbbbbbb", 1),
            PageElement::new("cccccccccc", 2),
        ];
        let chunks = chunker.chunk(&elements);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "aaaaaaaaaa bbbbbbbbbb");
        assert_eq!(chunks[1].text, "bbbbbbbbbb cccccccccc");
        assert_eq!(chunks[1].page_number, 2);

        let no_overlap = PageChunker {
            max_characters: 30,
            overlap: false,
        };
        assert_eq!(no_overlap.chunk(&elements)[1].text, "cccccccccc");
    }

    #[test]
    fn test_page_chunker_dedup() {
        let elements = vec![
            PageElement::new("# Index", 1),
            PageElement::new("# Index", 9),
        ];
        let chunks = PageChunker::default().chunk(&elements);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page_number, 1);
    }
}
