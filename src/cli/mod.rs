//! CLI 모듈
//!
//! fieldservice-rag CLI 명령어 정의 및 구현

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{default_config_path, Config, Deployment};
use crate::embedding::{create_embedder, has_api_key};
use crate::knowledge::{ChunkStore, Corpus, HybridChunkStore};
use crate::retrieval::{RetrievalContext, Retriever};
use crate::sync::{process_description, CorpusReport, FileSource, Reconciler};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "fieldservice-rag")]
#[command(version, about = "현장 서비스 티켓용 하이브리드 RAG", long_about = None)]
pub struct Cli {
    /// 설정 파일 경로 (기본: ~/.fieldservice-rag/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Source of Truth와 Chunk Store 동기화 (1회 실행)
    Sync,

    /// 티켓 설명으로 컨텍스트 검색
    Query {
        /// 티켓 설명
        #[arg(short, long)]
        description: String,

        /// 장비 유형
        #[arg(short = 't', long)]
        device_type: String,

        /// JSON으로 출력
        #[arg(long)]
        json: bool,
    },

    /// ANN / FTS 인덱스 정비
    Index,

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = match cli.config {
        Some(ref path) => Config::load(path)?,
        None => Config::load_or_default(&default_config_path())?,
    };

    match cli.command {
        Commands::Sync => cmd_sync(&config).await,
        Commands::Query {
            description,
            device_type,
            json,
        } => cmd_query(&config, &description, &device_type, json).await,
        Commands::Index => cmd_index(&config).await,
        Commands::Status => cmd_status(&config, cli.config).await,
    }
}

async fn open_store(config: &Config) -> Result<Arc<HybridChunkStore>> {
    let store = HybridChunkStore::open(&config.store, config.embedding.dimension)
        .await
        .context("Chunk Store 열기 실패")?;
    Ok(Arc::new(store))
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 동기화 명령어 (sync)
async fn cmd_sync(config: &Config) -> Result<()> {
    println!("[*] 소스 디렉토리: {:?}", config.sync.source_dir);

    let embedder = create_embedder(&config.embedding)?;
    let store = open_store(config).await?;
    let source = Arc::new(FileSource::new(&config.sync.source_dir)?);

    let reconciler = Reconciler::new(store, source, embedder, config.sync.clone());
    let report = reconciler.run().await.context("동기화 실패")?;

    println!();
    print_corpus_report("티켓", &report.tickets);
    print_corpus_report("매뉴얼", &report.manuals);
    println!();

    if report.failed() > 0 {
        println!(
            "[!] 완료: 추가 {}, 삭제 {}, 실패 {} (다음 실행에서 재시도)",
            report.inserted(),
            report.deleted(),
            report.failed()
        );
    } else {
        println!(
            "[OK] 완료: 추가 {}, 삭제 {}",
            report.inserted(),
            report.deleted()
        );
    }

    Ok(())
}

fn print_corpus_report(label: &str, report: &CorpusReport) {
    println!(
        "    {}: 추가 {}, 삭제 {}, 실패 {}, 건너뜀 {}, 유지 {}",
        label, report.inserted, report.deleted, report.failed, report.skipped, report.unchanged
    );
    for key in &report.failed_keys {
        println!("      - 실패: {}", key);
    }
}

/// 검색 명령어 (query)
///
/// 생성 단계 없이 조립된 컨텍스트만 출력합니다.
async fn cmd_query(config: &Config, description: &str, device_type: &str, json: bool) -> Result<()> {
    let query = process_description(description, false, 0).unwrap_or_else(|| description.to_string());

    let embedder = create_embedder(&config.embedding)?;
    let store = open_store(config).await?;
    let retriever = Retriever::new(store, embedder, config.retrieval.clone())?;

    if !json {
        println!("[*] 검색 중: \"{}\" ({})", truncate_text(&query, 80), device_type);
    }

    let context = retriever
        .retrieve(&query, Some(device_type))
        .await
        .context("검색 실패")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&context)?);
        return Ok(());
    }

    print_context(&context);
    Ok(())
}

fn print_context(context: &RetrievalContext) {
    if context.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return;
    }

    println!("\n[OK] 과거 티켓 ({} 건):\n", context.tickets.len());
    for (i, ticket) in context.tickets.iter().enumerate() {
        println!("{}. [점수: {:.4}] Ticket {}", i + 1, ticket.score, ticket.id);
        println!("   내용: {}", truncate_text(&ticket.text, 200));
        println!();
    }

    println!("[OK] 매뉴얼 ({} 건):\n", context.manuals.len());
    for (i, manual) in context.manuals.iter().enumerate() {
        let page = manual
            .page_number
            .map(|p| format!(" p.{}", p))
            .unwrap_or_default();
        println!(
            "{}. [점수: {:.4}] Chunk #{} [{}{}]",
            i + 1,
            manual.score,
            manual.id,
            manual.doctype.as_deref().unwrap_or("-"),
            page
        );
        println!("   URL: {}", manual.url.as_deref().unwrap_or("-"));
        println!("   내용: {}", truncate_text(&manual.text, 200));
        println!();
    }
}

/// 인덱스 명령어 (index)
async fn cmd_index(config: &Config) -> Result<()> {
    let store = open_store(config).await?;

    for corpus in Corpus::ALL {
        println!("[*] {} 인덱스 정비 중...", corpus);
        let built = store
            .rebuild_indexes(corpus)
            .await
            .with_context(|| format!("{} 인덱스 생성 실패", corpus))?;
        if built {
            println!("[OK] {}: ANN 인덱스 생성 완료", corpus);
        } else {
            println!("[!] {}: 행이 부족해서 ANN 인덱스 생략 (전체 탐색 사용)", corpus);
        }
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: &Config, config_path: Option<PathBuf>) -> Result<()> {
    println!("=== fieldservice-rag 상태 ===\n");

    let path = config_path.unwrap_or_else(default_config_path);
    if path.exists() {
        println!("[OK] 설정 파일: {:?}", path);
    } else {
        println!("[!] 설정 파일 없음 (기본값 사용): {:?}", path);
    }

    println!(
        "[*] 임베딩: {:?} / {:?} / {}차원",
        config.embedding.deployment, config.embedding.model, config.embedding.dimension
    );
    if config.embedding.deployment == Deployment::Remote {
        if has_api_key() {
            println!("[OK] API 키: 설정됨");
        } else {
            println!("[!] API 키: 미설정");
            println!("    설정: export GEMINI_API_KEY=your-key");
        }
    }

    println!("[*] 데이터 디렉토리: {:?}", config.store.data_dir);
    println!("[*] 소스 디렉토리: {:?}", config.sync.source_dir);

    let store = match open_store(config).await {
        Ok(store) => store,
        Err(e) => {
            println!("[!] Chunk Store 열기 실패: {:#}", e);
            return Ok(());
        }
    };

    for corpus in Corpus::ALL {
        match store.stats(corpus).await {
            Ok(stats) => println!(
                "[OK] {}: 청크 {} / 벡터 {} / 키 {}",
                corpus, stats.chunk_count, stats.vector_count, stats.source_key_count
            ),
            Err(e) => println!("[!] {} 통계 조회 실패: {:#}", corpus, e),
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_truncate_unicode() {
        assert_eq!(truncate_text("안녕하세요 세계", 5), "안녕하세요...");
    }

    #[test]
    fn test_parse_query_command() {
        let cli = Cli::try_parse_from([
            "fieldservice-rag",
            "query",
            "--description",
            "Paper jam",
            "--device-type",
            "printer",
            "--json",
        ])
        .unwrap();
        assert!(cli.config.is_none());
        match cli.command {
            Commands::Query {
                description,
                device_type,
                json,
            } => {
                assert_eq!(description, "Paper jam");
                assert_eq!(device_type, "printer");
                assert!(json);
            }
            _ => panic!("expected query command"),
        }
    }

    #[test]
    fn test_parse_global_config() {
        let cli = Cli::try_parse_from(["fieldservice-rag", "sync", "--config", "/tmp/rag.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/rag.toml")));
        assert!(matches!(cli.command, Commands::Sync));
    }
}
