//! 설정 모듈 - TOML 기반 실행 설정
//!
//! 시작 시 한 번 로드해서 각 컴포넌트 생성자에 넘깁니다.
//! 핵심 로직(검색, 융합, 동기화)은 환경변수를 직접 읽지 않습니다.
//!
//! ```toml
//! [store]
//! deployment = "local"
//!
//! [embedding]
//! deployment = "remote"
//! dimension = 768
//!
//! [retrieval.manuals]
//! limit = 10
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::RagError;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.fieldservice-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fieldservice-rag")
}

/// 기본 설정 파일 경로
pub fn default_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

// ============================================================================
// Types
// ============================================================================

/// 서브시스템 배포 위치
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Deployment {
    /// 로컬 (데이터 디렉토리 / Ollama)
    #[default]
    Local,
    /// 원격 (오브젝트 스토리지 / 클라우드 API)
    Remote,
}

/// 전체 설정
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub sync: SyncConfig,
}

/// Chunk Store 설정
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub deployment: Deployment,
    /// SQLite 파일과 로컬 LanceDB 디렉토리 위치
    pub data_dir: PathBuf,
    /// 원격 LanceDB URI (예: s3://bucket/vectors)
    pub vector_uri: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            deployment: Deployment::Local,
            data_dir: get_data_dir(),
            vector_uri: None,
        }
    }
}

impl StoreConfig {
    /// SQLite DB 경로
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chunks.db")
    }

    /// LanceDB 연결 URI
    pub fn vector_uri(&self) -> Result<String> {
        match self.deployment {
            Deployment::Local => {
                let path = self.data_dir.join("vectors.lance");
                path.to_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| anyhow::anyhow!("Invalid path encoding: {:?}", path))
            }
            Deployment::Remote => self.vector_uri.clone().ok_or_else(|| {
                RagError::Configuration(
                    "store.vector_uri is required when store.deployment = \"remote\"".into(),
                )
                .into()
            }),
        }
    }
}

/// 임베딩 프로바이더 설정
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// local = Ollama, remote = Gemini
    pub deployment: Deployment,
    pub model: Option<String>,
    /// 저장소 벡터 컬럼 차원과 반드시 같아야 함
    pub dimension: usize,
    /// Ollama 엔드포인트 (local)
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            deployment: Deployment::Remote,
            model: None,
            dimension: 768,
            endpoint: None,
            timeout_secs: 30,
        }
    }
}

/// 검색 설정
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// 패스(dense/lexical)별 후보 수
    pub top_k: usize,
    /// RRF 스무딩 상수
    pub rrf_k: f64,
    pub tickets: TicketRetrievalConfig,
    pub manuals: ManualRetrievalConfig,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 20,
            rrf_k: 50.0,
            tickets: TicketRetrievalConfig::default(),
            manuals: ManualRetrievalConfig::default(),
        }
    }
}

/// 티켓 코퍼스 검색 설정
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TicketRetrievalConfig {
    pub limit: usize,
    /// 0이면 비활성화
    pub min_score: f64,
    /// 티켓 검색도 장비 유형으로 제한할지 여부
    pub scope_by_device: bool,
}

impl Default for TicketRetrievalConfig {
    fn default() -> Self {
        Self {
            limit: 5,
            min_score: 0.0,
            scope_by_device: false,
        }
    }
}

/// 매뉴얼 코퍼스 검색 설정
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManualRetrievalConfig {
    pub limit: usize,
    pub min_score: f64,
    /// 정확한 장비 모델이 확인된 매뉴얼 청크만 검색
    pub exact_model_only: bool,
}

impl Default for ManualRetrievalConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            min_score: 0.0,
            exact_model_only: false,
        }
    }
}

/// 동기화 설정
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// 키 처리 워커 수
    pub workers: usize,
    /// 파일 기반 소스 디렉토리
    pub source_dir: PathBuf,
    /// 과거 티켓 설명 최소 길이
    pub min_ticket_chars: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            source_dir: get_data_dir().join("source"),
            min_ticket_chars: 150,
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl Config {
    /// TOML 파일에서 로드 (검증 포함)
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config = Self::from_toml(&raw)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// 파일이 있으면 로드, 없으면 기본값
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// TOML 문자열 파싱
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw).context("Invalid TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// 설정값 검증
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            return Err(RagError::Configuration("embedding.dimension must be > 0".into()).into());
        }
        if self.retrieval.top_k == 0 {
            return Err(RagError::Configuration("retrieval.top_k must be > 0".into()).into());
        }
        if self.retrieval.rrf_k.is_nan() || self.retrieval.rrf_k < 0.0 {
            return Err(RagError::Configuration("retrieval.rrf_k must be >= 0".into()).into());
        }
        if self.retrieval.tickets.min_score < 0.0 || self.retrieval.manuals.min_score < 0.0 {
            return Err(RagError::Configuration("min_score must be >= 0".into()).into());
        }
        if self.sync.workers == 0 {
            return Err(RagError::Configuration("sync.workers must be > 0".into()).into());
        }
        if self.store.deployment == Deployment::Remote && self.store.vector_uri.is_none() {
            return Err(RagError::Configuration(
                "store.vector_uri is required when store.deployment = \"remote\"".into(),
            )
            .into());
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
