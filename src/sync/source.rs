//! Source of Truth - 운영 시스템(티켓/장비 목록)에 대한 읽기 인터페이스
//!
//! [`FileSource`]는 디렉토리에 내보낸 JSON 매니페스트를 읽는 구현입니다.
//! 디렉토리가 없거나 매니페스트 하나라도 읽지 못하면 목록 조회 전체가 실패합니다.
//! 빈 목록은 "모든 키 삭제"를 뜻하기 때문입니다.
//!
//! ```text
//! <source_dir>/
//!   tickets/<any>.json   # TicketContent 하나
//!   devices/<any>.json   # DeviceManifest 하나
//!   manuals/...          # 매니페스트에서 상대 경로로 참조하는 파일
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use walkdir::WalkDir;

use super::manual::is_relevant;
use crate::error::RagError;
use crate::extractor::DocType;

/// 장비 키 구분자 (`<deviceType>::<deviceModel>`)
pub const DEVICE_KEY_SEPARATOR: &str = "::";

// ============================================================================
// Types
// ============================================================================

/// 종료된 티켓 내용
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketContent {
    pub ticket_id: String,
    pub description: String,
    #[serde(default)]
    pub worknote: String,
    pub device_type: String,
    #[serde(default)]
    pub device_model: Option<String>,
    #[serde(default)]
    pub remote_fix: bool,
    #[serde(default)]
    pub success: bool,
    /// 사용된 부품 설명
    #[serde(default)]
    pub spare_parts: Vec<String>,
}

/// 장비 식별자
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    pub device_type: String,
    pub device_model: Option<String>,
}

impl DeviceKey {
    pub fn new(device_type: impl Into<String>, device_model: Option<String>) -> Self {
        Self {
            device_type: device_type.into(),
            device_model: device_model.filter(|m| !m.trim().is_empty()),
        }
    }

    /// source_key 문자열로 변환
    pub fn to_key(&self) -> String {
        match &self.device_model {
            Some(model) => format!("{}{}{}", self.device_type, DEVICE_KEY_SEPARATOR, model),
            None => self.device_type.clone(),
        }
    }

    /// source_key 문자열 파싱
    pub fn parse(key: &str) -> Self {
        match key.split_once(DEVICE_KEY_SEPARATOR) {
            Some((device_type, model)) => Self::new(device_type, Some(model.to_string())),
            None => Self::new(key, None),
        }
    }
}

/// 제조사 매뉴얼 목록 항목
///
/// `cat1_name`, `cat2_name` 등의 카테고리 필드는 `extra`에 들어갑니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManualListing {
    #[serde(rename = "contentType", default)]
    pub content_type: Option<String>,
    /// http(s) URL 또는 source_dir 기준 상대 경로
    #[serde(default)]
    pub url: Option<String>,
    #[serde(rename = "fileBytes", default)]
    pub file_bytes: Option<u64>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// 장비 매니페스트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceManifest {
    pub device_type: String,
    #[serde(default)]
    pub device_model: Option<String>,
    /// 매뉴얼이 정확한 모델 번호로 검색되었는지 여부
    #[serde(default)]
    pub device_model_used: bool,
    #[serde(default)]
    pub manuals: Vec<ManualListing>,
}

impl DeviceManifest {
    pub fn key(&self) -> DeviceKey {
        DeviceKey::new(&self.device_type, self.device_model.clone())
    }
}

/// 내려받은 매뉴얼 문서
#[derive(Debug, Clone)]
pub struct ManualDocument {
    pub url: String,
    pub doctype: DocType,
    pub bytes: Vec<u8>,
}

/// 장비 하나의 관련 매뉴얼 묶음
#[derive(Debug, Clone)]
pub struct ManualBundle {
    pub device: DeviceKey,
    pub device_model_used: bool,
    pub documents: Vec<ManualDocument>,
}

// ============================================================================
// SourceOfTruth Trait
// ============================================================================

/// 운영 시스템 읽기 인터페이스
///
/// 개별 키 조회 실패는 [`RagError::TransientFetch`]로,
/// 목록 자체를 얻지 못하면 [`RagError::SourceUnavailable`]로 반환합니다.
#[async_trait]
pub trait SourceOfTruth: Send + Sync {
    /// 현재 유효한(종료된) 티켓 ID 목록
    async fn list_active_tickets(&self) -> Result<HashSet<String>>;

    /// 현재 운영 중인 장비 키 목록
    async fn list_active_devices(&self) -> Result<HashSet<String>>;

    /// 티켓 내용 조회
    async fn fetch_ticket_content(&self, key: &str) -> Result<TicketContent>;

    /// 장비의 관련 매뉴얼 문서 조회 (관련성 필터 적용 후)
    async fn fetch_manual_document(&self, key: &str) -> Result<ManualBundle>;
}

// ============================================================================
// FileSource
// ============================================================================

/// 파일 기반 Source of Truth
///
/// 목록 조회 때 만든 key → 매니페스트 인덱스를 캐시해 두고 개별 조회는 인덱스만 봅니다.
pub struct FileSource {
    root: PathBuf,
    client: reqwest::Client,
    tickets: RwLock<Option<Arc<HashMap<String, PathBuf>>>>,
    devices: RwLock<Option<Arc<HashMap<String, DeviceManifest>>>>,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("fieldservice-rag/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            root: root.into(),
            client,
            tickets: RwLock::new(None),
            devices: RwLock::new(None),
        })
    }

    /// 하위 디렉토리의 JSON 파일 목록
    fn json_files(&self, dir: &str) -> Result<Vec<PathBuf>> {
        let dir = self.root.join(dir);
        if !dir.is_dir() {
            return Err(RagError::SourceUnavailable(format!("directory not found: {:?}", dir)).into());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&dir).follow_links(true) {
            let entry = entry
                .map_err(|e| RagError::SourceUnavailable(format!("failed to walk {:?}: {}", dir, e)))?;
            let path = entry.path();
            if entry.file_type().is_file()
                && path.extension().and_then(|e| e.to_str()) == Some("json")
            {
                files.push(path.to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse {:?}", path))
    }

    /// 목록용 매니페스트 읽기 (실패하면 목록 전체 실패)
    async fn read_manifest<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
        Self::read_json(path)
            .await
            .map_err(|e| RagError::SourceUnavailable(format!("unreadable manifest: {:#}", e)).into())
    }

    async fn load_tickets(&self) -> Result<HashMap<String, PathBuf>> {
        let mut tickets = HashMap::new();
        for path in self.json_files("tickets")? {
            let ticket: TicketContent = Self::read_manifest(&path).await?;
            tickets.insert(ticket.ticket_id, path);
        }
        Ok(tickets)
    }

    async fn load_devices(&self) -> Result<HashMap<String, DeviceManifest>> {
        let mut devices = HashMap::new();
        for path in self.json_files("devices")? {
            let manifest: DeviceManifest = Self::read_manifest(&path).await?;
            devices.insert(manifest.key().to_key(), manifest);
        }
        Ok(devices)
    }

    /// 티켓 인덱스 (목록 조회 전이면 지금 만듦)
    async fn ticket_index(&self) -> Result<Arc<HashMap<String, PathBuf>>> {
        if let Some(index) = self.tickets.read().await.as_ref() {
            return Ok(index.clone());
        }
        let index = Arc::new(self.load_tickets().await?);
        *self.tickets.write().await = Some(index.clone());
        Ok(index)
    }

    async fn device_index(&self) -> Result<Arc<HashMap<String, DeviceManifest>>> {
        if let Some(index) = self.devices.read().await.as_ref() {
            return Ok(index.clone());
        }
        let index = Arc::new(self.load_devices().await?);
        *self.devices.write().await = Some(index.clone());
        Ok(index)
    }

    /// URL 또는 상대 경로에서 문서 바이트 읽기
    async fn download(&self, location: &str) -> Result<Vec<u8>> {
        if location.starts_with("http://") || location.starts_with("https://") {
            let url = url::Url::parse(location).with_context(|| format!("Invalid URL: {}", location))?;
            tracing::info!("Downloading manual: {}", url);

            let response = self
                .client
                .get(url)
                .send()
                .await
                .with_context(|| format!("HTTP request failed: {}", location))?;

            let status = response.status();
            if !status.is_success() {
                anyhow::bail!("Failed to download {} (status {})", location, status);
            }

            let bytes = response
                .bytes()
                .await
                .with_context(|| format!("Failed to read body: {}", location))?;
            Ok(bytes.to_vec())
        } else {
            let path = self.root.join(location);
            tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read manual file {:?}", path))
        }
    }
}

fn transient(key: &str, err: anyhow::Error) -> anyhow::Error {
    RagError::TransientFetch {
        key: key.to_string(),
        message: format!("{:#}", err),
    }
    .into()
}

#[async_trait]
impl SourceOfTruth for FileSource {
    async fn list_active_tickets(&self) -> Result<HashSet<String>> {
        let index = self.load_tickets().await?;
        let keys = index.keys().cloned().collect();
        *self.tickets.write().await = Some(Arc::new(index));
        Ok(keys)
    }

    async fn list_active_devices(&self) -> Result<HashSet<String>> {
        let index = self.load_devices().await?;
        let keys = index.keys().cloned().collect();
        *self.devices.write().await = Some(Arc::new(index));
        Ok(keys)
    }

    async fn fetch_ticket_content(&self, key: &str) -> Result<TicketContent> {
        let index = self.ticket_index().await.map_err(|e| transient(key, e))?;
        let path = index
            .get(key)
            .ok_or_else(|| transient(key, anyhow::anyhow!("ticket not found in source")))?;
        Self::read_json(path).await.map_err(|e| transient(key, e))
    }

    async fn fetch_manual_document(&self, key: &str) -> Result<ManualBundle> {
        let index = self.device_index().await.map_err(|e| transient(key, e))?;
        let manifest = index
            .get(key)
            .ok_or_else(|| transient(key, anyhow::anyhow!("device not found in source")))?;

        let mut documents = Vec::new();
        for listing in manifest.manuals.iter().filter(|m| is_relevant(m)) {
            let Some(location) = listing.url.as_deref() else {
                continue;
            };
            let bytes = self
                .download(location)
                .await
                .map_err(|e| transient(key, e))?;
            documents.push(ManualDocument {
                url: location.to_string(),
                doctype: DocType::detect(location, listing.file_bytes.is_some()),
                bytes,
            });
        }

        tracing::debug!("{}: {} relevant manual documents", key, documents.len());

        Ok(ManualBundle {
            device: manifest.key(),
            device_model_used: manifest.device_model_used,
            documents,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
