//! Sync 모듈 - 운영 시스템의 티켓/매뉴얼을 Chunk Store와 맞춤
//!
//! - Source: Source of Truth 인터페이스 및 파일 기반 구현
//! - Ticket: 티켓 설명 전처리, 문서화, 청크 생성
//! - Manual: 관련성 필터, 매뉴얼 파싱 및 청크 생성
//! - Reconciler: diff → 삭제/삽입 → 보고서

mod manual;
mod reconciler;
mod source;
mod ticket;

// Re-exports
pub use manual::{build_manual_chunks, is_relevant};
pub use reconciler::{plan_sync, CorpusReport, Reconciler, SyncPlan, SyncReport};
pub use source::{
    DeviceKey, DeviceManifest, FileSource, ManualBundle, ManualDocument, ManualListing,
    SourceOfTruth, TicketContent, DEVICE_KEY_SEPARATOR,
};
pub use ticket::{build_ticket_chunks, process_description, remove_mail_addresses, ticket_document};
