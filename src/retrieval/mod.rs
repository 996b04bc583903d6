//! Retrieval 모듈 - 쿼리 시점 검색
//!
//! - Search: dense + lexical 두 패스
//! - Fusion: RRF 순위 융합 (순수 함수)
//! - Context: 코퍼스별 융합 결과를 생성 단계 입력으로 조립

mod search;
mod fusion;
mod context;

// Re-exports
pub use search::{dual_index_search, DualPass};
pub use fusion::{reciprocal_rank_fusion, FusedCandidate, RankedCandidate, DEFAULT_RRF_K};
pub use context::{ManualContext, RetrievalContext, Retriever, TicketContext};
