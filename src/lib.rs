//! fieldservice-rag - 현장 서비스 티켓용 하이브리드 RAG
//!
//! 과거 티켓과 제조사 매뉴얼을 청크 단위로 저장하고,
//! LanceDB 벡터 검색 + SQLite FTS5 키워드 검색을 RRF로 융합해서
//! 신규 티켓의 해결책 생성에 쓸 컨텍스트를 조립합니다.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod knowledge;
pub mod pipeline;
pub mod retrieval;
pub mod sync;

// Re-exports
pub use config::{Config, Deployment};
pub use embedding::{create_embedder, EmbeddingProvider};
pub use error::{is_fatal, RagError};
pub use knowledge::{ChunkStore, Corpus, HybridChunkStore, ScopeFilter};
pub use pipeline::{process_ticket, ResolutionGenerator, TicketRequest, TicketResponse};
pub use retrieval::{reciprocal_rank_fusion, RetrievalContext, Retriever};
pub use sync::{FileSource, Reconciler, SourceOfTruth, SyncReport};
