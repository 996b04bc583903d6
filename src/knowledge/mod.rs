//! Knowledge 모듈 - 티켓/매뉴얼 Chunk Store
//!
//! - Chunk: 청크 타입 + [`ChunkStore`] 트레이트
//! - SQLite: 청크 텍스트 + FTS5 키워드 검색 + 완료 기록
//! - LanceDB: 임베딩 벡터 + 코사인 검색 (ANN)
//! - Hybrid: 위 둘을 chunk id로 묶은 기본 구현
//! - Memory: 테스트용 구현
//! - Chunker: 티켓(Markdown) / 매뉴얼(페이지 요소) 분할

mod chunk;
mod store;
mod lance;
mod hybrid;
mod memory;
mod chunker;

// Re-exports
pub use chunk::{
    ChunkHit, ChunkRecord, ChunkStore, Corpus, CorpusStats, NewChunk, ScopeFilter,
    cosine_similarity,
};
pub use store::ChunkTextStore;
pub use lance::{LanceVectorStore, VectorMatch, VectorRow};
pub use hybrid::HybridChunkStore;
pub use memory::MemoryChunkStore;
pub use chunker::{
    Chunker, ChunkConfig, MarkdownChunker, PageChunk, PageChunker, PageElement,
};
