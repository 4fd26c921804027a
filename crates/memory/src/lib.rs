pub mod cache;
pub mod classify;
pub mod context;
pub mod normalizer;
pub mod repository;
pub mod schema;
pub mod session;
pub mod store;

pub use cache::{CacheStats, ResponseCache};
pub use classify::{classify_query, extract_strains};
pub use context::ContextBuilder;
pub use normalizer::{normalize, query_hash};
pub use repository::{ConversationLog, DocumentRepository, QueryRepository};
pub use schema::{ChatMessage, ConversationEntry, QueryRecord, QueryType, SessionTurn};
pub use session::SessionMemory;
pub use store::{Document, DocumentStore, MemoryDocumentStore, StoreError};
