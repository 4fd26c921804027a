pub mod docstore;
pub mod engine;
pub mod kv;

pub use docstore::FileDocumentStore;
pub use engine::{ChatEngine, ChatReply};
pub use kv::{FileKvStore, KvStore, MemoryKvStore};
