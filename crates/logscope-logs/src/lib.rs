//! Log processing for logscope
//!
//! This crate provides line classification, streaming chunked parsing,
//! filtering, key extraction, querying and session storage.

mod classify;
mod decoder;
mod filter;
mod keys;
mod parser;
mod query;
mod session;
mod stream;

pub use classify::{FieldType, classify};
pub use decoder::Utf8StreamDecoder;
pub use filter::CompiledFilter;
pub use keys::{collect_entry_keys, extract_all_keys, extract_key, flatten_keys, resolve_path};
pub use parser::{LineParser, UNKNOWN_LOGGER, parse_epoch_millis};
pub use query::{QueryError, group_by, level_stats, query};
pub use session::{ChunkStore, MemoryStore, StoreError, assemble_entries, load_session_entries};
pub use stream::{
    DEFAULT_CHUNK_SIZE, FileContext, StreamError, StreamEvent, StreamOutcome, StreamParser,
    parse_stream,
};

// Re-export types used in our public API
pub use logscope_types::{
    Chunk, Entry, FieldFilters, GroupedResult, LevelCounts, LogLevel, ParseProgress, QueryRequest,
    QueryResult, SharedEntry,
};
