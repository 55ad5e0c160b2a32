use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use logscope_types::{Chunk, Entry};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

/// Durable per-session storage for parsed chunks and key lists
pub trait ChunkStore: Send + Sync {
    fn save_chunk(&self, session_id: &str, chunk: Chunk) -> Result<(), StoreError>;

    /// Chunks ordered by filename, then chunk index
    fn load_chunks(&self, session_id: &str) -> Result<Vec<Chunk>, StoreError>;

    fn save_keys(&self, session_id: &str, keys: Vec<String>) -> Result<(), StoreError>;

    fn load_keys(&self, session_id: &str) -> Result<Vec<String>, StoreError>;

    fn delete_session(&self, session_id: &str) -> Result<(), StoreError>;
}

#[derive(Default)]
struct SessionData {
    chunks: Vec<Chunk>,
    keys: Vec<String>,
}

/// Thread-safe in-memory store
#[derive(Clone, Default)]
pub struct MemoryStore {
    sessions: Arc<RwLock<HashMap<String, SessionData>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChunkStore for MemoryStore {
    fn save_chunk(&self, session_id: &str, chunk: Chunk) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write();
        let session = sessions.entry(session_id.to_string()).or_default();
        // Re-saving a chunk replaces it
        session
            .chunks
            .retain(|c| !(c.filename == chunk.filename && c.chunk_index == chunk.chunk_index));
        session.chunks.push(chunk);
        Ok(())
    }

    fn load_chunks(&self, session_id: &str) -> Result<Vec<Chunk>, StoreError> {
        let sessions = self.sessions.read();
        let session = sessions
            .get(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        let mut chunks = session.chunks.clone();
        chunks.sort_by(|a, b| {
            a.filename
                .cmp(&b.filename)
                .then(a.chunk_index.cmp(&b.chunk_index))
        });
        Ok(chunks)
    }

    fn save_keys(&self, session_id: &str, keys: Vec<String>) -> Result<(), StoreError> {
        self.sessions
            .write()
            .entry(session_id.to_string())
            .or_default()
            .keys = keys;
        Ok(())
    }

    fn load_keys(&self, session_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .sessions
            .read()
            .get(session_id)
            .map(|s| s.keys.clone())
            .unwrap_or_default())
    }

    fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        self.sessions
            .write()
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))
    }
}

/// Rebuild the canonical record set from stored chunks: concatenate in
/// `(filename, chunk index)` order, then stable-sort valid entries by time
/// ahead of invalid ones. A missing time sorts as epoch zero.
pub fn assemble_entries(mut chunks: Vec<Chunk>) -> Vec<Entry> {
    chunks.sort_by(|a, b| {
        a.filename
            .cmp(&b.filename)
            .then(a.chunk_index.cmp(&b.chunk_index))
    });

    let mut entries: Vec<Entry> = chunks.into_iter().flat_map(|c| c.entries).collect();
    entries.sort_by_key(|e| (!e.is_valid, if e.is_valid { e.time.unwrap_or(0) } else { 0 }));
    entries
}

/// Load and assemble a session's record set
pub fn load_session_entries(store: &dyn ChunkStore, session_id: &str) -> Result<Vec<Entry>, StoreError> {
    Ok(assemble_entries(store.load_chunks(session_id)?))
}
