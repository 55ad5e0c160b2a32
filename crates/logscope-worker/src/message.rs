//! Typed messages exchanged with the workers.
//!
//! Every message travels in an [`Envelope`] that may carry a correlation id.
//! Responses echo the id of the request that produced them.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use logscope_types::{Chunk, Entry, ParseProgress, QueryRequest, QueryResult};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Envelope<T> {
    pub fn new(body: T) -> Self {
        Self {
            request_id: None,
            body,
        }
    }

    pub fn with_id(request_id: u64, body: T) -> Self {
        Self {
            request_id: Some(request_id),
            body,
        }
    }
}

impl<T> From<T> for Envelope<T> {
    fn from(body: T) -> Self {
        Self::new(body)
    }
}

// ============================================================================
// Parse worker
// ============================================================================

/// Where a file's bytes come from
#[derive(Clone, Debug)]
pub enum FileData {
    Memory(Arc<[u8]>),
    Path(PathBuf),
}

#[derive(Clone, Debug)]
pub struct FileSource {
    /// Name recorded on every entry and chunk of the file
    pub name: String,
    pub data: FileData,
}

impl FileSource {
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            data: FileData::Memory(bytes.into()),
        }
    }

    /// Named after the path's final component
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            name,
            data: FileData::Path(path),
        }
    }
}

#[derive(Clone, Debug)]
pub enum ParseCommand {
    /// Start a new session: entry ids and collected keys reset
    Init { session_id: String },
    ParseFile {
        file: FileSource,
        file_index: usize,
        total_files: usize,
    },
    /// Abort the parse in progress; ignored when idle
    Cancel,
    ExtractKeys,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ParseEvent {
    ParseProgress(ParseProgress),
    ParseChunkResult {
        chunk: Chunk,
    },
    ParseComplete {
        filename: String,
        total_entries: usize,
        file_index: usize,
        total_files: usize,
    },
    ParseError {
        error: String,
    },
    ParseCancelled {
        filename: String,
        chunks_emitted: u64,
    },
    KeysResult {
        keys: Vec<String>,
    },
}

impl ParseEvent {
    /// Whether the event ends the current file's parse
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ParseComplete { .. } | Self::ParseError { .. } | Self::ParseCancelled { .. }
        )
    }
}

// ============================================================================
// Query worker
// ============================================================================

#[derive(Clone, Debug)]
pub enum QueryCommand {
    /// Replace the loaded record set
    Init { entries: Vec<Entry> },
    Query(QueryRequest),
    ExtractKeys,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum QueryEvent {
    QueryResult(QueryResult),
    QueryError { error: String },
    KeysResult { keys: Vec<String> },
}
