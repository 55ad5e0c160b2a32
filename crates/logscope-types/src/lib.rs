//! Shared types for logscope
//!
//! This crate contains data structures used across multiple logscope crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Log Types
// ============================================================================

/// Log severity level
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub const ALL: [LogLevel; 6] = [
        Self::Trace,
        Self::Debug,
        Self::Info,
        Self::Warn,
        Self::Error,
        Self::Fatal,
    ];

    /// Exact, case-sensitive match against the six level names
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TRACE" => Some(Self::Trace),
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARN" => Some(Self::Warn),
            "ERROR" => Some(Self::Error),
            "FATAL" => Some(Self::Fatal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }

    /// ERROR and FATAL both count as errors for group statistics
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error | Self::Fatal)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single parsed log record, or an invalid placeholder for an unparsable line
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Sequential ID, unique within a parse session
    pub id: u64,

    /// Raw line text (only set when invalid)
    pub raw: String,

    /// ISO-8601 timestamp with millisecond precision, empty if invalid
    pub timestamp: String,

    /// Epoch milliseconds, absent if the timestamp does not parse
    pub time: Option<i64>,

    pub level: Option<LogLevel>,

    pub logger: String,

    /// `<path>:<line-number>`
    pub file_position: String,

    pub message: String,

    /// Raw JSON object text, parsed lazily by consumers
    #[serde(rename = "detailsJSON")]
    pub details_json: String,

    pub is_valid: bool,

    /// Accumulated diagnostics (only set when invalid)
    pub parse_error: String,

    /// Continuation lines merged into this entry
    pub stack_trace: Vec<String>,

    /// Source file name
    pub filename: String,
}

impl Entry {
    /// Create an invalid entry carrying the raw line and a diagnostic
    pub fn invalid(id: u64, filename: &str, raw: &str, parse_error: String) -> Self {
        Self {
            id,
            raw: raw.to_string(),
            is_valid: false,
            parse_error,
            filename: filename.to_string(),
            ..Default::default()
        }
    }

    /// Whether the entry is at ERROR or FATAL level
    pub fn is_error(&self) -> bool {
        self.level.is_some_and(|l| l.is_error())
    }

    /// Level name, or an empty string when the entry has none
    pub fn level_str(&self) -> &'static str {
        self.level.map(|l| l.as_str()).unwrap_or("")
    }
}

/// Entries are shared between the query worker and its results
pub type SharedEntry = Arc<Entry>;

/// One contiguous byte window of a source file with the entries parsed from it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub filename: String,
    pub chunk_index: u64,
    pub byte_start: u64,
    pub byte_end: u64,
    pub entries: Vec<Entry>,
    pub parsed_at: DateTime<Utc>,
}

/// Progress of a multi-file parse, as a single continuous percentage
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseProgress {
    pub bytes_processed: u64,
    pub total_bytes: u64,
    pub entries_parsed: usize,
    pub current_file: String,
    pub percent: f64,
}

// ============================================================================
// Query Types
// ============================================================================

/// Field filters for a query; empty values are no-ops
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldFilters {
    pub timestamp: String,
    /// Exact match against the level name
    pub level: String,
    pub logger: String,
    pub file_position: String,
    pub message: String,
    pub details: String,
    pub filename: String,
    pub show_invalid: bool,
}

impl FieldFilters {
    /// Filters that match every entry, including invalid ones
    pub fn show_all() -> Self {
        Self {
            show_invalid: true,
            ..Default::default()
        }
    }
}

/// One query against a loaded record set
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    #[serde(default)]
    pub filters: FieldFilters,
    /// 1-based; out-of-range pages are clamped
    pub page: usize,
    pub page_size: usize,
    /// Dot-separated JSON path into the details payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by_key: Option<String>,
}

/// Counts per log level
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct LevelCounts {
    pub trace: usize,
    pub debug: usize,
    pub info: usize,
    pub warn: usize,
    pub error: usize,
    pub fatal: usize,
}

impl LevelCounts {
    pub fn record(&mut self, level: LogLevel) {
        match level {
            LogLevel::Trace => self.trace += 1,
            LogLevel::Debug => self.debug += 1,
            LogLevel::Info => self.info += 1,
            LogLevel::Warn => self.warn += 1,
            LogLevel::Error => self.error += 1,
            LogLevel::Fatal => self.fatal += 1,
        }
    }

    pub fn get(&self, level: LogLevel) -> usize {
        match level {
            LogLevel::Trace => self.trace,
            LogLevel::Debug => self.debug,
            LogLevel::Info => self.info,
            LogLevel::Warn => self.warn,
            LogLevel::Error => self.error,
            LogLevel::Fatal => self.fatal,
        }
    }

    pub fn total(&self) -> usize {
        self.trace + self.debug + self.info + self.warn + self.error + self.fatal
    }
}

/// Aggregate over entries sharing one extracted key value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedResult {
    pub group_key: String,
    pub key_value: String,
    pub count: usize,
    pub first_entry: SharedEntry,
    pub last_entry: SharedEntry,
    /// Members in arrival order
    pub entries: Vec<SharedEntry>,
    pub has_errors: bool,
    pub duration_ms: Option<i64>,
}

/// Answer to a single query request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub entries: Vec<SharedEntry>,
    pub total_entries: usize,
    pub total_pages: usize,
    pub page: usize,
    /// Computed over the unfiltered record set
    pub level_stats: LevelCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<GroupedResult>>,
}
