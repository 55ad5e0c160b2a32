use chrono::DateTime;

use crate::classify::{FieldType, classify};
use logscope_types::{Entry, LogLevel};

/// Placeholder inserted when a line omits its logger field
pub const UNKNOWN_LOGGER: &str = "unknown logger";

/// Minimum number of tab-separated tokens before positional parsing is attempted
const MIN_TOKENS: usize = 4;

/// Number of resolved fields a valid entry needs (details JSON is optional)
const REQUIRED_FIELDS: usize = 5;

/// Parser for the six-field tab-separated grammar
/// `timestamp, level, logger, file position, message, details JSON`.
///
/// Owns the entry id counter for one parse session.
#[derive(Debug, Default)]
pub struct LineParser {
    next_id: u64,
}

impl LineParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one raw line into an entry. Never fails: unparsable lines come
    /// back as invalid entries carrying the raw text and diagnostics.
    pub fn parse(&mut self, line: &str, filename: &str) -> Entry {
        let id = self.next_id;
        self.next_id += 1;

        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < MIN_TOKENS {
            return Entry::invalid(
                id,
                filename,
                line,
                format!("Invalid number of fields in line, lenparts: {}", parts.len()),
            );
        }

        let mut resolved: Vec<&str> = Vec::with_capacity(parts.len() + 1);
        let mut adjustment = 0;
        let mut errors = String::new();

        for (i, part) in parts.iter().enumerate() {
            let expected = FieldType::expected_at(i + adjustment);
            if expected.is_free_text() {
                resolved.push(part);
                continue;
            }

            let actual = classify(part);
            if actual == expected {
                resolved.push(part);
                continue;
            }

            // A file position where the logger belongs means the logger was omitted
            if expected == FieldType::Logger && actual == FieldType::FilePosition {
                resolved.push(UNKNOWN_LOGGER);
                resolved.push(part);
                adjustment += 1;
                continue;
            }

            errors.push_str(&format!(
                "Field type mismatch at position {}, part: {}, expected type: {}, determined type: {}. ",
                i, part, expected, actual
            ));
        }

        if !errors.is_empty() {
            return Entry::invalid(id, filename, line, errors);
        }

        if resolved.len() < REQUIRED_FIELDS {
            return Entry::invalid(
                id,
                filename,
                line,
                format!(
                    "Missing fields: resolved {} of {} required",
                    resolved.len(),
                    REQUIRED_FIELDS
                ),
            );
        }

        let timestamp = resolved[0].to_string();
        Entry {
            id,
            time: parse_epoch_millis(&timestamp),
            timestamp,
            level: LogLevel::parse(resolved[1]),
            logger: resolved[2].to_string(),
            file_position: resolved[3].to_string(),
            message: resolved[4].to_string(),
            details_json: resolved.get(5).map(|s| s.to_string()).unwrap_or_default(),
            is_valid: true,
            filename: filename.to_string(),
            ..Default::default()
        }
    }
}

/// Parse a grammar timestamp (`Z` or `+HHMM` offset) into epoch milliseconds
pub fn parse_epoch_millis(timestamp: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(timestamp)
        .or_else(|_| DateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
        .map(|dt| dt.timestamp_millis())
}
