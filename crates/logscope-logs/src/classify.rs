use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

use logscope_types::LogLevel;

static TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[0-9]{4}-(?:0[1-9]|1[0-2])-(?:0[1-9]|[12][0-9]|3[01])T(?:[01][0-9]|2[0-3]):[0-5][0-9]:[0-5][0-9]\.[0-9]{3}(?:Z|[-+][0-9]{4})$",
    )
    .expect("timestamp pattern is valid")
});

static LOGGER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_.\-]+$").expect("logger pattern is valid"));

static FILE_POSITION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*:[0-9]+$").expect("file position pattern is valid"));

static DETAILS_JSON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{.*\}$").expect("details pattern is valid"));

static MESSAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9\s\-/:()]+$").expect("message pattern is valid"));

/// Semantic role of a single tab-separated token
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    Timestamp,
    Level,
    Logger,
    FilePosition,
    Message,
    DetailsJson,
    Unknown,
}

impl FieldType {
    /// Role expected at a grammar position; positions past the grammar expect `Unknown`
    pub fn expected_at(position: usize) -> Self {
        match position {
            0 => Self::Timestamp,
            1 => Self::Level,
            2 => Self::Logger,
            3 => Self::FilePosition,
            4 => Self::Message,
            5 => Self::DetailsJson,
            _ => Self::Unknown,
        }
    }

    /// Free-text roles are accepted without classification
    pub fn is_free_text(&self) -> bool {
        matches!(self, Self::Message | Self::DetailsJson)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timestamp => "timestamp",
            Self::Level => "level",
            Self::Logger => "logger",
            Self::FilePosition => "file_position",
            Self::Message => "message",
            Self::DetailsJson => "details_json",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a token. First match wins: the patterns overlap, so the order
/// below is part of the grammar (logger must precede file position).
pub fn classify(token: &str) -> FieldType {
    if TIMESTAMP_RE.is_match(token) {
        FieldType::Timestamp
    } else if LogLevel::parse(token).is_some() {
        FieldType::Level
    } else if LOGGER_RE.is_match(token) {
        FieldType::Logger
    } else if FILE_POSITION_RE.is_match(token) {
        FieldType::FilePosition
    } else if DETAILS_JSON_RE.is_match(token) {
        FieldType::DetailsJson
    } else if MESSAGE_RE.is_match(token) {
        FieldType::Message
    } else {
        FieldType::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp() {
        assert_eq!(classify("2024-01-15T10:30:00.000Z"), FieldType::Timestamp);
        assert_eq!(classify("2024-01-15T10:30:00.123+0530"), FieldType::Timestamp);
        assert_eq!(classify("2024-01-15T10:30:00.123-0800"), FieldType::Timestamp);
        // Seconds precision and colon offsets are outside the grammar
        assert_ne!(classify("2024-01-15T10:30:00Z"), FieldType::Timestamp);
        assert_ne!(classify("2024-01-15T10:30:00.000+05:30"), FieldType::Timestamp);
        assert_ne!(classify("2024-13-15T10:30:00.000Z"), FieldType::Timestamp);
    }

    #[test]
    fn test_level_exact() {
        assert_eq!(classify("ERROR"), FieldType::Level);
        assert_eq!(classify("FATAL"), FieldType::Level);
        // Lowercase falls through to the logger pattern
        assert_eq!(classify("error"), FieldType::Logger);
    }

    #[test]
    fn test_logger_before_file_position() {
        assert_eq!(classify("controllers.DRPlacementControl"), FieldType::Logger);
        assert_eq!(classify("vrg-controller_1"), FieldType::Logger);
        assert_eq!(classify("main.go:42"), FieldType::FilePosition);
        assert_eq!(classify("/src/pkg/util.go:1024"), FieldType::FilePosition);
    }

    #[test]
    fn test_details_before_message() {
        assert_eq!(classify(r#"{"rid":"abc123"}"#), FieldType::DetailsJson);
        // Malformed JSON still classifies; consumers fail later
        assert_eq!(classify("{not json}"), FieldType::DetailsJson);
    }

    #[test]
    fn test_message_and_unknown() {
        assert_eq!(classify("Server started"), FieldType::Message);
        assert_eq!(classify("retry (attempt 2/3)"), FieldType::Message);
        assert_eq!(classify("failed, giving up!"), FieldType::Unknown);
        assert_eq!(classify(""), FieldType::Unknown);
    }

    #[test]
    fn test_classify_is_deterministic() {
        for token in ["INFO", "main.go:1", "a b c", "{}", "x!y"] {
            assert_eq!(classify(token), classify(token));
        }
    }
}
