use regex::{Regex, RegexBuilder};

use logscope_types::{Entry, FieldFilters};

/// Case-insensitive substring matcher; `None` matches everything
#[derive(Clone, Debug, Default)]
struct Needle(Option<Regex>);

impl Needle {
    fn new(pattern: &str) -> Result<Self, regex::Error> {
        if pattern.is_empty() {
            return Ok(Self(None));
        }
        let regex = RegexBuilder::new(&regex::escape(pattern))
            .case_insensitive(true)
            .build()?;
        Ok(Self(Some(regex)))
    }

    fn matches(&self, haystack: &str) -> bool {
        match &self.0 {
            Some(re) => re.is_match(haystack),
            None => true,
        }
    }
}

/// Field filters compiled once per query
#[derive(Clone, Debug)]
pub struct CompiledFilter {
    timestamp: Needle,
    level: Option<String>,
    logger: Needle,
    file_position: Needle,
    message: Needle,
    details: Needle,
    filename: Needle,
    show_invalid: bool,
}

impl CompiledFilter {
    pub fn new(filters: &FieldFilters) -> Result<Self, regex::Error> {
        Ok(Self {
            timestamp: Needle::new(&filters.timestamp)?,
            level: (!filters.level.is_empty()).then(|| filters.level.clone()),
            logger: Needle::new(&filters.logger)?,
            file_position: Needle::new(&filters.file_position)?,
            message: Needle::new(&filters.message)?,
            details: Needle::new(&filters.details)?,
            filename: Needle::new(&filters.filename)?,
            show_invalid: filters.show_invalid,
        })
    }

    /// All predicates combine with AND
    pub fn matches(&self, entry: &Entry) -> bool {
        if !self.show_invalid && !entry.is_valid {
            return false;
        }

        if let Some(level) = &self.level {
            if entry.level_str() != level {
                return false;
            }
        }

        self.timestamp.matches(&entry.timestamp)
            && self.logger.matches(&entry.logger)
            && self.file_position.matches(&entry.file_position)
            && self.message.matches(&entry.message)
            && self.details.matches(&entry.details_json)
            && self.filename.matches(&entry.filename)
    }
}
