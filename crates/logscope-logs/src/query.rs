use std::collections::HashMap;
use thiserror::Error;

use crate::filter::CompiledFilter;
use crate::keys::extract_key;
use logscope_types::{GroupedResult, LevelCounts, QueryRequest, QueryResult, SharedEntry};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Page size must be greater than zero")]
    InvalidPageSize,

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Query failed: {0}")]
    Internal(String),
}

/// Filter, then either paginate or group the record set.
///
/// `entries` must already be in canonical (chronological) order; group
/// first/last entries and durations rely on it.
pub fn query(entries: &[SharedEntry], request: &QueryRequest) -> Result<QueryResult, QueryError> {
    if request.page_size == 0 {
        return Err(QueryError::InvalidPageSize);
    }
    let group_key = group_key(request.group_by_key.as_deref());
    let filter =
        CompiledFilter::new(&request.filters).map_err(|e| QueryError::InvalidFilter(e.to_string()))?;

    let filtered: Vec<SharedEntry> = entries
        .iter()
        .filter(|e| filter.matches(e))
        .cloned()
        .collect();
    let level_stats = level_stats(entries);

    let Some(key) = group_key else {
        return Ok(paginate(filtered, request.page, request.page_size, level_stats));
    };

    let groups = group_by(&filtered, key);
    Ok(QueryResult {
        total_entries: filtered.len(),
        entries: filtered,
        total_pages: 1,
        page: 1,
        level_stats,
        groups: Some(groups),
    })
}

/// Empty or blank keys mean "no grouping". Empty path segments are ordinary
/// object keys; a path that resolves to nothing leaves the entry ungrouped.
fn group_key(raw: Option<&str>) -> Option<&str> {
    raw.filter(|key| !key.trim().is_empty())
}

/// Level frequencies; entries without a level are not counted
pub fn level_stats(entries: &[SharedEntry]) -> LevelCounts {
    let mut counts = LevelCounts::default();
    for level in entries.iter().filter_map(|e| e.level) {
        counts.record(level);
    }
    counts
}

fn paginate(
    filtered: Vec<SharedEntry>,
    page: usize,
    page_size: usize,
    level_stats: LevelCounts,
) -> QueryResult {
    let total_entries = filtered.len();
    let total_pages = total_entries.div_ceil(page_size).max(1);
    let page = page.clamp(1, total_pages);
    let start = (page - 1) * page_size;
    let end = (start + page_size).min(total_entries);

    QueryResult {
        entries: filtered[start..end].to_vec(),
        total_entries,
        total_pages,
        page,
        level_stats,
        groups: None,
    }
}

/// Partition entries by extracted key value, in first-encounter order, then
/// sort groups by their first entry's timestamp string. The ISO-8601 text
/// sorts lexicographically in chronological order.
pub fn group_by(entries: &[SharedEntry], key: &str) -> Vec<GroupedResult> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut buckets: Vec<(String, Vec<SharedEntry>)> = Vec::new();

    for entry in entries {
        let Some(value) = extract_key(&entry.details_json, key) else {
            continue;
        };
        match index.get(&value) {
            Some(&i) => buckets[i].1.push(entry.clone()),
            None => {
                index.insert(value.clone(), buckets.len());
                buckets.push((value, vec![entry.clone()]));
            }
        }
    }

    let mut groups: Vec<GroupedResult> = buckets
        .into_iter()
        .filter_map(|(key_value, members)| {
            let first = members.first()?.clone();
            let last = members.last()?.clone();
            let duration_ms = match (first.time, last.time) {
                (Some(start), Some(end)) => Some(end - start),
                _ => None,
            };
            Some(GroupedResult {
                group_key: key.to_string(),
                key_value,
                count: members.len(),
                has_errors: members.iter().any(|e| e.is_error()),
                first_entry: first,
                last_entry: last,
                entries: members,
                duration_ms,
            })
        })
        .collect();

    groups.sort_by(|a, b| a.first_entry.timestamp.cmp(&b.first_entry.timestamp));
    groups
}
