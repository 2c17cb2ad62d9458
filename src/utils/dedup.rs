//! Deduplication utilities for dataset records.
//!
//! Records are identified by `(source, id)`, which is what the aggregate
//! fetch and the local cache key on. The same dataset mirrored to two
//! repositories keeps both records; [`find_cross_source_duplicates`] only
//! reports such groups so callers can show them.

use std::collections::{HashMap, HashSet};
use strsim::jaro_winkler;

use crate::models::{DatasetRecord, SourceType};

/// Title similarity above which two records from different sources are
/// treated as the same dataset
const TITLE_SIMILARITY_THRESHOLD: f64 = 0.95;

/// Strategy for handling duplicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateStrategy {
    /// Keep the first occurrence of each `(source, id)`
    #[default]
    First,
    /// Keep the last occurrence, at the position of the first
    Last,
}

/// Remove records that repeat a `(source, id)` key
///
/// Order of first appearance is preserved. With [`DuplicateStrategy::Last`]
/// the surviving record's content is the last one seen.
pub fn deduplicate_records(
    records: Vec<DatasetRecord>,
    strategy: DuplicateStrategy,
) -> Vec<DatasetRecord> {
    let mut positions: HashMap<(SourceType, String), usize> = HashMap::new();
    let mut unique: Vec<DatasetRecord> = Vec::with_capacity(records.len());

    for record in records {
        let key = (record.source, record.id.clone());
        match positions.get(&key) {
            Some(&idx) => {
                if strategy == DuplicateStrategy::Last {
                    unique[idx] = record;
                }
            }
            None => {
                positions.insert(key, unique.len());
                unique.push(record);
            }
        }
    }

    unique
}

/// Find records from different sources that describe the same dataset
///
/// Returns groups of record indices. Two records match on a shared DOI, or
/// on near-identical titles when neither has a DOI to contradict it.
pub fn find_cross_source_duplicates(records: &[DatasetRecord]) -> Vec<Vec<usize>> {
    let titles: Vec<String> = records.iter().map(|r| normalize_title(&r.name)).collect();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut processed: HashSet<usize> = HashSet::new();

    for i in 0..records.len() {
        if processed.contains(&i) {
            continue;
        }

        let mut group = vec![i];
        for j in (i + 1)..records.len() {
            if !processed.contains(&j) && are_duplicates(&records[i], &records[j], &titles[i], &titles[j]) {
                group.push(j);
                processed.insert(j);
            }
        }

        if group.len() > 1 {
            groups.push(group);
        }
        processed.insert(i);
    }

    groups
}

fn are_duplicates(a: &DatasetRecord, b: &DatasetRecord, title_a: &str, title_b: &str) -> bool {
    if a.source == b.source {
        return false;
    }

    match (normalize_doi(a), normalize_doi(b)) {
        (Some(doi_a), Some(doi_b)) => doi_a == doi_b,
        _ => !title_a.is_empty() && jaro_winkler(title_a, title_b) >= TITLE_SIMILARITY_THRESHOLD,
    }
}

fn normalize_doi(record: &DatasetRecord) -> Option<String> {
    let doi = record.doi.as_deref()?.trim().to_lowercase();
    let doi = doi
        .trim_start_matches("https://doi.org/")
        .trim_start_matches("http://doi.org/")
        .trim_start_matches("doi:");
    (!doi.is_empty()).then(|| doi.to_string())
}

/// Lowercase, drop punctuation and collapse whitespace
fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
