//! Dataset filtering and sorting.
//!
//! A [`DatasetFilter`] can be built field by field or parsed from a compact
//! filter expression:
//!
//! ```text
//! source:openneuro modality:eeg subjects>=20 downloads>100 task:rest has:description alzheimer
//! ```
//!
//! - `source:`, `modality:`, `task:`, `format:` and `has:description` are exact keys
//! - `subjects` and `downloads` accept `>=`, `<=`, `>`, `<` and `=`
//! - every remaining bare word is a free-text term that must match

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;
use std::sync::OnceLock;

use super::dataset::{DataFormat, DatasetRecord, SourceType};
use super::search::{SortBy, SortOrder};
use crate::sources::SourceError;

static COMPARISON: OnceLock<Regex> = OnceLock::new();

fn comparison_regex() -> &'static Regex {
    COMPARISON.get_or_init(|| {
        Regex::new(r"^(?i)(subjects|n_subjects|downloads)(>=|<=|>|<|=)(\d+)$")
            .unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

/// Criteria a dataset record must satisfy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetFilter {
    /// Restrict to these sources (empty = any)
    #[serde(default)]
    pub sources: Vec<SourceType>,

    /// Free-text terms; each must match id, name, description, tasks or keywords
    #[serde(default)]
    pub terms: Vec<String>,

    /// Modality, matched case-insensitively against the record's modality set
    #[serde(default)]
    pub modality: Option<String>,

    #[serde(default)]
    pub min_subjects: Option<u64>,

    #[serde(default)]
    pub max_subjects: Option<u64>,

    /// Substring of any task name
    #[serde(default)]
    pub task_contains: Option<String>,

    #[serde(default)]
    pub format: Option<DataFormat>,

    #[serde(default)]
    pub min_downloads: Option<u64>,

    #[serde(default)]
    pub max_downloads: Option<u64>,

    /// Require a non-empty description
    #[serde(default)]
    pub has_description: bool,

    /// Lowercased phrase that must appear in the title or description
    #[serde(default)]
    pub phrase: Option<String>,
}

impl DatasetFilter {
    /// A filter that matches every record
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the filter matches every record
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn source(mut self, source: SourceType) -> Self {
        if !self.sources.contains(&source) {
            self.sources.push(source);
        }
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.terms
            .extend(text.split_whitespace().map(|t| t.to_string()));
        self
    }

    pub fn modality(mut self, modality: impl Into<String>) -> Self {
        self.modality = Some(modality.into());
        self
    }

    pub fn min_subjects(mut self, min: u64) -> Self {
        self.min_subjects = Some(min);
        self
    }

    pub fn max_subjects(mut self, max: u64) -> Self {
        self.max_subjects = Some(max);
        self
    }

    pub fn task_contains(mut self, task: impl Into<String>) -> Self {
        self.task_contains = Some(task.into());
        self
    }

    pub fn min_downloads(mut self, min: u64) -> Self {
        self.min_downloads = Some(min);
        self
    }

    pub fn max_downloads(mut self, max: u64) -> Self {
        self.max_downloads = Some(max);
        self
    }

    pub fn has_description(mut self, required: bool) -> Self {
        self.has_description = required;
        self
    }

    /// Require `phrase` as a case-insensitive substring of title or description
    pub fn phrase(mut self, phrase: &str) -> Self {
        self.phrase = Some(phrase.trim().to_lowercase());
        self
    }

    /// Check a record against every criterion
    ///
    /// A record without a reported subject count never satisfies a subject
    /// bound, and one without a download count never satisfies a download bound.
    pub fn matches(&self, record: &DatasetRecord) -> bool {
        if !self.sources.is_empty() && !self.sources.contains(&record.source) {
            return false;
        }

        if let Some(modality) = &self.modality {
            if !record.has_modality(modality) {
                return false;
            }
        }

        if self.min_subjects.is_some() || self.max_subjects.is_some() {
            let Some(n) = record.n_subjects else {
                return false;
            };
            if self.min_subjects.is_some_and(|min| n < min)
                || self.max_subjects.is_some_and(|max| n > max)
            {
                return false;
            }
        }

        if let Some(task) = &self.task_contains {
            let task = task.to_lowercase();
            if !record
                .tasks
                .iter()
                .any(|t| t.to_lowercase().contains(&task))
            {
                return false;
            }
        }

        if let Some(format) = &self.format {
            if &record.format != format {
                return false;
            }
        }

        if self.min_downloads.is_some() || self.max_downloads.is_some() {
            let Some(n) = record.downloads else {
                return false;
            };
            if self.min_downloads.is_some_and(|min| n < min)
                || self.max_downloads.is_some_and(|max| n > max)
            {
                return false;
            }
        }

        if self.has_description && !record.has_description() {
            return false;
        }

        if let Some(phrase) = &self.phrase {
            let in_title = record.name.to_lowercase().contains(phrase.as_str());
            let in_description = record
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(phrase.as_str()));
            if !in_title && !in_description {
                return false;
            }
        }

        self.terms.iter().all(|term| record.matches_text(term))
    }

    /// Keep only matching records, preserving order
    pub fn apply(&self, records: Vec<DatasetRecord>) -> Vec<DatasetRecord> {
        if self.is_empty() {
            return records;
        }
        records.into_iter().filter(|r| self.matches(r)).collect()
    }

    fn apply_comparison(&mut self, field: &str, op: &str, value: u64) -> Result<(), SourceError> {
        match (field, op) {
            ("subjects" | "n_subjects", ">=") => self.min_subjects = Some(value),
            ("subjects" | "n_subjects", ">") => self.min_subjects = Some(value.saturating_add(1)),
            ("subjects" | "n_subjects", "<=") => self.max_subjects = Some(value),
            ("subjects" | "n_subjects", "<") => {
                self.max_subjects = Some(value.checked_sub(1).ok_or_else(|| {
                    SourceError::InvalidArgument("subjects<0 can never match".to_string())
                })?)
            }
            ("subjects" | "n_subjects", "=") => {
                self.min_subjects = Some(value);
                self.max_subjects = Some(value);
            }
            ("downloads", ">=") => self.min_downloads = Some(value),
            ("downloads", ">") => self.min_downloads = Some(value.saturating_add(1)),
            ("downloads", "<=") => self.max_downloads = Some(value),
            ("downloads", "<") => {
                self.max_downloads = Some(value.checked_sub(1).ok_or_else(|| {
                    SourceError::InvalidArgument("downloads<0 can never match".to_string())
                })?)
            }
            ("downloads", "=") => {
                self.min_downloads = Some(value);
                self.max_downloads = Some(value);
            }
            (field, op) => {
                return Err(SourceError::InvalidArgument(format!(
                    "unsupported comparison '{}{}' in filter",
                    field, op
                )))
            }
        }
        Ok(())
    }
}

impl FromStr for DatasetFilter {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut filter = DatasetFilter::default();

        for token in s.split_whitespace() {
            if let Some(caps) = comparison_regex().captures(token) {
                let field = caps[1].to_lowercase();
                let value: u64 = caps[3].parse().map_err(|_| {
                    SourceError::InvalidArgument(format!("number out of range in '{}'", token))
                })?;
                filter.apply_comparison(&field, &caps[2], value)?;
                continue;
            }

            match token.split_once(':') {
                Some((key, value)) if !value.is_empty() => match key.to_lowercase().as_str() {
                    "source" => {
                        for name in value.split(',') {
                            filter = filter.source(name.parse()?);
                        }
                    }
                    "modality" => filter.modality = Some(value.to_string()),
                    "task" => filter.task_contains = Some(value.to_string()),
                    "format" => filter.format = Some(value.parse()?),
                    "has" if value.eq_ignore_ascii_case("description")
                        || value.eq_ignore_ascii_case("readme") =>
                    {
                        filter.has_description = true
                    }
                    _ => {
                        return Err(SourceError::InvalidArgument(format!(
                            "unknown filter key in '{}'",
                            token
                        )))
                    }
                },
                Some(_) => {
                    return Err(SourceError::InvalidArgument(format!(
                        "missing value in filter token '{}'",
                        token
                    )))
                }
                None if token.contains(['<', '>', '=']) => {
                    return Err(SourceError::InvalidArgument(format!(
                        "malformed comparison '{}'",
                        token
                    )))
                }
                None => filter.terms.push(token.to_string()),
            }
        }

        Ok(filter)
    }
}

/// Sort records in place; records missing the sort key always go last
pub fn sort_datasets(records: &mut [DatasetRecord], by: SortBy, order: SortOrder) {
    records.sort_by(|a, b| {
        let ordering = match by {
            SortBy::Downloads => compare_optional(a.downloads, b.downloads, order),
            SortBy::Views => compare_optional(a.views, b.views, order),
            SortBy::Subjects => compare_optional(a.n_subjects, b.n_subjects, order),
            SortBy::Size => compare_optional(a.size_bytes, b.size_bytes, order),
            SortBy::Name => directed(a.name.to_lowercase().cmp(&b.name.to_lowercase()), order),
            SortBy::Created => compare_optional(a.created.as_ref(), b.created.as_ref(), order),
            SortBy::Modified => compare_optional(a.modified.as_ref(), b.modified.as_ref(), order),
        };
        ordering.then_with(|| a.source.cmp(&b.source))
    });
}

fn directed(ordering: Ordering, order: SortOrder) -> Ordering {
    match order {
        SortOrder::Ascending => ordering,
        SortOrder::Descending => ordering.reverse(),
    }
}

fn compare_optional<T: Ord>(a: Option<T>, b: Option<T>, order: SortOrder) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => directed(a.cmp(&b), order),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatasetBuilder;

    fn record(id: &str, source: SourceType, subjects: Option<u64>, downloads: Option<u64>) -> DatasetRecord {
        DatasetBuilder::new(id, source, format!("Dataset {}", id), DataFormat::Bids, "https://example.org")
            .n_subjects(subjects)
            .downloads(downloads)
            .modalities(["EEG"])
            .tasks(vec!["RestingState".to_string()])
            .build()
    }

    #[test]
    fn test_parse_expression() {
        let filter: DatasetFilter =
            "source:openneuro modality:eeg subjects>=20 downloads>100 task:rest has:description sleep spindle"
                .parse()
                .unwrap();

        assert_eq!(filter.sources, vec![SourceType::OpenNeuro]);
        assert_eq!(filter.modality.as_deref(), Some("eeg"));
        assert_eq!(filter.min_subjects, Some(20));
        assert_eq!(filter.min_downloads, Some(101));
        assert_eq!(filter.task_contains.as_deref(), Some("rest"));
        assert!(filter.has_description);
        assert_eq!(filter.terms, vec!["sleep", "spindle"]);
    }

    #[test]
    fn test_parse_errors() {
        assert!("source:arxiv".parse::<DatasetFilter>().is_err());
        assert!("color:blue".parse::<DatasetFilter>().is_err());
        assert!("subjects>>3".parse::<DatasetFilter>().is_err());
        assert!("downloads<0".parse::<DatasetFilter>().is_err());
        assert!("modality:".parse::<DatasetFilter>().is_err());
        assert!("".parse::<DatasetFilter>().unwrap().is_empty());
    }

    #[test]
    fn test_subject_bounds() {
        let filter = DatasetFilter::new().min_subjects(10).max_subjects(30);

        assert!(filter.matches(&record("a", SourceType::OpenNeuro, Some(20), None)));
        assert!(!filter.matches(&record("b", SourceType::OpenNeuro, Some(5), None)));
        assert!(!filter.matches(&record("c", SourceType::OpenNeuro, Some(31), None)));
        assert!(!filter.matches(&record("d", SourceType::Dandi, None, None)));
    }

    #[test]
    fn test_download_bounds() {
        let below: DatasetFilter = "downloads<5".parse().unwrap();
        assert_eq!(below.max_downloads, Some(4));
        assert_eq!(below.min_downloads, None);

        let at_most: DatasetFilter = "downloads<=5".parse().unwrap();
        assert_eq!(at_most.max_downloads, Some(5));

        let exact: DatasetFilter = "downloads=5".parse().unwrap();
        assert_eq!((exact.min_downloads, exact.max_downloads), (Some(5), Some(5)));

        assert!(at_most.matches(&record("a", SourceType::Zenodo, None, Some(5))));
        assert!(!at_most.matches(&record("b", SourceType::Zenodo, None, Some(6))));
        assert!(!at_most.matches(&record("c", SourceType::Zenodo, None, None)));
        assert!(exact.matches(&record("d", SourceType::Zenodo, None, Some(5))));
        assert!(!below.matches(&record("e", SourceType::Zenodo, None, Some(5))));
    }

    #[test]
    fn test_phrase_matches_title_or_description() {
        let filter = DatasetFilter::new().phrase("  Dataset B ");
        assert!(filter.matches(&record("b", SourceType::Dandi, None, None)));
        assert!(!filter.matches(&record("a", SourceType::Dandi, None, None)));

        let mut described = record("c", SourceType::Dandi, None, None);
        described.description = Some("Includes dataset b recordings".to_string());
        assert!(filter.matches(&described));
    }

    #[test]
    fn test_matches_combined() {
        let filter: DatasetFilter = "source:openneuro modality:EEG task:resting".parse().unwrap();

        assert!(filter.matches(&record("ds1", SourceType::OpenNeuro, Some(3), None)));
        assert!(!filter.matches(&record("1", SourceType::Zenodo, Some(3), None)));
    }

    #[test]
    fn test_sort_missing_last() {
        let mut records = vec![
            record("a", SourceType::OpenNeuro, None, Some(5)),
            record("b", SourceType::OpenNeuro, Some(40), None),
            record("c", SourceType::OpenNeuro, Some(10), Some(50)),
        ];

        sort_datasets(&mut records, SortBy::Subjects, SortOrder::Descending);
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);

        sort_datasets(&mut records, SortBy::Downloads, SortOrder::Ascending);
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }
}
