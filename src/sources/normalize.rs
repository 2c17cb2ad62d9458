//! Dataset normalizer: raw repository payloads to [`DatasetRecord`]s.
//!
//! Each adapter owns the mapping table for its repository; [`normalize`]
//! dispatches on the [`SourceType`] tag. This module also holds the helpers
//! those mappings share and the [`PageCollector`] that enforces `(source, id)`
//! uniqueness and the result cap while an adapter paginates.

use regex::Regex;
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::models::{DataFormat, DatasetRecord, FetchRequest, SourceType};
use crate::sources::SourceError;

/// Normalize one raw record from `source`
pub fn normalize(source: SourceType, raw: Value) -> Result<DatasetRecord, SourceError> {
    match source {
        #[cfg(feature = "source-openneuro")]
        SourceType::OpenNeuro => super::openneuro::normalize(raw),
        #[cfg(feature = "source-dandi")]
        SourceType::Dandi => super::dandi::normalize(raw),
        #[cfg(feature = "source-physionet")]
        SourceType::PhysioNet => super::physionet::normalize(raw),
        #[cfg(feature = "source-zenodo")]
        SourceType::Zenodo => super::zenodo::normalize(raw),
        #[allow(unreachable_patterns)]
        _ => {
            let _ = raw;
            Err(SourceError::NotImplemented)
        }
    }
}

/// Modalities recognised in free text (titles, keywords)
const KNOWN_MODALITIES: &[(&str, &str)] = &[
    ("eeg", "EEG"),
    ("ieeg", "iEEG"),
    ("ecog", "ECoG"),
    ("meg", "MEG"),
    ("mri", "MRI"),
    ("fmri", "fMRI"),
    ("pet", "PET"),
    ("ecg", "ECG"),
    ("ekg", "ECG"),
    ("emg", "EMG"),
    ("eog", "EOG"),
    ("fnirs", "fNIRS"),
    ("nirs", "fNIRS"),
];

static WORDS: OnceLock<Regex> = OnceLock::new();
static HTML_TAG: OnceLock<Regex> = OnceLock::new();

fn word_regex() -> &'static Regex {
    WORDS.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9]+").unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

fn html_tag_regex() -> &'static Regex {
    HTML_TAG.get_or_init(|| {
        Regex::new(r"<[^>]*>").unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

/// Modalities mentioned as whole words in any of `texts`
pub fn infer_modalities<'a, I>(texts: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut found: Vec<String> = Vec::new();
    for text in texts {
        for word in word_regex().find_iter(text) {
            let word = word.as_str().to_lowercase();
            if let Some((_, canonical)) = KNOWN_MODALITIES.iter().find(|(w, _)| *w == word) {
                if !found.iter().any(|f| f == canonical) {
                    found.push(canonical.to_string());
                }
            }
        }
    }
    found
}

/// BIDS or NWB when either is mentioned as a whole word, otherwise other
pub fn infer_format<'a, I>(texts: I) -> DataFormat
where
    I: IntoIterator<Item = &'a str>,
{
    let mut format = DataFormat::Other;
    for text in texts {
        for word in word_regex().find_iter(text) {
            match word.as_str().to_lowercase().as_str() {
                "bids" => return DataFormat::Bids,
                "nwb" => format = DataFormat::Nwb,
                _ => {}
            }
        }
    }
    format
}

/// Strip HTML tags, decode common entities and collapse whitespace
pub fn strip_html(text: &str) -> String {
    let text = html_tag_regex().replace_all(text, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Read an integer that upstream may encode as a number or a numeric string
pub fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Deserialize an optional field, reading a value of the wrong type as absent
pub fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Deserialize a string list that upstream may send as one string or with
/// non-string entries mixed in
pub fn lenient_strings<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) if !s.trim().is_empty() => Some(vec![s]),
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    })
}

/// Read an id that upstream may encode as a string or a number
pub fn as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Collects normalized records across pages
///
/// Drops repeated ids (pages can overlap while upstream data changes),
/// applies the request filter and stops accepting once the cap is reached.
pub struct PageCollector<'a> {
    request: &'a FetchRequest,
    source: SourceType,
    seen: HashSet<String>,
    records: Vec<DatasetRecord>,
    skipped: usize,
}

impl<'a> PageCollector<'a> {
    pub fn new(source: SourceType, request: &'a FetchRequest) -> Self {
        Self {
            request,
            source,
            seen: HashSet::new(),
            records: Vec::new(),
            skipped: 0,
        }
    }

    /// Normalize and offer one raw record
    pub fn push_raw(&mut self, raw: Value) {
        match normalize(self.source, raw) {
            Ok(record) => self.push(record),
            Err(e) => {
                self.skipped += 1;
                tracing::warn!("Skipping unreadable {} record: {}", self.source.id(), e);
            }
        }
    }

    /// Offer one normalized record
    pub fn push(&mut self, record: DatasetRecord) {
        if self.is_full() {
            return;
        }
        if !self.seen.insert(record.id.clone()) {
            tracing::debug!("Dropping repeated {} record {}", self.source.id(), record.id);
            return;
        }
        if self.request.filter.matches(&record) {
            self.records.push(record);
        }
    }

    /// Whether the cap or the scan limit has been reached
    pub fn is_full(&self) -> bool {
        self.request.is_satisfied(self.records.len())
            || self
                .request
                .scan_limit
                .is_some_and(|limit| self.seen.len() >= limit)
    }

    /// Distinct records seen so far, matching or not
    pub fn seen(&self) -> usize {
        self.seen.len()
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn into_records(self) -> Vec<DatasetRecord> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatasetFilter;
    use crate::sources::mock::make_dataset;
    use serde_json::json;

    #[test]
    fn test_infer_modalities() {
        let found = infer_modalities(["Resting-state EEG and fMRI", "sleep ekg; EEG"]);
        assert_eq!(found, vec!["EEG", "fMRI", "ECG"]);
        assert!(infer_modalities(["petrol engines", "merging"]).is_empty());
    }

    #[test]
    fn test_infer_format() {
        assert_eq!(infer_format(["data in BIDS format"]), DataFormat::Bids);
        assert_eq!(infer_format(["nwb", "neurodata"]), DataFormat::Nwb);
        assert_eq!(infer_format(["NWB files", "BIDS"]), DataFormat::Bids);
        assert_eq!(infer_format(["csv"]), DataFormat::Other);
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(
            strip_html("<p>Sleep&nbsp;EEG &amp; <b>ECG</b></p>\n<p>data</p>"),
            "Sleep EEG & ECG data"
        );
    }

    #[test]
    fn test_lenient_numbers() {
        assert_eq!(as_u64(&json!(12)), Some(12));
        assert_eq!(as_u64(&json!("34")), Some(34));
        assert_eq!(as_u64(&json!(5.0)), Some(5));
        assert_eq!(as_u64(&json!(-1)), None);
        assert_eq!(as_u64(&json!(null)), None);
        assert_eq!(as_id(&json!(1234567)), Some("1234567".to_string()));
        assert_eq!(as_id(&json!("  ")), None);
    }

    #[derive(Debug, Deserialize)]
    struct Loose {
        #[serde(default, deserialize_with = "lenient")]
        title: Option<String>,
        #[serde(default, deserialize_with = "lenient_strings")]
        tags: Option<Vec<String>>,
    }

    #[test]
    fn test_lenient_fields() {
        let loose: Loose = serde_json::from_value(json!({ "title": 7, "tags": "eeg" })).unwrap();
        assert_eq!(loose.title, None);
        assert_eq!(loose.tags, Some(vec!["eeg".to_string()]));

        let loose: Loose =
            serde_json::from_value(json!({ "title": "T", "tags": ["a", 1, null, "b"] })).unwrap();
        assert_eq!(loose.title.as_deref(), Some("T"));
        assert_eq!(loose.tags, Some(vec!["a".to_string(), "b".to_string()]));

        let empty: Loose = serde_json::from_value(json!({})).unwrap();
        assert!(empty.title.is_none() && empty.tags.is_none());
    }

    #[test]
    fn test_collector_dedup_and_cap() {
        let request = FetchRequest::new().max_results(2);
        let mut collector = PageCollector::new(SourceType::OpenNeuro, &request);

        collector.push(make_dataset("ds1", SourceType::OpenNeuro));
        collector.push(make_dataset("ds1", SourceType::OpenNeuro));
        assert!(!collector.is_full());
        collector.push(make_dataset("ds2", SourceType::OpenNeuro));
        assert!(collector.is_full());
        collector.push(make_dataset("ds3", SourceType::OpenNeuro));

        let ids: Vec<_> = collector.into_records().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["ds1", "ds2"]);
    }

    #[test]
    fn test_collector_filter() {
        let request = FetchRequest::new().filter(DatasetFilter::new().text("ds2"));
        let mut collector = PageCollector::new(SourceType::OpenNeuro, &request);
        collector.push(make_dataset("ds1", SourceType::OpenNeuro));
        collector.push(make_dataset("ds2", SourceType::OpenNeuro));

        assert_eq!(collector.seen(), 2);
        assert_eq!(collector.into_records().len(), 1);
    }

    #[test]
    fn test_collector_scan_limit() {
        let request = FetchRequest::new()
            .filter(DatasetFilter::new().text("ds9"))
            .scan_limit(2);
        let mut collector = PageCollector::new(SourceType::OpenNeuro, &request);
        collector.push(make_dataset("ds1", SourceType::OpenNeuro));
        collector.push(make_dataset("ds2", SourceType::OpenNeuro));
        assert!(collector.is_full());
        collector.push(make_dataset("ds9", SourceType::OpenNeuro));

        assert_eq!(collector.seen(), 2);
        assert!(collector.into_records().is_empty());
    }

    #[cfg(feature = "source-openneuro")]
    #[test]
    fn test_collector_skips_unreadable() {
        let request = FetchRequest::new();
        let mut collector = PageCollector::new(SourceType::OpenNeuro, &request);
        collector.push_raw(json!({"name": "no id"}));
        collector.push_raw(json!({"id": "ds9", "name": "ok"}));

        assert_eq!(collector.skipped(), 1);
        assert_eq!(collector.into_records().len(), 1);
    }
}
