//! Dataset model representing one dataset from any repository.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

use crate::sources::SourceError;

/// The repository a dataset record was fetched from
///
/// Variants are declared in source priority order. Multi-source results are
/// always merged in this order, never in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    OpenNeuro,
    Dandi,
    PhysioNet,
    Zenodo,
}

impl SourceType {
    /// All sources in declared priority order
    pub const ALL: [SourceType; 4] = [
        SourceType::OpenNeuro,
        SourceType::Dandi,
        SourceType::PhysioNet,
        SourceType::Zenodo,
    ];

    /// Returns the display name of the source
    pub fn name(&self) -> &'static str {
        match self {
            SourceType::OpenNeuro => "OpenNeuro",
            SourceType::Dandi => "DANDI Archive",
            SourceType::PhysioNet => "PhysioNet",
            SourceType::Zenodo => "Zenodo",
        }
    }

    /// Returns the source identifier (for tool naming)
    pub fn id(&self) -> &'static str {
        match self {
            SourceType::OpenNeuro => "openneuro",
            SourceType::Dandi => "dandi",
            SourceType::PhysioNet => "physionet",
            SourceType::Zenodo => "zenodo",
        }
    }

    /// Position in the declared priority order
    pub fn priority(&self) -> usize {
        Self::ALL.iter().position(|s| s == self).unwrap_or(usize::MAX)
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SourceType {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|source| source.id() == wanted)
            .ok_or_else(|| {
                SourceError::InvalidArgument(format!(
                    "unknown source '{}' (expected one of: {})",
                    s,
                    Self::ALL.map(|s| s.id()).join(", ")
                ))
            })
    }
}

/// On-disk layout convention of a dataset
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataFormat {
    #[serde(rename = "BIDS")]
    Bids,
    #[serde(rename = "NWB")]
    Nwb,
    #[serde(rename = "other")]
    Other,
}

impl DataFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::Bids => "BIDS",
            DataFormat::Nwb => "NWB",
            DataFormat::Other => "other",
        }
    }
}

impl std::fmt::Display for DataFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataFormat {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bids" => Ok(DataFormat::Bids),
            "nwb" => Ok(DataFormat::Nwb),
            "other" => Ok(DataFormat::Other),
            _ => Err(SourceError::InvalidArgument(format!(
                "unknown format '{}' (expected bids, nwb or other)",
                s
            ))),
        }
    }
}

/// A dataset from any repository, in the canonical record shape
///
/// `(source, id)` identifies a record. Every sequence of records returned by
/// this crate holds at most one record per pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    /// Source-scoped identifier (`ds000001`, `000003`, `eegmmidb`, ...)
    pub id: String,

    /// Repository the record came from
    pub source: SourceType,

    /// Dataset name or title
    #[serde(alias = "title")]
    pub name: String,

    /// README, abstract or description text
    #[serde(default)]
    pub description: Option<String>,

    /// Recording modalities (EEG, MRI, ecephys, ...)
    #[serde(default)]
    pub modalities: BTreeSet<String>,

    /// Number of subjects, when the source reports it
    #[serde(default)]
    pub n_subjects: Option<u64>,

    /// Data layout convention
    pub format: DataFormat,

    /// Experimental tasks
    #[serde(default)]
    pub tasks: Vec<String>,

    /// Free-form keywords
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Author names
    #[serde(default)]
    pub authors: Vec<String>,

    #[serde(default)]
    pub doi: Option<String>,

    #[serde(default)]
    pub license: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    /// Creation date as reported upstream
    #[serde(default)]
    pub created: Option<String>,

    /// Last modification date as reported upstream
    #[serde(default)]
    pub modified: Option<String>,

    #[serde(default)]
    pub size_bytes: Option<u64>,

    #[serde(default)]
    pub downloads: Option<u64>,

    #[serde(default)]
    pub views: Option<u64>,

    /// Landing page URL
    pub url: String,

    /// Original payload, passed through untouched
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl DatasetRecord {
    /// Create a new record with required fields
    pub fn new(
        id: impl Into<String>,
        source: SourceType,
        name: impl Into<String>,
        format: DataFormat,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source,
            name: name.into(),
            description: None,
            modalities: BTreeSet::new(),
            n_subjects: None,
            format,
            tasks: Vec::new(),
            keywords: Vec::new(),
            authors: Vec::new(),
            doi: None,
            license: None,
            version: None,
            created: None,
            modified: None,
            size_bytes: None,
            downloads: None,
            views: None,
            url: url.into(),
            raw: serde_json::Value::Null,
        }
    }

    /// The `(source, id)` identity of this record
    pub fn key(&self) -> (SourceType, &str) {
        (self.source, self.id.as_str())
    }

    /// Size in gigabytes, rounded to two decimals
    pub fn size_gb(&self) -> Option<f64> {
        self.size_bytes
            .map(|b| (b as f64 / 1024f64.powi(3) * 100.0).round() / 100.0)
    }

    /// Whether the record carries a non-empty description
    pub fn has_description(&self) -> bool {
        self.description
            .as_deref()
            .is_some_and(|d| !d.trim().is_empty())
    }

    /// Case-insensitive modality membership
    pub fn has_modality(&self, modality: &str) -> bool {
        self.modalities
            .iter()
            .any(|m| m.eq_ignore_ascii_case(modality))
    }

    /// Case-insensitive substring match on id, name, description, tasks and keywords
    pub fn matches_text(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.id.to_lowercase().contains(&needle)
            || self.name.to_lowercase().contains(&needle)
            || self
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&needle))
            || self
                .tasks
                .iter()
                .chain(self.keywords.iter())
                .any(|t| t.to_lowercase().contains(&needle))
    }
}

/// Builder for constructing DatasetRecord objects
#[derive(Debug, Clone)]
pub struct DatasetBuilder {
    record: DatasetRecord,
}

impl DatasetBuilder {
    /// Create a new builder with required fields
    pub fn new(
        id: impl Into<String>,
        source: SourceType,
        name: impl Into<String>,
        format: DataFormat,
        url: impl Into<String>,
    ) -> Self {
        Self {
            record: DatasetRecord::new(id, source, name, format, url),
        }
    }

    /// Set description; blank text is treated as absent
    pub fn description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        if !description.trim().is_empty() {
            self.record.description = Some(description);
        }
        self
    }

    /// Add modalities; blank entries are skipped
    pub fn modalities<I, S>(mut self, modalities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for modality in modalities {
            let modality = modality.into();
            let modality = modality.trim();
            if !modality.is_empty() {
                self.record.modalities.insert(modality.to_string());
            }
        }
        self
    }

    /// Set subject count
    pub fn n_subjects(mut self, count: Option<u64>) -> Self {
        self.record.n_subjects = count;
        self
    }

    /// Set tasks
    pub fn tasks(mut self, tasks: Vec<String>) -> Self {
        self.record.tasks = tasks;
        self
    }

    /// Set keywords
    pub fn keywords(mut self, keywords: Vec<String>) -> Self {
        self.record.keywords = keywords;
        self
    }

    /// Set authors
    pub fn authors(mut self, authors: Vec<String>) -> Self {
        self.record.authors = authors;
        self
    }

    pub fn doi(mut self, doi: Option<String>) -> Self {
        self.record.doi = doi.filter(|d| !d.trim().is_empty());
        self
    }

    pub fn license(mut self, license: Option<String>) -> Self {
        self.record.license = license.filter(|l| !l.trim().is_empty());
        self
    }

    pub fn version(mut self, version: Option<String>) -> Self {
        self.record.version = version.filter(|v| !v.trim().is_empty());
        self
    }

    pub fn created(mut self, created: Option<String>) -> Self {
        self.record.created = created;
        self
    }

    pub fn modified(mut self, modified: Option<String>) -> Self {
        self.record.modified = modified;
        self
    }

    pub fn size_bytes(mut self, size: Option<u64>) -> Self {
        self.record.size_bytes = size;
        self
    }

    pub fn downloads(mut self, downloads: Option<u64>) -> Self {
        self.record.downloads = downloads;
        self
    }

    pub fn views(mut self, views: Option<u64>) -> Self {
        self.record.views = views;
        self
    }

    /// Attach the original payload
    pub fn raw(mut self, raw: serde_json::Value) -> Self {
        self.record.raw = raw;
        self
    }

    /// Build the DatasetRecord
    pub fn build(self) -> DatasetRecord {
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DatasetRecord {
        DatasetBuilder::new(
            "ds000001",
            SourceType::OpenNeuro,
            "Balloon Analog Risk-taking Task",
            DataFormat::Bids,
            "https://openneuro.org/datasets/ds000001",
        )
        .description("Subjects perform the BART while in the scanner.")
        .modalities(["MRI", " ", "mri"])
        .n_subjects(Some(16))
        .tasks(vec!["balloonanalogrisktask".to_string()])
        .size_bytes(Some(2 * 1024 * 1024 * 1024))
        .build()
    }

    #[test]
    fn test_dataset_builder() {
        let record = sample();

        assert_eq!(record.id, "ds000001");
        assert_eq!(record.source, SourceType::OpenNeuro);
        assert_eq!(record.n_subjects, Some(16));
        assert_eq!(record.modalities.len(), 2);
        assert!(record.has_modality("MRI"));
        assert_eq!(record.size_gb(), Some(2.0));
        assert_eq!(record.key(), (SourceType::OpenNeuro, "ds000001"));
    }

    #[test]
    fn test_blank_description_is_absent() {
        let record = DatasetBuilder::new("x", SourceType::Zenodo, "X", DataFormat::Other, "u")
            .description("   ")
            .build();
        assert!(!record.has_description());
        assert!(record.description.is_none());
    }

    #[test]
    fn test_matches_text() {
        let record = sample();
        assert!(record.matches_text("balloon"));
        assert!(record.matches_text("SCANNER"));
        assert!(record.matches_text("riskTask"));
        assert!(!record.matches_text("alzheimer"));
    }

    #[test]
    fn test_source_type_parse_and_order() {
        assert_eq!("OpenNeuro".parse::<SourceType>().unwrap(), SourceType::OpenNeuro);
        assert_eq!("dandi".parse::<SourceType>().unwrap(), SourceType::Dandi);
        assert!(matches!(
            "arxiv".parse::<SourceType>(),
            Err(SourceError::InvalidArgument(_))
        ));
        assert!(SourceType::OpenNeuro.priority() < SourceType::Zenodo.priority());
    }

    #[test]
    fn test_record_serialization() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["source"], "openneuro");
        assert_eq!(json["format"], "BIDS");

        let back: DatasetRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn test_title_alias() {
        let record: DatasetRecord = serde_json::from_value(serde_json::json!({
            "id": "eegmmidb",
            "source": "physionet",
            "title": "EEG Motor Movement/Imagery Dataset",
            "format": "other",
            "url": "https://physionet.org/content/eegmmidb/"
        }))
        .unwrap();
        assert_eq!(record.name, "EEG Motor Movement/Imagery Dataset");
        assert!(record.n_subjects.is_none());
    }
}
