//! Terminal UI helpers: tables, status lines, spinners and formatting.
//!
//! Status lines and spinners go to stderr so stdout only carries results.

use comfy_table::{presets, Attribute, Cell, ContentArrangement, Table};
use owo_colors::OwoColorize;
use std::io::IsTerminal;
use std::time::Duration;

use crate::models::{DatasetRecord, SourceType};
use crate::sources::SourceInfo;
use crate::utils::{CacheStats, SyncReport};

/// Width of the name column in dataset tables
const NAME_WIDTH: usize = 48;

/// Check if stdout is a terminal.
pub fn is_terminal() -> bool {
    std::io::stdout().is_terminal()
}

/// Icon for a source
pub fn source_icon(source: SourceType) -> &'static str {
    match source {
        SourceType::OpenNeuro => "🧠",
        SourceType::Dandi => "⚡",
        SourceType::PhysioNet => "💓",
        SourceType::Zenodo => "🪐",
    }
}

/// Status types for colored output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Error,
    Warning,
    Info,
}

/// Status icons for different operations.
pub fn status_icon(status: Status) -> &'static str {
    match status {
        Status::Success => "✓",
        Status::Error => "✗",
        Status::Warning => "⚠",
        Status::Info => "ℹ",
    }
}

/// Print a styled status line to stderr
pub fn print_status(status: Status, msg: &str) {
    let icon = status_icon(status);
    match status {
        Status::Success => eprintln!("{} {}", icon.green().bold(), msg),
        Status::Error => eprintln!("{} {}", icon.red().bold(), msg),
        Status::Warning => eprintln!("{} {}", icon.yellow().bold(), msg),
        Status::Info => eprintln!("{} {}", icon.cyan().bold(), msg),
    }
}

/// Format a number with commas.
pub fn format_number(n: u64) -> String {
    n.to_string()
        .chars()
        .rev()
        .collect::<Vec<_>>()
        .chunks(3)
        .map(|c| c.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(",")
        .chars()
        .rev()
        .collect()
}

/// Truncate text to fit within the specified width using unicode-aware truncation.
pub fn truncate_with_ellipsis(text: &str, max_width: usize) -> String {
    if max_width <= 3 {
        return "...".to_string();
    }

    let char_widths: Vec<(char, usize)> = text
        .chars()
        .map(|c| (c, unicode_width::UnicodeWidthChar::width(c).unwrap_or(1)))
        .collect();

    let total_width: usize = char_widths.iter().map(|(_, w)| *w).sum();
    if total_width <= max_width {
        return text.to_string();
    }

    let mut current_width = 0;
    let mut end_idx = 0;
    for (i, (_, w)) in char_widths.iter().enumerate() {
        if current_width + w > max_width - 3 {
            break;
        }
        current_width += w;
        end_idx = i + 1;
    }

    let truncated: String = char_widths[..end_idx].iter().map(|(c, _)| *c).collect();
    format!("{}...", truncated)
}

/// Get a human-readable file size.
pub fn format_file_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

fn optional<T>(value: Option<T>, format: impl Fn(T) -> String) -> String {
    value.map(format).unwrap_or_else(|| "-".to_string())
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

/// Table of dataset records
pub fn datasets_table(datasets: &[DatasetRecord]) -> Table {
    let mut table = new_table(vec![
        "Source", "ID", "Name", "Modalities", "Subjects", "Format", "Downloads", "Size",
    ]);

    for d in datasets {
        let modalities = d.modalities.iter().cloned().collect::<Vec<_>>().join(", ");
        table.add_row(vec![
            Cell::new(format!("{} {}", source_icon(d.source), d.source.id())),
            Cell::new(&d.id),
            Cell::new(truncate_with_ellipsis(&d.name, NAME_WIDTH)).add_attribute(Attribute::Bold),
            Cell::new(truncate_with_ellipsis(&modalities, 24)),
            Cell::new(optional(d.n_subjects, format_number)),
            Cell::new(d.format.as_str()),
            Cell::new(optional(d.downloads, format_number)),
            Cell::new(optional(d.size_bytes, format_file_size)),
        ]);
    }
    table
}

/// One line per record: `source:id  name  url`
pub fn datasets_plain(datasets: &[DatasetRecord]) -> String {
    datasets
        .iter()
        .map(|d| format!("{}:{}\t{}\t{}", d.source.id(), d.id, d.name, d.url))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Detailed key/value view of one record
pub fn dataset_details(d: &DatasetRecord) -> Table {
    let mut table = new_table(vec!["Field", "Value"]);
    fn list(items: &[String]) -> String {
        if items.is_empty() {
            "-".to_string()
        } else {
            items.join(", ")
        }
    }

    let rows: Vec<(&str, String)> = vec![
        ("Source", format!("{} {}", source_icon(d.source), d.source.name())),
        ("ID", d.id.clone()),
        ("Name", d.name.clone()),
        ("Format", d.format.to_string()),
        ("Modalities", list(&d.modalities.iter().cloned().collect::<Vec<_>>())),
        ("Subjects", optional(d.n_subjects, format_number)),
        ("Tasks", list(&d.tasks)),
        ("Authors", list(&d.authors)),
        ("Keywords", list(&d.keywords)),
        ("DOI", optional(d.doi.clone(), |s| s)),
        ("License", optional(d.license.clone(), |s| s)),
        ("Version", optional(d.version.clone(), |s| s)),
        ("Created", optional(d.created.clone(), |s| s)),
        ("Modified", optional(d.modified.clone(), |s| s)),
        ("Size", optional(d.size_bytes, format_file_size)),
        ("Downloads", optional(d.downloads, format_number)),
        ("Views", optional(d.views, format_number)),
        ("URL", d.url.clone()),
        ("Description", optional(d.description.clone(), |s| truncate_with_ellipsis(&s, 400))),
    ];
    for (field, value) in rows {
        table.add_row(vec![Cell::new(field).add_attribute(Attribute::Bold), Cell::new(value)]);
    }
    table
}

/// Table of registered sources
pub fn sources_table(sources: &[SourceInfo], detailed: bool) -> Table {
    let mut header = vec!["ID", "Name"];
    if detailed {
        header.extend(["Description", "Homepage", "Capabilities"]);
    }
    let mut table = new_table(header);

    for s in sources {
        let mut row = vec![Cell::new(&s.id), Cell::new(&s.name)];
        if detailed {
            row.push(Cell::new(&s.description));
            row.push(Cell::new(&s.homepage));
            row.push(Cell::new(s.capabilities.join(", ")));
        }
        table.add_row(row);
    }
    table
}

/// Table of sync outcomes per source
pub fn sync_table(reports: &[(SourceType, SyncReport)]) -> Table {
    let mut table = new_table(vec!["Source", "Inserted", "Updated", "Removed", "Total"]);
    for (source, r) in reports {
        table.add_row(vec![
            source.id().to_string(),
            r.inserted.to_string(),
            r.updated.to_string(),
            r.removed.to_string(),
            r.total.to_string(),
        ]);
    }
    table
}

/// Table of cache statistics
pub fn stats_table(stats: &CacheStats) -> Table {
    let mut table = new_table(vec!["Source", "Records", "Last sync"]);
    for s in &stats.sources {
        table.add_row(vec![
            s.source.id().to_string(),
            format_number(s.records as u64),
            optional(s.last_sync, |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        ]);
    }
    table.add_row(vec![
        Cell::new("total").add_attribute(Attribute::Bold),
        Cell::new(format_number(stats.total_records as u64)),
        Cell::new(format_file_size(stats.size_bytes)),
    ]);
    table
}

/// Spinner drawn on stderr while a long call runs
pub struct Spinner {
    pb: indicatif::ProgressBar,
}

impl Spinner {
    /// Create a new spinner with the given message.
    pub fn new(msg: &str) -> Self {
        let pb = indicatif::ProgressBar::new_spinner();
        pb.set_style(
            indicatif::ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| indicatif::ProgressStyle::default_spinner())
                .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "),
        );
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        Self { pb }
    }

    /// A spinner that draws nothing (quiet mode, non-terminal output)
    pub fn hidden() -> Self {
        Self {
            pb: indicatif::ProgressBar::hidden(),
        }
    }

    /// Draw a spinner only when stderr is a terminal and output is not quiet
    pub fn for_output(msg: &str, quiet: bool) -> Self {
        if quiet || !std::io::stderr().is_terminal() {
            Self::hidden()
        } else {
            Self::new(msg)
        }
    }

    pub fn finish_with_success(&self, msg: &str) {
        self.pb.finish_and_clear();
        if !self.pb.is_hidden() {
            print_status(Status::Success, msg);
        }
    }

    pub fn finish_with_error(&self, msg: &str) {
        self.pb.finish_and_clear();
        if !self.pb.is_hidden() {
            print_status(Status::Error, msg);
        }
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::mock::make_dataset;

    #[test]
    fn test_source_icon() {
        assert_eq!(source_icon(SourceType::Zenodo), "🪐");
        assert_eq!(source_icon(SourceType::OpenNeuro), "🧠");
    }

    #[test]
    fn test_truncate_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("Hello", 10), "Hello");
        assert_eq!(truncate_with_ellipsis("Hello World", 8), "Hello...");
        assert_eq!(truncate_with_ellipsis("", 10), "");
        assert_eq!(truncate_with_ellipsis("Hello", 3), "...");
        assert_eq!(truncate_with_ellipsis("脑电图数据集", 7), "脑电...");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1000000), "1,000,000");
        assert_eq!(format_number(123), "123");
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(500), "500 B");
        assert_eq!(format_file_size(1024), "1.00 KB");
        assert_eq!(format_file_size(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn test_tables_render() {
        let mut record = make_dataset("ds000001", SourceType::OpenNeuro);
        record.n_subjects = Some(1200);
        let mut table = datasets_table(&[record.clone()]);
        table.set_width(200);
        let rendered = table.to_string();
        assert!(rendered.contains("ds000001"));
        assert!(rendered.contains("1,200"));

        let plain = datasets_plain(&[record]);
        assert!(plain.starts_with("openneuro:ds000001\t"));
    }
}
