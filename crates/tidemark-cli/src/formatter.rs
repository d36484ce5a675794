//! Output formatters for migration listings.

use clap::ValueEnum;
use comfy_table::{ContentArrangement, Table};
use tidemark_core::migration::{MigrationEntry, MigrationStatus, RunReport};

/// Output format for `list`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table (default).
    #[default]
    Table,
    /// JSON array.
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Formats a migration listing.
pub trait Formatter {
    /// Render the entries.
    fn format_entries(&self, entries: &[MigrationEntry]) -> String;
}

/// Create a formatter for the given format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_entries(&self, entries: &[MigrationEntry]) -> String {
        if entries.is_empty() {
            return "No migrations".to_string();
        }

        let mut table = Table::new();
        table
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["Migration", "Status", "Applied at", "Checksum"]);

        for entry in entries {
            let applied_at = entry
                .applied_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            let checksum: String = entry.checksum.chars().take(12).collect();
            table.add_row(vec![
                entry.id.to_string(),
                entry.status.to_string(),
                applied_at,
                checksum,
            ]);
        }

        let pending = entries
            .iter()
            .filter(|e| e.status == MigrationStatus::Pending)
            .count();
        format!(
            "{table}\n({} migrations, {} pending)",
            entries.len(),
            pending
        )
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_entries(&self, entries: &[MigrationEntry]) -> String {
        serde_json::to_string_pretty(entries).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Summarize what `up` did.
pub fn format_report(report: &RunReport) -> String {
    if report.is_empty() {
        return "Already up to date".to_string();
    }
    let mut lines = Vec::with_capacity(report.applied.len() + report.reverted.len());
    lines.extend(report.reverted.iter().map(|id| format!("Reverted {id}")));
    lines.extend(report.applied.iter().map(|id| format!("Applied {id}")));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_core::migration::MigrationId;

    fn entry(key: u64, name: &str, status: MigrationStatus) -> MigrationEntry {
        MigrationEntry {
            id: MigrationId::new(key, name).unwrap(),
            status,
            applied_at: None,
            checksum: "0123456789abcdef0123".to_string(),
        }
    }

    #[test]
    fn test_table_formatter() {
        let entries = vec![
            entry(20240101000000, "Init", MigrationStatus::Applied),
            entry(20240102000000, "AddEmail", MigrationStatus::Pending),
        ];
        let output = TableFormatter.format_entries(&entries);

        assert!(output.contains("20240101000000_Init"));
        assert!(output.contains("pending"));
        assert!(output.contains("0123456789ab"));
        assert!(!output.contains("0123456789abc"));
        assert!(output.ends_with("(2 migrations, 1 pending)"));
    }

    #[test]
    fn test_empty_table() {
        assert_eq!(TableFormatter.format_entries(&[]), "No migrations");
    }

    #[test]
    fn test_json_formatter() {
        let entries = vec![entry(20240101000000, "Init", MigrationStatus::Modified)];
        let output = create_formatter(OutputFormat::Json).format_entries(&entries);

        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value[0]["name"], "Init");
        assert_eq!(value[0]["status"], "modified");
    }

    #[test]
    fn test_format_report() {
        let mut report = RunReport::default();
        assert_eq!(format_report(&report), "Already up to date");

        report
            .reverted
            .push(MigrationId::new(20240102000000, "AddEmail").unwrap());
        assert_eq!(format_report(&report), "Reverted 20240102000000_AddEmail");
    }
}
