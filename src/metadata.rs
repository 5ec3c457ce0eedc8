use std::time::Duration;

use crate::cfg::data_worksheet_name;
use crate::transform::{SheetRow, TIMESTAMP_FORMAT};

pub const METADATA_WORKSHEET: &str = "Sync_Metadata";
pub const METADATA_HEADER: [&str; 2] = ["Attribute", "Value"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    OneShot,
    Interval(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Stopped,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "Running",
            RunStatus::Completed => "Completed",
            RunStatus::Stopped => "Stopped",
        }
    }
}

/// Ordered attribute/value pairs written to the metadata worksheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncMetadata {
    entries: Vec<(String, String)>,
}

impl SyncMetadata {
    /// Record for a cycle that just wrote `rows` × `columns` cells of data.
    pub fn for_cycle(
        table: &str,
        rows: usize,
        columns: usize,
        mode: SyncMode,
        spreadsheet_url: Option<String>,
    ) -> Self {
        let mut metadata = Self::default();
        metadata.push("Last Sync Time", now());
        metadata.push("Source Table", table);
        metadata.push("Total Rows", rows.to_string());
        metadata.push("Total Columns", columns.to_string());
        metadata.push("Data Worksheet", data_worksheet_name(table));
        if let Some(url) = spreadsheet_url {
            metadata.push("Spreadsheet URL", url);
        }
        match mode {
            SyncMode::OneShot => {
                metadata.push("Sync Type", "One-time");
                metadata.push("Status", RunStatus::Completed.as_str());
            }
            SyncMode::Interval(interval) => {
                metadata.push("Sync Type", "Interval");
                metadata.push("Sync Interval", format_interval(interval));
                metadata.push("Status", RunStatus::Running.as_str());
            }
        }
        metadata
    }

    /// Final record written when interval mode shuts down.
    pub fn stopped(table: &str, syncs_completed: usize, interval: Duration) -> Self {
        let mut metadata = Self::default();
        metadata.push("Last Sync Time", now());
        metadata.push("Source Table", table);
        metadata.push("Total Syncs Completed", syncs_completed.to_string());
        metadata.push("Sync Type", "Interval");
        metadata.push("Sync Interval", format_interval(interval));
        metadata.push("Status", RunStatus::Stopped.as_str());
        metadata
    }

    pub fn push(&mut self, attribute: impl Into<String>, value: impl Into<String>) {
        self.entries.push((attribute.into(), value.into()));
    }

    /// Two-column table with an `Attribute`/`Value` header row.
    pub fn to_rows(&self) -> Vec<SheetRow> {
        std::iter::once(METADATA_HEADER.iter().map(|s| s.to_string()).collect::<SheetRow>())
            .chain(
                self.entries
                    .iter()
                    .map(|(key, value)| vec![key.clone(), value.clone()]),
            )
            .collect()
    }
}

#[cfg(test)]
impl SyncMetadata {
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == attribute)
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn now() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

fn format_interval(interval: Duration) -> String {
    format!("{:.1} minutes", interval.as_secs_f64() / 60.0)
}
