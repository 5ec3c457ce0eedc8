use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Spreadsheet remembered under a configured name.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct KnownSpreadsheet {
    pub spreadsheet_id: String,
    pub url: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Local record of spreadsheets this tool created, keyed by title.
///
/// The Sheets API has no lookup by title, so the name → id mapping is kept
/// on disk between runs.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct SpreadsheetRegistry {
    #[serde(default)]
    pub spreadsheets: BTreeMap<String, KnownSpreadsheet>,
}

impl SpreadsheetRegistry {
    pub fn lookup(&self, name: &str) -> Option<&KnownSpreadsheet> {
        self.spreadsheets.get(name)
    }

    pub fn remember(&mut self, name: &str, spreadsheet_id: &str, url: Option<String>) {
        self.spreadsheets.insert(
            name.to_string(),
            KnownSpreadsheet {
                spreadsheet_id: spreadsheet_id.to_string(),
                url,
                created_at: chrono::Utc::now(),
            },
        );
    }

    pub fn forget(&mut self, name: &str) -> Option<KnownSpreadsheet> {
        self.spreadsheets.remove(name)
    }
}

pub fn load_registry(state_path: &str) -> Result<SpreadsheetRegistry> {
    let path = Path::new(state_path);

    if !path.exists() {
        info!("Spreadsheet registry not found, starting empty: {}", state_path);
        return Ok(SpreadsheetRegistry::default());
    }

    debug!("Loading spreadsheet registry from: {}", state_path);
    let content = fs::read_to_string(path)?;
    let registry: SpreadsheetRegistry = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse spreadsheet registry: {}", e))?;

    debug!("Loaded {} known spreadsheets", registry.spreadsheets.len());
    Ok(registry)
}

pub fn save_registry(state_path: &str, registry: &SpreadsheetRegistry) -> Result<()> {
    debug!("Saving spreadsheet registry to: {}", state_path);

    if let Some(parent) = Path::new(state_path).parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(registry)?;
    fs::write(state_path, json)?;

    info!("Saved spreadsheet registry with {} entries", registry.spreadsheets.len());
    Ok(())
}
