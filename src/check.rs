//! Connectivity check for both ends of the mirror.

use tracing::{info, warn};

use crate::error::SyncResult;
use crate::sheets::SheetStore;
use crate::source::{ServerInfo, TableInfo, TableSource};
use crate::transform::{SheetRow, TIMESTAMP_FORMAT};

pub const CHECK_WORKSHEET: &str = "Test_Connection";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub server: ServerInfo,
    /// `None` when the configured table does not exist.
    pub table: Option<TableInfo>,
    pub spreadsheet_url: Option<String>,
}

impl CheckReport {
    pub fn table_found(&self) -> bool {
        self.table.is_some()
    }
}

/// Connects to the database and the spreadsheet, describes `table` and
/// writes a small marker worksheet. The database session is closed on
/// every path.
pub async fn run_check<S, W>(source: &mut S, store: &mut W, table: &str) -> SyncResult<CheckReport>
where
    S: TableSource,
    W: SheetStore,
{
    let outcome = check(source, store, table).await;
    source.close().await;
    outcome
}

async fn check<S, W>(source: &mut S, store: &mut W, table: &str) -> SyncResult<CheckReport>
where
    S: TableSource,
    W: SheetStore,
{
    info!("Checking database connection");
    source.connect().await?;
    let server = source.server_info().await?;
    info!("PostgreSQL version: {}", server.version);
    info!("Current database: {}", server.database);
    if server.tables.is_empty() {
        info!("No tables found in schema '{}'", source.schema());
    } else {
        info!("Tables in schema '{}':", source.schema());
        for name in &server.tables {
            info!("  - {}", name);
        }
    }

    let table = match source.describe_table(table).await {
        Ok(described) => {
            info!(
                "Table '{}' has {} columns and {} rows",
                table,
                described.columns.len(),
                described.row_count
            );
            for column in &described.columns {
                info!(
                    "  {} {}{}{}",
                    column.name,
                    column.data_type,
                    if column.nullable { "" } else { " NOT NULL" },
                    column
                        .default
                        .as_deref()
                        .map(|d| format!(" DEFAULT {}", d))
                        .unwrap_or_default()
                );
            }
            Some(described)
        }
        Err(e) if e.is_not_found() => {
            warn!("{}", e);
            None
        }
        Err(e) => return Err(e),
    };

    info!("Checking Google Sheets connection");
    store.connect().await?;
    let worksheet = store.ensure_worksheet(CHECK_WORKSHEET, 10, 3).await?;
    store.overwrite(&worksheet, &marker_rows()).await?;
    let spreadsheet_url = store.spreadsheet_url();
    if let Some(url) = &spreadsheet_url {
        info!("Spreadsheet URL: {}", url);
    }
    info!("Test data written to worksheet '{}'", CHECK_WORKSHEET);

    Ok(CheckReport {
        server,
        table,
        spreadsheet_url,
    })
}

fn marker_rows() -> Vec<SheetRow> {
    let now = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
    [
        ["Test", "Connection", "Status"],
        ["Google Sheets", "API", "Working"],
        ["Timestamp", now.as_str(), "Success"],
    ]
    .iter()
    .map(|row| row.iter().map(|cell| cell.to_string()).collect())
    .collect()
}
