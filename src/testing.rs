//! In-memory sessions for exercising the sync cycle without a database or
//! Google account.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

use crate::error::{SyncError, SyncResult};
use crate::health::ConnectionHealth;
use crate::metadata::METADATA_WORKSHEET;
use crate::sheets::{SheetStore, Worksheet};
use crate::snapshot::TableSnapshot;
use crate::source::{ColumnInfo, ServerInfo, TableInfo, TableSource};
use crate::transform::SheetRow;

#[derive(Default)]
pub struct MemoryTableSource {
    tables: HashMap<String, TableSnapshot>,
    health: Option<ConnectionHealth>,
    fail_connect: bool,
    fail_fetch: Option<(usize, String)>,
    cancel_on_fetch: Option<(usize, CancellationToken)>,
    connect_calls: usize,
    fetch_calls: AtomicUsize,
}

impl MemoryTableSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected() -> Self {
        Self {
            health: Some(ConnectionHealth::Healthy),
            ..Self::default()
        }
    }

    pub fn insert(&mut self, snapshot: TableSnapshot, name: &str) {
        self.tables.insert(name.to_string(), snapshot);
    }

    pub fn mark_stale(&mut self) {
        self.health = Some(ConnectionHealth::Stale);
    }

    pub fn fail_connect(&mut self) {
        self.fail_connect = true;
    }

    pub fn fail_fetch(&mut self, message: &str) {
        self.fail_fetch_after(0, message);
    }

    /// Lets the first `successes` fetches through, then fails every one after.
    pub fn fail_fetch_after(&mut self, successes: usize, message: &str) {
        self.fail_fetch = Some((successes, message.to_string()));
    }

    /// Cancels `token` while serving fetch number `fetch` (zero-based), as
    /// if a stop arrived mid-cycle.
    pub fn cancel_during_fetch(&mut self, fetch: usize, token: CancellationToken) {
        self.cancel_on_fetch = Some((fetch, token));
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn require_open(&self) -> SyncResult<()> {
        match self.health {
            Some(ConnectionHealth::Healthy) => Ok(()),
            _ => Err(SyncError::Connection("database session is not open".to_string())),
        }
    }
}

#[async_trait]
impl TableSource for MemoryTableSource {
    fn schema(&self) -> &str {
        "public"
    }

    async fn health(&self) -> ConnectionHealth {
        self.health.unwrap_or(ConnectionHealth::Absent)
    }

    async fn connect(&mut self) -> SyncResult<()> {
        self.connect_calls += 1;
        if self.fail_connect {
            return Err(SyncError::Connection("connection refused".to_string()));
        }
        self.health = Some(ConnectionHealth::Healthy);
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> SyncResult<bool> {
        self.require_open()?;
        Ok(self.tables.contains_key(table))
    }

    async fn fetch_table(&self, table: &str) -> SyncResult<TableSnapshot> {
        self.require_open()?;
        let previous = self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((fetch, token)) = &self.cancel_on_fetch {
            if previous == *fetch {
                token.cancel();
            }
        }
        if let Some((successes, message)) = &self.fail_fetch {
            if previous >= *successes {
                return Err(SyncError::Query(message.clone()));
            }
        }
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| SyncError::Query(format!("relation \"{}\" does not exist", table)))
    }

    async fn server_info(&self) -> SyncResult<ServerInfo> {
        self.require_open()?;
        let mut tables: Vec<String> = self.tables.keys().cloned().collect();
        tables.sort();
        Ok(ServerInfo {
            version: "PostgreSQL 16.2 (memory)".to_string(),
            database: "memory".to_string(),
            tables,
        })
    }

    async fn describe_table(&self, table: &str) -> SyncResult<TableInfo> {
        self.require_open()?;
        let snapshot = self.tables.get(table).ok_or_else(|| SyncError::NotFound {
            schema: self.schema().to_string(),
            table: table.to_string(),
        })?;
        let columns = snapshot
            .columns()
            .iter()
            .map(|name| ColumnInfo {
                name: name.clone(),
                data_type: "text".to_string(),
                nullable: true,
                default: None,
            })
            .collect();
        Ok(TableInfo {
            columns,
            row_count: snapshot.row_count() as i64,
        })
    }

    async fn close(&mut self) {
        self.health = None;
    }
}

struct MemoryWorksheet {
    worksheet: Worksheet,
    cells: Vec<SheetRow>,
}

#[derive(Default)]
pub struct MemorySheetStore {
    worksheets: BTreeMap<String, MemoryWorksheet>,
    health: Option<ConnectionHealth>,
    fail_writes_to: Option<String>,
    next_sheet_id: i32,
    connect_calls: usize,
    overwrite_calls: usize,
}

impl MemorySheetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected() -> Self {
        Self {
            health: Some(ConnectionHealth::Healthy),
            ..Self::default()
        }
    }

    /// Pre-fills a worksheet as if an earlier run had written it.
    pub fn seed(&mut self, name: &str, cells: Vec<SheetRow>) {
        let worksheet = self.add(name, 100, 20);
        if let Some(entry) = self.worksheets.get_mut(&worksheet.title) {
            entry.cells = cells;
        }
    }

    pub fn fail_writes_to(&mut self, name: &str) {
        self.fail_writes_to = Some(name.to_string());
    }

    pub fn cells(&self, name: &str) -> Option<&Vec<SheetRow>> {
        self.worksheets.get(name).map(|entry| &entry.cells)
    }

    pub fn worksheet(&self, name: &str) -> Option<&Worksheet> {
        self.worksheets.get(name).map(|entry| &entry.worksheet)
    }

    pub fn worksheet_count(&self) -> usize {
        self.worksheets.len()
    }

    pub fn metadata_value(&self, attribute: &str) -> Option<String> {
        self.cells(METADATA_WORKSHEET)?
            .iter()
            .skip(1)
            .find(|row| row.first().map(String::as_str) == Some(attribute))
            .and_then(|row| row.get(1).cloned())
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls
    }

    pub fn overwrite_calls(&self) -> usize {
        self.overwrite_calls
    }

    fn add(&mut self, name: &str, rows: u32, cols: u32) -> Worksheet {
        self.next_sheet_id += 1;
        let worksheet = Worksheet {
            sheet_id: self.next_sheet_id,
            title: name.to_string(),
            rows,
            cols,
        };
        self.worksheets.insert(
            name.to_string(),
            MemoryWorksheet {
                worksheet: worksheet.clone(),
                cells: Vec::new(),
            },
        );
        worksheet
    }

    fn require_open(&self) -> SyncResult<()> {
        match self.health {
            Some(ConnectionHealth::Healthy) => Ok(()),
            _ => Err(SyncError::Connection("spreadsheet session is not open".to_string())),
        }
    }
}

#[async_trait]
impl SheetStore for MemorySheetStore {
    async fn health(&self) -> ConnectionHealth {
        self.health.unwrap_or(ConnectionHealth::Absent)
    }

    async fn connect(&mut self) -> SyncResult<()> {
        self.connect_calls += 1;
        self.health = Some(ConnectionHealth::Healthy);
        Ok(())
    }

    async fn ensure_worksheet(&mut self, name: &str, rows: u32, cols: u32) -> SyncResult<Worksheet> {
        self.require_open()?;
        match self.worksheets.get_mut(name) {
            Some(entry) => {
                entry.worksheet.rows = entry.worksheet.rows.max(rows);
                entry.worksheet.cols = entry.worksheet.cols.max(cols);
                Ok(entry.worksheet.clone())
            }
            None => Ok(self.add(name, rows, cols)),
        }
    }

    async fn overwrite(&mut self, worksheet: &Worksheet, rows: &[SheetRow]) -> SyncResult<()> {
        self.require_open()?;
        self.overwrite_calls += 1;
        if self.fail_writes_to.as_deref() == Some(worksheet.title.as_str()) {
            return Err(SyncError::Write(format!(
                "quota exceeded writing '{}'",
                worksheet.title
            )));
        }
        let entry = self
            .worksheets
            .get_mut(&worksheet.title)
            .ok_or_else(|| SyncError::Write(format!("no worksheet '{}'", worksheet.title)))?;
        entry.cells = rows.to_vec();
        Ok(())
    }

    fn spreadsheet_url(&self) -> Option<String> {
        Some("memory://spreadsheet".to_string())
    }
}
