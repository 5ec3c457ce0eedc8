use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

use crate::cfg::data_worksheet_name;
use crate::error::{SyncError, SyncResult};
use crate::metadata::{SyncMetadata, SyncMode};
use crate::sheets::SheetStore;
use crate::snapshot::TableSnapshot;
use crate::source::{read_table, TableSource};
use crate::transform::normalize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Reading,
    Writing,
    Done,
    Failed,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Reading => "reading",
            CyclePhase::Writing => "writing",
            CyclePhase::Done => "done",
            CyclePhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub rows: usize,
    pub columns: usize,
}

#[derive(Debug, Error)]
#[error("sync failed while {phase}: {source}")]
pub struct CycleFailure {
    /// Phase the cycle was in when it failed.
    pub phase: CyclePhase,
    pub source: SyncError,
}

/// One table mirrored into one spreadsheet.
///
/// Owns both sessions so they survive between cycles in interval mode.
pub struct SyncJob<S, W> {
    source: S,
    store: W,
    table: String,
    mode: SyncMode,
    phase: CyclePhase,
    cycles_completed: usize,
}

impl<S, W> SyncJob<S, W>
where
    S: TableSource,
    W: SheetStore,
{
    pub fn new(source: S, store: W, table: impl Into<String>, mode: SyncMode) -> Self {
        Self {
            source,
            store,
            table: table.into(),
            mode,
            phase: CyclePhase::Idle,
            cycles_completed: 0,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn cycles_completed(&self) -> usize {
        self.cycles_completed
    }

    /// Runs one extract, normalize and write pass.
    ///
    /// A read failure or an empty table stops before any spreadsheet call,
    /// so the previous sheet contents survive. Write failures are not rolled
    /// back.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, CycleFailure> {
        self.phase = CyclePhase::Reading;
        let snapshot = match self.read().await {
            Ok(snapshot) => snapshot,
            Err(e) => return Err(self.fail(e)),
        };

        self.phase = CyclePhase::Writing;
        if let Err(e) = self.write(&snapshot).await {
            return Err(self.fail(e));
        }

        self.phase = CyclePhase::Done;
        self.cycles_completed += 1;
        info!(
            "Successfully updated {} rows in Google Sheets",
            snapshot.row_count()
        );
        Ok(CycleReport {
            rows: snapshot.row_count(),
            columns: snapshot.column_count(),
        })
    }

    /// Best-effort final record for interval mode; skipped when the
    /// spreadsheet was never opened.
    pub async fn write_stopped(&mut self) -> SyncResult<()> {
        let SyncMode::Interval(interval) = self.mode else {
            return Ok(());
        };
        if self.store.health().await.needs_connect() {
            debug!("Spreadsheet session not usable, skipping stopped record");
            return Ok(());
        }
        let metadata = SyncMetadata::stopped(&self.table, self.cycles_completed, interval);
        self.store.write_metadata(&metadata).await
    }

    /// Releases the database session.
    pub async fn shutdown(&mut self) {
        self.source.close().await;
    }

    async fn read(&mut self) -> SyncResult<TableSnapshot> {
        let health = self.source.health().await;
        if health.needs_connect() {
            info!("Database session is {}, connecting", health);
            self.source.connect().await?;
        }

        let snapshot = read_table(&self.source, &self.table).await?;
        if snapshot.is_empty() {
            return Err(SyncError::EmptyTable(self.table.clone()));
        }
        info!(
            "Downloaded {} rows and {} columns",
            snapshot.row_count(),
            snapshot.column_count()
        );
        Ok(snapshot)
    }

    async fn write(&mut self, snapshot: &TableSnapshot) -> SyncResult<()> {
        let health = self.store.health().await;
        if health.needs_connect() {
            info!("Spreadsheet session is {}, connecting", health);
            self.store.connect().await?;
        }

        info!("Updating Google Sheets");
        let rows = normalize(snapshot);
        let worksheet = self
            .store
            .ensure_worksheet(
                &data_worksheet_name(&self.table),
                grid_size(snapshot.row_count() + 10, 100),
                grid_size(snapshot.column_count() + 5, 20),
            )
            .await?;
        self.store.overwrite(&worksheet, &rows).await?;

        let metadata = SyncMetadata::for_cycle(
            &self.table,
            snapshot.row_count(),
            snapshot.column_count(),
            self.mode,
            self.store.spreadsheet_url(),
        );
        self.store.write_metadata(&metadata).await
    }

    fn fail(&mut self, error: SyncError) -> CycleFailure {
        let phase = self.phase;
        self.phase = CyclePhase::Failed;
        debug!("Cycle for '{}' moved to failed from {}", self.table, phase);
        CycleFailure {
            phase,
            source: error,
        }
    }
}

#[cfg(test)]
impl<S, W> SyncJob<S, W> {
    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn store(&self) -> &W {
        &self.store
    }
}

fn grid_size(wanted: usize, minimum: u32) -> u32 {
    u32::try_from(wanted).unwrap_or(u32::MAX).max(minimum)
}
