use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::job::{CycleFailure, CycleReport, SyncJob};
use crate::sheets::SheetStore;
use crate::source::TableSource;

/// Granularity of the wait between cycles.
pub const WAIT_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntervalSummary {
    pub cycles_completed: usize,
    pub cycles_failed: usize,
}

/// Runs exactly one cycle, then releases the database session.
pub async fn run_once<S, W>(job: &mut SyncJob<S, W>) -> Result<CycleReport, CycleFailure>
where
    S: TableSource,
    W: SheetStore,
{
    info!("Starting one-time sync of table '{}'", job.table());
    let outcome = job.run_cycle().await;
    job.shutdown().await;

    match &outcome {
        Ok(report) => info!(
            "One-time sync completed: {} rows, {} columns",
            report.rows, report.columns
        ),
        Err(failure) => error!("One-time sync failed: {}", failure),
    }
    outcome
}

/// Runs an initial cycle, then one cycle per `interval` until `cancel` fires.
///
/// A failed initial cycle aborts. Later failures are logged and the loop
/// waits for the next interval. A cycle in progress always finishes before
/// cancellation is honoured.
pub async fn run_interval<S, W>(
    job: &mut SyncJob<S, W>,
    interval: Duration,
    cancel: CancellationToken,
) -> Result<IntervalSummary, CycleFailure>
where
    S: TableSource,
    W: SheetStore,
{
    info!(
        "Starting continuous sync of table '{}' every {:.1} minutes",
        job.table(),
        interval.as_secs_f64() / 60.0
    );

    info!("Performing initial sync");
    if let Err(failure) = job.run_cycle().await {
        error!("Initial sync failed: {}", failure);
        job.shutdown().await;
        return Err(failure);
    }

    let mut summary = IntervalSummary::default();
    let mut attempt = 1;

    while wait_for_next_cycle(interval, &cancel).await {
        attempt += 1;
        info!("Starting sync #{}", attempt);
        match job.run_cycle().await {
            Ok(report) => {
                info!("Sync #{} completed: {} rows", attempt, report.rows);
            }
            Err(failure) => {
                summary.cycles_failed += 1;
                warn!("Sync #{} failed, retrying next interval: {}", attempt, failure);
            }
        }
    }

    summary.cycles_completed = job.cycles_completed();
    info!("Shutting down sync process");
    if let Err(e) = job.write_stopped().await {
        warn!("Could not record stopped status: {}", e);
    }
    job.shutdown().await;

    info!(
        "Sync process stopped after {} successful and {} failed cycles",
        summary.cycles_completed, summary.cycles_failed
    );
    Ok(summary)
}

/// Sleeps for `interval` in [`WAIT_TICK`] steps. Returns `false` as soon as
/// cancellation is seen.
async fn wait_for_next_cycle(interval: Duration, cancel: &CancellationToken) -> bool {
    let mut waited = Duration::ZERO;
    while waited < interval {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(WAIT_TICK) => waited += WAIT_TICK,
        }
    }
    !cancel.is_cancelled()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ConnectionHealth;
    use crate::metadata::SyncMode;
    use crate::snapshot::{CellValue, TableSnapshot};
    use crate::testing::{MemorySheetStore, MemoryTableSource};
    use tokio::time::Instant;

    const MINUTE: Duration = Duration::from_secs(60);

    fn source_with_users() -> MemoryTableSource {
        let mut source = MemoryTableSource::new();
        source.insert(
            TableSnapshot::new(
                vec!["id".into()],
                vec![vec![CellValue::Int(1)], vec![CellValue::Int(2)]],
            )
            .unwrap(),
            "users",
        );
        source
    }

    fn interval_job(
        source: MemoryTableSource,
    ) -> SyncJob<MemoryTableSource, MemorySheetStore> {
        SyncJob::new(source, MemorySheetStore::new(), "users", SyncMode::Interval(MINUTE))
    }

    fn cancel_after(delay: Duration) -> CancellationToken {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            trigger.cancel();
        });
        cancel
    }

    #[tokio::test(start_paused = true)]
    async fn stop_signal_during_wait_ends_promptly() {
        let mut job = interval_job(source_with_users());
        let started = Instant::now();

        let summary = run_interval(&mut job, MINUTE, cancel_after(Duration::from_secs(3)))
            .await
            .unwrap();

        assert!(started.elapsed() <= Duration::from_secs(4));
        assert_eq!(summary.cycles_completed, 1);
        assert_eq!(summary.cycles_failed, 0);
        assert_eq!(job.store().metadata_value("Status").as_deref(), Some("Stopped"));
        assert_eq!(
            job.store().metadata_value("Total Syncs Completed").as_deref(),
            Some("1")
        );
        assert_eq!(job.source().health().await, ConnectionHealth::Absent);
    }

    #[tokio::test(start_paused = true)]
    async fn repeats_every_interval_until_cancelled() {
        let mut job = interval_job(source_with_users());

        let summary = run_interval(&mut job, MINUTE, cancel_after(Duration::from_secs(150)))
            .await
            .unwrap();

        assert_eq!(summary.cycles_completed, 3);
        assert_eq!(job.source().connect_calls(), 1);
        assert_eq!(job.store().metadata_value("Status").as_deref(), Some("Stopped"));
    }

    #[tokio::test(start_paused = true)]
    async fn loop_failures_are_skipped() {
        let mut source = source_with_users();
        source.fail_fetch_after(1, "canceling statement due to statement timeout");
        let mut job = interval_job(source);

        let summary = run_interval(&mut job, MINUTE, cancel_after(Duration::from_secs(150)))
            .await
            .unwrap();

        assert_eq!(summary.cycles_completed, 1);
        assert_eq!(summary.cycles_failed, 2);
        assert_eq!(job.source().fetch_calls(), 3);
        assert_eq!(job.store().cells("users_data").unwrap().len(), 3);
        assert_eq!(job.store().metadata_value("Status").as_deref(), Some("Stopped"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_cycle_lets_it_finish() {
        let cancel = CancellationToken::new();
        let mut source = source_with_users();
        source.cancel_during_fetch(1, cancel.clone());
        let mut job = interval_job(source);
        let started = Instant::now();

        let summary = run_interval(&mut job, MINUTE, cancel).await.unwrap();

        assert!(started.elapsed() >= MINUTE && started.elapsed() < MINUTE + WAIT_TICK);
        assert_eq!(summary.cycles_completed, 2);
        assert_eq!(job.cycles_completed(), 2);
        assert_eq!(job.source().fetch_calls(), 2);
        // Data and metadata for both cycles, then the stopped record.
        assert_eq!(job.store().overwrite_calls(), 5);
        assert_eq!(job.store().cells("users_data").unwrap().len(), 3);
        assert_eq!(job.store().metadata_value("Status").as_deref(), Some("Stopped"));
        assert_eq!(
            job.store().metadata_value("Total Syncs Completed").as_deref(),
            Some("2")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn initial_failure_aborts() {
        let mut job = interval_job(MemoryTableSource::new());
        let cancel = CancellationToken::new();

        let failure = run_interval(&mut job, MINUTE, cancel).await.unwrap_err();
        assert!(failure.source.is_not_found());
        assert_eq!(job.store().overwrite_calls(), 0);
        assert_eq!(job.store().metadata_value("Status"), None);
    }

    #[tokio::test]
    async fn one_shot_reports_outcome_and_closes() {
        let mut job = SyncJob::new(
            source_with_users(),
            MemorySheetStore::new(),
            "users",
            SyncMode::OneShot,
        );
        let report = run_once(&mut job).await.unwrap();
        assert_eq!(report.rows, 2);
        assert_eq!(job.source().health().await, ConnectionHealth::Absent);

        let mut ghosts = SyncJob::new(
            MemoryTableSource::new(),
            MemorySheetStore::new(),
            "ghosts",
            SyncMode::OneShot,
        );
        assert!(run_once(&mut ghosts).await.is_err());
    }
}
