use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use database_adapter::{
    LedgerStore,
    model::{Snapshot, UserId},
};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::{engine::PortfolioEngine, error::PortfolioError};

/// Persists total portfolio value over time. Append-only apart from pruning.
#[derive(Debug)]
pub struct SnapshotRecorder {
    engine: Arc<PortfolioEngine>,
    ledger: Arc<dyn LedgerStore>,
}

impl SnapshotRecorder {
    #[must_use]
    pub fn new(engine: Arc<PortfolioEngine>, ledger: Arc<dyn LedgerStore>) -> Self {
        Self { engine, ledger }
    }

    /// Values the portfolio now and appends the total as a snapshot
    ///
    /// # Errors
    /// - `Storage` if holdings cannot be read or the snapshot cannot be written
    pub async fn record(&self, user_id: UserId) -> Result<Snapshot, PortfolioError> {
        let summary = self.engine.get_summary(user_id).await?;
        let snapshot = self
            .ledger
            .record_snapshot(&user_id, summary.total_value)
            .await?;
        debug!(
            "Recorded snapshot of {} for user {user_id}",
            snapshot.total_value
        );
        Ok(snapshot)
    }

    /// Snapshots in the trailing window of `since_hours` (default 24), oldest first
    ///
    /// # Errors
    /// - `Storage` if the snapshots cannot be read
    pub async fn list(
        &self,
        user_id: UserId,
        since_hours: Option<i64>,
    ) -> Result<Vec<Snapshot>, PortfolioError> {
        let since = Utc::now() - self.engine.config().history_window(since_hours);
        Ok(self.ledger.list_snapshots(&user_id, since).await?)
    }

    /// Records a snapshot for every user. Failures are logged per user and
    /// do not stop the others; returns how many were written.
    ///
    /// # Errors
    /// - `Storage` if the user list cannot be read
    pub async fn record_all(&self) -> Result<usize, PortfolioError> {
        let mut recorded = 0;
        for user_id in self.ledger.list_user_ids().await? {
            match self.record(user_id).await {
                Ok(_) => recorded += 1,
                Err(e) => error!("Failed to record snapshot for user {user_id}: {e}"),
            }
        }
        Ok(recorded)
    }

    /// Deletes snapshots older than `retention`
    ///
    /// # Errors
    /// - `Storage` if the delete fails
    pub async fn prune(&self, retention: chrono::Duration) -> Result<u64, PortfolioError> {
        Ok(self.ledger.prune_snapshots(Utc::now() - retention).await?)
    }
}

/// Background task recording snapshots for every user at a fixed interval
#[derive(Debug)]
pub struct SnapshotScheduler {
    handle: Mutex<Option<JoinHandle<()>>>,
    wake: Arc<Notify>,
    should_stop: Arc<Mutex<bool>>,
}

impl SnapshotScheduler {
    #[must_use]
    pub fn start(
        recorder: Arc<SnapshotRecorder>,
        interval: Duration,
        retention: chrono::Duration,
    ) -> Self {
        let wake = Arc::new(Notify::new());
        let should_stop = Arc::new(Mutex::new(false));

        let handle = tokio::spawn(Self::run(
            recorder,
            interval,
            retention,
            Arc::clone(&wake),
            Arc::clone(&should_stop),
        ));
        info!("Snapshot scheduler started, interval {interval:?}");

        Self {
            handle: Mutex::new(Some(handle)),
            wake,
            should_stop,
        }
    }

    async fn run(
        recorder: Arc<SnapshotRecorder>,
        interval: Duration,
        retention: chrono::Duration,
        wake: Arc<Notify>,
        should_stop: Arc<Mutex<bool>>,
    ) {
        loop {
            tokio::select! {
                () = wake.notified() => {},
                () = sleep(interval) => {},
            }
            if *should_stop.lock().await {
                break;
            }

            match recorder.record_all().await {
                Ok(count) => debug!("Snapshot round recorded {count} snapshots"),
                Err(e) => error!("Snapshot round failed: {e}"),
            }
            match recorder.prune(retention).await {
                Ok(0) => {}
                Ok(removed) => info!("Pruned {removed} old snapshots"),
                Err(e) => error!("Failed to prune snapshots: {e}"),
            }
        }
        debug!("Snapshot scheduler terminated");
    }

    /// Signals the task to stop and waits for it to finish its current round
    pub async fn stop(&self) {
        *self.should_stop.lock().await = true;
        // notify_one keeps a permit if the task is not waiting yet
        self.wake.notify_one();
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Snapshot scheduler task panicked: {e}");
            }
        }
        info!("Snapshot scheduler stopped");
    }
}
