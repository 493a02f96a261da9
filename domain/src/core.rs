use std::sync::Arc;
use std::time::Duration;

use database_adapter::LedgerStore;
use in_memory_adapter::InMemoryLedger;
use quote_adapter::QuoteProvider;
use tracing::info;

use crate::{
    config::EngineConfig,
    engine::PortfolioEngine,
    error::PortfolioError,
    snapshot::{SnapshotRecorder, SnapshotScheduler},
    user::UserService,
};

/// Wires the ledger, the quote provider and the services built on them
#[derive(Debug, Clone)]
pub struct Celesta {
    ledger: Arc<dyn LedgerStore>,
    engine: Arc<PortfolioEngine>,
    snapshots: Arc<SnapshotRecorder>,
    users: UserService,
}

impl Celesta {
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        quotes: Arc<dyn QuoteProvider>,
        config: EngineConfig,
    ) -> Self {
        let engine = Arc::new(PortfolioEngine::new(Arc::clone(&ledger), quotes, config));
        let snapshots = Arc::new(SnapshotRecorder::new(
            Arc::clone(&engine),
            Arc::clone(&ledger),
        ));
        Self {
            users: UserService::new(Arc::clone(&ledger)),
            ledger,
            engine,
            snapshots,
        }
    }

    /// Backed by a fresh in-memory ledger
    #[must_use]
    pub fn in_memory(quotes: Arc<dyn QuoteProvider>, config: EngineConfig) -> Self {
        Self::new(Arc::new(InMemoryLedger::new()), quotes, config)
    }

    #[must_use]
    pub fn engine(&self) -> &PortfolioEngine {
        &self.engine
    }

    #[must_use]
    pub fn snapshots(&self) -> &SnapshotRecorder {
        &self.snapshots
    }

    #[must_use]
    pub fn users(&self) -> &UserService {
        &self.users
    }

    #[must_use]
    pub fn quotes(&self) -> &Arc<dyn QuoteProvider> {
        self.engine.quotes()
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    /// Starts the periodic snapshot task; stop it with [`SnapshotScheduler::stop`]
    #[must_use]
    pub fn start_snapshot_scheduler(
        &self,
        interval: Duration,
        retention: chrono::Duration,
    ) -> SnapshotScheduler {
        SnapshotScheduler::start(Arc::clone(&self.snapshots), interval, retention)
    }

    /// Creates a demo account with a couple of positions
    ///
    /// # Errors
    /// - Any error from signup or the initial buys
    pub async fn debug_populate(&self) -> Result<(), PortfolioError> {
        let id = self
            .users
            .signup("demo", "demo@example.com", "demo123")
            .await?;
        self.engine
            .buy(id, "AAPL", quote_adapter::AssetClass::Stock, 10.0)
            .await?;
        self.engine
            .buy(id, "BTC", quote_adapter::AssetClass::Crypto, 0.5)
            .await?;
        info!("Populated demo user {id}");
        Ok(())
    }
}
