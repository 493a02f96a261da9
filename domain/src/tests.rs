use std::sync::Arc;
use std::time::Duration;

use approx::assert_relative_eq;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use database_adapter::{
    DbError, LedgerStore,
    model::{
        AssetClass, Holding, HoldingUpdate, NewTransaction, NewUser, Snapshot, TradeSide,
        Transaction, UserId, UserRecord, plan_holding_update,
    },
};
use in_memory_adapter::InMemoryLedger;
use proptest::prelude::*;
use quote_adapter::FixedQuoteProvider;

use crate::{Celesta, EngineConfig, PortfolioEngine, PortfolioError};

struct Fixture {
    ledger: Arc<InMemoryLedger>,
    quotes: Arc<FixedQuoteProvider>,
    engine: PortfolioEngine,
    user: UserId,
}

async fn fixture_with(config: EngineConfig, quotes: FixedQuoteProvider) -> Fixture {
    let ledger = Arc::new(InMemoryLedger::new());
    let quotes = Arc::new(quotes);
    let user = ledger
        .create_user(NewUser {
            username: "trader".to_string(),
            email: "trader@example.com".to_string(),
            password_hash: String::new(),
        })
        .await
        .unwrap();
    let engine = PortfolioEngine::new(ledger.clone(), quotes.clone(), config);
    Fixture {
        ledger,
        quotes,
        engine,
        user,
    }
}

async fn fixture() -> Fixture {
    fixture_with(EngineConfig::default(), FixedQuoteProvider::new()).await
}

#[tokio::test]
async fn test_buy_buy_sell_scenario() {
    let f = fixture().await;

    f.quotes.set_price("AAPL", AssetClass::Stock, 100.0);
    let first = f
        .engine
        .buy(f.user, "AAPL", AssetClass::Stock, 10.0)
        .await
        .unwrap();
    assert_relative_eq!(first.total, 1000.0);

    f.quotes.set_price("AAPL", AssetClass::Stock, 130.0);
    let second = f
        .engine
        .buy(f.user, "aapl", AssetClass::Stock, 5.0)
        .await
        .unwrap();
    let holding = second.holding.unwrap();
    assert_relative_eq!(holding.quantity, 15.0);
    assert_relative_eq!(holding.average_buy_price, 110.0, epsilon = 1e-9);

    f.quotes.set_price("AAPL", AssetClass::Stock, 150.0);
    let sale = f
        .engine
        .sell(f.user, "AAPL", AssetClass::Stock, 15.0)
        .await
        .unwrap();
    assert_relative_eq!(sale.total, 2250.0);
    assert!(sale.holding.is_none());
    assert!(f.ledger.get_holding(&f.user, "AAPL").await.unwrap().is_none());

    let log = f.engine.get_transactions(f.user, None).await.unwrap();
    assert_eq!(log.len(), 3);
    assert_eq!(log[0].side, TradeSide::Sell);
}

#[tokio::test]
async fn test_buy_after_full_sell_starts_fresh_average() {
    let f = fixture().await;
    f.quotes.set_price("ETH", AssetClass::Crypto, 2000.0);
    f.engine
        .buy(f.user, "ETH", AssetClass::Crypto, 1.0)
        .await
        .unwrap();
    f.engine
        .sell(f.user, "ETH", AssetClass::Crypto, 1.0)
        .await
        .unwrap();

    f.quotes.set_price("ETH", AssetClass::Crypto, 3000.0);
    let receipt = f
        .engine
        .buy(f.user, "ETH", AssetClass::Crypto, 2.0)
        .await
        .unwrap();
    let holding = receipt.holding.unwrap();
    assert_relative_eq!(holding.quantity, 2.0);
    assert_relative_eq!(holding.average_buy_price, 3000.0);
}

#[tokio::test]
async fn test_oversell_leaves_state_unchanged() {
    let f = fixture().await;
    f.quotes.set_price("MSFT", AssetClass::Stock, 400.0);
    f.engine
        .buy(f.user, "MSFT", AssetClass::Stock, 3.0)
        .await
        .unwrap();
    let before = f.ledger.get_holding(&f.user, "MSFT").await.unwrap();

    let result = f.engine.sell(f.user, "MSFT", AssetClass::Stock, 3.5).await;
    assert!(matches!(
        result,
        Err(PortfolioError::InsufficientQuantity { ref ticker, held, requested })
            if ticker == "MSFT" && held == 3.0 && requested == 3.5
    ));
    assert_eq!(f.ledger.get_holding(&f.user, "MSFT").await.unwrap(), before);
    assert_eq!(f.engine.get_transactions(f.user, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_selling_a_hair_more_than_held_is_rejected() {
    let f = fixture().await;
    f.quotes.set_price("AAPL", AssetClass::Stock, 100.0);
    f.engine
        .buy(f.user, "AAPL", AssetClass::Stock, 2.0)
        .await
        .unwrap();

    assert!(matches!(
        f.engine
            .sell(f.user, "AAPL", AssetClass::Stock, 2.0 + 5e-10)
            .await,
        Err(PortfolioError::InsufficientQuantity { .. })
    ));
    let holding = f.ledger.get_holding(&f.user, "AAPL").await.unwrap().unwrap();
    assert_eq!(holding.quantity, 2.0);
    assert_eq!(f.engine.get_transactions(f.user, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_trade_under_another_asset_class_is_rejected() {
    let f = fixture().await;
    f.quotes.set_price("BTC", AssetClass::Crypto, 50_000.0);
    f.quotes.set_price("BTC", AssetClass::Stock, 30.0);
    f.engine
        .buy(f.user, "BTC", AssetClass::Crypto, 1.0)
        .await
        .unwrap();

    assert!(matches!(
        f.engine.buy(f.user, "BTC", AssetClass::Stock, 1.0).await,
        Err(PortfolioError::Validation(_))
    ));
    assert!(matches!(
        f.engine.sell(f.user, "BTC", AssetClass::Stock, 1.0).await,
        Err(PortfolioError::Validation(_))
    ));
    let holding = f.ledger.get_holding(&f.user, "BTC").await.unwrap().unwrap();
    assert_eq!(holding.quantity, 1.0);
    assert_relative_eq!(holding.average_buy_price, 50_000.0);
    assert_eq!(f.engine.get_transactions(f.user, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_sell_without_holding_is_not_found() {
    let f = fixture().await;
    f.quotes.set_price("TSLA", AssetClass::Stock, 250.0);
    assert!(matches!(
        f.engine.sell(f.user, "TSLA", AssetClass::Stock, 1.0).await,
        Err(PortfolioError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_non_positive_quantities_are_rejected() {
    let f = fixture().await;
    f.quotes.set_price("AAPL", AssetClass::Stock, 100.0);

    for quantity in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        assert!(matches!(
            f.engine.buy(f.user, "AAPL", AssetClass::Stock, quantity).await,
            Err(PortfolioError::InvalidQuantity(_))
        ));
        assert!(matches!(
            f.engine.sell(f.user, "AAPL", AssetClass::Stock, quantity).await,
            Err(PortfolioError::InvalidQuantity(_))
        ));
    }
    assert!(f.ledger.list_holdings(&f.user).await.unwrap().is_empty());
    assert!(f.engine.get_transactions(f.user, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_ticker_is_rejected() {
    let f = fixture().await;
    assert!(matches!(
        f.engine.buy(f.user, "  ", AssetClass::Stock, 1.0).await,
        Err(PortfolioError::Validation(_))
    ));
}

#[tokio::test]
async fn test_unavailable_price_leaves_ledger_untouched() {
    let f = fixture().await;
    f.quotes.set_price("AAPL", AssetClass::Stock, 100.0);
    f.quotes.fail("AAPL");

    assert!(matches!(
        f.engine.buy(f.user, "AAPL", AssetClass::Stock, 1.0).await,
        Err(PortfolioError::PriceUnavailable { .. })
    ));
    // Unmapped crypto symbols never reach the ledger either
    assert!(matches!(
        f.engine.buy(f.user, "NOPE", AssetClass::Crypto, 1.0).await,
        Err(PortfolioError::PriceUnavailable { .. })
    ));
    assert!(f.ledger.list_holdings(&f.user).await.unwrap().is_empty());
    assert!(f.engine.get_transactions(f.user, None).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_quote_leaves_ledger_untouched() {
    let quotes = FixedQuoteProvider::new()
        .with_price("AAPL", AssetClass::Stock, 100.0)
        .with_delay(Duration::from_secs(30));
    let config = EngineConfig::default().with_quote_timeout(Duration::from_secs(1));
    let f = fixture_with(config, quotes).await;

    let result = f.engine.buy(f.user, "AAPL", AssetClass::Stock, 1.0).await;
    assert!(matches!(
        result,
        Err(PortfolioError::PriceUnavailable { ref reason, .. }) if reason.contains("timed out")
    ));
    assert!(f.ledger.list_holdings(&f.user).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_valuation_degrades_per_ticker() {
    let f = fixture().await;
    f.quotes.set_price("AAPL", AssetClass::Stock, 100.0);
    f.quotes.set_price("BTC", AssetClass::Crypto, 50_000.0);
    f.engine
        .buy(f.user, "AAPL", AssetClass::Stock, 2.0)
        .await
        .unwrap();
    f.engine
        .buy(f.user, "BTC", AssetClass::Crypto, 0.1)
        .await
        .unwrap();

    f.quotes.set_price("AAPL", AssetClass::Stock, 120.0);
    f.quotes.fail("BTC");

    let valuation = f.engine.valuation(f.user).await.unwrap();
    assert_eq!(valuation.holdings.len(), 2);
    let aapl = &valuation.holdings[0];
    let btc = &valuation.holdings[1];
    assert_eq!(aapl.ticker, "AAPL");
    assert_relative_eq!(aapl.current_value, 240.0);
    assert_relative_eq!(aapl.profit_loss, 40.0);
    assert_relative_eq!(aapl.profit_loss_percent, 20.0);
    assert!(btc.current_price.is_none());
    assert!(btc.price_error.is_some());
    assert_eq!(btc.current_value, 0.0);

    let summary = valuation.summary;
    assert_relative_eq!(summary.total_value, 240.0);
    assert_relative_eq!(summary.total_cost, 200.0);
    assert_relative_eq!(summary.total_profit_loss, 40.0);
    assert_relative_eq!(summary.total_profit_loss_percent, 20.0);
    assert_eq!(summary.holdings_count, 2);
    assert_eq!(summary.unpriced_count, 1);
}

#[tokio::test]
async fn test_empty_portfolio_summary() {
    let f = fixture().await;
    let summary = f.engine.get_summary(f.user).await.unwrap();
    assert_eq!(summary.total_value, 0.0);
    assert_eq!(summary.total_profit_loss_percent, 0.0);
    assert_eq!(summary.holdings_count, 0);
}

#[tokio::test]
async fn test_transaction_limit_is_clamped() {
    let f = fixture().await;
    f.quotes.set_price("AAPL", AssetClass::Stock, 10.0);
    for _ in 0..3 {
        f.engine
            .buy(f.user, "AAPL", AssetClass::Stock, 1.0)
            .await
            .unwrap();
    }
    assert_eq!(
        f.engine.get_transactions(f.user, Some(0)).await.unwrap().len(),
        1
    );
    assert_eq!(
        f.engine.get_transactions(f.user, Some(2)).await.unwrap().len(),
        2
    );
    assert_eq!(
        f.engine
            .get_transactions(f.user, Some(10_000))
            .await
            .unwrap()
            .len(),
        3
    );
}

/// Ledger whose holding update is a plain read, pause, write. Without the
/// engine's per-holding lock concurrent trades would overwrite each other.
#[derive(Debug, Default)]
struct RacyLedger {
    inner: InMemoryLedger,
}

#[async_trait]
impl LedgerStore for RacyLedger {
    async fn create_user(&self, user: NewUser) -> Result<UserId, DbError> {
        self.inner.create_user(user).await
    }
    async fn get_user(&self, user_id: &UserId) -> Result<Option<UserRecord>, DbError> {
        self.inner.get_user(user_id).await
    }
    async fn find_user(&self, login: &str) -> Result<Option<UserRecord>, DbError> {
        self.inner.find_user(login).await
    }
    async fn update_password_hash(
        &self,
        user_id: &UserId,
        password_hash: String,
    ) -> Result<(), DbError> {
        self.inner.update_password_hash(user_id, password_hash).await
    }
    async fn list_user_ids(&self) -> Result<Vec<UserId>, DbError> {
        self.inner.list_user_ids().await
    }
    async fn get_holding(
        &self,
        user_id: &UserId,
        ticker: &str,
    ) -> Result<Option<Holding>, DbError> {
        self.inner.get_holding(user_id, ticker).await
    }
    async fn list_holdings(&self, user_id: &UserId) -> Result<Vec<Holding>, DbError> {
        self.inner.list_holdings(user_id).await
    }
    async fn upsert_holding(
        &self,
        user_id: &UserId,
        ticker: &str,
        asset_class: AssetClass,
        delta_quantity: f64,
        trade_price: f64,
    ) -> Result<Option<Holding>, DbError> {
        let existing = self.inner.get_holding(user_id, ticker).await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let update = plan_holding_update(
            existing.as_ref(),
            *user_id,
            ticker,
            asset_class,
            delta_quantity,
            trade_price,
            Utc::now(),
        )?;
        self.inner.delete_holding(user_id, ticker).await?;
        match update {
            HoldingUpdate::Upsert(holding) => {
                self.inner
                    .upsert_holding(
                        user_id,
                        ticker,
                        asset_class,
                        holding.quantity,
                        holding.average_buy_price,
                    )
                    .await
            }
            HoldingUpdate::Remove => Ok(None),
        }
    }
    async fn delete_holding(&self, user_id: &UserId, ticker: &str) -> Result<bool, DbError> {
        self.inner.delete_holding(user_id, ticker).await
    }
    async fn record_transaction(
        &self,
        transaction: NewTransaction,
    ) -> Result<Transaction, DbError> {
        self.inner.record_transaction(transaction).await
    }
    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<Transaction>, DbError> {
        self.inner.list_transactions(user_id, limit).await
    }
    async fn record_snapshot(
        &self,
        user_id: &UserId,
        total_value: f64,
    ) -> Result<Snapshot, DbError> {
        self.inner.record_snapshot(user_id, total_value).await
    }
    async fn list_snapshots(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Snapshot>, DbError> {
        self.inner.list_snapshots(user_id, since).await
    }
    async fn prune_snapshots(&self, older_than: DateTime<Utc>) -> Result<u64, DbError> {
        self.inner.prune_snapshots(older_than).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_buys_on_one_holding_are_serialized() {
    let ledger = Arc::new(RacyLedger::default());
    let user = ledger
        .create_user(NewUser {
            username: "racer".to_string(),
            email: "racer@example.com".to_string(),
            password_hash: String::new(),
        })
        .await
        .unwrap();
    let engine = Arc::new(PortfolioEngine::new(
        ledger.clone(),
        Arc::new(FixedQuoteProvider::new()),
        EngineConfig::default(),
    ));

    let buys = [10.0, 20.0].map(|price| {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .execute_at(user, "SOL", AssetClass::Crypto, TradeSide::Buy, 1.0, price)
                .await
        })
    });
    for buy in buys {
        buy.await.unwrap().unwrap();
    }

    let holding = ledger.get_holding(&user, "SOL").await.unwrap().unwrap();
    assert_relative_eq!(holding.quantity, 2.0);
    assert_relative_eq!(holding.average_buy_price, 15.0);
}

#[tokio::test]
async fn test_snapshot_record_and_list() {
    let quotes = FixedQuoteProvider::new().with_price("AAPL", AssetClass::Stock, 100.0);
    let celesta = Celesta::in_memory(Arc::new(quotes), EngineConfig::default());
    let user = celesta
        .users()
        .signup("snap", "snap@example.com", "secret1")
        .await
        .unwrap();
    celesta
        .engine()
        .buy(user, "AAPL", AssetClass::Stock, 3.0)
        .await
        .unwrap();

    let snapshot = celesta.snapshots().record(user).await.unwrap();
    assert_relative_eq!(snapshot.total_value, 300.0);

    let history = celesta.snapshots().list(user, None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0], snapshot);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_records_every_user() {
    let quotes = FixedQuoteProvider::new().with_price("AAPL", AssetClass::Stock, 50.0);
    let celesta = Celesta::in_memory(Arc::new(quotes), EngineConfig::default());
    let alice = celesta
        .users()
        .signup("alice", "alice@example.com", "secret1")
        .await
        .unwrap();
    let bob = celesta
        .users()
        .signup("bob", "bob@example.com", "secret1")
        .await
        .unwrap();
    celesta
        .engine()
        .buy(alice, "AAPL", AssetClass::Stock, 2.0)
        .await
        .unwrap();

    let scheduler =
        celesta.start_snapshot_scheduler(Duration::from_secs(3600), chrono::Duration::days(30));
    tokio::time::sleep(Duration::from_secs(3601)).await;
    scheduler.stop().await;

    let alice_history = celesta.snapshots().list(alice, None).await.unwrap();
    assert!(!alice_history.is_empty());
    assert_relative_eq!(alice_history[0].total_value, 100.0);
    assert!(!celesta.snapshots().list(bob, None).await.unwrap().is_empty());
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn weighted_mean_of_buys(buys in prop::collection::vec((0.001f64..1_000.0, 0.01f64..10_000.0), 1..20)) {
        let holding = runtime().block_on(async {
            let f = fixture().await;
            for (quantity, price) in &buys {
                f.engine
                    .execute_at(f.user, "AAPL", AssetClass::Stock, TradeSide::Buy, *quantity, *price)
                    .await
                    .unwrap();
            }
            f.ledger.get_holding(&f.user, "AAPL").await.unwrap().unwrap()
        });

        let total_quantity: f64 = buys.iter().map(|(q, _)| q).sum();
        let total_cost: f64 = buys.iter().map(|(q, p)| q * p).sum();
        prop_assert!((holding.quantity - total_quantity).abs() <= 1e-9 * total_quantity.max(1.0));
        prop_assert!(
            (holding.average_buy_price - total_cost / total_quantity).abs()
                <= 1e-6 * (total_cost / total_quantity).max(1.0)
        );
    }

    #[test]
    fn log_reconciles_with_holding(ops in prop::collection::vec((any::<bool>(), 0.01f64..10.0), 1..40)) {
        let (held, buys, sells) = runtime().block_on(async {
            let f = fixture().await;
            for (is_buy, quantity) in &ops {
                let side = if *is_buy { TradeSide::Buy } else { TradeSide::Sell };
                // Rejected sells are part of the exercise
                let _ = f
                    .engine
                    .execute_at(f.user, "ETH", AssetClass::Crypto, side, *quantity, 100.0)
                    .await;
            }
            let held = f
                .ledger
                .get_holding(&f.user, "ETH")
                .await
                .unwrap()
                .map_or(0.0, |h| h.quantity);
            let log = f.engine.get_transactions(f.user, Some(1000)).await.unwrap();
            let sum = |side| -> f64 {
                log.iter().filter(|t| t.side == side).map(|t| t.quantity).sum()
            };
            (held, sum(TradeSide::Buy), sum(TradeSide::Sell))
        });

        prop_assert!(held >= 0.0);
        prop_assert!((buys - sells - held).abs() < 1e-6);
    }
}
