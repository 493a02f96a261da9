use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::{bail, eyre};
use domain::{AssetClass, Celesta, EngineConfig, PortfolioError, TradeSide, UserId};
use hdrhistogram::Histogram;
use quote_adapter::FixedQuoteProvider;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Tolerance used when comparing a reconciled quantity with the stored one
const RECONCILE_EPSILON: f64 = 1e-6;

const INSTRUMENTS: [(&str, AssetClass); 6] = [
    ("AAPL", AssetClass::Stock),
    ("MSFT", AssetClass::Stock),
    ("GOOGL", AssetClass::Stock),
    ("TSLA", AssetClass::Stock),
    ("BTC", AssetClass::Crypto),
    ("ETH", AssetClass::Crypto),
];

#[derive(Parser, Debug)]
#[command(name = "celesta-benchmark")]
#[command(about = "Concurrent trade load against the Celesta portfolio engine")]
struct Args {
    /// Number of concurrent clients
    #[arg(short, long, default_value_t = 16)]
    clients: usize,

    /// Duration of the test in seconds
    #[arg(short, long, default_value_t = 30)]
    duration: u64,

    /// Number of test users to create
    #[arg(long, default_value_t = 20)]
    test_users: usize,

    /// Number of distinct tickers traded (at most 6)
    #[arg(long, default_value_t = 4)]
    tickers: usize,

    /// Probability that a trade is a buy
    #[arg(long, default_value_t = 0.6)]
    buy_ratio: f64,
}

/// Selling more than is held is an expected outcome of random load
fn is_expected_rejection(error: &PortfolioError) -> bool {
    matches!(
        error,
        PortfolioError::InsufficientQuantity { .. } | PortfolioError::NotFound(_)
    )
}

#[derive(Debug)]
struct BenchmarkMetrics {
    trades_submitted: AtomicU64,
    trades_executed: AtomicU64,
    trades_rejected: AtomicU64,
    trades_failed: AtomicU64,
    latency_histogram: Mutex<Histogram<u64>>,
    start_time: Instant,
}

impl BenchmarkMetrics {
    fn new() -> Result<Self> {
        Ok(Self {
            trades_submitted: AtomicU64::new(0),
            trades_executed: AtomicU64::new(0),
            trades_rejected: AtomicU64::new(0),
            trades_failed: AtomicU64::new(0),
            latency_histogram: Mutex::new(Histogram::new_with_bounds(1, 60_000_000, 3)?),
            start_time: Instant::now(),
        })
    }

    fn record(&self, latency: Duration, outcome: &Result<(), PortfolioError>) {
        self.trades_submitted.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Ok(()) => {
                self.trades_executed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) if is_expected_rejection(e) => {
                self.trades_rejected.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.trades_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        if let Ok(mut hist) = self.latency_histogram.lock() {
            let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
            let _ = hist.record(micros.max(1));
        }
    }

    fn throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let submitted = self.trades_submitted.load(Ordering::Relaxed) as f64;
        if elapsed > 0.0 { submitted / elapsed } else { 0.0 }
    }

    fn print_report(&self) {
        let submitted = self.trades_submitted.load(Ordering::Relaxed);
        let executed = self.trades_executed.load(Ordering::Relaxed);
        let rejected = self.trades_rejected.load(Ordering::Relaxed);
        let failed = self.trades_failed.load(Ordering::Relaxed);

        println!("\n=== CELESTA BENCHMARK RESULTS ===");
        println!(
            "Test Duration: {:.2} seconds",
            self.start_time.elapsed().as_secs_f64()
        );
        println!("Trades Submitted: {submitted}");
        println!("Trades Executed: {executed}");
        println!("Trades Rejected (insufficient holdings): {rejected}");
        println!("Trades Failed: {failed}");
        println!("Throughput: {:.2} trades/s", self.throughput());

        if let Ok(hist) = self.latency_histogram.lock() {
            println!("\n=== LATENCY DISTRIBUTION (us) ===");
            println!("Min: {}", hist.min());
            println!("P50: {}", hist.value_at_quantile(0.50));
            println!("P90: {}", hist.value_at_quantile(0.90));
            println!("P95: {}", hist.value_at_quantile(0.95));
            println!("P99: {}", hist.value_at_quantile(0.99));
            println!("Max: {}", hist.max());
        }
    }
}

async fn setup_test_users(celesta: &Celesta, num_users: usize) -> Result<Vec<UserId>> {
    info!("Setting up {num_users} test users...");
    let mut users = Vec::with_capacity(num_users);
    for i in 0..num_users {
        let id = celesta
            .users()
            .signup(
                &format!("bench_user_{i}"),
                &format!("bench_user_{i}@benchmark.test"),
                "password123",
            )
            .await
            .map_err(|e| eyre!("Failed to create user {i}: {e}"))?;
        users.push(id);
    }
    info!("Successfully created {} test users", users.len());
    Ok(users)
}

async fn benchmark_worker(
    worker_id: usize,
    celesta: Celesta,
    users: Arc<Vec<UserId>>,
    tickers: usize,
    buy_ratio: f64,
    metrics: Arc<BenchmarkMetrics>,
    should_stop: Arc<AtomicBool>,
) {
    use rand::SeedableRng;
    let mut rng = rand::rngs::StdRng::from_entropy();

    while !should_stop.load(Ordering::Relaxed) {
        let user_id = users[rng.gen_range(0..users.len())];
        let (ticker, asset_class) = INSTRUMENTS[rng.gen_range(0..tickers)];
        let quantity = f64::from(rng.gen_range(1_u32..=40)) / 4.0;
        let side = if rng.gen_bool(buy_ratio) {
            TradeSide::Buy
        } else {
            TradeSide::Sell
        };

        let started = Instant::now();
        let outcome = match side {
            TradeSide::Buy => celesta
                .engine()
                .buy(user_id, ticker, asset_class, quantity)
                .await
                .map(|_| ()),
            TradeSide::Sell => celesta
                .engine()
                .sell(user_id, ticker, asset_class, quantity)
                .await
                .map(|_| ()),
        };
        metrics.record(started.elapsed(), &outcome);

        match &outcome {
            Err(e) if !is_expected_rejection(e) => warn!("Worker {worker_id} trade failed: {e}"),
            _ => {}
        }
    }
}

/// Replays each user's transaction log and compares it with the stored holdings
async fn reconcile(celesta: &Celesta, users: &[UserId]) -> Result<usize> {
    let ledger = celesta.ledger();
    let mut mismatches = 0;

    for user_id in users {
        let mut expected: HashMap<String, f64> = HashMap::new();
        for tx in ledger.list_transactions(user_id, usize::MAX).await? {
            let delta = match tx.side {
                TradeSide::Buy => tx.quantity,
                TradeSide::Sell => -tx.quantity,
            };
            *expected.entry(tx.ticker).or_default() += delta;
        }

        let held: HashMap<String, f64> = ledger
            .list_holdings(user_id)
            .await?
            .into_iter()
            .map(|h| (h.ticker, h.quantity))
            .collect();

        for (ticker, replayed) in &expected {
            let stored = held.get(ticker).copied().unwrap_or(0.0);
            if (replayed - stored).abs() > RECONCILE_EPSILON {
                warn!("{user_id}/{ticker}: log says {replayed}, holding says {stored}");
                mismatches += 1;
            }
        }
        for ticker in held.keys().filter(|t| !expected.contains_key(*t)) {
            warn!("{user_id}/{ticker}: holding without any transaction");
            mismatches += 1;
        }
    }
    Ok(mismatches)
}

async fn run_benchmark(args: Args) -> Result<()> {
    if args.tickers == 0 || args.tickers > INSTRUMENTS.len() {
        bail!("--tickers must be between 1 and {}", INSTRUMENTS.len());
    }
    if args.test_users == 0 {
        bail!("--test-users must be at least 1");
    }
    if !(0.0..=1.0).contains(&args.buy_ratio) {
        bail!("--buy-ratio must be between 0 and 1");
    }

    info!(
        "Starting Celesta benchmark with {} clients for {}s",
        args.clients, args.duration
    );

    let celesta = Celesta::in_memory(
        Arc::new(FixedQuoteProvider::with_demo_prices()),
        EngineConfig::default(),
    );
    let users = Arc::new(setup_test_users(&celesta, args.test_users).await?);

    let metrics = Arc::new(BenchmarkMetrics::new()?);
    let should_stop = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::with_capacity(args.clients);
    for worker_id in 0..args.clients {
        handles.push(tokio::spawn(benchmark_worker(
            worker_id,
            celesta.clone(),
            Arc::clone(&users),
            args.tickers,
            args.buy_ratio,
            Arc::clone(&metrics),
            Arc::clone(&should_stop),
        )));
    }

    let status_handle = {
        let metrics = Arc::clone(&metrics);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5));
            loop {
                interval.tick().await;
                info!(
                    "Status: {} submitted, {} executed, {} rejected, {:.2} trades/s",
                    metrics.trades_submitted.load(Ordering::Relaxed),
                    metrics.trades_executed.load(Ordering::Relaxed),
                    metrics.trades_rejected.load(Ordering::Relaxed),
                    metrics.throughput()
                );
            }
        })
    };

    tokio::time::sleep(Duration::from_secs(args.duration)).await;

    should_stop.store(true, Ordering::Relaxed);
    status_handle.abort();
    for handle in handles {
        let _ = handle.await;
    }

    metrics.print_report();

    let mismatches = reconcile(&celesta, &users).await?;
    println!("\n=== RECONCILIATION ===");
    if mismatches == 0 {
        println!("✓ Every holding matches its transaction log");
        Ok(())
    } else {
        println!("✗ {mismatches} holdings disagree with their transaction log");
        bail!("reconciliation failed")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("benchmark=info".parse()?),
        )
        .init();

    let args = Args::parse();

    info!("Celesta Benchmark");
    info!("Configuration: {:?}", args);

    run_benchmark(args).await
}
