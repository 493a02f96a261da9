use std::time::Duration;

use crate::{
    AssetClass, FixedQuoteProvider, HistoryPeriod, QuoteError, QuoteProvider, crypto_id,
    search_crypto,
};

#[test]
fn asset_class_parses_case_insensitively() {
    assert_eq!("Stock".parse::<AssetClass>(), Ok(AssetClass::Stock));
    assert_eq!(" crypto ".parse::<AssetClass>(), Ok(AssetClass::Crypto));
    assert!("bond".parse::<AssetClass>().is_err());
}

#[test]
fn unknown_history_period_falls_back_to_a_month() {
    assert_eq!("1y".parse::<HistoryPeriod>().unwrap().days(), 365);
    assert_eq!("1w".parse::<HistoryPeriod>().unwrap().days(), 7);
    assert_eq!("10y".parse::<HistoryPeriod>().unwrap(), HistoryPeriod::Month);
}

#[test]
fn crypto_table_lookup() {
    assert_eq!(crypto_id("btc"), Some("bitcoin"));
    assert_eq!(crypto_id("AVAX"), Some("avalanche-2"));
    assert_eq!(crypto_id("AAPL"), None);
}

#[test]
fn crypto_search_matches_symbol_and_id() {
    let by_symbol = search_crypto("eth");
    assert_eq!(by_symbol[0].symbol, "ETH");
    assert_eq!(by_symbol[0].name, "Ethereum");
    // "tether" contains "eth" too
    assert_eq!(by_symbol[1].symbol, "USDT");
    assert_eq!(by_symbol.len(), 2);

    let by_id = search_crypto("avalanche");
    assert_eq!(by_id[0].symbol, "AVAX");
    assert_eq!(by_id[0].name, "Avalanche 2");
}

#[tokio::test]
async fn fixed_provider_prices_and_failures() {
    let provider = FixedQuoteProvider::new().with_price("aapl", AssetClass::Stock, 150.0);

    let quote = provider.get_price("AAPL", AssetClass::Stock).await.unwrap();
    assert_eq!(quote.price, 150.0);
    assert_eq!(quote.ticker, "AAPL");

    provider.fail("AAPL");
    assert!(matches!(
        provider.get_price("AAPL", AssetClass::Stock).await,
        Err(QuoteError::Unavailable(_))
    ));

    provider.recover("AAPL");
    assert!(provider.get_price("AAPL", AssetClass::Stock).await.is_ok());
}

#[tokio::test]
async fn fixed_provider_rejects_unmapped_crypto() {
    let provider = FixedQuoteProvider::new().with_price("FOO", AssetClass::Crypto, 1.0);
    assert!(matches!(
        provider.get_price("FOO", AssetClass::Crypto).await,
        Err(QuoteError::NotSupported(_))
    ));
}

#[tokio::test]
async fn fixed_provider_unknown_ticker_is_unavailable() {
    let provider = FixedQuoteProvider::new();
    assert!(matches!(
        provider.get_price("ZZZZ", AssetClass::Stock).await,
        Err(QuoteError::Unavailable(_))
    ));
}

#[tokio::test]
async fn fixed_provider_history_is_flat_and_ordered() {
    let provider = FixedQuoteProvider::new().with_price("BTC", AssetClass::Crypto, 100.0);
    let history = provider
        .get_history("BTC", AssetClass::Crypto, HistoryPeriod::Week)
        .await
        .unwrap();

    assert_eq!(history.len(), 8);
    assert!(history.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    assert!(history.iter().all(|p| p.close == 100.0));
}

#[tokio::test(start_paused = true)]
async fn fixed_provider_delay_is_applied() {
    let provider = FixedQuoteProvider::new()
        .with_price("MSFT", AssetClass::Stock, 10.0)
        .with_delay(Duration::from_secs(5));

    let started = tokio::time::Instant::now();
    provider.get_price("MSFT", AssetClass::Stock).await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(5));
}
