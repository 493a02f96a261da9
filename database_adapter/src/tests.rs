use chrono::{Duration, Utc};

use crate::db::{DbError, LedgerStore, PostgresLedger};
use crate::model::{AssetClass, NewTransaction, NewUser, TradeSide};

/// Each test runs in a fresh schema. Skipped when no database is configured.
async fn test_ledger() -> anyhow::Result<Option<PostgresLedger>> {
    dotenvy::dotenv().ok();
    let Ok(db_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping Postgres ledger test");
        return Ok(None);
    };
    let schema = format!(
        "ledger_test_{}",
        uuid::Uuid::new_v4().to_string().replace('-', "")
    );
    Ok(Some(PostgresLedger::connect_with_schema(&db_url, &schema).await?))
}

fn new_user(name: &str) -> NewUser {
    NewUser {
        username: name.to_string(),
        email: format!("{name}@example.com"),
        password_hash: "hash".to_string(),
    }
}

#[tokio::test]
async fn test_postgres_ledger_users() -> anyhow::Result<()> {
    let Some(ledger) = test_ledger().await? else {
        return Ok(());
    };

    let id = ledger.create_user(new_user("alice")).await?;
    let fetched = ledger.get_user(&id).await?.expect("user exists");
    assert_eq!(fetched.username, "alice");
    assert_eq!(
        ledger.find_user("alice@example.com").await?.map(|u| u.id),
        Some(id)
    );

    // Same email, different username
    let duplicate = NewUser {
        username: "alice2".to_string(),
        ..new_user("alice")
    };
    assert!(matches!(
        ledger.create_user(duplicate).await,
        Err(DbError::Conflict(_))
    ));
    assert_eq!(ledger.list_user_ids().await?, vec![id]);

    ledger.drop_schema().await?;
    Ok(())
}

#[tokio::test]
async fn test_postgres_ledger_trades() -> anyhow::Result<()> {
    let Some(ledger) = test_ledger().await? else {
        return Ok(());
    };
    let user = ledger.create_user(new_user("bob")).await?;
    let trade = |side, quantity, price| NewTransaction {
        user_id: user,
        ticker: "AAPL".to_string(),
        asset_class: AssetClass::Stock,
        side,
        quantity,
        price,
    };

    ledger.apply_trade(trade(TradeSide::Buy, 10.0, 100.0)).await?;
    let applied = ledger.apply_trade(trade(TradeSide::Buy, 5.0, 130.0)).await?;
    let holding = applied.holding.expect("holding after buy");
    assert_eq!(holding.quantity, 15.0);
    assert!((holding.average_buy_price - 110.0).abs() < 1e-9);

    // Oversell leaves everything untouched
    assert!(matches!(
        ledger.apply_trade(trade(TradeSide::Sell, 20.0, 150.0)).await,
        Err(DbError::InsufficientQuantity { .. })
    ));
    assert_eq!(ledger.list_transactions(&user, 50).await?.len(), 2);

    let applied = ledger.apply_trade(trade(TradeSide::Sell, 15.0, 150.0)).await?;
    assert!(applied.holding.is_none());
    assert!(ledger.get_holding(&user, "AAPL").await?.is_none());

    let log = ledger.list_transactions(&user, 50).await?;
    assert_eq!(log.len(), 3);
    assert_eq!(log[0].side, TradeSide::Sell);
    assert_eq!(ledger.list_transactions(&user, 1).await?.len(), 1);

    ledger.drop_schema().await?;
    Ok(())
}

#[tokio::test]
async fn test_postgres_ledger_snapshots() -> anyhow::Result<()> {
    let Some(ledger) = test_ledger().await? else {
        return Ok(());
    };
    let user = ledger.create_user(new_user("carol")).await?;

    ledger.record_snapshot(&user, 100.0).await?;
    ledger.record_snapshot(&user, 120.0).await?;
    let snapshots = ledger
        .list_snapshots(&user, Utc::now() - Duration::hours(1))
        .await?;
    assert_eq!(
        snapshots.iter().map(|s| s.total_value).collect::<Vec<_>>(),
        vec![100.0, 120.0]
    );

    let removed = ledger
        .prune_snapshots(Utc::now() + Duration::seconds(1))
        .await?;
    assert_eq!(removed, 2);

    ledger.drop_schema().await?;
    Ok(())
}
