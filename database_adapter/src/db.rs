use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    Executor, Pool, Postgres, Row,
    postgres::{PgPoolOptions, PgRow},
};
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::{
    AppliedTrade, AssetClass, Holding, HoldingUpdate, NewTransaction, NewUser, Snapshot,
    TradeSide, Transaction, UserId, UserRecord, plan_holding_update,
};

#[derive(Debug)]
pub enum DbError {
    /// A uniqueness constraint was violated
    Conflict(String),
    NotFound(String),
    InsufficientQuantity {
        held: f64,
        requested: f64,
    },
    InvalidInput(String),
    /// A stored row could not be mapped back to the model
    Corrupt(String),
    SqlxError(sqlx::Error),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::Conflict(e) => write!(f, "Conflict: {e}"),
            DbError::NotFound(e) => write!(f, "Not found: {e}"),
            DbError::InsufficientQuantity { held, requested } => write!(
                f,
                "Insufficient quantity: requested {requested}, held {held}"
            ),
            DbError::InvalidInput(e) => write!(f, "Invalid input: {e}"),
            DbError::Corrupt(e) => write!(f, "Corrupt record: {e}"),
            DbError::SqlxError(e) => write!(f, "Database error: {e}"),
        }
    }
}

impl std::error::Error for DbError {}

impl From<sqlx::Error> for DbError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DbError::Conflict(db.message().to_string())
            }
            _ => DbError::SqlxError(error),
        }
    }
}

/// Durable record of users, holdings, transactions and snapshots.
///
/// Implementations must enforce username/email uniqueness, one holding per
/// (user, ticker), and must never persist a holding with a zero quantity.
#[async_trait]
pub trait LedgerStore: Send + Sync + fmt::Debug {
    /// Insert a user row
    /// # Errors
    /// - `Conflict` if the username or email is taken; no row is written in that case
    async fn create_user(&self, user: NewUser) -> Result<UserId, DbError>;
    /// # Errors
    /// - Returns `DbError` if the operation fails
    async fn get_user(&self, user_id: &UserId) -> Result<Option<UserRecord>, DbError>;
    /// Look a user up by username or email
    /// # Errors
    /// - Returns `DbError` if the operation fails
    async fn find_user(&self, login: &str) -> Result<Option<UserRecord>, DbError>;
    /// # Errors
    /// - `NotFound` if the user does not exist
    async fn update_password_hash(
        &self,
        user_id: &UserId,
        password_hash: String,
    ) -> Result<(), DbError>;
    /// # Errors
    /// - Returns `DbError` if the operation fails
    async fn list_user_ids(&self) -> Result<Vec<UserId>, DbError>;

    /// # Errors
    /// - Returns `DbError` if the operation fails
    async fn get_holding(&self, user_id: &UserId, ticker: &str)
    -> Result<Option<Holding>, DbError>;
    /// Holdings of a user, ordered by ticker
    /// # Errors
    /// - Returns `DbError` if the operation fails
    async fn list_holdings(&self, user_id: &UserId) -> Result<Vec<Holding>, DbError>;
    /// Apply a signed quantity change to a holding, see [`plan_holding_update`].
    /// Returns the holding after the change, `None` if it was removed.
    /// # Errors
    /// - `NotFound`, `InsufficientQuantity` or `InvalidInput` as planned
    async fn upsert_holding(
        &self,
        user_id: &UserId,
        ticker: &str,
        asset_class: AssetClass,
        delta_quantity: f64,
        trade_price: f64,
    ) -> Result<Option<Holding>, DbError>;
    /// Returns whether a row was deleted
    /// # Errors
    /// - Returns `DbError` if the operation fails
    async fn delete_holding(&self, user_id: &UserId, ticker: &str) -> Result<bool, DbError>;

    /// # Errors
    /// - `InvalidInput` if quantity or price is not positive
    async fn record_transaction(&self, transaction: NewTransaction)
    -> Result<Transaction, DbError>;
    /// Most recent transactions first
    /// # Errors
    /// - Returns `DbError` if the operation fails
    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<Transaction>, DbError>;

    /// Update the holding and append the transaction for one trade.
    ///
    /// The default runs the two steps back to back; stores with real
    /// transactions override it to make the pair atomic.
    /// # Errors
    /// - Any error of [`LedgerStore::upsert_holding`] or [`LedgerStore::record_transaction`]
    async fn apply_trade(&self, trade: NewTransaction) -> Result<AppliedTrade, DbError> {
        trade.validate()?;
        let holding = self
            .upsert_holding(
                &trade.user_id,
                &trade.ticker,
                trade.asset_class,
                trade.delta_quantity(),
                trade.price,
            )
            .await?;
        let transaction = self.record_transaction(trade).await?;
        Ok(AppliedTrade {
            holding,
            transaction,
        })
    }

    /// # Errors
    /// - Returns `DbError` if the operation fails
    async fn record_snapshot(&self, user_id: &UserId, total_value: f64)
    -> Result<Snapshot, DbError>;
    /// Snapshots taken after `since`, oldest first
    /// # Errors
    /// - Returns `DbError` if the operation fails
    async fn list_snapshots(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Snapshot>, DbError>;
    /// Delete snapshots taken before `older_than`, returns how many were removed
    /// # Errors
    /// - Returns `DbError` if the operation fails
    async fn prune_snapshots(&self, older_than: DateTime<Utc>) -> Result<u64, DbError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id            UUID PRIMARY KEY,
    username      TEXT UNIQUE NOT NULL,
    email         TEXT UNIQUE NOT NULL,
    password_hash TEXT NOT NULL,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE TABLE IF NOT EXISTS portfolio (
    user_id       UUID NOT NULL REFERENCES users (id),
    ticker        TEXT NOT NULL,
    asset_type    TEXT NOT NULL,
    quantity      DOUBLE PRECISION NOT NULL CHECK (quantity > 0),
    avg_buy_price DOUBLE PRECISION NOT NULL CHECK (avg_buy_price > 0),
    updated_at    TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (user_id, ticker)
);
CREATE TABLE IF NOT EXISTS transactions (
    id               UUID PRIMARY KEY,
    user_id          UUID NOT NULL REFERENCES users (id),
    ticker           TEXT NOT NULL,
    asset_type       TEXT NOT NULL,
    transaction_type TEXT NOT NULL CHECK (transaction_type IN ('buy', 'sell')),
    quantity         DOUBLE PRECISION NOT NULL CHECK (quantity > 0),
    price            DOUBLE PRECISION NOT NULL CHECK (price > 0),
    timestamp        TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS transactions_user_time ON transactions (user_id, timestamp DESC);
CREATE TABLE IF NOT EXISTS portfolio_snapshots (
    id          UUID PRIMARY KEY,
    user_id     UUID NOT NULL REFERENCES users (id),
    total_value DOUBLE PRECISION NOT NULL,
    timestamp   TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS snapshots_user_time ON portfolio_snapshots (user_id, timestamp);
";

/// Attempts at inserting a first holding row before giving up on a racing writer
const INSERT_RETRIES: usize = 3;

/// Postgres-backed ledger
#[derive(Clone)]
pub struct PostgresLedger {
    pool: Pool<Postgres>,
    schema: Option<String>,
}

impl fmt::Debug for PostgresLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresLedger")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl PostgresLedger {
    /// Connect using `DATABASE_URL` from the environment or a `.env` file
    /// # Errors
    /// - `InvalidInput` if `DATABASE_URL` is not set
    /// - Returns `DbError` if the connection or schema setup fails
    pub async fn from_env() -> Result<Self, DbError> {
        dotenvy::dotenv().ok();
        let db_url = std::env::var("DATABASE_URL")
            .map_err(|_| DbError::InvalidInput("DATABASE_URL must be set".to_string()))?;
        Self::connect(&db_url).await
    }

    /// # Errors
    /// - Returns `DbError` if the connection or schema setup fails
    pub async fn connect(db_url: &str) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new().connect(db_url).await?;
        let ledger = Self { pool, schema: None };
        ledger.migrate().await?;
        Ok(ledger)
    }

    /// Connect with every table living in a dedicated Postgres schema.
    /// Used to isolate test runs from each other.
    /// # Errors
    /// - `InvalidInput` if the schema name is not a plain identifier
    /// - Returns `DbError` if the connection or schema setup fails
    pub async fn connect_with_schema(db_url: &str, schema: &str) -> Result<Self, DbError> {
        if schema.is_empty()
            || !schema
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(DbError::InvalidInput(format!(
                "invalid schema name '{schema}'"
            )));
        }

        let search_path = schema.to_string();
        let pool = PgPoolOptions::new()
            .after_connect(move |conn, _meta| {
                let sql = format!(
                    "CREATE SCHEMA IF NOT EXISTS {search_path}; SET search_path TO {search_path}"
                );
                Box::pin(async move {
                    conn.execute(sql.as_str()).await?;
                    Ok(())
                })
            })
            .connect(db_url)
            .await?;

        let ledger = Self {
            pool,
            schema: Some(schema.to_string()),
        };
        ledger.migrate().await?;
        Ok(ledger)
    }

    async fn migrate(&self) -> Result<(), DbError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        info!(
            "Ledger schema ready{}",
            self.schema
                .as_ref()
                .map(|s| format!(" in schema {s}"))
                .unwrap_or_default()
        );
        Ok(())
    }

    /// Drop the dedicated schema, if any, with everything in it
    /// # Errors
    /// - Returns `DbError` if the operation fails
    pub async fn drop_schema(&self) -> Result<(), DbError> {
        if let Some(schema) = &self.schema {
            sqlx::raw_sql(&format!("DROP SCHEMA IF EXISTS {schema} CASCADE"))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Locks the holding row and applies the planned change within `tx`
    async fn upsert_holding_in(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        user_id: &UserId,
        ticker: &str,
        asset_class: AssetClass,
        delta_quantity: f64,
        trade_price: f64,
    ) -> Result<Option<Holding>, DbError> {
        for attempt in 1..=INSERT_RETRIES {
            let existing = sqlx::query(
                "SELECT user_id, ticker, asset_type, quantity, avg_buy_price, updated_at
                 FROM portfolio WHERE user_id = $1 AND ticker = $2 FOR UPDATE",
            )
            .bind(user_id)
            .bind(ticker)
            .fetch_optional(&mut **tx)
            .await?
            .map(|row| holding_from_row(&row))
            .transpose()?;

            let update = plan_holding_update(
                existing.as_ref(),
                *user_id,
                ticker,
                asset_class,
                delta_quantity,
                trade_price,
                Utc::now(),
            )?;

            match (existing, update) {
                (Some(_), HoldingUpdate::Remove) => {
                    sqlx::query("DELETE FROM portfolio WHERE user_id = $1 AND ticker = $2")
                        .bind(user_id)
                        .bind(ticker)
                        .execute(&mut **tx)
                        .await?;
                    return Ok(None);
                }
                (Some(_), HoldingUpdate::Upsert(holding)) => {
                    sqlx::query(
                        "UPDATE portfolio SET quantity = $3, avg_buy_price = $4, updated_at = $5
                         WHERE user_id = $1 AND ticker = $2",
                    )
                    .bind(user_id)
                    .bind(ticker)
                    .bind(holding.quantity)
                    .bind(holding.average_buy_price)
                    .bind(holding.updated_at)
                    .execute(&mut **tx)
                    .await?;
                    return Ok(Some(holding));
                }
                (None, HoldingUpdate::Upsert(holding)) => {
                    let inserted = sqlx::query(
                        "INSERT INTO portfolio
                            (user_id, ticker, asset_type, quantity, avg_buy_price, updated_at)
                         VALUES ($1, $2, $3, $4, $5, $6)
                         ON CONFLICT (user_id, ticker) DO NOTHING",
                    )
                    .bind(user_id)
                    .bind(ticker)
                    .bind(holding.asset_class.as_str())
                    .bind(holding.quantity)
                    .bind(holding.average_buy_price)
                    .bind(holding.updated_at)
                    .execute(&mut **tx)
                    .await?
                    .rows_affected();
                    if inserted == 1 {
                        return Ok(Some(holding));
                    }
                    // Another writer created the row between our read and insert
                    warn!("Holding {ticker} for {user_id} appeared concurrently (attempt {attempt})");
                }
                (None, HoldingUpdate::Remove) => {
                    return Err(DbError::NotFound(format!(
                        "no {ticker} holding for user {user_id}"
                    )));
                }
            }
        }
        Err(DbError::Conflict(format!(
            "holding {ticker} for user {user_id} kept changing concurrently"
        )))
    }

    async fn insert_transaction_in(
        executor: impl sqlx::PgExecutor<'_>,
        transaction: NewTransaction,
    ) -> Result<Transaction, DbError> {
        transaction.validate()?;
        let record = transaction.into_transaction(Uuid::new_v4(), Utc::now());
        sqlx::query(
            "INSERT INTO transactions
                (id, user_id, ticker, asset_type, transaction_type, quantity, price, timestamp)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.ticker)
        .bind(record.asset_class.as_str())
        .bind(record.side.as_str())
        .bind(record.quantity)
        .bind(record.price)
        .bind(record.timestamp)
        .execute(executor)
        .await?;
        Ok(record)
    }
}

fn parse_asset_class(raw: &str) -> Result<AssetClass, DbError> {
    raw.parse()
        .map_err(|e: quote_adapter::UnknownAssetClass| DbError::Corrupt(e.to_string()))
}

fn user_from_row(row: &PgRow) -> Result<UserRecord, DbError> {
    Ok(UserRecord {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        created_at: row.try_get("created_at")?,
    })
}

fn holding_from_row(row: &PgRow) -> Result<Holding, DbError> {
    Ok(Holding {
        user_id: row.try_get("user_id")?,
        ticker: row.try_get("ticker")?,
        asset_class: parse_asset_class(row.try_get("asset_type")?)?,
        quantity: row.try_get("quantity")?,
        average_buy_price: row.try_get("avg_buy_price")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction, DbError> {
    Ok(Transaction {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        ticker: row.try_get("ticker")?,
        asset_class: parse_asset_class(row.try_get("asset_type")?)?,
        side: row.try_get::<&str, _>("transaction_type")?.parse::<TradeSide>()?,
        quantity: row.try_get("quantity")?,
        price: row.try_get("price")?,
        timestamp: row.try_get("timestamp")?,
    })
}

fn snapshot_from_row(row: &PgRow) -> Result<Snapshot, DbError> {
    Ok(Snapshot {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        total_value: row.try_get("total_value")?,
        timestamp: row.try_get("timestamp")?,
    })
}

#[async_trait]
impl LedgerStore for PostgresLedger {
    async fn create_user(&self, user: NewUser) -> Result<UserId, DbError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO users (id, username, email, password_hash, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        debug!("Created user {} ({id})", user.username);
        Ok(id)
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<UserRecord>, DbError> {
        sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| user_from_row(&row))
            .transpose()
    }

    async fn find_user(&self, login: &str) -> Result<Option<UserRecord>, DbError> {
        sqlx::query("SELECT * FROM users WHERE username = $1 OR email = $1 LIMIT 1")
            .bind(login)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| user_from_row(&row))
            .transpose()
    }

    async fn update_password_hash(
        &self,
        user_id: &UserId,
        password_hash: String,
    ) -> Result<(), DbError> {
        let updated = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(user_id)
            .bind(password_hash)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(DbError::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }

    async fn list_user_ids(&self) -> Result<Vec<UserId>, DbError> {
        let ids: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM users ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn get_holding(
        &self,
        user_id: &UserId,
        ticker: &str,
    ) -> Result<Option<Holding>, DbError> {
        sqlx::query("SELECT * FROM portfolio WHERE user_id = $1 AND ticker = $2")
            .bind(user_id)
            .bind(ticker)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| holding_from_row(&row))
            .transpose()
    }

    async fn list_holdings(&self, user_id: &UserId) -> Result<Vec<Holding>, DbError> {
        sqlx::query("SELECT * FROM portfolio WHERE user_id = $1 ORDER BY ticker")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(holding_from_row)
            .collect()
    }

    async fn upsert_holding(
        &self,
        user_id: &UserId,
        ticker: &str,
        asset_class: AssetClass,
        delta_quantity: f64,
        trade_price: f64,
    ) -> Result<Option<Holding>, DbError> {
        let mut tx = self.pool.begin().await?;
        let holding = Self::upsert_holding_in(
            &mut tx,
            user_id,
            ticker,
            asset_class,
            delta_quantity,
            trade_price,
        )
        .await?;
        tx.commit().await?;
        Ok(holding)
    }

    async fn delete_holding(&self, user_id: &UserId, ticker: &str) -> Result<bool, DbError> {
        let deleted = sqlx::query("DELETE FROM portfolio WHERE user_id = $1 AND ticker = $2")
            .bind(user_id)
            .bind(ticker)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    async fn record_transaction(
        &self,
        transaction: NewTransaction,
    ) -> Result<Transaction, DbError> {
        Self::insert_transaction_in(&self.pool, transaction).await
    }

    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<Transaction>, DbError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        sqlx::query(
            "SELECT * FROM transactions WHERE user_id = $1
             ORDER BY timestamp DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(transaction_from_row)
        .collect()
    }

    async fn apply_trade(&self, trade: NewTransaction) -> Result<AppliedTrade, DbError> {
        trade.validate()?;
        let mut tx = self.pool.begin().await?;
        let holding = Self::upsert_holding_in(
            &mut tx,
            &trade.user_id,
            &trade.ticker,
            trade.asset_class,
            trade.delta_quantity(),
            trade.price,
        )
        .await?;
        let transaction = Self::insert_transaction_in(&mut *tx, trade).await?;
        tx.commit().await?;
        Ok(AppliedTrade {
            holding,
            transaction,
        })
    }

    async fn record_snapshot(
        &self,
        user_id: &UserId,
        total_value: f64,
    ) -> Result<Snapshot, DbError> {
        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            user_id: *user_id,
            total_value,
            timestamp: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO portfolio_snapshots (id, user_id, total_value, timestamp)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(snapshot.id)
        .bind(snapshot.user_id)
        .bind(snapshot.total_value)
        .bind(snapshot.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(snapshot)
    }

    async fn list_snapshots(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Snapshot>, DbError> {
        sqlx::query(
            "SELECT * FROM portfolio_snapshots WHERE user_id = $1 AND timestamp > $2
             ORDER BY timestamp ASC",
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(snapshot_from_row)
        .collect()
    }

    async fn prune_snapshots(&self, older_than: DateTime<Utc>) -> Result<u64, DbError> {
        let removed = sqlx::query("DELETE FROM portfolio_snapshots WHERE timestamp < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed)
    }
}
