use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use database_adapter::{
    DbError, LedgerStore,
    model::{
        AppliedTrade, AssetClass, Holding, HoldingUpdate, NewTransaction, NewUser, Snapshot,
        Transaction, UserId, UserRecord, plan_holding_update,
    },
};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, UserRecord>,
    holdings: HashMap<(UserId, String), Holding>,
    transactions: Vec<Transaction>,
    snapshots: Vec<Snapshot>,
}

impl Tables {
    fn upsert_holding(
        &mut self,
        user_id: &UserId,
        ticker: &str,
        asset_class: AssetClass,
        delta_quantity: f64,
        trade_price: f64,
    ) -> Result<Option<Holding>, DbError> {
        let key = (*user_id, ticker.to_string());
        let update = plan_holding_update(
            self.holdings.get(&key),
            *user_id,
            ticker,
            asset_class,
            delta_quantity,
            trade_price,
            Utc::now(),
        )?;
        match update {
            HoldingUpdate::Upsert(holding) => {
                self.holdings.insert(key, holding.clone());
                Ok(Some(holding))
            }
            HoldingUpdate::Remove => {
                self.holdings.remove(&key);
                Ok(None)
            }
        }
    }

    fn record_transaction(&mut self, transaction: NewTransaction) -> Result<Transaction, DbError> {
        transaction.validate()?;
        if !self.users.contains_key(&transaction.user_id) {
            return Err(DbError::NotFound(format!("user {}", transaction.user_id)));
        }
        // Keep the log ordered even if the clock steps backwards
        let now = Utc::now();
        let timestamp = self
            .transactions
            .last()
            .map_or(now, |last| last.timestamp.max(now));
        let record = transaction.into_transaction(Uuid::new_v4(), timestamp);
        self.transactions.push(record.clone());
        Ok(record)
    }
}

/// Ledger kept in process memory. Every operation takes the table lock,
/// so each call is atomic with respect to the others.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    tables: RwLock<Tables>,
}

impl InMemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn create_user(&self, user: NewUser) -> Result<UserId, DbError> {
        let mut tables = self.tables.write().await;
        if tables
            .users
            .values()
            .any(|u| u.username == user.username || u.email == user.email)
        {
            return Err(DbError::Conflict(format!(
                "username '{}' or email '{}' already exists",
                user.username, user.email
            )));
        }

        let id = Uuid::new_v4();
        tables.users.insert(
            id,
            UserRecord {
                id,
                username: user.username,
                email: user.email,
                password_hash: user.password_hash,
                created_at: Utc::now(),
            },
        );
        debug!("Created in-memory user {id}");
        Ok(id)
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<UserRecord>, DbError> {
        Ok(self.tables.read().await.users.get(user_id).cloned())
    }

    async fn find_user(&self, login: &str) -> Result<Option<UserRecord>, DbError> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .find(|u| u.username == login || u.email == login)
            .cloned())
    }

    async fn update_password_hash(
        &self,
        user_id: &UserId,
        password_hash: String,
    ) -> Result<(), DbError> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .get_mut(user_id)
            .ok_or_else(|| DbError::NotFound(format!("user {user_id}")))?;
        user.password_hash = password_hash;
        Ok(())
    }

    async fn list_user_ids(&self) -> Result<Vec<UserId>, DbError> {
        let tables = self.tables.read().await;
        let mut users: Vec<&UserRecord> = tables.users.values().collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users.into_iter().map(|u| u.id).collect())
    }

    async fn get_holding(
        &self,
        user_id: &UserId,
        ticker: &str,
    ) -> Result<Option<Holding>, DbError> {
        Ok(self
            .tables
            .read()
            .await
            .holdings
            .get(&(*user_id, ticker.to_string()))
            .cloned())
    }

    async fn list_holdings(&self, user_id: &UserId) -> Result<Vec<Holding>, DbError> {
        let tables = self.tables.read().await;
        let mut holdings: Vec<Holding> = tables
            .holdings
            .values()
            .filter(|h| h.user_id == *user_id)
            .cloned()
            .collect();
        holdings.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        Ok(holdings)
    }

    async fn upsert_holding(
        &self,
        user_id: &UserId,
        ticker: &str,
        asset_class: AssetClass,
        delta_quantity: f64,
        trade_price: f64,
    ) -> Result<Option<Holding>, DbError> {
        self.tables.write().await.upsert_holding(
            user_id,
            ticker,
            asset_class,
            delta_quantity,
            trade_price,
        )
    }

    async fn delete_holding(&self, user_id: &UserId, ticker: &str) -> Result<bool, DbError> {
        Ok(self
            .tables
            .write()
            .await
            .holdings
            .remove(&(*user_id, ticker.to_string()))
            .is_some())
    }

    async fn record_transaction(
        &self,
        transaction: NewTransaction,
    ) -> Result<Transaction, DbError> {
        self.tables.write().await.record_transaction(transaction)
    }

    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<Transaction>, DbError> {
        Ok(self
            .tables
            .read()
            .await
            .transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == *user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn apply_trade(&self, trade: NewTransaction) -> Result<AppliedTrade, DbError> {
        trade.validate()?;
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&trade.user_id) {
            return Err(DbError::NotFound(format!("user {}", trade.user_id)));
        }
        let holding = tables.upsert_holding(
            &trade.user_id,
            &trade.ticker,
            trade.asset_class,
            trade.delta_quantity(),
            trade.price,
        )?;
        let transaction = tables.record_transaction(trade)?;
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
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(user_id) {
            return Err(DbError::NotFound(format!("user {user_id}")));
        }
        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            user_id: *user_id,
            total_value,
            timestamp: Utc::now(),
        };
        tables.snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn list_snapshots(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Snapshot>, DbError> {
        let tables = self.tables.read().await;
        let mut snapshots: Vec<Snapshot> = tables
            .snapshots
            .iter()
            .filter(|s| s.user_id == *user_id && s.timestamp > since)
            .cloned()
            .collect();
        snapshots.sort_by_key(|s| s.timestamp);
        Ok(snapshots)
    }

    async fn prune_snapshots(&self, older_than: DateTime<Utc>) -> Result<u64, DbError> {
        let mut tables = self.tables.write().await;
        let before = tables.snapshots.len();
        tables.snapshots.retain(|s| s.timestamp >= older_than);
        Ok((before - tables.snapshots.len()) as u64)
    }
}
