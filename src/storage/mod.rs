//! Transaction persistence.
//!
//! Every transaction is written when it is created and rewritten after every
//! poll of its order, so the database always reflects the venue's last known
//! answer even if the process dies mid-action.
//!
//! SQLite has no decimal column type; amounts and rates are stored as TEXT
//! and parsed back with `rust_decimal`, which keeps them exact.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::{EngineError, OrderStatus, Side, Transaction};

/// Store for the engine's transaction history.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Persist a newly created transaction.
    async fn insert(&self, tx: &Transaction) -> Result<(), EngineError>;

    /// Rewrite an existing transaction after its state changed.
    async fn update(&self, tx: &Transaction) -> Result<(), EngineError>;

    /// Transactions recorded for one action and pair, oldest first.
    async fn for_action(
        &self,
        action_id: i64,
        pair: &str,
    ) -> Result<Vec<Transaction>, EngineError>;
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database and ensure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, EngineError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| {
                EngineError::Operational(format!("Failed to open database {database_url}: {e}"))
            })?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                action_id INTEGER NOT NULL,
                side TEXT NOT NULL,
                exchange TEXT NOT NULL,
                pair TEXT NOT NULL,
                rate TEXT NOT NULL,
                amount TEXT NOT NULL,
                order_id TEXT,
                filled TEXT NOT NULL,
                status TEXT NOT NULL,
                created TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(Self::storage_error)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_transactions_action
             ON transactions (action_id, pair)",
        )
        .execute(&pool)
        .await
        .map_err(Self::storage_error)?;

        info!(database_url, "Transaction store ready");
        Ok(Self { pool })
    }

    fn storage_error(err: sqlx::Error) -> EngineError {
        EngineError::Operational(format!("Database error: {err}"))
    }

    fn column_error(column: &str, err: impl std::fmt::Display) -> EngineError {
        EngineError::Operational(format!("Corrupt {column} column: {err}"))
    }

    fn row_to_transaction(row: &sqlx::sqlite::SqliteRow) -> Result<Transaction, EngineError> {
        let id: String = row.try_get("id").map_err(Self::storage_error)?;
        let side: String = row.try_get("side").map_err(Self::storage_error)?;
        let rate: String = row.try_get("rate").map_err(Self::storage_error)?;
        let amount: String = row.try_get("amount").map_err(Self::storage_error)?;
        let filled: String = row.try_get("filled").map_err(Self::storage_error)?;
        let status: String = row.try_get("status").map_err(Self::storage_error)?;
        let created: String = row.try_get("created").map_err(Self::storage_error)?;

        Ok(Transaction {
            id: Uuid::parse_str(&id).map_err(|e| Self::column_error("id", e))?,
            action_id: row.try_get("action_id").map_err(Self::storage_error)?,
            side: Side::from_str(&side).map_err(|e| Self::column_error("side", e))?,
            exchange: row.try_get("exchange").map_err(Self::storage_error)?,
            pair: row.try_get("pair").map_err(Self::storage_error)?,
            rate: Decimal::from_str(&rate).map_err(|e| Self::column_error("rate", e))?,
            amount: Decimal::from_str(&amount).map_err(|e| Self::column_error("amount", e))?,
            order_id: row.try_get("order_id").map_err(Self::storage_error)?,
            filled: Decimal::from_str(&filled).map_err(|e| Self::column_error("filled", e))?,
            status: OrderStatus::from_str(&status)
                .map_err(|e| Self::column_error("status", e))?,
            created: DateTime::parse_from_rfc3339(&created)
                .map_err(|e| Self::column_error("created", e))?
                .with_timezone(&Utc),
        })
    }
}

#[async_trait]
impl TransactionStore for SqliteStore {
    async fn insert(&self, tx: &Transaction) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO transactions
             (id, action_id, side, exchange, pair, rate, amount, order_id, filled, status, created)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(tx.id.to_string())
        .bind(tx.action_id)
        .bind(tx.side.to_string())
        .bind(&tx.exchange)
        .bind(&tx.pair)
        .bind(tx.rate.to_string())
        .bind(tx.amount.to_string())
        .bind(tx.order_id.as_deref())
        .bind(tx.filled.to_string())
        .bind(tx.status.to_string())
        .bind(tx.created.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(Self::storage_error)?;

        debug!(id = %tx.id, action_id = tx.action_id, "Transaction inserted");
        Ok(())
    }

    async fn update(&self, tx: &Transaction) -> Result<(), EngineError> {
        let result = sqlx::query(
            "UPDATE transactions
             SET order_id = ?, rate = ?, filled = ?, status = ?
             WHERE id = ?",
        )
        .bind(tx.order_id.as_deref())
        .bind(tx.rate.to_string())
        .bind(tx.filled.to_string())
        .bind(tx.status.to_string())
        .bind(tx.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(Self::storage_error)?;

        if result.rows_affected() == 0 {
            return Err(EngineError::Operational(format!(
                "Transaction {} not found for update",
                tx.id
            )));
        }

        debug!(id = %tx.id, filled = %tx.filled, status = %tx.status, "Transaction updated");
        Ok(())
    }

    async fn for_action(
        &self,
        action_id: i64,
        pair: &str,
    ) -> Result<Vec<Transaction>, EngineError> {
        let rows = sqlx::query(
            "SELECT id, action_id, side, exchange, pair, rate, amount, order_id,
                    filled, status, created
             FROM transactions
             WHERE action_id = ? AND pair = ?
             ORDER BY created ASC",
        )
        .bind(action_id)
        .bind(pair)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::storage_error)?;

        rows.iter().map(Self::row_to_transaction).collect()
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Mutex-backed store with no durability. Useful for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    transactions: std::sync::Mutex<Vec<Transaction>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn all(&self) -> Vec<Transaction> {
        self.transactions.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn insert(&self, tx: &Transaction) -> Result<(), EngineError> {
        self.transactions.lock().unwrap().push(tx.clone());
        Ok(())
    }

    async fn update(&self, tx: &Transaction) -> Result<(), EngineError> {
        let mut transactions = self.transactions.lock().unwrap();
        match transactions.iter_mut().find(|t| t.id == tx.id) {
            Some(existing) => {
                *existing = tx.clone();
                Ok(())
            }
            None => Err(EngineError::Operational(format!(
                "Transaction {} not found for update",
                tx.id
            ))),
        }
    }

    async fn for_action(
        &self,
        action_id: i64,
        pair: &str,
    ) -> Result<Vec<Transaction>, EngineError> {
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.action_id == action_id && t.pair == pair)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
