//! Transaction executor.
//!
//! Drives a single transaction through the venue: place the limit order,
//! poll it with escalating waits, and cancel it if it has not closed in
//! time. The persisted record is rewritten after every poll, so the store
//! always holds the venue's last known answer.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::exchange::ExchangeClient;
use crate::storage::TransactionStore;
use crate::types::{EngineError, OrderStatus, Transaction};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Polls before the order is considered timed out (and again while
    /// confirming a cancellation).
    pub poll_attempts: u32,
    /// Base wait unit; poll `i` waits `i × poll_interval` first.
    pub poll_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_attempts: 3,
            poll_interval: Duration::from_secs(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct TransactionExecutor {
    client: Arc<ExchangeClient>,
    store: Arc<dyn TransactionStore>,
    config: ExecutorConfig,
}

impl TransactionExecutor {
    pub fn new(
        client: Arc<ExchangeClient>,
        store: Arc<dyn TransactionStore>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    /// Run one transaction to its terminal state.
    ///
    /// Returns the final observed status (possibly still `Open` when a
    /// cancellation could not be confirmed) and the filled quantity.
    /// A recoverable placement failure leaves the record untouched and
    /// returns the unchanged state — the fill loop above owns re-attempting.
    pub async fn execute(
        &self,
        tx: &mut Transaction,
    ) -> Result<(OrderStatus, Decimal), EngineError> {
        let order = match self
            .client
            .place_order(&tx.pair, tx.side, tx.rate, tx.amount)
            .await
        {
            Ok(order) => order,
            Err(err @ EngineError::Operational(_)) => return Err(err),
            Err(err) => {
                warn!(
                    transaction = %tx.id,
                    pair = %tx.pair,
                    error = %err,
                    "Order placement failed"
                );
                return Ok((tx.status, tx.filled));
            }
        };

        tx.order_id = Some(order.id.clone());
        self.store.update(tx).await?;
        info!(
            transaction = %tx.id,
            order_id = %order.id,
            pair = %tx.pair,
            side = %tx.side,
            rate = %tx.rate,
            amount = %tx.amount,
            "Order placed"
        );

        for attempt in 1..=self.config.poll_attempts {
            sleep(self.config.poll_interval * attempt).await;
            self.poll(tx, &order.id).await?;

            if tx.status == OrderStatus::Closed {
                info!(transaction = %tx.id, filled = %tx.filled, "Order closed");
                return Ok((tx.status, tx.filled));
            }
            debug!(
                transaction = %tx.id,
                attempt,
                status = %tx.status,
                filled = %tx.filled,
                "Order still pending"
            );
        }

        info!(
            transaction = %tx.id,
            order_id = %order.id,
            filled = %tx.filled,
            "Order timed out, canceling"
        );
        self.client.cancel_order(&order.id, &tx.pair).await?;

        for attempt in 1..=self.config.poll_attempts {
            sleep(self.config.poll_interval * attempt).await;
            self.poll(tx, &order.id).await?;

            // Canceled confirms the cancel; Closed means it filled while
            // the cancel was in flight. Either way the order is done.
            if tx.status != OrderStatus::Open {
                info!(
                    transaction = %tx.id,
                    status = %tx.status,
                    filled = %tx.filled,
                    "Cancellation resolved"
                );
                return Ok((tx.status, tx.filled));
            }
        }

        // Soft failure: leave the record at its last observed state rather
        // than guessing what the venue did.
        error!(
            transaction = %tx.id,
            order_id = %order.id,
            "Cancellation not confirmed, order may still be live"
        );
        Ok((tx.status, tx.filled))
    }

    /// Fetch the order and persist what the venue reported.
    async fn poll(&self, tx: &mut Transaction, order_id: &str) -> Result<(), EngineError> {
        let order = self.client.get_order(order_id, &tx.pair).await?;
        tx.filled = order.filled;
        tx.status = order.status;
        tx.rate = order.price;
        self.store.update(tx).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
