//! Action orchestrator.
//!
//! Turns one remote trade action into a series of limit orders: the fill
//! loop re-quotes and re-places until the requested amount is done or the
//! attempts run out, and deposit-asset actions get a conversion leg on the
//! quote currency so the account ends up holding (or starting from) the
//! asset the action named.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::exchange::ExchangeClient;
use crate::remote::ConfirmationSink;
use crate::storage::TransactionStore;
use crate::types::{
    ActionSummary, EngineError, OrderStatus, Side, TradeAction, Transaction,
};

use super::{ExecutorConfig, TransactionExecutor};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Orders placed for one (pair, amount) before giving up on the rest.
    pub fill_attempts: u32,
    /// Price orders off order-book depth instead of top-of-book.
    pub use_order_book: bool,
    pub executor: ExecutorConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            fill_attempts: 3,
            use_order_book: true,
            executor: ExecutorConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct ActionOrchestrator {
    client: Arc<ExchangeClient>,
    store: Arc<dyn TransactionStore>,
    sink: Arc<dyn ConfirmationSink>,
    executor: TransactionExecutor,
    config: OrchestratorConfig,
}

impl ActionOrchestrator {
    pub fn new(
        client: Arc<ExchangeClient>,
        store: Arc<dyn TransactionStore>,
        sink: Arc<dyn ConfirmationSink>,
        config: OrchestratorConfig,
    ) -> Self {
        let executor =
            TransactionExecutor::new(client.clone(), store.clone(), config.executor.clone());
        Self {
            client,
            store,
            sink,
            executor,
            config,
        }
    }

    /// Execute one action end to end and summarise what actually happened.
    pub async fn perform(&self, action: &TradeAction) -> Result<ActionSummary, EngineError> {
        info!(
            action_id = action.action_id,
            side = %action.side,
            pair = %action.pair,
            amount = %action.amount,
            deposit = action.deposit_asset.as_deref().unwrap_or("-"),
            "Performing action"
        );

        let effective_amount = match &action.deposit_asset {
            None => {
                self.fill(action.action_id, action.side, &action.pair, action.amount)
                    .await?;
                action.amount
            }
            Some(deposit) => match action.side {
                Side::Buy => self.buy_via_deposit(action, deposit).await?,
                Side::Sell => self.sell_into_deposit(action, deposit).await?,
            },
        };

        self.summarize(action, effective_amount).await
    }

    /// Pair for converting the action's quote currency to or from the
    /// deposit asset. The quote must not itself be fiat-class — there is
    /// nothing to convert then, the instruction is inconsistent.
    fn conversion_pair(&self, pair: &str, deposit: &str) -> Result<String, EngineError> {
        let market = self.client.market(pair)?;
        if ExchangeClient::is_fiat(&market.quote) {
            return Err(EngineError::Dependency(format!(
                "Cannot convert deposit asset {deposit}: quote {} is fiat",
                market.quote
            )));
        }
        let conversion = format!("{}/{deposit}", market.quote);
        // Validates the synthetic pair actually trades here.
        self.client.market(&conversion)?;
        Ok(conversion)
    }

    /// Buy with funds held in the deposit asset: first buy the quote
    /// currency with the deposit asset, then run the main leg with however
    /// much that conversion actually produced.
    async fn buy_via_deposit(
        &self,
        action: &TradeAction,
        deposit: &str,
    ) -> Result<Decimal, EngineError> {
        let conversion = self.conversion_pair(&action.pair, deposit)?;

        let price = self.client.get_last_price(&action.pair, true).await?;
        let conversion_amount = self
            .client
            .round_amount(&conversion, action.amount * price)?;

        let converted = self
            .fill(action.action_id, action.side, &conversion, conversion_amount)
            .await?;
        if converted.is_zero() {
            warn!(
                action_id = action.action_id,
                pair = %conversion,
                "Deposit conversion produced nothing, skipping main leg"
            );
            return Ok(action.amount);
        }

        let price = self.client.get_last_price(&action.pair, true).await?;
        let effective = self.client.round_amount(&action.pair, converted / price)?;
        info!(
            action_id = action.action_id,
            requested = %action.amount,
            effective = %effective,
            "Deposit conversion done, adjusting amount"
        );
        if let Err(err) = self.sink.sync_amount(action.action_id, effective).await {
            warn!(action_id = action.action_id, error = %err, "Amount sync failed");
        }

        self.fill(action.action_id, action.side, &action.pair, effective)
            .await?;
        Ok(effective)
    }

    /// Sell into the deposit asset: run the main leg, then sell the quote
    /// proceeds for the deposit asset.
    async fn sell_into_deposit(
        &self,
        action: &TradeAction,
        deposit: &str,
    ) -> Result<Decimal, EngineError> {
        let filled = self
            .fill(action.action_id, action.side, &action.pair, action.amount)
            .await?;
        if filled.is_zero() {
            return Ok(action.amount);
        }

        // The conversion pair is only validated once there are proceeds to
        // convert; the main sell goes through regardless.
        let conversion = self.conversion_pair(&action.pair, deposit)?;
        let price = self.client.get_last_price(&action.pair, true).await?;
        let conversion_amount = self.client.round_amount(&conversion, filled * price)?;
        self.fill(action.action_id, action.side, &conversion, conversion_amount)
            .await?;
        Ok(action.amount)
    }

    /// The fill loop: place up to `fill_attempts` orders for one pair,
    /// re-quoting each time, until the amount is done.
    ///
    /// Returns the filled quantity this call achieved. An order that closes
    /// completes the call with that order's fill; partial fills shrink the
    /// remaining amount for the next attempt. The available balance is
    /// checked per attempt against the *remaining* amount only — proceeds
    /// already spent are not re-credited within one action.
    async fn fill(
        &self,
        action_id: i64,
        side: Side,
        pair: &str,
        amount: Decimal,
    ) -> Result<Decimal, EngineError> {
        let market = self.client.market(pair)?.clone();
        let mut remaining = amount;
        let mut filled_total = Decimal::ZERO;

        for attempt in 1..=self.config.fill_attempts {
            let price = self.client.get_last_price(pair, true).await?;
            if price <= Decimal::ZERO {
                return Err(EngineError::Temporary(format!(
                    "Last price for {pair} is not positive"
                )));
            }

            // Clip to what the account can actually afford.
            let funding_asset = match side {
                Side::Buy => &market.quote,
                Side::Sell => &market.base,
            };
            let available = self.client.get_balance(funding_asset).await?;
            let affordable = match side {
                Side::Buy => available / price,
                Side::Sell => available,
            };
            let target = self.client.round_amount(pair, remaining.min(affordable))?;

            if target < market.min_amount {
                warn!(
                    action_id,
                    pair,
                    attempt,
                    target = %target,
                    min = %market.min_amount,
                    "Remaining amount below market minimum, stopping"
                );
                return Ok(filled_total);
            }

            let rate = self
                .client
                .get_rate_limit(pair, side, target, self.config.use_order_book)
                .await?;
            let rate = self.client.round_price(pair, rate)?;

            let mut tx =
                Transaction::new(action_id, side, self.client.name(), pair, rate, target);
            self.store.insert(&tx).await?;

            match self.executor.execute(&mut tx).await {
                Ok((OrderStatus::Closed, filled)) => {
                    info!(action_id, pair, attempt, filled = %filled, "Order filled in full");
                    return Ok(filled);
                }
                Ok((status, filled)) => {
                    filled_total += filled;
                    remaining -= filled;
                    info!(
                        action_id,
                        pair,
                        attempt,
                        status = %status,
                        filled = %filled,
                        remaining = %remaining,
                        "Order did not close, re-quoting"
                    );
                }
                Err(err @ EngineError::Dependency(_)) => {
                    warn!(action_id, pair, attempt, error = %err, "Attempt failed");
                }
                // A Temporary here has already exhausted the client's retry
                // budget with an order possibly live; placing more orders on
                // top of an unknown fill state is not safe.
                Err(err) => return Err(err),
            }
        }

        Ok(filled_total)
    }

    /// Summary of the action built from the persisted main-leg records.
    async fn summarize(
        &self,
        action: &TradeAction,
        effective_amount: Decimal,
    ) -> Result<ActionSummary, EngineError> {
        let market = self.client.market(&action.pair)?.clone();
        let transactions = self
            .store
            .for_action(action.action_id, &action.pair)
            .await?;

        let filled: Decimal = transactions.iter().map(|t| t.filled).sum();
        let weighted: Decimal = transactions.iter().map(|t| t.rate * t.filled).sum();
        let avg_price = if filled.is_zero() {
            Decimal::ZERO
        } else {
            weighted / filled
        };

        // Balance capped at the amount the action asked for: pre-existing
        // holdings must not inflate the report.
        let balance = self
            .client
            .get_balance(&market.base)
            .await?
            .min(effective_amount);

        Ok(ActionSummary {
            exchange: self.client.name().to_string(),
            pair: action.pair.clone(),
            side: action.side,
            amount: effective_amount,
            filled,
            balance,
            avg_price,
            transactions: transactions.len(),
            deposit: action.deposit_asset.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
