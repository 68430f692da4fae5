//! Shared types for the exabot engine.
//!
//! These types form the data model used across all modules: the wire shape
//! of incoming trade actions, the persisted transaction record, and the
//! exchange-facing order/market structures. They are designed to be stable
//! so that exchange, engine, and storage modules can depend on them without
//! circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            _ => Err(anyhow::anyhow!("Unknown side: {s}")),
        }
    }
}

/// Order lifecycle status, shared between live exchange orders and the
/// persisted transaction record that mirrors them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Closed,
    Canceled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Open => write!(f, "open"),
            OrderStatus::Closed => write!(f, "closed"),
            OrderStatus::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(OrderStatus::Open),
            "closed" => Ok(OrderStatus::Closed),
            "canceled" => Ok(OrderStatus::Canceled),
            _ => Err(anyhow::anyhow!("Unknown order status: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Exchange-facing structures
// ---------------------------------------------------------------------------

/// Per-pair market metadata, read-only to the core. Loaded once per client
/// at connect time and consulted for every rounding and minimum-size
/// decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketInfo {
    /// Symbol in base/quote form, e.g. "TRX/BTC".
    pub symbol: String,
    pub base: String,
    pub quote: String,
    /// Decimal places the exchange accepts for order quantities.
    pub amount_precision: u32,
    /// Decimal places the exchange accepts for order prices.
    pub price_precision: u32,
    /// Minimum order quantity in base asset; zero means no minimum.
    pub min_amount: Decimal,
}

/// Snapshot of a pair's top-of-book quote and last traded price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ticker {
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
}

/// Level-2 order book snapshot. Entries are `(price, volume)`, best first.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
}

/// An order as reported by the exchange.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: String,
    pub status: OrderStatus,
    /// Fill price reported by the exchange (limit price until filled).
    pub price: Decimal,
    pub amount: Decimal,
    pub filled: Decimal,
}

// ---------------------------------------------------------------------------
// Transaction record
// ---------------------------------------------------------------------------

/// One order attempt, persisted in the transaction store.
///
/// Created by the orchestrator before order placement and mutated only by
/// the executor while polling. `filled` is monotonic non-decreasing within
/// the record's lifetime and never exceeds `amount`. The core never deletes
/// records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    /// Groups transactions belonging to one logical action.
    pub action_id: i64,
    pub side: Side,
    pub exchange: String,
    pub pair: String,
    /// Limit price, exchange-precision-rounded; updated to the
    /// exchange-reported fill price while polling.
    pub rate: Decimal,
    /// Order quantity, exchange-precision-rounded.
    pub amount: Decimal,
    /// Assigned once the order is placed.
    pub order_id: Option<String>,
    pub filled: Decimal,
    pub status: OrderStatus,
    pub created: DateTime<Utc>,
}

impl Transaction {
    /// Build a fresh record for one order attempt.
    pub fn new(
        action_id: i64,
        side: Side,
        exchange: &str,
        pair: &str,
        rate: Decimal,
        amount: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action_id,
            side,
            exchange: exchange.to_string(),
            pair: pair.to_string(),
            rate,
            amount,
            order_id: None,
            filled: Decimal::ZERO,
            status: OrderStatus::Open,
            created: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// A logical trade instruction from the remote command source. Not
/// persisted; the transaction records it spawns are.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeAction {
    pub action_id: i64,
    pub side: Side,
    /// Pair in base/quote form, e.g. "TRX/BTC".
    pub pair: String,
    pub amount: Decimal,
    /// Alternate funding/settlement currency. When set on a buy, the
    /// deposit asset is converted into the pair's quote asset first; on a
    /// sell, proceeds are converted into it afterwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposit_asset: Option<String>,
}

/// Actions grouped per exchange, as delivered by the command source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionBatch {
    pub exchange: String,
    pub actions: Vec<TradeAction>,
}

/// Outcome of one logical action, reported upstream.
#[derive(Debug, Clone)]
pub struct ActionSummary {
    pub exchange: String,
    pub pair: String,
    pub side: Side,
    /// Effective requested amount (recomputed when a deposit conversion
    /// determined the tradable quantity).
    pub amount: Decimal,
    /// Total filled across all transactions for this action and pair.
    pub filled: Decimal,
    /// Live base-asset balance, capped at the requested amount.
    pub balance: Decimal,
    /// Volume-weighted average fill price; zero when nothing filled.
    pub avg_price: Decimal,
    pub transactions: usize,
    pub deposit: Option<String>,
}

impl fmt::Display for ActionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "exchange:{} pair:{} side:{} amount:{} filled:{} balance:{} avg_price:{} transactions:{} deposit:{}",
            self.exchange,
            self.pair,
            self.side,
            self.amount,
            self.filled,
            self.balance,
            self.avg_price,
            self.transactions,
            self.deposit.as_deref().unwrap_or("N/A"),
        )
    }
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Three-way error taxonomy the whole engine runs on.
///
/// `Dependency` and `Temporary` are retried by the exchange client's bounded
/// retry wrapper; `Operational` always propagates immediately and aborts the
/// current action.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// The requested operation is impossible given current state
    /// (insufficient funds, invalid order parameters, disallowed
    /// fiat-to-fiat conversion).
    #[error("dependency error: {0}")]
    Dependency(String),

    /// Transient network or exchange condition (timeout, rate limiting,
    /// malformed transient response).
    #[error("temporary error: {0}")]
    Temporary(String),

    /// Unexpected, fatal exchange-side condition that a human must
    /// adjudicate.
    #[error("operational error: {0}")]
    Operational(String),
}

impl EngineError {
    /// Whether the bounded retry wrapper may re-attempt after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Dependency(_) | EngineError::Temporary(_))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
