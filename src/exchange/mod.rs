//! Exchange integrations.
//!
//! Defines the `ExchangeApi` capability trait and provides:
//! - `ExchangeClient` — precision-correct, cached, retry-wrapped access to
//!   one exchange account (the layer the engine talks to)
//! - `binance` — signed REST implementation of `ExchangeApi`

pub mod binance;
pub mod client;

pub use client::ExchangeClient;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::types::{EngineError, MarketInfo, Order, OrderBook, Side, Ticker};

/// Abstraction over one exchange account's raw API.
///
/// Implementors classify every failure into the engine's three-way taxonomy
/// before returning: exchange-reported insufficient-funds and invalid-order
/// conditions are `Dependency`, network-level and rate-limit conditions are
/// `Temporary`, anything unexpected is `Operational`. Retrying is not an
/// implementor concern — `ExchangeClient` owns that.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Exchange name for logging and batch routing.
    fn name(&self) -> &str;

    /// Fetch tradable market metadata for all pairs.
    async fn fetch_markets(&self) -> Result<Vec<MarketInfo>, EngineError>;

    /// Fetch free balances per asset code.
    async fn fetch_balances(&self) -> Result<HashMap<String, Decimal>, EngineError>;

    /// Fetch the current ticker for a pair.
    async fn fetch_ticker(&self, pair: &str) -> Result<Ticker, EngineError>;

    /// Fetch a level-2 order book snapshot, at most `limit` levels per side.
    async fn fetch_order_book(&self, pair: &str, limit: u32) -> Result<OrderBook, EngineError>;

    /// Create a limit order. `price` and `amount` are already rounded to
    /// the pair's exchange precision by the caller.
    async fn create_limit_order(
        &self,
        pair: &str,
        side: Side,
        price: Decimal,
        amount: Decimal,
    ) -> Result<Order, EngineError>;

    /// Fetch the current status of a placed order.
    async fn fetch_order(&self, order_id: &str, pair: &str) -> Result<Order, EngineError>;

    /// Cancel a placed order.
    async fn cancel_order(&self, order_id: &str, pair: &str) -> Result<(), EngineError>;
}
