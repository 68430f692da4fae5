//! Precision-correct, retry-wrapped access to one exchange account.
//!
//! `ExchangeClient` wraps a raw `ExchangeApi` and layers on the behaviour
//! every caller needs: market metadata lookup, amount/price rounding to
//! exchange precision, a per-pair ticker cache with an explicit freshness
//! flag, order-book-aware rate computation, and a bounded retry wrapper for
//! transient failures.

use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::ExchangeApi;
use crate::types::{EngineError, MarketInfo, Order, OrderBook, Side, Ticker};

/// Total attempts (first try included) for retryable operations.
const RETRY_ATTEMPTS: u32 = 5;

/// Order book depth requested for rate computation.
const ORDER_BOOK_DEPTH: u32 = 1000;

/// Retry a fallible exchange call up to `attempts` times total.
///
/// `Temporary` and `Dependency` errors are re-attempted immediately, logging
/// each attempt; the last error propagates once attempts are exhausted.
/// `Operational` errors propagate without retry.
async fn retry<T, F, Fut>(op: &str, attempts: u32, mut call: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < attempts => {
                warn!(
                    op,
                    attempt,
                    remaining = attempts - attempt,
                    error = %err,
                    "Exchange call failed, retrying"
                );
                attempt += 1;
            }
            Err(err) => {
                if err.is_retryable() {
                    warn!(op, attempts, error = %err, "Giving up retrying");
                }
                return Err(err);
            }
        }
    }
}

/// Uniform access to one exchange account.
///
/// Market metadata is loaded once at connect time; the ticker cache holds
/// the most recent quote per pair with no automatic expiry — callers that
/// need a guaranteed-fresh price must pass `refresh = true`.
pub struct ExchangeClient {
    api: Arc<dyn ExchangeApi>,
    markets: HashMap<String, MarketInfo>,
    ticker_cache: Mutex<HashMap<String, Ticker>>,
}

impl ExchangeClient {
    /// Asset codes treated as fiat-class for deposit-conversion rules.
    pub const FIAT_ASSETS: &'static [&'static str] = &["USDT", "TUSD", "USD"];

    /// Connect to the exchange and load market metadata.
    pub async fn connect(api: Arc<dyn ExchangeApi>) -> Result<Self, EngineError> {
        let api_ref = &*api;
        let markets = retry("fetch_markets", RETRY_ATTEMPTS, || api_ref.fetch_markets()).await?;
        let markets: HashMap<String, MarketInfo> = markets
            .into_iter()
            .map(|m| (m.symbol.clone(), m))
            .collect();

        info!(
            exchange = api.name(),
            markets = markets.len(),
            "Exchange client connected"
        );

        Ok(Self {
            api,
            markets,
            ticker_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Exchange name as reported by the underlying API.
    pub fn name(&self) -> &str {
        self.api.name()
    }

    /// Whether an asset code is fiat-class.
    pub fn is_fiat(asset: &str) -> bool {
        Self::FIAT_ASSETS.contains(&asset)
    }

    /// Metadata for a pair. Unknown pairs are a `Dependency` error — the
    /// instruction asked for a market this account cannot trade.
    pub fn market(&self, pair: &str) -> Result<&MarketInfo, EngineError> {
        self.markets
            .get(pair)
            .ok_or_else(|| EngineError::Dependency(format!("Unknown market: {pair}")))
    }

    // -- Precision -------------------------------------------------------

    /// Round an order quantity down (toward zero) to the pair's amount
    /// precision.
    pub fn round_amount(&self, pair: &str, amount: Decimal) -> Result<Decimal, EngineError> {
        let precision = self.market(pair)?.amount_precision;
        Ok(amount.round_dp_with_strategy(precision, RoundingStrategy::ToZero))
    }

    /// Round an order price up (ceiling) to the pair's price precision, so
    /// a buy limit order is never underpriced relative to the computed rate.
    pub fn round_price(&self, pair: &str, price: Decimal) -> Result<Decimal, EngineError> {
        let precision = self.market(pair)?.price_precision;
        Ok(price.round_dp_with_strategy(precision, RoundingStrategy::ToPositiveInfinity))
    }

    // -- Balances and quotes ---------------------------------------------

    /// Free balance for one asset. An asset missing from an otherwise
    /// successful response is treated as a malformed (temporary) response.
    pub async fn get_balance(&self, asset: &str) -> Result<Decimal, EngineError> {
        let api = &*self.api;
        retry("get_balance", RETRY_ATTEMPTS, || async move {
            let balances = api.fetch_balances().await?;
            balances.get(asset).copied().ok_or_else(|| {
                EngineError::Temporary(format!(
                    "Could not get {asset} balance: missing from exchange response"
                ))
            })
        })
        .await
    }

    /// Ticker for a pair. With `refresh = false` the most recently cached
    /// quote is served if one exists, however stale it may be.
    pub async fn get_ticker(&self, pair: &str, refresh: bool) -> Result<Ticker, EngineError> {
        if !refresh {
            if let Some(cached) = self.ticker_cache.lock().unwrap().get(pair) {
                debug!(pair, "Returning cached ticker");
                return Ok(*cached);
            }
        }

        let api = &*self.api;
        let ticker = retry("get_ticker", RETRY_ATTEMPTS, || api.fetch_ticker(pair)).await?;
        self.ticker_cache
            .lock()
            .unwrap()
            .insert(pair.to_string(), ticker);
        Ok(ticker)
    }

    /// Last traded price for a pair.
    pub async fn get_last_price(&self, pair: &str, refresh: bool) -> Result<Decimal, EngineError> {
        Ok(self.get_ticker(pair, refresh).await?.last)
    }

    /// Level-2 order book for a pair.
    pub async fn get_order_book(&self, pair: &str, limit: u32) -> Result<OrderBook, EngineError> {
        let api = &*self.api;
        retry("get_order_book", RETRY_ATTEMPTS, || {
            api.fetch_order_book(pair, limit)
        })
        .await
    }

    /// Limit price for an order of the given size.
    ///
    /// Top-of-book (ask for buy, bid for sell) by default. With
    /// `use_order_book`, walks the book accumulating volume until the
    /// requested amount would be filled and returns the price at that depth,
    /// so the limit order is not priced too optimistically for its size.
    /// Uses the cached ticker — callers refresh the quote beforehand.
    pub async fn get_rate_limit(
        &self,
        pair: &str,
        side: Side,
        amount: Decimal,
        use_order_book: bool,
    ) -> Result<Decimal, EngineError> {
        let ticker = self.get_ticker(pair, false).await?;
        let mut rate = match side {
            Side::Buy => ticker.ask,
            Side::Sell => ticker.bid,
        };

        if use_order_book {
            let book = self.get_order_book(pair, ORDER_BOOK_DEPTH).await?;
            let levels = match side {
                Side::Buy => &book.asks,
                Side::Sell => &book.bids,
            };
            let mut cumulative = Decimal::ZERO;
            for (price, volume) in levels {
                cumulative += *volume;
                if cumulative > amount {
                    rate = *price;
                    break;
                }
            }
        }

        Ok(rate)
    }

    // -- Orders ----------------------------------------------------------

    /// Create a limit order, applying the pair's precision to both price
    /// and amount. Not retried: placement failure policy belongs to the
    /// transaction executor and the fill loop above it.
    pub async fn place_order(
        &self,
        pair: &str,
        side: Side,
        price: Decimal,
        amount: Decimal,
    ) -> Result<Order, EngineError> {
        let amount = self.round_amount(pair, amount)?;
        let price = self.round_price(pair, price)?;

        debug!(pair, %side, %price, %amount, "Placing limit order");
        self.api.create_limit_order(pair, side, price, amount).await
    }

    /// Current status of a placed order.
    pub async fn get_order(&self, order_id: &str, pair: &str) -> Result<Order, EngineError> {
        let api = &*self.api;
        retry("get_order", RETRY_ATTEMPTS, || {
            api.fetch_order(order_id, pair)
        })
        .await
    }

    /// Cancel a placed order.
    pub async fn cancel_order(&self, order_id: &str, pair: &str) -> Result<(), EngineError> {
        let api = &*self.api;
        retry("cancel_order", RETRY_ATTEMPTS, || {
            api.cancel_order(order_id, pair)
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
