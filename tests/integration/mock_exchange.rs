//! Mock exchange for integration testing.
//!
//! Provides a deterministic `ExchangeApi` implementation with scripted
//! tickers and order states, plus a recording `ConfirmationSink` — all
//! in-memory with no external dependencies.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use exabot::exchange::ExchangeApi;
use exabot::remote::ConfirmationSink;
use exabot::types::{EngineError, MarketInfo, Order, OrderBook, OrderStatus, Side, Ticker};

/// A mock spot exchange for deterministic testing.
///
/// Tickers are served per pair from a queue (the last entry repeats), so a
/// test can script a price move between two quotes. Order polls work the
/// same way via `script_order_states`.
pub struct MockExchange {
    balances: Mutex<HashMap<String, Decimal>>,
    tickers: Mutex<HashMap<String, VecDeque<Ticker>>>,
    book: Mutex<OrderBook>,
    order_states: Mutex<VecDeque<Order>>,
    pub placed: Mutex<Vec<(String, Side, Decimal, Decimal)>>,
    pub canceled: Mutex<Vec<String>>,
    pub poll_count: AtomicU64,
    next_id: AtomicU64,
}

impl MockExchange {
    pub fn new() -> Self {
        let mock = Self {
            balances: Mutex::new(HashMap::from([
                ("BTC".to_string(), dec!(1)),
                ("TRX".to_string(), dec!(100000)),
                ("USDT".to_string(), dec!(50000)),
            ])),
            tickers: Mutex::new(HashMap::new()),
            book: Mutex::new(OrderBook::default()),
            order_states: Mutex::new(VecDeque::new()),
            placed: Mutex::new(Vec::new()),
            canceled: Mutex::new(Vec::new()),
            poll_count: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
        };
        mock.push_last_price("TRX/BTC", dec!(0.00000382));
        mock.push_last_price("BTC/USDT", dec!(40000));
        mock
    }

    /// Queue a quote for a pair; when the queue runs down to one entry it
    /// repeats forever.
    pub fn push_last_price(&self, pair: &str, last: Decimal) {
        self.tickers
            .lock()
            .unwrap()
            .entry(pair.to_string())
            .or_default()
            .push_back(Ticker {
                bid: last,
                ask: last,
                last,
            });
    }

    pub fn set_balance(&self, asset: &str, amount: Decimal) {
        self.balances
            .lock()
            .unwrap()
            .insert(asset.to_string(), amount);
    }

    pub fn set_order_book(&self, book: OrderBook) {
        *self.book.lock().unwrap() = book;
    }

    /// Queue the order states polls will observe, in order.
    pub fn script_order_states(&self, states: &[(OrderStatus, Decimal)]) {
        let mut queue = self.order_states.lock().unwrap();
        for (status, filled) in states {
            queue.push_back(Order {
                id: "scripted".to_string(),
                status: *status,
                price: dec!(0.00000382),
                amount: dec!(90.99181073),
                filled: *filled,
            });
        }
    }
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeApi for MockExchange {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_markets(&self) -> Result<Vec<MarketInfo>, EngineError> {
        Ok(vec![
            MarketInfo {
                symbol: "TRX/BTC".to_string(),
                base: "TRX".to_string(),
                quote: "BTC".to_string(),
                amount_precision: 8,
                price_precision: 8,
                min_amount: dec!(1),
            },
            MarketInfo {
                symbol: "BTC/USDT".to_string(),
                base: "BTC".to_string(),
                quote: "USDT".to_string(),
                amount_precision: 6,
                price_precision: 2,
                min_amount: dec!(0.0001),
            },
        ])
    }

    async fn fetch_balances(&self) -> Result<HashMap<String, Decimal>, EngineError> {
        Ok(self.balances.lock().unwrap().clone())
    }

    async fn fetch_ticker(&self, pair: &str) -> Result<Ticker, EngineError> {
        let mut tickers = self.tickers.lock().unwrap();
        let queue = tickers
            .get_mut(pair)
            .ok_or_else(|| EngineError::Temporary(format!("No scripted ticker for {pair}")))?;
        if queue.len() > 1 {
            Ok(queue.pop_front().unwrap())
        } else {
            queue
                .front()
                .copied()
                .ok_or_else(|| EngineError::Temporary(format!("No scripted ticker for {pair}")))
        }
    }

    async fn fetch_order_book(&self, _pair: &str, _limit: u32) -> Result<OrderBook, EngineError> {
        Ok(self.book.lock().unwrap().clone())
    }

    async fn create_limit_order(
        &self,
        pair: &str,
        side: Side,
        price: Decimal,
        amount: Decimal,
    ) -> Result<Order, EngineError> {
        self.placed
            .lock()
            .unwrap()
            .push((pair.to_string(), side, price, amount));

        Ok(Order {
            id: self.next_id.fetch_add(1, Ordering::SeqCst).to_string(),
            status: OrderStatus::Open,
            price,
            amount,
            filled: Decimal::ZERO,
        })
    }

    async fn fetch_order(&self, _order_id: &str, _pair: &str) -> Result<Order, EngineError> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        let mut queue = self.order_states.lock().unwrap();
        if queue.len() > 1 {
            Ok(queue.pop_front().unwrap())
        } else {
            queue
                .front()
                .cloned()
                .ok_or_else(|| EngineError::Temporary("No scripted order state".to_string()))
        }
    }

    async fn cancel_order(&self, order_id: &str, _pair: &str) -> Result<(), EngineError> {
        self.canceled.lock().unwrap().push(order_id.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Recording sink
// ---------------------------------------------------------------------------

/// Confirmation sink that records everything reported to it.
#[derive(Default)]
pub struct RecordingSink {
    pub confirmations: Mutex<Vec<(i64, bool, String)>>,
    pub synced: Mutex<Vec<(i64, Decimal)>>,
}

#[async_trait]
impl ConfirmationSink for RecordingSink {
    async fn confirm_action(&self, action_id: i64, status: bool, response: &str) -> Result<()> {
        self.confirmations
            .lock()
            .unwrap()
            .push((action_id, status, response.to_string()));
        Ok(())
    }

    async fn sync_amount(&self, action_id: i64, balance: Decimal) -> Result<()> {
        self.synced.lock().unwrap().push((action_id, balance));
        Ok(())
    }
}
