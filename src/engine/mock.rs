//! Scripted in-process exchange used by the engine unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::exchange::{ExchangeApi, ExchangeClient};
use crate::types::{EngineError, MarketInfo, Order, OrderBook, OrderStatus, Side, Ticker};

/// Exchange double whose responses are queued up by each test.
///
/// `fetch_order` serves `order_states` front to back, repeating the last
/// entry once the queue runs down to one, so a test can script "open, open,
/// closed" and keep polling safely.
pub struct MockApi {
    pub balances: Mutex<HashMap<String, Decimal>>,
    pub tickers: Mutex<HashMap<String, Ticker>>,
    pub book: Mutex<OrderBook>,
    pub order_states: Mutex<VecDeque<Order>>,
    pub place_results: Mutex<VecDeque<Result<Order, EngineError>>>,
    pub placed: Mutex<Vec<(String, Side, Decimal, Decimal)>>,
    pub canceled: Mutex<Vec<String>>,
    next_id: AtomicU64,
}

impl MockApi {
    pub fn new() -> Self {
        let tickers = HashMap::from([
            (
                "TRX/BTC".to_string(),
                Ticker {
                    bid: dec!(0.00000381),
                    ask: dec!(0.00000382),
                    last: dec!(0.00000382),
                },
            ),
            (
                "BTC/USDT".to_string(),
                Ticker {
                    bid: dec!(40000),
                    ask: dec!(40001),
                    last: dec!(40000),
                },
            ),
        ]);
        let balances = HashMap::from([
            ("BTC".to_string(), dec!(1)),
            ("TRX".to_string(), dec!(100000)),
            ("USDT".to_string(), dec!(50000)),
        ]);

        Self {
            balances: Mutex::new(balances),
            tickers: Mutex::new(tickers),
            book: Mutex::new(OrderBook::default()),
            order_states: Mutex::new(VecDeque::new()),
            place_results: Mutex::new(VecDeque::new()),
            placed: Mutex::new(Vec::new()),
            canceled: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Queue the order states the polls will see, in order.
    pub fn script_order_states(&self, states: &[(OrderStatus, Decimal)]) {
        let mut queue = self.order_states.lock().unwrap();
        for (status, filled) in states {
            queue.push_back(Order {
                id: "scripted".to_string(),
                status: *status,
                price: dec!(0.00000382),
                amount: dec!(90.99),
                filled: *filled,
            });
        }
    }

    pub fn script_place_error(&self, err: EngineError) {
        self.place_results.lock().unwrap().push_back(Err(err));
    }

    pub fn set_balance(&self, asset: &str, amount: Decimal) {
        self.balances
            .lock()
            .unwrap()
            .insert(asset.to_string(), amount);
    }
}

impl Default for MockApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeApi for MockApi {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_markets(&self) -> Result<Vec<MarketInfo>, EngineError> {
        Ok(vec![
            MarketInfo {
                symbol: "TRX/BTC".to_string(),
                base: "TRX".to_string(),
                quote: "BTC".to_string(),
                amount_precision: 2,
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
        self.tickers
            .lock()
            .unwrap()
            .get(pair)
            .copied()
            .ok_or_else(|| EngineError::Temporary(format!("No scripted ticker for {pair}")))
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

        if let Some(result) = self.place_results.lock().unwrap().pop_front() {
            return result;
        }

        Ok(Order {
            id: self.next_id.fetch_add(1, Ordering::SeqCst).to_string(),
            status: OrderStatus::Open,
            price,
            amount,
            filled: Decimal::ZERO,
        })
    }

    async fn fetch_order(&self, _order_id: &str, _pair: &str) -> Result<Order, EngineError> {
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

pub async fn mock_client(api: Arc<MockApi>) -> Arc<ExchangeClient> {
    Arc::new(ExchangeClient::connect(api).await.unwrap())
}
