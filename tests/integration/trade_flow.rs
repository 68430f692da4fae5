//! End-to-end action execution against the mock exchange.
//!
//! Wires the real orchestrator, executor, client, and in-memory store
//! together and drives whole actions through them, asserting on the orders
//! placed, the records persisted, and the summaries produced.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use exabot::engine::{ActionOrchestrator, ExecutorConfig, OrchestratorConfig};
use exabot::exchange::ExchangeClient;
use exabot::storage::MemoryStore;
use exabot::types::{OrderBook, OrderStatus, Side, TradeAction};

use crate::mock_exchange::{MockExchange, RecordingSink};

struct Harness {
    exchange: Arc<MockExchange>,
    store: Arc<MemoryStore>,
    sink: Arc<RecordingSink>,
    orchestrator: ActionOrchestrator,
}

async fn harness_with(config: OrchestratorConfig) -> Harness {
    let exchange = Arc::new(MockExchange::new());
    let client = Arc::new(ExchangeClient::connect(exchange.clone()).await.unwrap());
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::default());
    let orchestrator = ActionOrchestrator::new(client, store.clone(), sink.clone(), config);
    Harness {
        exchange,
        store,
        sink,
        orchestrator,
    }
}

fn config(fill_attempts: u32, use_order_book: bool) -> OrchestratorConfig {
    OrchestratorConfig {
        fill_attempts,
        use_order_book,
        executor: ExecutorConfig {
            poll_attempts: 3,
            poll_interval: Duration::ZERO,
        },
    }
}

async fn harness() -> Harness {
    harness_with(config(3, false)).await
}

fn action(side: Side, pair: &str, amount: Decimal, deposit: Option<&str>) -> TradeAction {
    TradeAction {
        action_id: 7,
        side,
        pair: pair.to_string(),
        amount,
        deposit_asset: deposit.map(str::to_string),
    }
}

#[tokio::test]
async fn test_buy_closing_on_first_poll() {
    let h = harness().await;
    h.exchange
        .script_order_states(&[(OrderStatus::Closed, dec!(90.99181073))]);

    let summary = h
        .orchestrator
        .perform(&action(Side::Buy, "TRX/BTC", dec!(90.99181073), None))
        .await
        .unwrap();

    assert_eq!(summary.filled, dec!(90.99181073));
    assert_eq!(summary.transactions, 1);
    assert_eq!(summary.avg_price, dec!(0.00000382));

    // Closed on the first poll: no cancel was issued.
    assert!(h.exchange.canceled.lock().unwrap().is_empty());

    let placed = h.exchange.placed.lock().unwrap();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].3, dec!(90.99181073));
}

#[tokio::test]
async fn test_staged_fills_close_on_final_poll() {
    let h = harness().await;
    h.exchange.script_order_states(&[
        (OrderStatus::Open, dec!(50.99)),
        (OrderStatus::Open, dec!(80.99)),
        (OrderStatus::Closed, dec!(90.99181073)),
    ]);

    let summary = h
        .orchestrator
        .perform(&action(Side::Buy, "TRX/BTC", dec!(90.99181073), None))
        .await
        .unwrap();

    assert_eq!(summary.filled, dec!(90.99181073));
    assert_eq!(summary.transactions, 1);
    assert_eq!(
        h.exchange.poll_count.load(std::sync::atomic::Ordering::SeqCst),
        3
    );
    assert!(h.exchange.canceled.lock().unwrap().is_empty());

    // Single record, terminal state, never overfilled.
    let records = h.store.all();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, OrderStatus::Closed);
    assert!(records[0].filled <= records[0].amount);
}

#[tokio::test]
async fn test_timeout_issues_exactly_one_cancel() {
    let h = harness_with(config(1, false)).await;
    h.exchange.script_order_states(&[
        (OrderStatus::Open, dec!(0)),
        (OrderStatus::Open, dec!(10)),
        (OrderStatus::Open, dec!(25)),
        (OrderStatus::Canceled, dec!(25)),
    ]);

    let summary = h
        .orchestrator
        .perform(&action(Side::Buy, "TRX/BTC", dec!(90.99181073), None))
        .await
        .unwrap();

    assert_eq!(h.exchange.canceled.lock().unwrap().len(), 1);
    assert_eq!(summary.filled, dec!(25));

    let records = h.store.all();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, OrderStatus::Canceled);
    assert!(records[0].filled <= records[0].amount);
}

#[tokio::test]
async fn test_buy_amount_clipped_by_quote_balance() {
    let h = harness().await;
    // 0.0001 BTC at 0.00000382 affords 26.17801047... TRX.
    h.exchange.set_balance("BTC", dec!(0.0001));
    h.exchange
        .script_order_states(&[(OrderStatus::Closed, dec!(26.17801047))]);

    h.orchestrator
        .perform(&action(Side::Buy, "TRX/BTC", dec!(90.99181073), None))
        .await
        .unwrap();

    let placed = h.exchange.placed.lock().unwrap();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].3, dec!(26.17801047));
}

#[tokio::test]
async fn test_sell_amount_clipped_by_base_balance() {
    let h = harness().await;
    h.exchange.set_balance("TRX", dec!(40.5));
    h.exchange
        .script_order_states(&[(OrderStatus::Closed, dec!(40.5))]);

    h.orchestrator
        .perform(&action(Side::Sell, "TRX/BTC", dec!(90.99181073), None))
        .await
        .unwrap();

    let placed = h.exchange.placed.lock().unwrap();
    assert_eq!(placed[0].1, Side::Sell);
    assert_eq!(placed[0].3, dec!(40.5));
}

#[tokio::test]
async fn test_sub_minimum_amount_trades_nothing() {
    let h = harness().await;

    let summary = h
        .orchestrator
        .perform(&action(Side::Buy, "TRX/BTC", dec!(0.99181073), None))
        .await
        .unwrap();

    assert_eq!(summary.filled, dec!(0));
    assert_eq!(summary.transactions, 0);
    assert_eq!(summary.avg_price, dec!(0));
    assert!(h.exchange.placed.lock().unwrap().is_empty());
    assert!(h.store.all().is_empty());
}

#[tokio::test]
async fn test_deposit_buy_resizes_with_fresh_price() {
    let h = harness().await;
    // The price moves between the sizing quote and the post-conversion
    // re-quote; the main leg must be sized off the fresh one.
    h.exchange.push_last_price("TRX/BTC", dec!(0.00000400));
    h.exchange.script_order_states(&[
        (OrderStatus::Closed, dec!(0.000347)),
        (OrderStatus::Closed, dec!(86.75)),
    ]);

    let summary = h
        .orchestrator
        .perform(&action(
            Side::Buy,
            "TRX/BTC",
            dec!(90.99181073),
            Some("USDT"),
        ))
        .await
        .unwrap();

    let placed = h.exchange.placed.lock().unwrap();
    assert_eq!(placed.len(), 2);

    // Conversion sized off the original quote:
    // 90.99181073 × 0.00000382 → 0.000347 BTC (6 decimals).
    assert_eq!(placed[0].0, "BTC/USDT");
    assert_eq!(placed[0].1, Side::Buy);
    assert_eq!(placed[0].3, dec!(0.000347));

    // Main leg sized off the converted proceeds at the fresh price:
    // 0.000347 / 0.00000400 = 86.75, not 90.83 (stale price).
    assert_eq!(placed[1].0, "TRX/BTC");
    assert_eq!(placed[1].3, dec!(86.75));

    // The adjusted amount was reported upstream.
    assert_eq!(h.sink.synced.lock().unwrap().as_slice(), &[(7, dec!(86.75))]);

    assert_eq!(summary.amount, dec!(86.75));
    assert_eq!(summary.filled, dec!(86.75));
}

#[tokio::test]
async fn test_deposit_sell_converts_proceeds() {
    let h = harness().await;
    h.exchange.script_order_states(&[
        (OrderStatus::Closed, dec!(90.99181073)),
        (OrderStatus::Closed, dec!(0.000347)),
    ]);

    let summary = h
        .orchestrator
        .perform(&action(
            Side::Sell,
            "TRX/BTC",
            dec!(90.99181073),
            Some("USDT"),
        ))
        .await
        .unwrap();

    let placed = h.exchange.placed.lock().unwrap();
    assert_eq!(placed.len(), 2);
    assert_eq!(placed[0].0, "TRX/BTC");
    assert_eq!(placed[0].1, Side::Sell);

    // Proceeds leg: 90.99181073 × 0.00000382 BTC sold into USDT.
    assert_eq!(placed[1].0, "BTC/USDT");
    assert_eq!(placed[1].1, Side::Sell);
    assert_eq!(placed[1].3, dec!(0.000347));

    // The summary covers the named pair only.
    assert_eq!(summary.filled, dec!(90.99181073));
    assert_eq!(summary.transactions, 1);
}

#[tokio::test]
async fn test_order_book_pricing_walks_depth() {
    let h = harness_with(config(3, true)).await;
    h.exchange.set_order_book(OrderBook {
        asks: vec![
            (dec!(0.00000382), dec!(50)),
            (dec!(0.00000385), dec!(100)),
            (dec!(0.00000390), dec!(1000)),
        ],
        bids: vec![],
    });
    h.exchange
        .script_order_states(&[(OrderStatus::Closed, dec!(120))]);

    h.orchestrator
        .perform(&action(Side::Buy, "TRX/BTC", dec!(120), None))
        .await
        .unwrap();

    // 120 TRX outruns the top ask level, so the order is priced at the
    // second level.
    let placed = h.exchange.placed.lock().unwrap();
    assert_eq!(placed[0].2, dec!(0.00000385));
}

#[tokio::test]
async fn test_partial_fills_accumulate_across_attempts() {
    let h = harness().await;
    h.exchange.script_order_states(&[
        (OrderStatus::Open, dec!(30)),
        (OrderStatus::Open, dec!(30)),
        (OrderStatus::Open, dec!(30)),
        (OrderStatus::Canceled, dec!(30)),
        (OrderStatus::Open, dec!(20)),
        (OrderStatus::Open, dec!(20)),
        (OrderStatus::Open, dec!(20)),
        (OrderStatus::Canceled, dec!(20)),
        (OrderStatus::Open, dec!(0)),
        (OrderStatus::Open, dec!(0)),
        (OrderStatus::Open, dec!(0)),
        (OrderStatus::Canceled, dec!(0)),
    ]);

    let summary = h
        .orchestrator
        .perform(&action(Side::Buy, "TRX/BTC", dec!(90), None))
        .await
        .unwrap();

    assert_eq!(summary.filled, dec!(50));
    assert_eq!(summary.transactions, 3);

    // Each attempt asked only for what was still missing.
    let placed = h.exchange.placed.lock().unwrap();
    assert_eq!(placed[0].3, dec!(90));
    assert_eq!(placed[1].3, dec!(60));
    assert_eq!(placed[2].3, dec!(40));
}
