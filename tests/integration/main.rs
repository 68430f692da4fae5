//! Integration test harness.

mod mock_exchange;
mod trade_flow;
