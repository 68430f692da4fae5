//! Binance spot integration.
//!
//! API docs: https://binance-docs.github.io/apidocs/spot/en/
//! Base URL: https://api.binance.com
//! Auth: `X-MBX-APIKEY` header plus an HMAC-SHA256 signature over the
//! query string for account and order endpoints.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use super::ExchangeApi;
use crate::types::{EngineError, MarketInfo, Order, OrderBook, OrderStatus, Side, Ticker};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const BASE_URL: &str = "https://api.binance.com";
const EXCHANGE_NAME: &str = "binance";

/// Depth limits Binance accepts; requested limits snap up to the nearest.
const DEPTH_LIMITS: &[u32] = &[5, 10, 20, 50, 100, 500, 1000];

/// Binance error codes for orders the venue refuses outright: bad lot
/// size / notional (-1013), insufficient balance (-2010), unknown order
/// on cancel (-2011). These depend on account/market state, not on
/// connectivity.
const DEPENDENCY_CODES: &[i64] = &[-1013, -2010, -2011];

// ---------------------------------------------------------------------------
// API response types (Binance JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BinanceError {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    status: String,
    base_asset: String,
    quote_asset: String,
    filters: Vec<SymbolFilter>,
}

/// One entry of the per-symbol filter list. Only the filter types we
/// consume carry fields we deserialize; everything else collapses into
/// `filter_type` alone.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolFilter {
    filter_type: String,
    #[serde(default)]
    step_size: Option<String>,
    #[serde(default)]
    tick_size: Option<String>,
    #[serde(default)]
    min_qty: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    bid_price: String,
    ask_price: String,
    last_price: String,
}

#[derive(Debug, Deserialize)]
struct Depth {
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    balances: Vec<AssetBalance>,
}

#[derive(Debug, Deserialize)]
struct AssetBalance {
    asset: String,
    free: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: u64,
    status: String,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    orig_qty: Option<String>,
    #[serde(default)]
    executed_qty: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Binance spot trading client for a single account.
pub struct BinanceClient {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: SecretString,
}

impl BinanceClient {
    pub fn new(api_key: String, api_secret: SecretString) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client for Binance")?;

        Ok(Self {
            http,
            base_url: BASE_URL.to_string(),
            api_key,
            api_secret,
        })
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    // -- Internal helpers ------------------------------------------------

    /// "TRX/BTC" → "TRXBTC".
    fn to_symbol(pair: &str) -> String {
        pair.replace('/', "")
    }

    /// Decimal places implied by a filter step like "0.01000000".
    fn step_precision(step: &str) -> u32 {
        let trimmed = step.trim_end_matches('0');
        match trimmed.split_once('.') {
            Some((_, frac)) => frac.len() as u32,
            None => 0,
        }
    }

    fn parse_decimal(value: &str, field: &str) -> Result<Decimal, EngineError> {
        Decimal::from_str(value).map_err(|e| {
            EngineError::Temporary(format!("Malformed {field} in Binance response: {e}"))
        })
    }

    /// Binance order states → the three states the engine reasons about.
    fn parse_status(status: &str) -> Result<OrderStatus, EngineError> {
        match status {
            "NEW" | "PARTIALLY_FILLED" => Ok(OrderStatus::Open),
            "FILLED" => Ok(OrderStatus::Closed),
            "CANCELED" | "PENDING_CANCEL" | "EXPIRED" | "REJECTED" => Ok(OrderStatus::Canceled),
            other => Err(EngineError::Temporary(format!(
                "Unexpected Binance order status: {other}"
            ))),
        }
    }

    /// Smallest accepted depth limit covering the requested one.
    fn snap_depth_limit(limit: u32) -> u32 {
        DEPTH_LIMITS
            .iter()
            .copied()
            .find(|&l| l >= limit)
            .unwrap_or(1000)
    }

    /// Classify a non-success HTTP response into the engine's error
    /// taxonomy.
    fn classify_response(status: StatusCode, body: &str) -> EngineError {
        if let Ok(err) = serde_json::from_str::<BinanceError>(body) {
            if DEPENDENCY_CODES.contains(&err.code) {
                return EngineError::Dependency(format!("Binance ({}): {}", err.code, err.msg));
            }
        }
        match status.as_u16() {
            408 | 418 | 429 => {
                EngineError::Temporary(format!("Binance rate limited ({status}): {body}"))
            }
            500..=599 => {
                EngineError::Temporary(format!("Binance unavailable ({status}): {body}"))
            }
            _ => EngineError::Operational(format!("Binance error ({status}): {body}")),
        }
    }

    fn transport_error(err: reqwest::Error) -> EngineError {
        EngineError::Temporary(format!("Binance request failed: {err}"))
    }

    fn sign(&self, query: &str) -> String {
        // HMAC accepts keys of any length, new_from_slice cannot fail.
        let mut mac = Hmac::<Sha256>::new_from_slice(
            self.api_secret.expose_secret().as_bytes(),
        )
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn public_get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, EngineError> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "Binance public request");

        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(Self::transport_error)?;

        Self::decode(resp).await
    }

    async fn signed_request<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, EngineError> {
        let mut query: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        query.push(format!("timestamp={}", Utc::now().timestamp_millis()));
        query.push("recvWindow=5000".to_string());
        let query = query.join("&");
        let signature = self.sign(&query);

        let url = format!("{}{path}?{query}&signature={signature}", self.base_url);
        debug!(%path, %method, "Binance signed request");

        let resp = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(Self::transport_error)?;

        Self::decode(resp).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, EngineError> {
        let status = resp.status();
        let body = resp.text().await.map_err(Self::transport_error)?;

        if !status.is_success() {
            return Err(Self::classify_response(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            EngineError::Temporary(format!("Malformed Binance response: {e}"))
        })
    }

    fn to_market(info: SymbolInfo) -> Option<MarketInfo> {
        if info.status != "TRADING" {
            return None;
        }

        let mut amount_precision = 8;
        let mut price_precision = 8;
        let mut min_amount = Decimal::ZERO;
        for filter in &info.filters {
            match filter.filter_type.as_str() {
                "LOT_SIZE" => {
                    if let Some(step) = &filter.step_size {
                        amount_precision = Self::step_precision(step);
                    }
                    if let Some(qty) = &filter.min_qty {
                        min_amount = Decimal::from_str(qty).unwrap_or(Decimal::ZERO);
                    }
                }
                "PRICE_FILTER" => {
                    if let Some(tick) = &filter.tick_size {
                        price_precision = Self::step_precision(tick);
                    }
                }
                _ => {}
            }
        }

        Some(MarketInfo {
            symbol: format!("{}/{}", info.base_asset, info.quote_asset),
            base: info.base_asset,
            quote: info.quote_asset,
            amount_precision,
            price_precision,
            min_amount,
        })
    }

    fn to_order(resp: OrderResponse) -> Result<Order, EngineError> {
        Ok(Order {
            id: resp.order_id.to_string(),
            status: Self::parse_status(&resp.status)?,
            price: Self::parse_decimal(resp.price.as_deref().unwrap_or("0"), "price")?,
            amount: Self::parse_decimal(resp.orig_qty.as_deref().unwrap_or("0"), "origQty")?,
            filled: Self::parse_decimal(
                resp.executed_qty.as_deref().unwrap_or("0"),
                "executedQty",
            )?,
        })
    }
}

// ---------------------------------------------------------------------------
// ExchangeApi trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ExchangeApi for BinanceClient {
    fn name(&self) -> &str {
        EXCHANGE_NAME
    }

    async fn fetch_markets(&self) -> Result<Vec<MarketInfo>, EngineError> {
        let info: ExchangeInfo = self.public_get("/api/v3/exchangeInfo", &[]).await?;
        Ok(info.symbols.into_iter().filter_map(Self::to_market).collect())
    }

    async fn fetch_balances(&self) -> Result<HashMap<String, Decimal>, EngineError> {
        let account: AccountInfo = self
            .signed_request(Method::GET, "/api/v3/account", &[])
            .await?;

        let mut balances = HashMap::with_capacity(account.balances.len());
        for entry in account.balances {
            balances.insert(entry.asset, Self::parse_decimal(&entry.free, "free")?);
        }
        Ok(balances)
    }

    async fn fetch_ticker(&self, pair: &str) -> Result<Ticker, EngineError> {
        let ticker: Ticker24h = self
            .public_get(
                "/api/v3/ticker/24hr",
                &[("symbol", Self::to_symbol(pair))],
            )
            .await?;

        Ok(Ticker {
            bid: Self::parse_decimal(&ticker.bid_price, "bidPrice")?,
            ask: Self::parse_decimal(&ticker.ask_price, "askPrice")?,
            last: Self::parse_decimal(&ticker.last_price, "lastPrice")?,
        })
    }

    async fn fetch_order_book(&self, pair: &str, limit: u32) -> Result<OrderBook, EngineError> {
        let depth: Depth = self
            .public_get(
                "/api/v3/depth",
                &[
                    ("symbol", Self::to_symbol(pair)),
                    ("limit", Self::snap_depth_limit(limit).to_string()),
                ],
            )
            .await?;

        let parse_side = |levels: Vec<(String, String)>| -> Result<Vec<_>, EngineError> {
            levels
                .into_iter()
                .map(|(price, volume)| {
                    Ok((
                        Self::parse_decimal(&price, "depth price")?,
                        Self::parse_decimal(&volume, "depth volume")?,
                    ))
                })
                .collect()
        };

        Ok(OrderBook {
            bids: parse_side(depth.bids)?,
            asks: parse_side(depth.asks)?,
        })
    }

    async fn create_limit_order(
        &self,
        pair: &str,
        side: Side,
        price: Decimal,
        amount: Decimal,
    ) -> Result<Order, EngineError> {
        let side_param = match side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };

        let resp: OrderResponse = self
            .signed_request(
                Method::POST,
                "/api/v3/order",
                &[
                    ("symbol", Self::to_symbol(pair)),
                    ("side", side_param.to_string()),
                    ("type", "LIMIT".to_string()),
                    ("timeInForce", "GTC".to_string()),
                    ("quantity", amount.to_string()),
                    ("price", price.to_string()),
                    ("newOrderRespType", "RESULT".to_string()),
                ],
            )
            .await?;

        Self::to_order(resp)
    }

    async fn fetch_order(&self, order_id: &str, pair: &str) -> Result<Order, EngineError> {
        let resp: OrderResponse = self
            .signed_request(
                Method::GET,
                "/api/v3/order",
                &[
                    ("symbol", Self::to_symbol(pair)),
                    ("orderId", order_id.to_string()),
                ],
            )
            .await?;

        Self::to_order(resp)
    }

    async fn cancel_order(&self, order_id: &str, pair: &str) -> Result<(), EngineError> {
        let _: OrderResponse = self
            .signed_request(
                Method::DELETE,
                "/api/v3/order",
                &[
                    ("symbol", Self::to_symbol(pair)),
                    ("orderId", order_id.to_string()),
                ],
            )
            .await?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
