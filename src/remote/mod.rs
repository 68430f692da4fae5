//! Remote command source.
//!
//! The engine does not invent trades; it polls a central service for
//! pending actions, executes them, and reports the outcome back. This
//! module holds the `ConfirmationSink` reporting seam and the HTTP client
//! that implements both directions.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::types::ActionBatch;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Short timeout: a slow control plane must not stall the trading loop.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(7);

/// Protocol version reported with every confirmation.
const API_VERSION: &str = "1.0";

// ---------------------------------------------------------------------------
// Reporting seam
// ---------------------------------------------------------------------------

/// Where action outcomes are reported.
#[async_trait]
pub trait ConfirmationSink: Send + Sync {
    /// Report an action finished: `status` is success/failure, `response`
    /// the human-readable summary or error.
    async fn confirm_action(&self, action_id: i64, status: bool, response: &str) -> Result<()>;

    /// Report the effective tradable amount after a deposit conversion
    /// changed what the action can actually buy.
    async fn sync_amount(&self, action_id: i64, balance: Decimal) -> Result<()>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

pub struct RemoteClient {
    http: Client,
    base_url: String,
    token: SecretString,
}

impl RemoteClient {
    pub fn new(base_url: String, token: SecretString) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client for the action service")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.token.expose_secret())
    }

    /// Pending actions for the given exchanges.
    ///
    /// Transient failures (timeouts, connection errors, maintenance 502,
    /// unexpected statuses) resolve to an empty batch list — the next tick
    /// will ask again. 401/404 mean the service is misconfigured for us and
    /// are hard errors.
    pub async fn get_actions(&self, exchanges: &[String]) -> Result<Vec<ActionBatch>> {
        let url = format!("{}/actions", self.base_url);
        debug!(%url, ?exchanges, "Fetching pending actions");

        let resp = match self
            .http
            .get(&url)
            .header("Authorization", self.auth_header())
            .query(&[("exchanges", exchanges.join(","))])
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                warn!(error = %err, "Action service unreachable, skipping tick");
                return Ok(Vec::new());
            }
        };

        let status = resp.status();
        if status == StatusCode::OK {
            let batches: Vec<ActionBatch> = resp
                .json()
                .await
                .context("Failed to parse action list")?;
            if !batches.is_empty() {
                info!(batches = batches.len(), "Received pending actions");
            }
            Ok(batches)
        } else if status == StatusCode::BAD_GATEWAY {
            info!("Action service under maintenance");
            Ok(Vec::new())
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::NOT_FOUND {
            bail!("Action service rejected us ({status}): check token and base URL")
        } else {
            warn!(%status, "Unexpected action service response, skipping tick");
            Ok(Vec::new())
        }
    }

    async fn put_action(&self, action_id: i64, payload: serde_json::Value) -> Result<()> {
        let url = format!("{}/actions/{action_id}", self.base_url);

        let resp = self
            .http
            .put(&url)
            .header("Authorization", self.auth_header())
            .json(&payload)
            .send()
            .await
            .context("Action service request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Action update rejected ({status}): {body}");
        }
        Ok(())
    }
}

/// Body of a confirmation PUT. `balance` is only present for amount syncs.
fn confirmation_payload(
    action_id: i64,
    status: bool,
    response: &str,
    balance: Option<Decimal>,
) -> serde_json::Value {
    let mut payload = json!({
        "action_id": action_id,
        "status": status,
        "response": response,
        "version": API_VERSION,
    });
    if let Some(balance) = balance {
        payload["balance"] = json!(balance);
    }
    payload
}

#[async_trait]
impl ConfirmationSink for RemoteClient {
    async fn confirm_action(&self, action_id: i64, status: bool, response: &str) -> Result<()> {
        debug!(action_id, status, "Confirming action");
        self.put_action(action_id, confirmation_payload(action_id, status, response, None))
            .await
    }

    async fn sync_amount(&self, action_id: i64, balance: Decimal) -> Result<()> {
        debug!(action_id, %balance, "Syncing effective amount");
        self.put_action(
            action_id,
            confirmation_payload(action_id, true, "amount synced", Some(balance)),
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
