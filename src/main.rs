//! EXABOT — exchange trade-action execution engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! validates the configured exchange accounts, and runs the main
//! poll→execute→confirm loop with graceful shutdown.

use anyhow::Result;
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use exabot::config::AppConfig;
use exabot::engine::ActionOrchestrator;
use exabot::exchange::binance::BinanceClient;
use exabot::exchange::ExchangeClient;
use exabot::remote::{ConfirmationSink, RemoteClient};
use exabot::storage::SqliteStore;
use exabot::types::{EngineError, TradeAction};

const BANNER: &str = r#"
 _______  __    _    ____   ___ _____
| ____\ \/ /   / \  | __ ) / _ \_   _|
|  _|  \  /   / _ \ |  _ \| | | || |
| |___ /  \  / ___ \| |_) | |_| || |
|_____/_/\_\/_/   \_\____/ \___/ |_|

  Exchange Action Execution Engine
  v0.1.0
"#;

/// One validated exchange account the loop trades on.
struct Account {
    name: String,
    orchestrator: ActionOrchestrator,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    println!("{BANNER}");
    info!(
        tick_interval_secs = cfg.engine.tick_interval_secs,
        exchanges = cfg.exchanges.len(),
        "EXABOT starting up"
    );

    // -- Initialise components -------------------------------------------

    let store = Arc::new(SqliteStore::connect(&cfg.storage.database_url).await?);

    let token = SecretString::new(AppConfig::resolve_env(&cfg.remote.token_env)?);
    let remote = Arc::new(RemoteClient::new(cfg.remote.base_url.clone(), token)?);
    let sink: Arc<dyn ConfirmationSink> = remote.clone();

    // Connecting doubles as the account validity probe: an account whose
    // credentials can't even load markets is skipped for this run.
    let mut accounts: HashMap<String, Account> = HashMap::new();
    for account_cfg in cfg.exchanges.iter().filter(|a| a.enabled) {
        let api_key = AppConfig::resolve_env(&account_cfg.api_key_env)?;
        let api_secret = SecretString::new(AppConfig::resolve_env(&account_cfg.api_secret_env)?);
        let api = Arc::new(BinanceClient::new(api_key, api_secret)?);

        match ExchangeClient::connect(api).await {
            Ok(client) => {
                info!(account = %account_cfg.name, "Exchange account validated");
                let orchestrator = ActionOrchestrator::new(
                    Arc::new(client),
                    store.clone(),
                    sink.clone(),
                    cfg.engine.orchestrator(),
                );
                accounts.insert(
                    account_cfg.name.clone(),
                    Account {
                        name: account_cfg.name.clone(),
                        orchestrator,
                    },
                );
            }
            Err(err) => {
                warn!(
                    account = %account_cfg.name,
                    error = %err,
                    "Account validation failed, skipping"
                );
            }
        }
    }

    if accounts.is_empty() {
        anyhow::bail!("No valid exchange accounts configured");
    }

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.engine.tick_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        accounts = accounts.len(),
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if accounts.is_empty() {
                    error!("All accounts disabled. Shutting down.");
                    break;
                }
                if let Err(e) = run_tick(&remote, &mut accounts).await {
                    // get_actions only hard-fails on misconfiguration
                    // (bad token / wrong URL); retrying won't help.
                    error!(error = %e, "Tick failed. Shutting down.");
                    break;
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    info!("EXABOT shut down cleanly.");
    Ok(())
}

/// One tick: fetch pending actions and run each account's batch.
///
/// Batches run concurrently across accounts, but actions within one
/// account run strictly in order — they share balances and rate limits.
async fn run_tick(
    remote: &RemoteClient,
    accounts: &mut HashMap<String, Account>,
) -> Result<()> {
    let names: Vec<String> = accounts.keys().cloned().collect();
    let batches = remote.get_actions(&names).await?;
    if batches.is_empty() {
        return Ok(());
    }

    let work = batches.iter().filter_map(|batch| {
        let account = accounts.get(&batch.exchange);
        if account.is_none() {
            warn!(exchange = %batch.exchange, "Actions for unknown account, ignoring");
        }
        account.map(|account| process_batch(account, &batch.actions, remote))
    });

    let disabled = futures::future::join_all(work).await;
    for name in disabled.into_iter().flatten() {
        error!(account = %name, "Disabling account after operational failure");
        accounts.remove(&name);
    }
    Ok(())
}

/// Run one account's actions in order. Returns the account name when an
/// operational failure means the account must stop trading.
async fn process_batch(
    account: &Account,
    actions: &[TradeAction],
    sink: &RemoteClient,
) -> Option<String> {
    info!(
        account = %account.name,
        actions = actions.len(),
        "Processing action batch"
    );

    for (index, action) in actions.iter().enumerate() {
        match account.orchestrator.perform(action).await {
            Ok(summary) => {
                info!(
                    account = %account.name,
                    action_id = action.action_id,
                    %summary,
                    "Action done"
                );
                if let Err(err) = sink
                    .confirm_action(action.action_id, true, &summary.to_string())
                    .await
                {
                    warn!(
                        action_id = action.action_id,
                        error = %err,
                        "Confirmation delivery failed"
                    );
                }
            }
            Err(err) => {
                error!(
                    account = %account.name,
                    action_id = action.action_id,
                    error = %err,
                    "Action failed"
                );
                if let Err(e) = sink
                    .confirm_action(action.action_id, false, &err.to_string())
                    .await
                {
                    warn!(
                        action_id = action.action_id,
                        error = %e,
                        "Confirmation delivery failed"
                    );
                }

                if matches!(err, EngineError::Operational(_)) {
                    let skipped = actions.len() - index - 1;
                    error!(
                        account = %account.name,
                        skipped,
                        "Operational failure, abandoning remaining actions"
                    );
                    return Some(account.name.clone());
                }
            }
        }
    }

    None
}

/// Set up tracing with env-filter. `EXABOT_LOG_JSON` switches to JSON
/// output for log shippers.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("exabot=info"));

    let json_logging = std::env::var("EXABOT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
