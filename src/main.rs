//! ws-subscribe
//!
//! Connects to the Wealthsimple subscription endpoint and prints messages from
//! the requested streams.
//!
//! ## Usage
//!
//! ```bash
//! # Activity feed, until Ctrl+C
//! WS_ACCESS_TOKEN=... ws-subscribe --activity
//!
//! # Quotes for two securities for 60 seconds
//! ws-subscribe --quote-sec-id sec-s-aaa --quote-sec-id sec-s-bbb --seconds 60
//!
//! # Identity updates, identity id taken from the token
//! ws-subscribe --identity
//!
//! # Balance changes
//! ws-subscribe --custodian-account-ids ca-1,ca-2
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::Local;
use clap::Parser;
use futures_util::{Stream, StreamExt};
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wealthsimple_realtime::config::{default_config_path, split_csv};
use wealthsimple_realtime::subscription::streams::quote_fields;
use wealthsimple_realtime::{Config, Credentials, InboundMessage, SubscriptionClient};

#[derive(Parser, Debug)]
#[command(name = "ws-subscribe")]
#[command(about = "Stream real-time Wealthsimple subscription messages")]
struct Args {
    /// Path to config file (defaults to the user config dir, if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// OAuth access token
    #[arg(long, env = "WS_ACCESS_TOKEN", hide_env_values = true)]
    access_token: String,

    /// Run for this many seconds (default: until interrupted)
    #[arg(long)]
    seconds: Option<u64>,

    /// Subscribe to ActivityFeedUpdate
    #[arg(long)]
    activity: bool,

    /// Identity ID for identityAccountCoreUpdates
    #[arg(long, env = "WS_IDENTITY_ID")]
    identity_id: Option<String>,

    /// Subscribe to identity updates using the identity id from the token
    #[arg(long)]
    identity: bool,

    /// Security ID for QuoteV2BySecurityIdStream (repeatable)
    #[arg(long = "quote-sec-id")]
    quote_sec_id: Vec<String>,

    /// Comma-separated security IDs for quote subscriptions
    #[arg(long, env = "WS_QUOTE_SEC_IDS")]
    quote_sec_ids: Option<String>,

    /// Currency for quotes
    #[arg(long)]
    currency: Option<String>,

    /// Comma-separated custodian account IDs for balance changes
    #[arg(long, env = "WS_CUSTODIAN_ACCOUNT_IDS")]
    custodian_account_ids: Option<String>,

    /// Device ID sent in connection_init
    #[arg(long)]
    device_id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("wealthsimple_realtime=info".parse()?),
        )
        .init();

    let args = Args::parse();

    // Load config
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            let path = default_config_path();
            if path.exists() {
                Config::load(&path)
                    .with_context(|| format!("Failed to load config from {}", path.display()))?
            } else {
                Config::default()
            }
        }
    };
    config.apply_env();
    if let Some(device_id) = &args.device_id {
        config.device_id = Some(device_id.clone());
    }

    let mut quote_ids = args.quote_sec_id.clone();
    if let Some(csv) = &args.quote_sec_ids {
        quote_ids.extend(split_csv(csv));
    }
    let custodian_ids = args
        .custodian_account_ids
        .as_deref()
        .map(split_csv)
        .unwrap_or_default();

    let mut credentials = Credentials::new(args.access_token.clone());
    if let Some(identity_id) = &args.identity_id {
        credentials = credentials.with_identity_id(identity_id.clone());
    }

    info!("Connecting to Wealthsimple subscription service...");
    let mut client = SubscriptionClient::connect(&config, credentials)
        .await
        .context("Connection error")?;
    info!(
        endpoint = %client.endpoint(),
        subprotocol = ?client.subprotocol(),
        acknowledged = client.is_acknowledged(),
        "WebSocket connection established"
    );

    let mut tasks = JoinSet::new();

    if args.activity {
        println!("\n[SUBSCRIPTION] Activity feed updates");
        tasks.spawn(print_messages("activity", client.stream_activity_updates()));
    }

    if args.identity || args.identity_id.is_some() {
        match client.stream_identity_updates(args.identity_id.as_deref()) {
            Ok(stream) => {
                println!(
                    "\n[SUBSCRIPTION] Identity updates for {}",
                    client.identity_id().unwrap_or("?")
                );
                tasks.spawn(print_messages("identity", stream));
            }
            Err(e) => warn!(error = %e, "Skipping identity updates"),
        }
    }

    if !quote_ids.is_empty() {
        println!("\n[SUBSCRIPTION] Quotes for securities: {}", quote_ids.join(", "));
        tasks.spawn(print_messages(
            "quotes",
            client.stream_quotes(&quote_ids, args.currency.as_deref()),
        ));
    }

    if !custodian_ids.is_empty() {
        println!(
            "\n[SUBSCRIPTION] Balance changes for accounts: {}",
            custodian_ids.join(", ")
        );
        tasks.spawn(print_messages(
            "balances",
            client.stream_balance_changes(&custodian_ids),
        ));
    }

    if tasks.is_empty() {
        println!("\nNo subscriptions requested. Use --activity, --quote-sec-id, etc.");
        client.close().await;
        return Ok(());
    }

    // Keep-alive
    tokio::time::sleep(Duration::from_millis(500)).await;
    client.ping()?;
    println!("\n[SENT] Ping message");
    println!("\nConnected. Listening for messages... (Ctrl+C to exit)\n");

    let deadline = async {
        match args.seconds {
            Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = async { while tasks.join_next().await.is_some() {} } => {
            info!("All subscriptions ended");
        }
        _ = deadline => {
            println!("\nTimed out after {}s; closing...", args.seconds.unwrap_or_default());
        }
        _ = tokio::signal::ctrl_c() => {
            println!("\nInterrupted; closing...");
        }
    }

    // Cancelling the tasks drops their streams, which unregisters them
    tasks.shutdown().await;
    client.close().await;
    println!("\nWebSocket closed");
    Ok(())
}

async fn print_messages<S>(label: &'static str, mut stream: S)
where
    S: Stream<Item = InboundMessage> + Unpin,
{
    while let Some(message) = stream.next().await {
        println!(
            "\n[RECEIVED {}] {} type: {}",
            Local::now().format("%H:%M:%S%.3f"),
            label,
            message.kind.as_str()
        );
        match serde_json::to_string_pretty(&message.to_json()) {
            Ok(pretty) => println!("{}", pretty),
            Err(e) => warn!(error = %e, "Failed to format message"),
        }

        if let Some(quote) = message.data().and_then(quote_fields) {
            println!(
                "  └─ Price: {}, Bid: {}, Ask: {}",
                quote["price"], quote["bid"], quote["ask"]
            );
        }
    }
    info!(stream = label, "Stream ended");
}
