//! Sale Watcher binary.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use collection_core::api::{ChainClient, ChainReader, MarketplaceClient, StreamClient};
use collection_core::config::Config;
use collection_core::types::{SaleEvent, SaleSource};
use sale_watcher::feed::FEED_CHANNEL_CAPACITY;
use sale_watcher::{
    spawn_stream_feed, LogNotifier, MessageContext, Notifier, ReconnectPolicy, SaleWatcher,
    SecondarySource, StatusCounters, WebhookNotifier,
};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "sale-watcher", version, about = "Watch an NFT collection for sales")]
struct Args {
    /// Configuration file layered under `WATCH__*` environment variables.
    #[arg(long, short)]
    config: Option<String>,

    /// Send one synthetic sale through the notifier and exit.
    #[arg(long)]
    test_notification: bool,

    /// Run a single polling cycle and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sale_watcher=info,collection_core=info,tungstenite=warn,hyper=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path),
        None => Config::from_env(),
    }
    .context("Failed to load configuration")?;

    info!(
        collection = %config.collection.display_name(),
        address = %config.collection.address,
        "Starting Sale Watcher"
    );

    let timeout = StdDuration::from_secs(config.watcher.request_timeout_secs);
    let notifier = build_notifier(&config, timeout)?;

    if args.test_notification {
        return send_test_notification(notifier.as_ref()).await;
    }

    let sources = config.effective_sources();

    let chain: Option<Arc<dyn ChainReader>> = match config.chain.get_rpc_url() {
        Some(url) if sources.chain => Some(Arc::new(ChainClient::new(url, timeout)?)),
        _ => None,
    };

    let secondary = match &config.marketplace.base_url {
        Some(base_url) if sources.marketplace_api || sources.page_scrape => {
            let client = MarketplaceClient::new(
                base_url.clone(),
                &config.marketplace.api_key_header,
                config.marketplace.api_key.clone(),
                timeout,
            )?;
            Some(SecondarySource::from_config(Arc::new(client), &config, sources))
        }
        _ => None,
    };

    let status = Arc::new(StatusCounters::new());
    let watcher = SaleWatcher::from_config(&config, chain, secondary, notifier, status.clone())?;
    let mut state = watcher.new_state();

    if args.once {
        let report = watcher.poll_cycle(&mut state).await;
        info!(
            scanned = report.scanned,
            emitted = report.emitted,
            skipped = report.skipped,
            "Single cycle complete"
        );
        status.snapshot().log();
        return Ok(());
    }

    if let Some(addr) = config.status.bind_addr.clone() {
        let counters = status.clone();
        tokio::spawn(async move {
            if let Err(e) = sale_watcher::status::serve_health(&addr, counters).await {
                warn!("Health endpoint stopped: {}", e);
            }
        });
    }

    let stream_rx = match &config.stream.url {
        Some(url) if sources.stream => {
            let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
            let client = StreamClient::new(url.clone(), &config.stream);
            spawn_stream_feed(client, ReconnectPolicy::from_config(&config.stream), tx);
            Some(rx)
        }
        _ => None,
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let state = watcher.run(state, stream_rx, shutdown).await;
    info!(sales = state.sequence, "Sale Watcher stopped");
    status.snapshot().log();

    Ok(())
}

fn build_notifier(config: &Config, timeout: StdDuration) -> Result<Arc<dyn Notifier>> {
    let context = MessageContext::from_config(config);
    if config.alerts.has_channels() {
        Ok(Arc::new(WebhookNotifier::new(
            config.alerts.clone(),
            context,
            timeout,
        )?))
    } else {
        warn!("No alert channels configured, sales will only be logged");
        Ok(Arc::new(LogNotifier::new(context)))
    }
}

async fn send_test_notification(notifier: &dyn Notifier) -> Result<()> {
    let event = SaleEvent {
        dedup_key: format!("test:{}", Utc::now().timestamp()),
        alias_keys: Vec::new(),
        token_id: "1".to_string(),
        price: "0.01 ETH".to_string(),
        seller: "0x0000000000000000000000000000000000000001".to_string(),
        buyer: "0x0000000000000000000000000000000000000002".to_string(),
        tx_hash: None,
        marketplace: None,
        source: SaleSource::Api,
        confidence: 100,
        observed_at: Utc::now(),
    };

    notifier
        .notify(&event, 0)
        .await
        .context("Test notification failed")?;
    info!("Test notification sent");
    Ok(())
}
