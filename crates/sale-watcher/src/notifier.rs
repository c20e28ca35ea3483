//! Sale notification delivery.

use async_trait::async_trait;
use collection_core::config::{AlertsConfig, Config};
use collection_core::types::SaleEvent;
use collection_core::{Error, Result};
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

/// Consumer of finalized sales.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one sale. `sequence` counts emitted sales from 1.
    async fn notify(&self, event: &SaleEvent, sequence: u64) -> Result<()>;
}

/// Presentation details shared by the notifiers.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub collection_name: String,
    pub explorer_url: String,
}

impl MessageContext {
    pub fn from_config(config: &Config) -> Self {
        Self {
            collection_name: config.collection.display_name().to_string(),
            explorer_url: config.chain.explorer_url.trim_end_matches('/').to_string(),
        }
    }

    fn tx_link(&self, tx_hash: &str) -> String {
        format!("{}/tx/{}", self.explorer_url, tx_hash)
    }
}

/// Plain-text body used by every channel.
pub fn render_sale_message(
    event: &SaleEvent,
    sequence: u64,
    collection_name: &str,
    explorer_url: &str,
) -> String {
    let mut lines = vec![
        format!("{} sale #{}", collection_name, sequence),
        format!("Token: #{}", event.token_id),
        format!("Price: {}", event.price),
        format!("Seller: {}", event.seller),
        format!("Buyer: {}", event.buyer),
    ];
    if let Some(marketplace) = &event.marketplace {
        lines.push(format!("Marketplace: {}", marketplace));
    }
    if let Some(tx_hash) = &event.tx_hash {
        lines.push(format!(
            "Tx: {}/tx/{}",
            explorer_url.trim_end_matches('/'),
            tx_hash
        ));
    }
    lines.push(format!(
        "Source: {} ({}% confidence)",
        event.source, event.confidence
    ));
    lines.join("\n")
}

/// Writes each sale to the log.
#[derive(Debug, Clone)]
pub struct LogNotifier {
    context: MessageContext,
}

impl LogNotifier {
    pub fn new(context: MessageContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &SaleEvent, sequence: u64) -> Result<()> {
        let message = render_sale_message(
            event,
            sequence,
            &self.context.collection_name,
            &self.context.explorer_url,
        );
        info!(
            sequence,
            token_id = %event.token_id,
            price = %event.price,
            source = %event.source,
            dedup_key = %event.dedup_key,
            "Sale detected\n{}",
            message
        );
        Ok(())
    }
}

/// Discord webhook and Telegram bot delivery.
pub struct WebhookNotifier {
    alerts: AlertsConfig,
    context: MessageContext,
    http_client: reqwest::Client,
}

impl WebhookNotifier {
    /// Discord embed accent colour.
    const EMBED_COLOR: u32 = 0x2ecc71;

    pub fn new(alerts: AlertsConfig, context: MessageContext, timeout: StdDuration) -> Result<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            alerts,
            context,
            http_client,
        })
    }

    async fn send_telegram(&self, token: &str, chat_id: &str, message: &str) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", token);

        self.http_client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": message,
                "disable_web_page_preview": true
            }))
            .send()
            .await?
            .error_for_status()?;

        debug!("Sent Telegram alert");
        Ok(())
    }

    async fn send_discord(&self, webhook_url: &str, event: &SaleEvent, sequence: u64) -> Result<()> {
        let mut fields = vec![
            serde_json::json!({ "name": "Price", "value": event.price, "inline": true }),
            serde_json::json!({ "name": "Seller", "value": event.seller, "inline": true }),
            serde_json::json!({ "name": "Buyer", "value": event.buyer, "inline": true }),
        ];
        if let Some(tx_hash) = &event.tx_hash {
            fields.push(serde_json::json!({
                "name": "Transaction",
                "value": format!("[view]({})", self.context.tx_link(tx_hash)),
                "inline": false
            }));
        }

        self.http_client
            .post(webhook_url)
            .json(&serde_json::json!({
                "embeds": [{
                    "title": format!("{} #{} sold", self.context.collection_name, event.token_id),
                    "color": Self::EMBED_COLOR,
                    "fields": fields,
                    "footer": { "text": format!("Sale #{} · {}", sequence, event.source) },
                    "timestamp": event.observed_at.to_rfc3339(),
                }]
            }))
            .send()
            .await?
            .error_for_status()?;

        debug!("Sent Discord alert");
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &SaleEvent, sequence: u64) -> Result<()> {
        let mut attempted = 0;
        let mut failed = 0;

        if let (Some(token), Some(chat_id)) = (
            &self.alerts.telegram_bot_token,
            &self.alerts.telegram_chat_id,
        ) {
            attempted += 1;
            let message = render_sale_message(
                event,
                sequence,
                &self.context.collection_name,
                &self.context.explorer_url,
            );
            if let Err(e) = self.send_telegram(token, chat_id, &message).await {
                failed += 1;
                warn!("Failed to send Telegram alert: {}", e);
            }
        }

        if let Some(webhook_url) = &self.alerts.discord_webhook_url {
            attempted += 1;
            if let Err(e) = self.send_discord(webhook_url, event, sequence).await {
                failed += 1;
                warn!("Failed to send Discord alert: {}", e);
            }
        }

        if attempted > 0 && failed == attempted {
            return Err(Error::Notification(format!(
                "all {} channels failed for sale #{}",
                attempted, sequence
            )));
        }
        Ok(())
    }
}
