//! Stream tier: connection supervision and message parsing.

use crate::reconnect::{ReconnectController, ReconnectDecision, ReconnectPolicy};
use crate::secondary::parse_activity_entry;
use collection_core::api::{StreamClient, StreamEvent};
use collection_core::types::{ActivityRecord, SaleSource};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Channel depth between the stream task and the scheduler.
pub const FEED_CHANNEL_CAPACITY: usize = 256;

const EVENT_TYPE_KEYS: &[&str] = &["event_type", "eventType", "type", "kind", "event"];
const PAYLOAD_KEYS: &[&str] = &["payload", "data", "item", "sale", "event"];
const SALE_TYPES: &[&str] = &["sale", "sold", "item_sold", "trade", "fill"];

/// Spawn the stream supervisor.
///
/// Connects, forwards messages, and reconnects with backoff until the policy
/// gives up, at which point [`StreamEvent::Exhausted`] is sent and the task ends.
/// The attempt counter resets only after a session that received frames, so a
/// server that accepts and immediately drops connections still backs off.
pub fn spawn_stream_feed(
    client: StreamClient,
    policy: ReconnectPolicy,
    tx: mpsc::Sender<StreamEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut controller = ReconnectController::new(policy);

        loop {
            let outcome = match client.connect().await {
                Ok(ws_stream) => {
                    if tx.send(StreamEvent::Connected).await.is_err() {
                        return;
                    }
                    let end = client.run_session(ws_stream, &tx).await;
                    if end.frames_received > 0 {
                        controller.on_stable_session();
                    }
                    end.result
                }
                Err(e) => Err(e),
            };

            if tx.is_closed() {
                return;
            }

            match &outcome {
                Ok(()) => info!(url = %client.url(), "Stream connection closed"),
                Err(e) => warn!(url = %client.url(), error = %e, "Stream connection failed"),
            }

            match controller.on_disconnect() {
                ReconnectDecision::Retry { attempt, delay } => {
                    info!(
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Reconnecting to stream"
                    );
                    if tx.send(StreamEvent::Backoff { attempt, delay }).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(delay).await;
                }
                ReconnectDecision::FallBack => {
                    warn!(
                        max_attempts = policy.max_attempts,
                        "Stream reconnect attempts exhausted, disabling stream tier"
                    );
                    let _ = tx.send(StreamEvent::Exhausted).await;
                    return;
                }
            }
        }
    })
}

/// Sale records carried by one stream message.
///
/// Accepts a single object, an array of objects, or an envelope with the record
/// under a payload key. Messages typed as something other than a sale are dropped.
pub fn parse_stream_message(text: &str) -> Vec<ActivityRecord> {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return Vec::new();
    };

    let mut records = Vec::new();
    collect_stream_records(&value, 0, &mut records);
    records
}

fn collect_stream_records(value: &Value, depth: usize, out: &mut Vec<ActivityRecord>) {
    if depth > 4 {
        return;
    }
    match value {
        Value::Array(items) => {
            for item in items {
                collect_stream_records(item, depth + 1, out);
            }
        }
        Value::Object(map) => {
            if let Some(kind) = EVENT_TYPE_KEYS
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
            {
                let kind = kind.to_ascii_lowercase();
                if !SALE_TYPES.iter().any(|t| kind.contains(t)) {
                    return;
                }
            }

            for key in PAYLOAD_KEYS {
                if let Some(inner @ (Value::Object(_) | Value::Array(_))) = map.get(*key) {
                    let before = out.len();
                    collect_stream_records(inner, depth + 1, out);
                    if out.len() > before {
                        return;
                    }
                }
            }

            if let Some(record) = parse_activity_entry(value, SaleSource::Stream) {
                if record.has_sale_fields() {
                    out.push(record);
                }
            }
        }
        _ => {}
    }
}
