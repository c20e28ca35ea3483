//! Sale Watcher
//!
//! Detects sales of one NFT collection from chain transfers, marketplace
//! activity and a marketplace event stream, and delivers each sale once.

pub mod classifier;
pub mod decoder;
pub mod dedup;
pub mod feed;
pub mod notifier;
pub mod reconnect;
pub mod scheduler;
pub mod secondary;
pub mod status;

pub use classifier::{ClassifierConfig, SaleClassifier, ScoreWeights};
pub use decoder::decode_transfer;
pub use dedup::DedupLedger;
pub use feed::{parse_stream_message, spawn_stream_feed};
pub use notifier::{render_sale_message, LogNotifier, MessageContext, Notifier, WebhookNotifier};
pub use reconnect::{ReconnectController, ReconnectDecision, ReconnectPolicy};
pub use scheduler::{CursorState, CycleReport, SaleWatcher, WatchState, WatcherSettings};
pub use secondary::{SecondaryFetch, SecondarySource};
pub use status::{spawn_status_reporter, Phase, StatusCounters, StatusSnapshot};
