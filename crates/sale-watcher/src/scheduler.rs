//! Poll scheduler and tier selection.
//!
//! One task owns [`WatchState`] and drives every cycle from a single
//! `select!` loop, so cycles never overlap and no state is shared.

use crate::classifier::{fetch_context, ClassifierConfig, SaleClassifier};
use crate::decoder::decode_transfer;
use crate::dedup::{candidate_keys, chain_key, DedupLedger};
use crate::feed::parse_stream_message;
use crate::notifier::Notifier;
use crate::secondary::SecondarySource;
use crate::status::{spawn_status_reporter, Phase, StatusCounters};
use alloy_primitives::Address;
use chrono::Utc;
use collection_core::api::{ChainReader, StreamEvent};
use collection_core::config::{Config, SourceFlags};
use collection_core::types::{
    CandidateOrigin, SaleCandidate, SaleEvent, SaleSource, TRANSFER_TOPIC, UNKNOWN,
};
use collection_core::{Error, ErrorKind, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Last fully scanned block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorState {
    last_processed_block: Option<u64>,
}

impl CursorState {
    pub fn last_processed_block(&self) -> Option<u64> {
        self.last_processed_block
    }

    /// Block range to scan at `height`, or `None` when nothing is new.
    pub fn window(&self, height: u64, lookback: u64) -> Option<(u64, u64)> {
        let floor = height.saturating_sub(lookback);
        let from = match self.last_processed_block {
            Some(last) => (last + 1).max(floor),
            None => floor,
        };
        (from <= height).then_some((from, height))
    }

    /// Record a scanned block. Never moves backwards.
    pub fn advance(&mut self, block: u64) {
        self.last_processed_block = Some(self.last_processed_block.map_or(block, |b| b.max(block)));
    }
}

/// Scheduler-owned state, passed into every cycle.
#[derive(Debug)]
pub struct WatchState {
    pub cursor: CursorState,
    pub seen: DedupLedger,
    /// Emitted sales so far; the next sale gets `sequence + 1`.
    pub sequence: u64,
    /// Consecutive chain cycles that failed on transport.
    pub chain_failures: u32,
    /// The chain tier was given up for the rest of the process.
    pub chain_demoted: bool,
    pub stream_connected: bool,
    pub stream_backoff: bool,
    pub stream_exhausted: bool,
}

impl WatchState {
    pub fn new(dedup_capacity: usize) -> Self {
        Self {
            cursor: CursorState::default(),
            seen: DedupLedger::new(dedup_capacity),
            sequence: 0,
            chain_failures: 0,
            chain_demoted: false,
            stream_connected: false,
            stream_backoff: false,
            stream_exhausted: false,
        }
    }
}

/// Counts for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub scanned: usize,
    pub emitted: usize,
    pub skipped: usize,
}

/// Timing and tier settings for the scheduler.
#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub poll_interval: StdDuration,
    pub lookback_blocks: u64,
    pub item_delay: StdDuration,
    pub tier_failure_threshold: u32,
    pub status_interval: StdDuration,
    pub dedup_capacity: usize,
}

impl WatcherSettings {
    pub fn from_config(config: &Config) -> Self {
        let watcher = &config.watcher;
        Self {
            poll_interval: StdDuration::from_secs(watcher.poll_interval_secs.max(1)),
            lookback_blocks: watcher.lookback_blocks,
            item_delay: StdDuration::from_millis(watcher.item_delay_ms),
            tier_failure_threshold: watcher.tier_failure_threshold.max(1),
            status_interval: StdDuration::from_secs(watcher.status_interval_secs.max(1)),
            dedup_capacity: watcher.dedup_capacity,
        }
    }
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            poll_interval: StdDuration::from_secs(30),
            lookback_blocks: 50,
            item_delay: StdDuration::ZERO,
            tier_failure_threshold: 3,
            status_interval: StdDuration::from_secs(60),
            dedup_capacity: 1000,
        }
    }
}

/// Sale detection pipeline for one collection.
pub struct SaleWatcher {
    settings: WatcherSettings,
    collection: Address,
    chain: Option<Arc<dyn ChainReader>>,
    secondary: Option<SecondarySource>,
    classifier: SaleClassifier,
    notifier: Arc<dyn Notifier>,
    status: Arc<StatusCounters>,
}

impl SaleWatcher {
    pub fn new(
        settings: WatcherSettings,
        classifier: SaleClassifier,
        chain: Option<Arc<dyn ChainReader>>,
        secondary: Option<SecondarySource>,
        notifier: Arc<dyn Notifier>,
        status: Arc<StatusCounters>,
    ) -> Self {
        let secondary = secondary.filter(SecondarySource::is_enabled);
        Self {
            settings,
            collection: classifier.collection(),
            chain,
            secondary,
            classifier,
            notifier,
            status,
        }
    }

    /// Wire a watcher from configuration and already-built clients.
    pub fn from_config(
        config: &Config,
        chain: Option<Arc<dyn ChainReader>>,
        secondary: Option<SecondarySource>,
        notifier: Arc<dyn Notifier>,
        status: Arc<StatusCounters>,
    ) -> Result<Self> {
        let collection = config
            .collection
            .address
            .parse::<Address>()
            .map_err(|e| Error::Config {
                message: format!("invalid collection address: {}", e),
            })?;
        let classifier = SaleClassifier::new(ClassifierConfig::from_config(config), collection);

        Ok(Self::new(
            WatcherSettings::from_config(config),
            classifier,
            chain,
            secondary,
            notifier,
            status,
        ))
    }

    pub fn settings(&self) -> &WatcherSettings {
        &self.settings
    }

    pub fn new_state(&self) -> WatchState {
        WatchState::new(self.settings.dedup_capacity)
    }

    /// Tiers this watcher can poll.
    pub fn polling_sources(&self) -> SourceFlags {
        SourceFlags {
            stream: false,
            chain: self.chain.is_some(),
            marketplace_api: self.secondary.is_some(),
            page_scrape: self.secondary.is_some(),
        }
    }

    /// Scan new blocks for transfers, classify them and emit sales.
    ///
    /// Returns an error only for transport failures; in that case the cursor is
    /// left where it was and the window is scanned again next cycle.
    pub async fn run_chain_cycle(&self, state: &mut WatchState) -> Result<CycleReport> {
        let Some(chain) = &self.chain else {
            return Ok(CycleReport::default());
        };

        let height = chain.block_number().await?;
        let Some((from_block, to_block)) =
            state.cursor.window(height, self.settings.lookback_blocks)
        else {
            debug!(height, "No new blocks");
            return Ok(CycleReport::default());
        };

        let collection = format!("{:#x}", self.collection);
        let logs = chain
            .get_logs(&collection, TRANSFER_TOPIC, from_block, to_block)
            .await?;

        debug!(
            from_block,
            to_block,
            logs = logs.len(),
            "Scanning transfer logs"
        );

        let report = self.process_chain_logs(chain.as_ref(), state, &logs).await?;

        state.cursor.advance(to_block);
        self.status.set_last_processed_block(to_block);

        if report.emitted > 0 {
            info!(
                from_block,
                to_block,
                emitted = report.emitted,
                "Chain cycle emitted sales"
            );
        }
        Ok(report)
    }

    /// Decode, classify and emit a batch of raw logs in order.
    pub async fn process_chain_logs(
        &self,
        chain: &dyn ChainReader,
        state: &mut WatchState,
        logs: &[collection_core::api::RawLog],
    ) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        for (idx, log) in logs.iter().enumerate() {
            if idx > 0 && !self.settings.item_delay.is_zero() {
                tokio::time::sleep(self.settings.item_delay).await;
            }
            report.scanned += 1;

            let transfer = match decode_transfer(log) {
                Ok(transfer) => transfer,
                Err(e) => {
                    debug!(tx = %log.transaction_hash, error = %e, "Skipping undecodable log");
                    self.status.record_undecodable();
                    report.skipped += 1;
                    continue;
                }
            };

            if transfer.is_mint {
                debug!(tx = %transfer.tx_hash, token_id = %transfer.token_label(), "Skipping mint");
                report.skipped += 1;
                continue;
            }

            if state
                .seen
                .has(&chain_key(&transfer.tx_hash, transfer.log_index))
            {
                report.skipped += 1;
                continue;
            }

            let ctx = match fetch_context(chain, &transfer.tx_hash, self.collection).await {
                Ok(ctx) => ctx,
                Err(e) if e.kind() == ErrorKind::Transport => return Err(e),
                Err(e) => {
                    warn!(tx = %transfer.tx_hash, error = %e, "Discarding candidate");
                    self.status.record_classification_failure();
                    report.skipped += 1;
                    continue;
                }
            };

            let Some(candidate) = self.classifier.score_transfer(&transfer, &ctx) else {
                report.skipped += 1;
                continue;
            };

            if !candidate.is_sale {
                debug!(
                    tx = %transfer.tx_hash,
                    token_id = %transfer.token_label(),
                    score = candidate.confidence_score,
                    "Transfer below sale threshold"
                );
                report.skipped += 1;
                continue;
            }

            if self.emit(state, &candidate).await {
                report.emitted += 1;
            } else {
                report.skipped += 1;
            }
        }

        Ok(report)
    }

    /// Poll the marketplace adapter once. Never fails.
    pub async fn run_secondary_cycle(&self, state: &mut WatchState) -> CycleReport {
        let Some(secondary) = &self.secondary else {
            return CycleReport::default();
        };

        let fetch = secondary.fetch_activity().await;
        for _ in 0..fetch.failures {
            self.status.record_transport_failure();
        }
        if let Some(tier) = fetch.tier {
            self.status.set_active_tier(Some(tier));
        }

        let mut report = CycleReport::default();
        for record in &fetch.records {
            report.scanned += 1;
            let candidate = self.classifier.score_activity(record);
            if candidate.is_sale && self.emit(state, &candidate).await {
                report.emitted += 1;
            } else {
                report.skipped += 1;
            }
        }
        report
    }

    /// Classify and emit the records carried by one stream message.
    pub async fn handle_stream_message(&self, state: &mut WatchState, text: &str) -> CycleReport {
        let mut report = CycleReport::default();
        for record in parse_stream_message(text) {
            report.scanned += 1;
            let candidate = self.classifier.score_activity(&record);
            if candidate.is_sale && self.emit(state, &candidate).await {
                report.emitted += 1;
            } else {
                report.skipped += 1;
            }
        }
        report
    }

    /// Dedup, notify and mark seen. Returns `false` for duplicates.
    ///
    /// A failed notification is logged and counted; the sale is still marked
    /// seen so it is not delivered twice.
    pub async fn emit(&self, state: &mut WatchState, candidate: &SaleCandidate) -> bool {
        let (dedup_key, alias_keys) = candidate_keys(candidate);
        if state
            .seen
            .has_any(std::iter::once(dedup_key.as_str()).chain(alias_keys.iter().map(String::as_str)))
        {
            debug!(key = %dedup_key, "Duplicate sale suppressed");
            return false;
        }

        let event = build_event(candidate, dedup_key, alias_keys);
        state.sequence += 1;

        if let Err(e) = self.notifier.notify(&event, state.sequence).await {
            error!(
                sequence = state.sequence,
                key = %event.dedup_key,
                error = %e,
                "Failed to deliver sale notification"
            );
            self.status.record_notification_failure();
        }

        state.seen.add_all(event.keys());
        self.status.record_sale();
        true
    }

    /// Run one polling cycle over the best available tier.
    ///
    /// The chain tier is used until it fails `tier_failure_threshold` cycles in a
    /// row; after that the marketplace adapter takes over for good.
    pub async fn poll_cycle(&self, state: &mut WatchState) -> CycleReport {
        self.status.set_phase(Phase::Scanning);
        self.status.record_cycle();

        let use_chain = self.chain.is_some() && !state.chain_demoted;
        let report = if use_chain {
            match self.run_chain_cycle(state).await {
                Ok(report) => {
                    state.chain_failures = 0;
                    self.status.set_active_tier(Some(SaleSource::Chain));
                    report
                }
                Err(e) => {
                    state.chain_failures += 1;
                    self.status.record_transport_failure();
                    warn!(
                        error = %e,
                        consecutive_failures = state.chain_failures,
                        "Chain cycle failed, cursor not advanced"
                    );
                    if state.chain_failures >= self.settings.tier_failure_threshold
                        && self.secondary.is_some()
                    {
                        state.chain_demoted = true;
                        warn!(
                            threshold = self.settings.tier_failure_threshold,
                            "Chain tier demoted to marketplace polling"
                        );
                    }
                    CycleReport::default()
                }
            }
        } else {
            self.run_secondary_cycle(state).await
        };

        self.status.set_phase(if state.stream_backoff {
            Phase::Backoff
        } else {
            Phase::Idle
        });
        report
    }

    /// Apply one stream event to the state.
    pub async fn handle_stream_event(&self, state: &mut WatchState, event: StreamEvent) {
        match event {
            StreamEvent::Connected => {
                info!("Stream tier active");
                state.stream_connected = true;
                state.stream_backoff = false;
                self.status.set_connected(true);
                self.status.set_active_tier(Some(SaleSource::Stream));
                self.status.set_phase(Phase::Idle);
            }
            StreamEvent::Message(text) => {
                let report = self.handle_stream_message(state, &text).await;
                if report.emitted > 0 {
                    debug!(emitted = report.emitted, "Stream message emitted sales");
                }
            }
            StreamEvent::Backoff { attempt, delay } => {
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Stream in backoff");
                state.stream_connected = false;
                state.stream_backoff = true;
                self.status.set_connected(false);
                self.status.set_phase(Phase::Backoff);
            }
            StreamEvent::Exhausted => {
                warn!("Stream tier disabled, polling is now the active source");
                self.mark_stream_gone(state);
            }
        }
    }

    fn mark_stream_gone(&self, state: &mut WatchState) {
        state.stream_connected = false;
        state.stream_backoff = false;
        state.stream_exhausted = true;
        self.status.set_connected(false);
        self.status.set_phase(Phase::Idle);
    }

    /// Drive the watcher until `shutdown` resolves.
    ///
    /// Poll ticks are skipped while the stream is connected; missed ticks are
    /// dropped rather than queued.
    pub async fn run<F>(
        &self,
        mut state: WatchState,
        mut stream_rx: Option<mpsc::Receiver<StreamEvent>>,
        shutdown: F,
    ) -> WatchState
    where
        F: Future<Output = ()>,
    {
        let polling = self.polling_sources();
        info!(
            collection = %self.collection,
            chain = polling.chain,
            marketplace = polling.marketplace_api,
            stream = stream_rx.is_some(),
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            "Starting sale watcher"
        );

        let mut poll_tick = interval(self.settings.poll_interval);
        poll_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let reporter = spawn_status_reporter(self.status.clone(), self.settings.status_interval);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                event = next_stream_event(&mut stream_rx) => {
                    match event {
                        Some(event) => self.handle_stream_event(&mut state, event).await,
                        None => {
                            if !state.stream_exhausted {
                                warn!("Stream task ended");
                                self.mark_stream_gone(&mut state);
                            }
                            stream_rx = None;
                        }
                    }
                }
                _ = poll_tick.tick() => {
                    if state.stream_connected {
                        continue;
                    }
                    if polling.chain || polling.marketplace_api {
                        self.poll_cycle(&mut state).await;
                    }
                }
            }
        }

        reporter.abort();
        state
    }
}

async fn next_stream_event(rx: &mut Option<mpsc::Receiver<StreamEvent>>) -> Option<StreamEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn build_event(candidate: &SaleCandidate, dedup_key: String, alias_keys: Vec<String>) -> SaleEvent {
    let (seller, buyer) = match &candidate.origin {
        CandidateOrigin::Transfer(transfer) => (transfer.from.to_string(), transfer.to.to_string()),
        CandidateOrigin::External { seller, buyer, .. } => (
            seller.clone().unwrap_or_else(|| UNKNOWN.to_string()),
            buyer.clone().unwrap_or_else(|| UNKNOWN.to_string()),
        ),
    };

    SaleEvent {
        dedup_key,
        alias_keys,
        token_id: candidate.token_id().unwrap_or(UNKNOWN).to_string(),
        price: candidate.price_label(),
        seller,
        buyer,
        tx_hash: candidate.tx_hash().map(str::to_string),
        marketplace: candidate.marketplace_address.map(|a| a.to_string()),
        source: candidate.source,
        confidence: candidate.confidence_score,
        observed_at: Utc::now(),
    }
}
