//! Status counters and the health endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use collection_core::types::SaleSource;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

/// Scheduler phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Scanning,
    Backoff,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Phase::Scanning,
            2 => Phase::Backoff,
            _ => Phase::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Phase::Idle => 0,
            Phase::Scanning => 1,
            Phase::Backoff => 2,
        }
    }
}

const NO_TIER: u8 = u8::MAX;
const NO_BLOCK: u64 = u64::MAX;

fn tier_to_u8(tier: Option<SaleSource>) -> u8 {
    match tier {
        Some(SaleSource::Chain) => 0,
        Some(SaleSource::Api) => 1,
        Some(SaleSource::Scrape) => 2,
        Some(SaleSource::Stream) => 3,
        None => NO_TIER,
    }
}

fn tier_from_u8(value: u8) -> Option<SaleSource> {
    match value {
        0 => Some(SaleSource::Chain),
        1 => Some(SaleSource::Api),
        2 => Some(SaleSource::Scrape),
        3 => Some(SaleSource::Stream),
        _ => None,
    }
}

/// Lock-free counters written by the scheduler and read by reporters.
#[derive(Debug)]
pub struct StatusCounters {
    started_at: DateTime<Utc>,
    cycles_run: AtomicU64,
    sales_emitted: AtomicU64,
    last_processed_block: AtomicU64,
    is_connected: AtomicBool,
    active_tier: AtomicU8,
    phase: AtomicU8,
    undecodable_logs: AtomicU64,
    classification_failures: AtomicU64,
    notification_failures: AtomicU64,
    transport_failures: AtomicU64,
}

impl Default for StatusCounters {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            cycles_run: AtomicU64::new(0),
            sales_emitted: AtomicU64::new(0),
            last_processed_block: AtomicU64::new(NO_BLOCK),
            is_connected: AtomicBool::new(false),
            active_tier: AtomicU8::new(NO_TIER),
            phase: AtomicU8::new(Phase::Idle.as_u8()),
            undecodable_logs: AtomicU64::new(0),
            classification_failures: AtomicU64::new(0),
            notification_failures: AtomicU64::new(0),
            transport_failures: AtomicU64::new(0),
        }
    }
}

impl StatusCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&self) {
        self.cycles_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sale(&self) {
        self.sales_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_undecodable(&self) {
        self.undecodable_logs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_classification_failure(&self) {
        self.classification_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_failure(&self) {
        self.notification_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_failure(&self) {
        self.transport_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_last_processed_block(&self, block: u64) {
        self.last_processed_block.store(block, Ordering::Relaxed);
    }

    pub fn set_connected(&self, connected: bool) {
        self.is_connected.store(connected, Ordering::Relaxed);
    }

    pub fn set_active_tier(&self, tier: Option<SaleSource>) {
        self.active_tier.store(tier_to_u8(tier), Ordering::Relaxed);
    }

    pub fn set_phase(&self, phase: Phase) {
        self.phase.store(phase.as_u8(), Ordering::Relaxed);
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let block = self.last_processed_block.load(Ordering::Relaxed);
        StatusSnapshot {
            started_at: self.started_at,
            cycles_run: self.cycles_run.load(Ordering::Relaxed),
            sales_emitted: self.sales_emitted.load(Ordering::Relaxed),
            last_processed_block: (block != NO_BLOCK).then_some(block),
            is_connected: self.is_connected.load(Ordering::Relaxed),
            active_tier: tier_from_u8(self.active_tier.load(Ordering::Relaxed)),
            phase: self.phase(),
            undecodable_logs: self.undecodable_logs.load(Ordering::Relaxed),
            classification_failures: self.classification_failures.load(Ordering::Relaxed),
            notification_failures: self.notification_failures.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub started_at: DateTime<Utc>,
    pub cycles_run: u64,
    pub sales_emitted: u64,
    pub last_processed_block: Option<u64>,
    pub is_connected: bool,
    pub active_tier: Option<SaleSource>,
    pub phase: Phase,
    pub undecodable_logs: u64,
    pub classification_failures: u64,
    pub notification_failures: u64,
    pub transport_failures: u64,
}

impl StatusSnapshot {
    /// Emit one structured status line.
    pub fn log(&self) {
        info!(
            cycles_run = self.cycles_run,
            sales_emitted = self.sales_emitted,
            last_processed_block = ?self.last_processed_block,
            is_connected = self.is_connected,
            active_tier = ?self.active_tier,
            phase = ?self.phase,
            undecodable_logs = self.undecodable_logs,
            classification_failures = self.classification_failures,
            notification_failures = self.notification_failures,
            transport_failures = self.transport_failures,
            "Watcher status"
        );
    }
}

/// Log a status line every `period` on its own task, independent of scan cycles.
pub fn spawn_status_reporter(
    counters: Arc<StatusCounters>,
    period: StdDuration,
) -> JoinHandle<()> {
    tokio::spawn(report_status(counters, period, |snapshot| snapshot.log()))
}

async fn report_status<F>(counters: Arc<StatusCounters>, period: StdDuration, mut report: F)
where
    F: FnMut(StatusSnapshot),
{
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tick.tick().await;

    loop {
        tick.tick().await;
        report(counters.snapshot());
    }
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub watcher: StatusSnapshot,
}

/// Health check endpoint.
pub async fn health_check(State(counters): State<Arc<StatusCounters>>) -> Json<HealthResponse> {
    let watcher = counters.snapshot();
    let status = if watcher.active_tier.is_some() {
        "healthy"
    } else {
        "starting"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        watcher,
    })
}

pub fn health_router(counters: Arc<StatusCounters>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(counters)
}

/// Serve `/health` until the process exits.
pub async fn serve_health(addr: &str, counters: Arc<StatusCounters>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Health endpoint listening");
    axum::serve(listener, health_router(counters)).await?;
    Ok(())
}
