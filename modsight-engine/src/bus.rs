//! Serializing scrapes against single-consumer serial buses.
//!
//! An RS-485/RS-232 bus carries one conversation at a time, so concurrent
//! scrape requests for the same serial target must not interleave transport
//! operations. TCP targets are independently addressable and skip the
//! coordination entirely.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::def::{BlockedRange, MetricDef};
use crate::error::ScrapeError;
use crate::scrape::{Sample, run_scrape};
use crate::transport::{ClientFactory, ConnectSpec, Protocol};

/// Per-target coordinator statistics, for the exporter's own telemetry.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusStats {
    /// Requests currently blocked waiting for the bus.
    pub waiting: u64,
    /// Cumulative seconds spent waiting for the bus.
    pub lock_wait_seconds: f64,
    /// Scrape attempts repeated after a transport failure.
    pub retries: u64,
}

#[derive(Default)]
struct TargetState {
    token: Arc<AsyncMutex<()>>,
    stats: BusStats,
}

/// Hands out one exclusivity token per physical target, created lazily on
/// first use.
///
/// The outer lock only guards entry creation and bookkeeping and is never
/// held across an await point; callers for different targets never block
/// each other.
#[derive(Default)]
pub struct BusCoordinator {
    targets: parking_lot::Mutex<HashMap<String, TargetState>>,
}

impl BusCoordinator {
    fn token(&self, target: &str) -> Arc<AsyncMutex<()>> {
        let mut targets = self.targets.lock();
        targets.entry(target.to_string()).or_default().token.clone()
    }

    /// Count a caller entering the wait; returns how many are now queued.
    fn begin_wait(&self, target: &str) -> u64 {
        let mut targets = self.targets.lock();
        let state = targets.entry(target.to_string()).or_default();
        state.stats.waiting += 1;
        state.stats.waiting
    }

    fn end_wait(&self, target: &str, waited: Duration) {
        let mut targets = self.targets.lock();
        if let Some(state) = targets.get_mut(target) {
            state.stats.waiting = state.stats.waiting.saturating_sub(1);
            state.stats.lock_wait_seconds += waited.as_secs_f64();
        }
    }

    fn note_retry(&self, target: &str) {
        let mut targets = self.targets.lock();
        if let Some(state) = targets.get_mut(target) {
            state.stats.retries += 1;
        }
    }

    /// Snapshot of the per-target statistics.
    pub fn stats(&self) -> HashMap<String, BusStats> {
        self.targets
            .lock()
            .iter()
            .map(|(target, state)| (target.clone(), state.stats))
            .collect()
    }
}

/// Retry policy applied to serial targets while the token is held.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub retries: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            retries: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

/// Everything the engine needs to scrape one module from one target.
pub struct ScrapeJob<'a> {
    pub spec: ConnectSpec,
    /// Module name injected into every sample's labels.
    pub module: &'a str,
    pub defs: &'a [MetricDef],
    pub sensitivity: u16,
    pub blocked: &'a [BlockedRange],
    pub retry: RetryPolicy,
}

/// Drives whole scrapes: connect, plan, read, decode, coordinated per bus.
pub struct ScrapeEngine {
    factory: Arc<dyn ClientFactory>,
    coordinator: BusCoordinator,
}

impl ScrapeEngine {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        ScrapeEngine {
            factory,
            coordinator: BusCoordinator::default(),
        }
    }

    /// Per-target bus statistics for self-telemetry.
    pub fn bus_stats(&self) -> HashMap<String, BusStats> {
        self.coordinator.stats()
    }

    /// Run one scrape request.
    ///
    /// Serial targets hold the per-target token for the whole call, retries
    /// included: a half-recovered serial line handed to a different caller
    /// is worse than a slower single caller retrying. The error of the last
    /// attempt propagates. TCP targets connect straight away and are never
    /// retried here.
    pub async fn scrape(&self, job: &ScrapeJob<'_>) -> Result<Vec<Sample>, ScrapeError> {
        if job.spec.protocol != Protocol::Serial {
            return self.attempt(job).await;
        }

        let target = job.spec.target.as_str();
        let token = self.coordinator.token(target);

        let queued = self.coordinator.begin_wait(target);
        if queued > 1 {
            info!(
                "serial bus '{}' is busy, waiting behind {} other request(s)",
                target,
                queued - 1
            );
        }
        let wait_started = Instant::now();
        let _guard = token.lock().await;
        self.coordinator.end_wait(target, wait_started.elapsed());

        let mut result = self.attempt(job).await;
        let mut attempt = 0;
        while attempt < job.retry.retries
            && matches!(&result, Err(e) if e.is_transport())
        {
            attempt += 1;
            self.coordinator.note_retry(target);
            if let Err(e) = &result {
                warn!(
                    "scrape of '{}' failed ({}), retrying {}/{}",
                    target, e, attempt, job.retry.retries
                );
            }
            tokio::time::sleep(job.retry.backoff).await;
            result = self.attempt(job).await;
        }

        result
    }

    async fn attempt(&self, job: &ScrapeJob<'_>) -> Result<Vec<Sample>, ScrapeError> {
        let mut client = self.factory.connect(&job.spec).await?;
        run_scrape(
            client.as_mut(),
            job.module,
            job.defs,
            job.sensitivity,
            job.blocked,
        )
        .await
    }
}
