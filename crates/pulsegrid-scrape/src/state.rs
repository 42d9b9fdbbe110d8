//! Per-target scrape state.
//!
//! Each target cycles `Pending → Scraping → {Success, Failure} → Pending`
//! on its timer. The tracker carries the bookkeeping the operator sees:
//! up/down, counters, the last error.

use pulsegrid_store::TargetStatus;

/// Where a target currently is in its scrape cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapePhase {
    /// Waiting for the next timer tick.
    Pending,
    /// A scrape is in flight.
    Scraping,
    /// The last scrape landed whole.
    Success,
    /// The last scrape failed (connect, timeout, non-200, parse, store).
    Failure,
}

/// Tracks one target's scrape cycle and counters.
#[derive(Debug)]
pub struct TargetTracker {
    phase: ScrapePhase,
    up: bool,
    scrapes_total: u64,
    failures_total: u64,
    consecutive_failures: u64,
    last_error: Option<String>,
    last_scrape_ms: u64,
    last_duration_ms: u64,
}

impl TargetTracker {
    pub fn new() -> Self {
        Self {
            phase: ScrapePhase::Pending,
            up: false,
            scrapes_total: 0,
            failures_total: 0,
            consecutive_failures: 0,
            last_error: None,
            last_scrape_ms: 0,
            last_duration_ms: 0,
        }
    }

    /// Timer fired: the scrape is now in flight.
    pub fn begin(&mut self) {
        self.phase = ScrapePhase::Scraping;
    }

    /// The scrape landed whole: up = 1, failure streak resets.
    pub fn complete_success(&mut self, now_ms: u64, duration_ms: u64) {
        self.phase = ScrapePhase::Success;
        self.up = true;
        self.scrapes_total += 1;
        self.consecutive_failures = 0;
        self.last_error = None;
        self.last_scrape_ms = now_ms;
        self.last_duration_ms = duration_ms;
    }

    /// The scrape failed: up = 0, failure recorded, never fatal.
    pub fn complete_failure(&mut self, now_ms: u64, duration_ms: u64, error: String) {
        self.phase = ScrapePhase::Failure;
        self.up = false;
        self.scrapes_total += 1;
        self.failures_total += 1;
        self.consecutive_failures += 1;
        self.last_error = Some(error);
        self.last_scrape_ms = now_ms;
        self.last_duration_ms = duration_ms;
    }

    /// Back to waiting for the next tick.
    pub fn rearm(&mut self) {
        self.phase = ScrapePhase::Pending;
    }

    pub fn phase(&self) -> ScrapePhase {
        self.phase
    }

    pub fn up(&self) -> bool {
        self.up
    }

    pub fn scrapes_total(&self) -> u64 {
        self.scrapes_total
    }

    pub fn failures_total(&self) -> u64 {
        self.failures_total
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Materialize the operator-facing status record.
    pub fn status_record(&self, job: &str, address: &str) -> TargetStatus {
        TargetStatus {
            job: job.to_string(),
            address: address.to_string(),
            up: self.up,
            last_scrape_ms: self.last_scrape_ms,
            last_scrape_duration_ms: self.last_duration_ms,
            last_error: self.last_error.clone(),
            scrapes_total: self.scrapes_total,
            failures_total: self.failures_total,
        }
    }
}

impl Default for TargetTracker {
    fn default() -> Self {
        Self::new()
    }
}
