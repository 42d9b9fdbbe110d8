//! pulsegrid-scrape — the collector's scrape loops.
//!
//! Each configured target runs on its own timer in its own task; a slow or
//! unreachable target never delays the others, and no ordering exists
//! between targets. A scrape that outlives its timeout is abandoned and
//! counted as a failure without committing any samples.
//!
//! # Architecture
//!
//! ```text
//! Scraper
//!   ├── apply_config() — diff desired targets, start/stop loops
//!   ├── Per-target background task
//!   │   ├── TargetTracker (Pending → Scraping → {Success, Failure} → Pending)
//!   │   ├── http_get() → exposition body
//!   │   ├── parse() + tag with scrape time and static labels
//!   │   └── one append_samples() batch per scrape (incl. the up sample)
//!   └── MetricsRegistry — the collector's own scrape metrics
//! ```

pub mod client;
pub mod scraper;
pub mod state;

pub use client::{http_get, FetchError, HttpResponse};
pub use scraper::Scraper;
pub use state::{ScrapePhase, TargetTracker};
