//! Scraper — one background collection loop per configured target.
//!
//! `apply_config` diffs the desired target set against running loops:
//! new targets start, removed targets stop (their historical samples stay
//! queryable until retention expires them), changed parameters restart the
//! loop. Each loop ticks on its own timer and commits each scrape as a
//! single batch, the `up` sample included.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use pulse_core::PulseConfig;
use pulsegrid_exposition::{parse, MetricFamily, MetricsRegistry};
use pulsegrid_store::{MetricStore, SamplePoint};

use crate::client::http_get;
use crate::state::TargetTracker;

/// Everything one loop needs to know about its target.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LoopParams {
    job: String,
    address: String,
    path: String,
    interval: Duration,
    timeout: Duration,
}

impl LoopParams {
    fn key(&self) -> String {
        format!("{}/{}", self.job, self.address)
    }
}

/// A running scrape loop.
struct LoopSlot {
    params: LoopParams,
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Manages scrape loops for all configured targets.
pub struct Scraper {
    store: MetricStore,
    registry: Arc<MetricsRegistry>,
    /// Active loops: `{job}/{address}` → slot.
    loops: Arc<RwLock<HashMap<String, LoopSlot>>>,
}

impl Scraper {
    /// Create a scraper. Its own scrape metrics land in `registry`.
    pub fn new(store: MetricStore, registry: Arc<MetricsRegistry>) -> Self {
        registry.register_counter(
            "pulsed_target_scrapes_total",
            "Scrape attempts per target.",
        );
        registry.register_counter(
            "pulsed_target_scrape_failures_total",
            "Failed scrapes per target.",
        );
        registry.register_gauge(
            "pulsed_target_up",
            "Whether the target's most recent scrape succeeded.",
        );
        registry.register_gauge(
            "pulsed_target_scrape_duration_seconds",
            "Duration of the most recent scrape.",
        );
        Self {
            store,
            registry,
            loops: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Reconcile running loops with a configuration.
    pub async fn apply_config(&self, config: &PulseConfig) {
        let mut desired: HashMap<String, LoopParams> = HashMap::new();
        for job in &config.scrape_jobs {
            for target in &job.targets {
                let params = LoopParams {
                    job: job.job_name.clone(),
                    address: target.clone(),
                    path: job.metrics_path.clone(),
                    interval: config.interval_for(job),
                    timeout: config.timeout_for(job),
                };
                desired.insert(params.key(), params);
            }
        }

        let mut loops = self.loops.write().await;

        // Stop loops whose target left the configuration. New samples stop;
        // already collected ones stay queryable.
        let removed: Vec<String> = loops
            .keys()
            .filter(|key| !desired.contains_key(*key))
            .cloned()
            .collect();
        for key in removed {
            if let Some(slot) = loops.remove(&key) {
                let _ = slot.shutdown_tx.send(true);
                slot.handle.abort();
                if let Err(e) = self.store.delete_target_status(&key) {
                    warn!(target = %key, error = %e, "failed to drop target status");
                }
                info!(target = %key, "scrape loop stopped (target removed)");
            }
        }

        // Start new loops; restart ones whose parameters changed.
        for (key, params) in desired {
            let needs_start = match loops.get(&key) {
                Some(slot) => slot.params != params,
                None => true,
            };
            if !needs_start {
                continue;
            }
            if let Some(old) = loops.remove(&key) {
                let _ = old.shutdown_tx.send(true);
                old.handle.abort();
                debug!(target = %key, "scrape loop restarting with new parameters");
            }

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let store = self.store.clone();
            let registry = self.registry.clone();
            let loop_params = params.clone();
            let handle = tokio::spawn(async move {
                run_scrape_loop(loop_params, store, registry, shutdown_rx).await;
            });

            info!(
                target = %key,
                interval = ?params.interval,
                path = %params.path,
                "scrape loop started"
            );
            loops.insert(
                key,
                LoopSlot {
                    params,
                    handle,
                    shutdown_tx,
                },
            );
        }
    }

    /// Stop all loops (for graceful shutdown).
    pub async fn stop_all(&self) {
        let mut loops = self.loops.write().await;
        for (key, slot) in loops.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(target = %key, "scrape loop stopped");
        }
        info!("all scrape loops stopped");
    }

    /// `{job}/{address}` keys with active loops.
    pub async fn active_targets(&self) -> Vec<String> {
        let loops = self.loops.read().await;
        let mut keys: Vec<String> = loops.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// The collection loop for a single target.
async fn run_scrape_loop(
    params: LoopParams,
    store: MetricStore,
    registry: Arc<MetricsRegistry>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tracker = TargetTracker::new();
    debug!(job = %params.job, address = %params.address, "scrape loop starting");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(params.interval) => {
                tracker.begin();
                let started = Instant::now();
                let outcome = scrape_once(&params).await;
                let duration = started.elapsed();
                let now_ms = epoch_ms();

                match outcome {
                    Ok(families) => {
                        let mut samples =
                            tag_samples(&families, &params.job, &params.address, now_ms);
                        samples.push(up_sample(&params, now_ms, 1.0));
                        match store.append_samples(&samples) {
                            Ok(()) => {
                                tracker.complete_success(now_ms, duration.as_millis() as u64);
                            }
                            Err(e) => {
                                error!(
                                    job = %params.job,
                                    address = %params.address,
                                    error = %e,
                                    "scrape landed but store append failed"
                                );
                                tracker.complete_failure(
                                    now_ms,
                                    duration.as_millis() as u64,
                                    format!("store append failed: {e}"),
                                );
                                record_down(&store, &params, now_ms);
                            }
                        }
                    }
                    Err(reason) => {
                        debug!(
                            job = %params.job,
                            address = %params.address,
                            %reason,
                            "scrape failed"
                        );
                        tracker.complete_failure(
                            now_ms,
                            duration.as_millis() as u64,
                            reason,
                        );
                        record_down(&store, &params, now_ms);
                    }
                }

                publish(&registry, &params, &tracker, duration);
                if let Err(e) = store.put_target_status(
                    &tracker.status_record(&params.job, &params.address),
                ) {
                    warn!(
                        job = %params.job,
                        address = %params.address,
                        error = %e,
                        "failed to persist target status"
                    );
                }
                tracker.rearm();
            }
            _ = shutdown.changed() => {
                debug!(job = %params.job, address = %params.address, "scrape loop shutting down");
                break;
            }
        }
    }
}

/// Fetch and parse one exposition body. Any failure mode — connect error,
/// timeout, non-200, parse error — collapses to a reason string; nothing
/// partial survives.
async fn scrape_once(params: &LoopParams) -> Result<Vec<MetricFamily>, String> {
    match http_get(&params.address, &params.path, params.timeout).await {
        Ok(resp) if resp.status == 200 => parse(&resp.body).map_err(|e| e.to_string()),
        Ok(resp) => Err(format!("non-200 status {}", resp.status)),
        Err(e) => Err(e.to_string()),
    }
}

/// Tag parsed samples with the scrape timestamp and the target's static
/// labels. A body label colliding with a static one is preserved under an
/// `exported_` prefix; the static label wins.
fn tag_samples(
    families: &[MetricFamily],
    job: &str,
    address: &str,
    now_ms: u64,
) -> Vec<SamplePoint> {
    let mut out = Vec::new();
    for family in families {
        for sample in &family.samples {
            let mut labels: Vec<(String, String)> = Vec::with_capacity(sample.labels.len() + 2);
            for (k, v) in &sample.labels {
                match k.as_str() {
                    "job" => labels.push(("exported_job".to_string(), v.clone())),
                    "instance" => labels.push(("exported_instance".to_string(), v.clone())),
                    _ => labels.push((k.clone(), v.clone())),
                }
            }
            labels.push(("job".to_string(), job.to_string()));
            labels.push(("instance".to_string(), address.to_string()));
            out.push(SamplePoint::new(&sample.name, labels, now_ms, sample.value));
        }
    }
    out
}

fn up_sample(params: &LoopParams, now_ms: u64, value: f64) -> SamplePoint {
    SamplePoint::new(
        "up",
        vec![
            ("job".to_string(), params.job.clone()),
            ("instance".to_string(), params.address.clone()),
        ],
        now_ms,
        value,
    )
}

/// Best-effort `up = 0` write after a failed scrape.
fn record_down(store: &MetricStore, params: &LoopParams, now_ms: u64) {
    if let Err(e) = store.append_samples(&[up_sample(params, now_ms, 0.0)]) {
        warn!(
            job = %params.job,
            address = %params.address,
            error = %e,
            "failed to record down sample"
        );
    }
}

/// Update the collector's own scrape metrics.
fn publish(
    registry: &MetricsRegistry,
    params: &LoopParams,
    tracker: &TargetTracker,
    duration: Duration,
) {
    let labels = [
        ("job", params.job.as_str()),
        ("instance", params.address.as_str()),
    ];
    registry.inc_counter("pulsed_target_scrapes_total", &labels, 1.0);
    if !tracker.up() {
        registry.inc_counter("pulsed_target_scrape_failures_total", &labels, 1.0);
    }
    registry.set_gauge(
        "pulsed_target_up",
        &labels,
        if tracker.up() { 1.0 } else { 0.0 },
    );
    registry.set_gauge(
        "pulsed_target_scrape_duration_seconds",
        &labels,
        duration.as_secs_f64(),
    );
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
