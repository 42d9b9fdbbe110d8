//! Domain types for the PulseGrid store.
//!
//! These types represent the persisted state of the pipeline: time-series
//! samples, scrape target statuses, data source registrations, dashboard
//! definitions, and user accounts. All types are serializable to/from JSON
//! for storage in redb tables.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Job name a scrape target belongs to.
pub type JobName = String;

/// `host:port` address of a scrape target.
pub type TargetAddress = String;

// ── Samples ───────────────────────────────────────────────────────

/// One appended time-series point.
///
/// A series is identified by the metric name plus the full (sorted) label
/// set; the store is append-only at `(series, timestamp)` granularity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SamplePoint {
    pub metric: String,
    /// Sorted label pairs, static target labels included.
    pub labels: Vec<(String, String)>,
    /// Scrape timestamp in milliseconds since the epoch.
    pub timestamp_ms: u64,
    pub value: f64,
}

impl SamplePoint {
    pub fn new(
        metric: &str,
        mut labels: Vec<(String, String)>,
        timestamp_ms: u64,
        value: f64,
    ) -> Self {
        labels.sort();
        Self {
            metric: metric.to_string(),
            labels,
            timestamp_ms,
            value,
        }
    }

    /// Canonical signature of the label set. Hashed so arbitrary label
    /// values can't interfere with key ordering.
    pub fn label_signature(&self) -> String {
        let joined: Vec<String> = self
            .labels
            .iter()
            .map(|(k, v)| format!("{k}=\"{v}\""))
            .collect();
        let digest = Sha256::digest(joined.join(",").as_bytes());
        hex::encode(&digest[..12])
    }

    /// Build the composite key for the samples table.
    pub fn table_key(&self) -> String {
        format!(
            "{}|{}|{:020}",
            self.metric,
            self.label_signature(),
            self.timestamp_ms
        )
    }
}

// ── Target status ─────────────────────────────────────────────────

/// Per-target scrape bookkeeping surfaced to the operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetStatus {
    pub job: JobName,
    pub address: TargetAddress,
    /// Whether the most recent scrape succeeded.
    pub up: bool,
    /// Unix milliseconds of the most recent scrape attempt (0 = never).
    pub last_scrape_ms: u64,
    pub last_scrape_duration_ms: u64,
    /// Error string from the most recent failed scrape.
    pub last_error: Option<String>,
    pub scrapes_total: u64,
    pub failures_total: u64,
}

impl TargetStatus {
    pub fn new(job: &str, address: &str) -> Self {
        Self {
            job: job.to_string(),
            address: address.to_string(),
            up: false,
            last_scrape_ms: 0,
            last_scrape_duration_ms: 0,
            last_error: None,
            scrapes_total: 0,
            failures_total: 0,
        }
    }

    /// Build the composite key for the targets table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.job, self.address)
    }
}

// ── Data source ───────────────────────────────────────────────────

/// A named, URL-addressed query backend the dashboard layer reads from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataSource {
    pub name: String,
    /// Base URL reachable from the dashboard process's network namespace
    /// (not the operator's browser).
    pub url: String,
    /// Backend type; only "query-backend" exists today.
    pub kind: String,
    pub created_at: u64,
    pub updated_at: u64,
}

impl DataSource {
    pub fn table_key(&self) -> &str {
        &self.name
    }
}

// ── Dashboard ─────────────────────────────────────────────────────

/// One chart: a data source binding and a query string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Panel {
    pub title: String,
    /// Name of the data source this panel reads from.
    pub datasource: String,
    pub query: String,
}

/// An ordered sequence of panels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dashboard {
    pub slug: String,
    pub title: String,
    pub panels: Vec<Panel>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Dashboard {
    pub fn table_key(&self) -> &str {
        &self.slug
    }
}

// ── User account ──────────────────────────────────────────────────

/// Dashboard operator account with a salted password hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserAccount {
    pub username: String,
    /// Hex-encoded SHA-256 over `salt:password`.
    pub password_hash: String,
    pub salt: String,
    /// Set on seeded accounts; the UI forces rotation before first use.
    pub must_change_password: bool,
    pub updated_at: u64,
}

impl UserAccount {
    /// Create an account with a fresh salt derived from the username and
    /// creation time.
    pub fn create(username: &str, password: &str, now_ms: u64, must_change: bool) -> Self {
        let salt_digest = Sha256::digest(format!("{username}:{now_ms}").as_bytes());
        let salt = hex::encode(&salt_digest[..8]);
        Self {
            username: username.to_string(),
            password_hash: hash_password(&salt, password),
            salt,
            must_change_password: must_change,
            updated_at: now_ms,
        }
    }

    pub fn verify(&self, password: &str) -> bool {
        hash_password(&self.salt, password) == self.password_hash
    }

    /// Rotate the password and clear the forced-change flag.
    pub fn set_password(&mut self, password: &str, now_ms: u64) {
        self.password_hash = hash_password(&self.salt, password);
        self.must_change_password = false;
        self.updated_at = now_ms;
    }

    pub fn table_key(&self) -> &str {
        &self.username
    }
}

fn hash_password(salt: &str, password: &str) -> String {
    hex::encode(Sha256::digest(format!("{salt}:{password}").as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_labels_sorted_on_construction() {
        let sample = SamplePoint::new(
            "up",
            vec![
                ("job".to_string(), "node".to_string()),
                ("instance".to_string(), "app:8000".to_string()),
            ],
            1000,
            1.0,
        );
        assert_eq!(sample.labels[0].0, "instance");
        assert_eq!(sample.labels[1].0, "job");
    }

    #[test]
    fn sample_key_orders_by_time_within_series() {
        let early = SamplePoint::new("up", vec![], 999, 1.0);
        let late = SamplePoint::new("up", vec![], 1000, 1.0);
        assert!(early.table_key() < late.table_key());
    }

    #[test]
    fn sample_signature_ignores_label_order_but_not_values() {
        let a = SamplePoint::new(
            "m",
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ],
            0,
            0.0,
        );
        let b = SamplePoint::new(
            "m",
            vec![
                ("b".to_string(), "2".to_string()),
                ("a".to_string(), "1".to_string()),
            ],
            0,
            0.0,
        );
        let c = SamplePoint::new(
            "m",
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "3".to_string()),
            ],
            0,
            0.0,
        );
        assert_eq!(a.label_signature(), b.label_signature());
        assert_ne!(a.label_signature(), c.label_signature());
    }

    #[test]
    fn target_status_key() {
        let status = TargetStatus::new("node", "app:8000");
        assert_eq!(status.table_key(), "node/app:8000");
        assert!(!status.up);
        assert_eq!(status.scrapes_total, 0);
    }

    #[test]
    fn user_account_verifies_correct_password_only() {
        let account = UserAccount::create("admin", "admin", 1000, true);
        assert!(account.verify("admin"));
        assert!(!account.verify("hunter2"));
        assert!(account.must_change_password);
    }

    #[test]
    fn password_rotation_invalidates_old_password() {
        let mut account = UserAccount::create("admin", "admin", 1000, true);
        account.set_password("s3cret", 2000);

        assert!(!account.verify("admin"));
        assert!(account.verify("s3cret"));
        assert!(!account.must_change_password);
    }

    #[test]
    fn salts_differ_between_accounts() {
        let a = UserAccount::create("admin", "pw", 1000, false);
        let b = UserAccount::create("viewer", "pw", 1000, false);
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.password_hash, b.password_hash);
    }
}
