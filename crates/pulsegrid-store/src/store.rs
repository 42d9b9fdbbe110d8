//! MetricStore — redb-backed persistence for the PulseGrid pipeline.
//!
//! Samples append in a single transaction per scrape, so a failed or
//! abandoned scrape commits nothing. Everything else is plain typed CRUD
//! in the same database.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Thread-safe store backed by redb.
#[derive(Clone)]
pub struct MetricStore {
    db: Arc<Database>,
}

impl MetricStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "metric store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory metric store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SAMPLES).map_err(map_err!(Table))?;
        txn.open_table(TARGETS).map_err(map_err!(Table))?;
        txn.open_table(DATA_SOURCES).map_err(map_err!(Table))?;
        txn.open_table(DASHBOARDS).map_err(map_err!(Table))?;
        txn.open_table(USERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Samples ────────────────────────────────────────────────────

    /// Append a batch of samples in one transaction.
    ///
    /// This is the only sample write path: a scrape either lands whole or
    /// not at all.
    pub fn append_samples(&self, samples: &[SamplePoint]) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SAMPLES).map_err(map_err!(Table))?;
            for sample in samples {
                let key = sample.table_key();
                let value = serde_json::to_vec(sample).map_err(map_err!(Serialize))?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(count = samples.len(), "samples appended");
        Ok(())
    }

    /// All samples for a metric within `[start_ms, end_ms]`, across series,
    /// in key order (series-major, time-ascending).
    pub fn samples_for_metric(
        &self,
        metric: &str,
        start_ms: u64,
        end_ms: u64,
    ) -> StoreResult<Vec<SamplePoint>> {
        let prefix = format!("{metric}|");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SAMPLES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                continue;
            }
            let sample: SamplePoint =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if sample.metric == metric
                && sample.timestamp_ms >= start_ms
                && sample.timestamp_ms <= end_ms
            {
                results.push(sample);
            }
        }
        Ok(results)
    }

    /// Distinct metric names currently present in the sample store.
    pub fn metric_names(&self) -> StoreResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SAMPLES).map_err(map_err!(Table))?;
        let mut names: Vec<String> = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            if let Some((metric, _)) = key.value().split_once('|') {
                if names.last().map(String::as_str) != Some(metric) {
                    names.push(metric.to_string());
                }
            }
        }
        names.dedup();
        Ok(names)
    }

    /// Delete samples older than `cutoff_ms`. Returns the number removed.
    pub fn prune_samples_before(&self, cutoff_ms: u64) -> StoreResult<u64> {
        // Collect keys in a read transaction first.
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(SAMPLES).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let sample: SamplePoint =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if sample.timestamp_ms < cutoff_ms {
                    keys.push(key.value().to_string());
                }
            }
            keys
        };
        // Delete in a write transaction.
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = keys.len() as u64;
        {
            let mut table = txn.open_table(SAMPLES).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if count > 0 {
            debug!(count, cutoff_ms, "old samples pruned");
        }
        Ok(count)
    }

    // ── Target statuses ────────────────────────────────────────────

    /// Insert or update a target status.
    pub fn put_target_status(&self, status: &TargetStatus) -> StoreResult<()> {
        let key = status.table_key();
        let value = serde_json::to_vec(status).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TARGETS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a target status by `{job}/{address}` key.
    pub fn get_target_status(&self, key: &str) -> StoreResult<Option<TargetStatus>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TARGETS).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let status: TargetStatus =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }

    /// List all target statuses.
    pub fn list_target_statuses(&self) -> StoreResult<Vec<TargetStatus>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TARGETS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let status: TargetStatus =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(status);
        }
        Ok(results)
    }

    /// Delete a target status by key. Returns true if it existed.
    pub fn delete_target_status(&self, key: &str) -> StoreResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(TARGETS).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Data sources ───────────────────────────────────────────────

    /// Insert or update a data source registration.
    pub fn put_data_source(&self, source: &DataSource) -> StoreResult<()> {
        let value = serde_json::to_vec(source).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DATA_SOURCES).map_err(map_err!(Table))?;
            table
                .insert(source.table_key(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(name = %source.name, "data source stored");
        Ok(())
    }

    /// Get a data source by name.
    pub fn get_data_source(&self, name: &str) -> StoreResult<Option<DataSource>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DATA_SOURCES).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let source: DataSource =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(source))
            }
            None => Ok(None),
        }
    }

    /// List all data sources.
    pub fn list_data_sources(&self) -> StoreResult<Vec<DataSource>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DATA_SOURCES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let source: DataSource =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(source);
        }
        Ok(results)
    }

    /// Delete a data source by name. Returns true if it existed.
    pub fn delete_data_source(&self, name: &str) -> StoreResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(DATA_SOURCES).map_err(map_err!(Table))?;
            existed = table.remove(name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Dashboards ─────────────────────────────────────────────────

    /// Insert or update a dashboard definition.
    pub fn put_dashboard(&self, dashboard: &Dashboard) -> StoreResult<()> {
        let value = serde_json::to_vec(dashboard).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DASHBOARDS).map_err(map_err!(Table))?;
            table
                .insert(dashboard.table_key(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(slug = %dashboard.slug, "dashboard stored");
        Ok(())
    }

    /// Get a dashboard by slug.
    pub fn get_dashboard(&self, slug: &str) -> StoreResult<Option<Dashboard>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DASHBOARDS).map_err(map_err!(Table))?;
        match table.get(slug).map_err(map_err!(Read))? {
            Some(guard) => {
                let dashboard: Dashboard =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(dashboard))
            }
            None => Ok(None),
        }
    }

    /// List all dashboards.
    pub fn list_dashboards(&self) -> StoreResult<Vec<Dashboard>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DASHBOARDS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let dashboard: Dashboard =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(dashboard);
        }
        Ok(results)
    }

    /// Delete a dashboard by slug. Returns true if it existed.
    pub fn delete_dashboard(&self, slug: &str) -> StoreResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(DASHBOARDS).map_err(map_err!(Table))?;
            existed = table.remove(slug).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Users ──────────────────────────────────────────────────────

    /// Insert or update a user account.
    pub fn put_user(&self, account: &UserAccount) -> StoreResult<()> {
        let value = serde_json::to_vec(account).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(USERS).map_err(map_err!(Table))?;
            table
                .insert(account.table_key(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a user account by username.
    pub fn get_user(&self, username: &str) -> StoreResult<Option<UserAccount>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(USERS).map_err(map_err!(Table))?;
        match table.get(username).map_err(map_err!(Read))? {
            Some(guard) => {
                let account: UserAccount =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(account))
            }
            None => Ok(None),
        }
    }

    /// Seed the default admin account if no such user exists yet. The
    /// seeded credentials are the well-known insecure pair and carry the
    /// forced-rotation flag.
    pub fn ensure_default_admin(&self, now_ms: u64) -> StoreResult<()> {
        if self.get_user("admin")?.is_none() {
            let account = UserAccount::create("admin", "admin", now_ms, true);
            self.put_user(&account)?;
            debug!("default admin account seeded");
        }
        Ok(())
    }
}
