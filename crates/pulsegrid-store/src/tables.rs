//! redb table definitions for the PulseGrid store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Sample keys order by metric, label signature, then zero-padded
//! timestamp so one series' points are contiguous and time-ordered.

use redb::TableDefinition;

/// Samples keyed by `{metric}|{label_signature}|{timestamp_ms:020}`.
pub const SAMPLES: TableDefinition<&str, &[u8]> = TableDefinition::new("samples");

/// Scrape target statuses keyed by `{job}/{address}`.
pub const TARGETS: TableDefinition<&str, &[u8]> = TableDefinition::new("targets");

/// Data source registrations keyed by `{name}`.
pub const DATA_SOURCES: TableDefinition<&str, &[u8]> = TableDefinition::new("data_sources");

/// Dashboard definitions keyed by `{slug}`.
pub const DASHBOARDS: TableDefinition<&str, &[u8]> = TableDefinition::new("dashboards");

/// User accounts keyed by `{username}`.
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
