//! pulsegrid-store — redb-backed persistence for the pipeline.
//!
//! Holds the collector's sample store (append-only time series) and the
//! operator-managed configuration entities: target statuses, data sources,
//! dashboard definitions, and user accounts. All values are JSON-serialized
//! into redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use store::MetricStore;
pub use types::*;
