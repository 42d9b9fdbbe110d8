//! pulsegrid-query — query evaluation over the sample store.
//!
//! A query is a series selector (`metric_name{label="v",…}`) evaluated
//! either at one instant (most recent sample within the staleness window)
//! or over a range (raw samples, or instant-wise at step boundaries).
//! The JSON wire types are shared by the API server and the dashboard
//! client so both ends agree on the envelope.

pub mod engine;
pub mod selector;
pub mod wire;

pub use engine::{QueryEngine, QueryError, DEFAULT_LOOKBACK_MS};
pub use selector::{MatchOp, Matcher, Selector};
pub use wire::{QueryData, QueryResponse, SeriesResult};
