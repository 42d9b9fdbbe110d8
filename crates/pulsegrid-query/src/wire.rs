//! JSON wire types for the query API.
//!
//! Shared by the API server (serialize) and the dashboard client
//! (deserialize) so both ends agree on the envelope.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level envelope: `status` is `"success"` or `"error"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<QueryData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResponse {
    pub fn success(data: QueryData) -> Self {
        Self {
            status: "success".to_string(),
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Result payload: `"vector"` for instant queries, `"matrix"` for ranges.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryData {
    pub result_type: String,
    pub result: Vec<SeriesResult>,
}

/// One matched series: its label set (metric name under `__name__`) and
/// its `(timestamp_ms, value)` points, time-ascending.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeriesResult {
    pub labels: BTreeMap<String, String>,
    pub points: Vec<(u64, f64)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_json() {
        let response = QueryResponse::success(QueryData {
            result_type: "vector".to_string(),
            result: vec![SeriesResult {
                labels: BTreeMap::from([
                    ("__name__".to_string(), "up".to_string()),
                    ("job".to_string(), "node".to_string()),
                ]),
                points: vec![(1000, 1.0)],
            }],
        });

        let json = serde_json::to_string(&response).unwrap();
        let parsed: QueryResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, response);
        // Error field is elided on success.
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn failure_envelope_carries_error() {
        let response = QueryResponse::failure("selector parse error: empty query");
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"error\""));
        assert!(!json.contains("\"data\""));
    }
}
