//! HTTP client for registered query backends.
//!
//! Everything the dashboard reads — connectivity tests, target statuses,
//! panel series — goes through here, over plain HTTP from the dashboard
//! process's own network namespace.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use pulsegrid_query::{QueryResponse, SeriesResult};
use pulsegrid_scrape::http_get;
use pulsegrid_store::TargetStatus;

/// Timeout for backend reads issued while rendering a page.
pub const BACKEND_TIMEOUT: Duration = Duration::from_secs(3);

/// Split a base URL into `(authority, base_path)`.
///
/// Only plain `http://` backends are accepted; the pipeline's hops run on
/// the shared process network.
pub fn parse_base_url(url: &str) -> Result<(String, String), String> {
    let url = url.trim().trim_end_matches('/');
    if url.starts_with("https://") {
        return Err("https backends are not supported; use http:// on the shared network".to_string());
    }
    let rest = url
        .strip_prefix("http://")
        .ok_or_else(|| "URL must start with http://".to_string())?;
    let (authority, path) = match rest.find('/') {
        Some(slash) => (&rest[..slash], &rest[slash..]),
        None => (rest, ""),
    };
    if authority.is_empty() {
        return Err("URL has no host".to_string());
    }
    Ok((authority.to_string(), path.to_string()))
}

/// Probe the backend's status endpoint. The error text reminds the
/// operator which network namespace the URL must resolve from — the usual
/// misconfiguration is a URL that only works from the browser.
pub async fn connectivity_test(url: &str) -> Result<(), String> {
    let (authority, base) = parse_base_url(url)?;
    let path = format!("{base}/api/v1/status");
    match http_get(&authority, &path, BACKEND_TIMEOUT).await {
        Ok(resp) if resp.status == 200 => Ok(()),
        Ok(resp) => Err(format!(
            "backend at {url} answered status {} on {path}; expected 200. \
             Check that the URL points at a collector's query API",
            resp.status
        )),
        Err(e) => Err(format!(
            "could not reach query backend at {url}: {e}. The URL must be \
             resolvable from the dashboard process's network, not from your browser"
        )),
    }
}

/// Fetch a range query from a backend and decode the shared envelope.
pub async fn fetch_range(
    url: &str,
    query: &str,
    start_ms: u64,
    end_ms: u64,
    step_ms: u64,
) -> Result<Vec<SeriesResult>, String> {
    let (authority, base) = parse_base_url(url)?;
    let path = format!(
        "{base}/api/v1/query_range?query={}&start={start_ms}&end={end_ms}&step={step_ms}",
        percent_encode(query)
    );
    let resp = http_get(&authority, &path, BACKEND_TIMEOUT)
        .await
        .map_err(|e| format!("could not reach {url}: {e}"))?;

    let envelope: QueryResponse = serde_json::from_str(&resp.body)
        .map_err(|e| format!("malformed response from {url}: {e}"))?;

    if envelope.status != "success" {
        return Err(envelope
            .error
            .unwrap_or_else(|| format!("backend answered status {}", resp.status)));
    }
    Ok(envelope.data.map(|d| d.result).unwrap_or_default())
}

#[derive(Deserialize)]
struct TargetsEnvelope {
    status: String,
    #[serde(default)]
    data: Option<TargetsData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct TargetsData {
    targets: Vec<TargetStatus>,
}

/// Fetch the scrape target statuses a backend reports.
pub async fn fetch_targets(url: &str) -> Result<Vec<TargetStatus>, String> {
    let (authority, base) = parse_base_url(url)?;
    let path = format!("{base}/api/v1/targets");
    let resp = http_get(&authority, &path, BACKEND_TIMEOUT)
        .await
        .map_err(|e| format!("could not reach {url}: {e}"))?;

    let envelope: TargetsEnvelope = serde_json::from_str(&resp.body)
        .map_err(|e| format!("malformed response from {url}: {e}"))?;

    if envelope.status != "success" {
        debug!(url, "targets fetch answered an error envelope");
        return Err(envelope
            .error
            .unwrap_or_else(|| "backend answered an error".to_string()));
    }
    Ok(envelope.data.map(|d| d.targets).unwrap_or_default())
}

/// Percent-encode a query-string value.
pub fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_base_url_plain_authority() {
        let (authority, base) = parse_base_url("http://pulsed:9464").unwrap();
        assert_eq!(authority, "pulsed:9464");
        assert_eq!(base, "");
    }

    #[test]
    fn parse_base_url_trims_trailing_slash() {
        let (authority, base) = parse_base_url("http://pulsed:9464/").unwrap();
        assert_eq!(authority, "pulsed:9464");
        assert_eq!(base, "");
    }

    #[test]
    fn parse_base_url_keeps_prefix_path() {
        let (authority, base) = parse_base_url("http://proxy:80/collector").unwrap();
        assert_eq!(authority, "proxy:80");
        assert_eq!(base, "/collector");
    }

    #[test]
    fn parse_base_url_rejects_https_and_schemeless() {
        assert!(parse_base_url("https://pulsed:9464").unwrap_err().contains("https"));
        assert!(parse_base_url("pulsed:9464").unwrap_err().contains("http://"));
        assert!(parse_base_url("http://").is_err());
    }

    #[test]
    fn percent_encode_reserves_query_characters() {
        assert_eq!(percent_encode("up"), "up");
        assert_eq!(
            percent_encode(r#"up{job="node"}"#),
            "up%7Bjob%3D%22node%22%7D"
        );
        assert_eq!(percent_encode("a b&c"), "a%20b%26c");
    }

    #[tokio::test]
    async fn connectivity_test_failure_names_the_namespace() {
        // Nothing listens on port 1.
        let err = connectivity_test("http://127.0.0.1:1").await.unwrap_err();
        assert!(err.contains("dashboard process's network"));
        assert!(err.contains("127.0.0.1:1"));
    }
}
