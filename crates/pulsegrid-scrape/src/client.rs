//! Plain HTTP/1 GET client used for scrapes and connectivity probes.

use std::time::Duration;

use http_body_util::BodyExt;
use thiserror::Error;
use tracing::debug;

/// Ways a fetch can fail before a body is in hand.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Status and body of a completed GET.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Issue a GET to `http://{address}{path}` with a hard deadline.
///
/// A fetch that exceeds `timeout` is abandoned; nothing read so far is
/// returned.
pub async fn http_get(
    address: &str,
    path: &str,
    timeout: Duration,
) -> Result<HttpResponse, FetchError> {
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = tokio::net::TcpStream::connect(address)
            .await
            .map_err(|e| {
                debug!(error = %e, %uri, "fetch connection failed");
                FetchError::Connect(e.to_string())
            })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| {
                debug!(error = %e, %uri, "fetch handshake failed");
                FetchError::Handshake(e.to_string())
            })?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "pulsegrid-scrape/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .map_err(|e| FetchError::Request(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| {
                debug!(error = %e, %uri, "fetch request failed");
                FetchError::Request(e.to_string())
            })?;

        let status = resp.status().as_u16();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))?
            .to_bytes();

        Ok(HttpResponse {
            status,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    })
    .await;

    match result {
        Ok(fetched) => fetched,
        Err(_) => {
            debug!(%uri, ?timeout, "fetch timed out");
            Err(FetchError::Timeout(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Serve one canned HTTP response on an ephemeral port.
    async fn one_shot_server(response: &'static str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        addr.to_string()
    }

    #[tokio::test]
    async fn fetch_reads_status_and_body() {
        let addr = one_shot_server(
            "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 5\r\n\r\nup 1\n",
        )
        .await;

        let resp = http_get(&addr, "/metrics/", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "up 1\n");
    }

    #[tokio::test]
    async fn fetch_surfaces_non_success_status() {
        let addr =
            one_shot_server("HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\n\r\n")
                .await;

        let resp = http_get(&addr, "/metrics/", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(resp.status, 500);
    }

    #[tokio::test]
    async fn fetch_to_closed_port_is_connect_error() {
        // Port 1 is never listening.
        let result = http_get("127.0.0.1:1", "/metrics/", Duration::from_millis(200)).await;
        assert!(matches!(result, Err(FetchError::Connect(_))));
    }

    #[tokio::test]
    async fn fetch_times_out_against_silent_server() {
        // Listener that accepts but never responds.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let _held = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let result = http_get(&addr, "/metrics/", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(FetchError::Timeout(_))));
    }
}
