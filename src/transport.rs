//!
//! Backend transport abstraction.
//!
//! The executor talks to the backend only through [`Transport`], so retry and
//! failover logic can be exercised against scripted fakes. [`ReqwestTransport`]
//! is the production implementation.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use reqwest::header::HeaderMap;

use crate::error::{ProxyError, Result};

/* --- types ----------------------------------------------------------------------------------- */

/// Non-success backend answer, body kept verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEnvelope {
    pub status: u16,
    pub body: String,
}

/// One item of a backend byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /** raw response bytes */
    Chunk(Bytes),
    /** backend answered with a non-success status; always the only item */
    Error(ErrorEnvelope),
    /** connection broke after the response started */
    Interrupted(String),
}

/// Lazily consumed backend stream
pub type ByteStream = Pin<Box<dyn Stream<Item = StreamItem> + Send>>;

/// Complete unary backend answer
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: u16,
    pub body: Bytes,
    pub headers: HeaderMap,
}

///
/// HTTP transport to the backend.
///
/// Connection failures and timeouts are reported as `ProxyError::Transport`;
/// HTTP-level failures are reported in-band so callers can classify them.
#[async_trait]
pub trait Transport: Send + Sync {
    ///
    /// POST `body` and wait for the complete response.
    ///
    /// # Arguments
    ///  * `url` - target URL
    ///  * `body` - serialized JSON payload
    ///  * `headers` - request headers
    ///  * `timeout` - ceiling for the whole exchange
    async fn send_unary(
        &self,
        url: &str,
        body: Bytes,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Result<BackendResponse>;

    ///
    /// POST `body` and return the response as a byte stream.
    ///
    /// A non-success status yields a stream holding a single
    /// [`StreamItem::Error`].
    async fn send_stream(&self, url: &str, body: Bytes, headers: HeaderMap) -> Result<ByteStream>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

/* --- constants ------------------------------------------------------------------------------- */

/** TCP connect timeout in seconds */
const CONNECT_TIMEOUT_SECS: u64 = 30;

/* --- start of code -------------------------------------------------------------------------- */

impl ReqwestTransport {
    ///
    /// Create transport with appropriate timeouts.
    ///
    /// No overall timeout is set on the client: streams may legitimately run
    /// for minutes, unary calls pass their own ceiling.
    ///
    /// # Returns
    ///  * Configured transport
    ///  * `ProxyError::Http` if client creation fails
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ProxyError::Http(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send_unary(
        &self,
        url: &str,
        body: Bytes,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Result<BackendResponse> {
        let response = self
            .client
            .post(url)
            .headers(headers)
            .body(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(transport_error)?;
        Ok(BackendResponse { status, body, headers })
    }

    async fn send_stream(&self, url: &str, body: Bytes, headers: HeaderMap) -> Result<ByteStream> {
        let response =
            self.client.post(url).headers(headers).body(body).send().await.map_err(transport_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!("Backend stream rejected with status {}", status);
            let item = StreamItem::Error(ErrorEnvelope { status, body });
            return Ok(Box::pin(futures::stream::iter([item])));
        }

        let stream = response.bytes_stream().map(|chunk| match chunk {
            Ok(bytes) => StreamItem::Chunk(bytes),
            Err(e) => StreamItem::Interrupted(e.to_string()),
        });
        Ok(Box::pin(stream))
    }
}

fn transport_error(error: reqwest::Error) -> ProxyError {
    if error.is_timeout() {
        ProxyError::Transport(format!("backend timed out: {}", error))
    } else {
        ProxyError::Transport(error.to_string())
    }
}

/* --- tests ----------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;

    async fn spawn_backend() -> String {
        let app = Router::new()
            .route("/ok", post(|| async { "data: {\"a\":1}\n\ndata: {\"a\":2}\n\n" }))
            .route(
                "/limited",
                post(|| async { (StatusCode::TOO_MANY_REQUESTS, r#"{"error":{"code":429}}"#) }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_stream_success_yields_chunks() {
        let base = spawn_backend().await;
        let transport = ReqwestTransport::new().unwrap();

        let stream = transport
            .send_stream(&format!("{}/ok", base), Bytes::from_static(b"{}"), HeaderMap::new())
            .await
            .unwrap();
        let items: Vec<StreamItem> = stream.collect().await;

        let mut body = Vec::new();
        for item in items {
            match item {
                StreamItem::Chunk(bytes) => body.extend_from_slice(&bytes),
                other => panic!("unexpected item {:?}", other),
            }
        }
        assert_eq!(String::from_utf8(body).unwrap(), "data: {\"a\":1}\n\ndata: {\"a\":2}\n\n");
    }

    #[tokio::test]
    async fn test_stream_error_status_is_in_band() {
        let base = spawn_backend().await;
        let transport = ReqwestTransport::new().unwrap();

        let stream = transport
            .send_stream(&format!("{}/limited", base), Bytes::new(), HeaderMap::new())
            .await
            .unwrap();
        let items: Vec<StreamItem> = stream.collect().await;
        assert_eq!(
            items,
            vec![StreamItem::Error(ErrorEnvelope { status: 429, body: r#"{"error":{"code":429}}"#.to_string() })]
        );
    }

    #[tokio::test]
    async fn test_unary_and_connection_failure() {
        let base = spawn_backend().await;
        let transport = ReqwestTransport::new().unwrap();

        let response = transport
            .send_unary(&format!("{}/limited", base), Bytes::new(), HeaderMap::new(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(response.status, 429);

        let err = transport
            .send_unary("http://127.0.0.1:1/none", Bytes::new(), HeaderMap::new(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Transport(_)));
    }
}

/// Scripted transport and pool fixtures shared by unit tests
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::SelectionPolicy;
    use crate::credential::{AutoDisableRule, Credential, CredentialPool, MemoryCredentialStore};
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// One scripted backend answer
    pub enum Reply {
        Status(u16, &'static str),
        Stream(Vec<&'static str>),
        StreamThenError(Vec<&'static str>, u16),
        Unreachable,
        Delayed(Duration, Box<Reply>),
    }

    #[derive(Debug, Clone)]
    pub struct Call {
        pub url: String,
        pub authorization: String,
        pub request_type: String,
        pub body: Value,
    }

    /// Answers calls from a script and records what was sent
    #[derive(Default)]
    pub struct ScriptedTransport {
        replies: Mutex<VecDeque<Reply>>,
        calls: Mutex<Vec<Call>>,
    }

    impl ScriptedTransport {
        pub fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self { replies: Mutex::new(replies.into()), calls: Mutex::new(Vec::new()) })
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        async fn next_reply(&self, url: &str, headers: &HeaderMap, body: &Bytes) -> Reply {
            let header =
                |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or_default().to_string();
            self.calls.lock().unwrap().push(Call {
                url: url.to_string(),
                authorization: header("authorization"),
                request_type: header("requesttype"),
                body: serde_json::from_slice(body).unwrap(),
            });
            let mut reply = self.replies.lock().unwrap().pop_front().expect("unexpected backend call");
            loop {
                match reply {
                    Reply::Delayed(delay, inner) => {
                        tokio::time::sleep(delay).await;
                        reply = *inner;
                    }
                    other => return other,
                }
            }
        }
    }

    fn sse(lines: &[&str]) -> Vec<StreamItem> {
        lines.iter().map(|l| StreamItem::Chunk(Bytes::from(format!("data: {}\n\n", l)))).collect()
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send_unary(
            &self,
            url: &str,
            body: Bytes,
            headers: HeaderMap,
            _timeout: Duration,
        ) -> Result<BackendResponse> {
            match self.next_reply(url, &headers, &body).await {
                Reply::Status(status, body) => {
                    Ok(BackendResponse { status, body: Bytes::from(body), headers: HeaderMap::new() })
                }
                Reply::Unreachable => Err(ProxyError::Transport("connection refused".to_string())),
                _ => panic!("stream reply scripted for unary call"),
            }
        }

        async fn send_stream(&self, url: &str, body: Bytes, headers: HeaderMap) -> Result<ByteStream> {
            let items = match self.next_reply(url, &headers, &body).await {
                Reply::Status(status, body) => {
                    vec![StreamItem::Error(ErrorEnvelope { status, body: body.to_string() })]
                }
                Reply::Stream(lines) => sse(&lines),
                Reply::StreamThenError(lines, status) => {
                    let mut items = sse(&lines);
                    items.push(StreamItem::Error(ErrorEnvelope { status, body: "late".to_string() }));
                    items
                }
                Reply::Unreachable => return Err(ProxyError::Transport("connection refused".to_string())),
                Reply::Delayed(..) => unreachable!("delays are resolved in next_reply"),
            };
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    /// Round-robin pool of `token-<id>` / `project-<id>` credentials
    pub fn credential_pool(ids: &[&str]) -> Arc<CredentialPool> {
        let credentials = ids
            .iter()
            .map(|id| Credential::new(*id, format!("token-{}", id), format!("project-{}", id)))
            .collect();
        Arc::new(CredentialPool::new(
            Arc::new(MemoryCredentialStore::new(credentials)),
            SelectionPolicy::RoundRobin,
            AutoDisableRule::default(),
        ))
    }
}
