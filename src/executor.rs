//!
//! RequestExecutor: drives one logical backend call through the credential
//! pool with retry and failover.
//!
//! Every attempt selects a credential, sends, and classifies the outcome:
//! success is reported to the pool and returned; rate limits, unavailability,
//! silent failures and transport errors are retried up to the configured
//! budget; any other backend status is returned to the caller verbatim.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::collections::{BTreeSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::converter::gemini::{GenerateContentRequest, GenerateContentResponse, parse_chunk, unwrap_response};
use crate::converter::models::model_variants;
use crate::converter::{ModelSpec, StreamCollector};
use crate::credential::{Credential, CredentialPool, parse_cooldown};
use crate::error::{ProxyError, Result};
use crate::sse::{LineBuffer, extract_sse_data};
use crate::transport::{ByteStream, StreamItem, Transport};

/* --- constants ------------------------------------------------------------------------------- */

/** user agent embedded in the request envelope */
const ENVELOPE_USER_AGENT: &str = "antigravity";

const API_PREFIX: &str = "v1internal";

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("requestid");
const REQUEST_TYPE_HEADER: HeaderName = HeaderName::from_static("requesttype");

/* --- types ----------------------------------------------------------------------------------- */

/// Lazily consumed backend stream of SSE `data:` payloads
pub type DataStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

///
/// Executor settings, resolved from the `[backend]` and `[retry]` sections.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub base_url: String,
    pub user_agent: String,
    /** ceiling for one unary transport call */
    pub request_timeout: Duration,
    /** run unary calls as a stream and collect the chunks */
    pub collect_stream_for_unary: bool,
    pub retry_enabled: bool,
    /** additional attempts after the first */
    pub max_retries: u32,
    pub retry_interval: Duration,
    /** statuses retried like 429/503 besides those two */
    pub auto_ban_codes: BTreeSet<u16>,
}

/// One backend call: the translated body and the model it targets
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub model: ModelSpec,
    pub body: GenerateContentRequest,
}

/// Counters exposed on the health endpoint
#[derive(Debug, Default)]
pub struct ExecutorStats {
    /** attempts after the first one, across all calls */
    pub retry_attempts: AtomicU64,
    /** 429 and 503 answers */
    pub rate_limited: AtomicU64,
    /** 200 answers without content */
    pub silent_failures: AtomicU64,
}

///
/// Retry/failover engine over a [`CredentialPool`] and a [`Transport`].
pub struct RequestExecutor {
    pool: Arc<CredentialPool>,
    transport: Arc<dyn Transport>,
    settings: ExecutorSettings,
    stats: ExecutorStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    StreamGenerate,
    Generate,
    FetchModels,
}

///
/// Per-call mutable state of the retry loop.
///
/// Switching credential is the only transition that rewrites it.
struct RetryState {
    endpoint: Endpoint,
    credential: Credential,
    /** outbound JSON body; the envelope's `project` follows the credential */
    payload: Value,
    image: bool,
    attempt: u32,
}

///
/// Everything one send needs, owned so the send future borrows nothing.
struct ExecutionAttempt {
    transport: Arc<dyn Transport>,
    url: String,
    headers: HeaderMap,
    body: Bytes,
    timeout: Duration,
    auto_ban_codes: BTreeSet<u16>,
}

///
/// Background acquisition of the next credential.
///
/// Dropping the guard aborts the task, so leaving the retry loop early never
/// leaks it.
struct Prefetch {
    handle: Option<JoinHandle<Result<Credential>>>,
}

/// SSE data lines pulled from a backend byte stream
struct DataLines {
    pending: VecDeque<String>,
    buffer: LineBuffer,
    inner: Option<ByteStream>,
    auto_ban_codes: BTreeSet<u16>,
    /** set once the stream is handed to the caller */
    reporter: Option<LateFailureReporter>,
}

///
/// Reports backend errors that arrive after a stream was already accepted.
///
/// The retry loop has returned by then, so the pool would otherwise never
/// learn about a rate limit sent mid-stream.
struct LateFailureReporter {
    pool: Arc<CredentialPool>,
    credential_id: String,
    scope: String,
}

/* --- start of code -------------------------------------------------------------------------- */

impl ExecutorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.backend.base_url.trim_end_matches('/').to_string(),
            user_agent: config.backend.user_agent.clone(),
            request_timeout: config.backend.request_timeout(),
            collect_stream_for_unary: config.backend.collect_stream_for_unary,
            retry_enabled: config.retry.enabled,
            max_retries: config.retry.max_retries,
            retry_interval: config.retry.interval(),
            auto_ban_codes: config.retry.auto_ban_codes(),
        }
    }

    /// Attempts per logical call, the first one included
    fn max_attempts(&self) -> u32 {
        if self.retry_enabled { self.max_retries.saturating_add(1) } else { 1 }
    }
}

impl Endpoint {
    fn url(&self, base_url: &str) -> String {
        match self {
            Endpoint::StreamGenerate => format!("{}/{}:streamGenerateContent?alt=sse", base_url, API_PREFIX),
            Endpoint::Generate => format!("{}/{}:generateContent", base_url, API_PREFIX),
            Endpoint::FetchModels => format!("{}/{}:fetchAvailableModels", base_url, API_PREFIX),
        }
    }
}

impl RequestExecutor {
    pub fn new(pool: Arc<CredentialPool>, transport: Arc<dyn Transport>, settings: ExecutorSettings) -> Self {
        Self { pool, transport, settings, stats: ExecutorStats::default() }
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    pub fn stats(&self) -> &ExecutorStats {
        &self.stats
    }

    ///
    /// Execute a streaming call.
    ///
    /// The returned stream starts only after the first data line has been
    /// received, so every failure before that point was eligible for retry.
    /// A failure after it arrives as an `Err` item and ends the stream; backend
    /// statuses among those are still reported against the credential.
    ///
    /// # Arguments
    ///  * `request` - translated backend request
    ///
    /// # Returns
    ///  * Stream of SSE `data:` payloads, `response` wrapper still in place
    ///  * The last unrecovered error when every attempt failed
    pub async fn execute_stream(&self, request: &BackendRequest) -> Result<DataStream> {
        let payload = self.envelope(request)?;
        let scope = &request.model.backend;
        let (mut lines, credential_id) = self
            .run_attempts(Endpoint::StreamGenerate, scope, payload, request.model.is_image(), open_stream)
            .await?;
        lines.reporter =
            Some(LateFailureReporter { pool: self.pool.clone(), credential_id, scope: scope.clone() });
        Ok(lines.into_stream())
    }

    ///
    /// Execute a unary call.
    ///
    /// With `collect_stream_for_unary` the call goes out as a stream and the
    /// chunks are merged; a mid-stream failure then still counts as a failed
    /// attempt and is retried. Either way each attempt is bounded by
    /// `request_timeout`, and running out of it is a transport failure.
    ///
    /// # Returns
    ///  * Complete backend response, `response` wrapper removed
    pub async fn execute_unary(&self, request: &BackendRequest) -> Result<GenerateContentResponse> {
        let payload = self.envelope(request)?;
        let scope = &request.model.backend;
        let image = request.model.is_image();
        if self.settings.collect_stream_for_unary {
            self.run_with_retry(Endpoint::StreamGenerate, scope, payload, image, collect_stream).await
        } else {
            self.run_with_retry(Endpoint::Generate, scope, payload, image, send_unary).await
        }
    }

    ///
    /// List client-visible model ids.
    ///
    /// # Arguments
    ///  * `scope` - pool partition used to pick the credential for the listing call
    ///
    /// # Returns
    ///  * Backend models plus the always-served extras, each followed by its feature variants
    pub async fn list_available_models(&self, scope: &str) -> Result<Vec<String>> {
        let listing = self.run_with_retry(Endpoint::FetchModels, scope, json!({}), false, send_unary_json).await?;
        let names: Vec<String> = match listing.get("models") {
            Some(Value::Object(models)) => models.keys().cloned().collect(),
            Some(Value::Array(models)) => models
                .iter()
                .filter_map(|m| m.as_str().or_else(|| m.get("name").and_then(Value::as_str)))
                .map(|name| name.trim_start_matches("models/").to_string())
                .collect(),
            _ => Vec::new(),
        };
        tracing::debug!("Backend lists {} models", names.len());
        Ok(model_variants(names))
    }

    fn envelope(&self, request: &BackendRequest) -> Result<Value> {
        Ok(json!({
            "project": "",
            "requestId": format!("agent-{}", uuid::Uuid::new_v4()),
            "model": request.model.backend,
            "userAgent": ENVELOPE_USER_AGENT,
            "request": serde_json::to_value(&request.body)?,
        }))
    }

    ///
    /// The retry/failover state machine.
    ///
    /// # Arguments
    ///  * `endpoint` - backend method to call
    ///  * `scope` - pool partition, the backend model name
    ///  * `payload` - body template; its `project` is rewritten per credential
    ///  * `image` - tag the call as image generation
    ///  * `send` - one attempt: send and classify
    async fn run_with_retry<T, F, Fut>(
        &self,
        endpoint: Endpoint,
        scope: &str,
        payload: Value,
        image: bool,
        send: F,
    ) -> Result<T>
    where
        F: Fn(ExecutionAttempt) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (value, _) = self.run_attempts(endpoint, scope, payload, image, send).await?;
        Ok(value)
    }

    /// [`Self::run_with_retry`], also returning the id of the credential that succeeded
    async fn run_attempts<T, F, Fut>(
        &self,
        endpoint: Endpoint,
        scope: &str,
        payload: Value,
        image: bool,
        send: F,
    ) -> Result<(T, String)>
    where
        F: Fn(ExecutionAttempt) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.settings.max_attempts();
        let credential = self.pool.acquire(scope).await?;
        let mut state = RetryState::new(endpoint, credential, payload, image);

        loop {
            let attempt = state.next_attempt(self)?;
            let credential_id = state.credential.id.clone();
            tracing::debug!(
                "Attempt {}/{} for {} with credential {}",
                state.attempt,
                max_attempts,
                scope,
                credential_id
            );

            let error = match send(attempt).await {
                Ok(value) => {
                    self.pool.report_success(&credential_id, scope).await;
                    return Ok((value, credential_id));
                }
                Err(error) => error,
            };

            let rate_limited = is_rate_limited(&error);
            report_failure(&self.pool, &credential_id, scope, &error).await;
            self.record_stats(&error);

            if !error.is_retryable() {
                tracing::warn!("Backend call for {} failed without retry: {}", scope, error);
                return Err(error);
            }
            if state.attempt >= max_attempts {
                tracing::warn!("Backend call for {} failed after {} attempts: {}", scope, state.attempt, error);
                return Err(error);
            }

            tracing::warn!(
                "Retryable failure for {} on credential {} (attempt {}/{}): {}",
                scope,
                credential_id,
                state.attempt,
                max_attempts,
                error
            );
            self.stats.retry_attempts.fetch_add(1, Ordering::Relaxed);

            let prefetch = rate_limited.then(|| Prefetch::spawn(self.pool.clone(), scope.to_string()));
            tokio::time::sleep(self.settings.retry_interval).await;

            let next = match prefetch {
                Some(prefetch) => prefetch.take().await,
                None => None,
            };
            let next = match next {
                Some(credential) => credential,
                None => self.pool.acquire(scope).await?,
            };
            state.switch_credential(next);
        }
    }

    fn record_stats(&self, error: &ProxyError) {
        match error {
            ProxyError::BackendRateLimited { .. } | ProxyError::BackendUnavailable { .. } => {
                self.stats.rate_limited.fetch_add(1, Ordering::Relaxed);
            }
            ProxyError::BackendSilentFailure => {
                self.stats.silent_failures.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }
}

impl RetryState {
    fn new(endpoint: Endpoint, credential: Credential, payload: Value, image: bool) -> Self {
        let mut state = Self { endpoint, credential, payload, image, attempt: 0 };
        state.apply_project();
        state
    }

    fn switch_credential(&mut self, credential: Credential) {
        tracing::debug!("Switching credential {} -> {}", self.credential.id, credential.id);
        self.credential = credential;
        self.apply_project();
    }

    fn apply_project(&mut self) {
        if let Some(project) = self.payload.get_mut("project") {
            *project = Value::String(self.credential.project_id.clone().unwrap_or_default());
        }
    }

    fn next_attempt(&mut self, executor: &RequestExecutor) -> Result<ExecutionAttempt> {
        self.attempt += 1;
        let settings = &executor.settings;
        Ok(ExecutionAttempt {
            transport: executor.transport.clone(),
            url: self.endpoint.url(&settings.base_url),
            headers: self.headers(&settings.user_agent)?,
            body: Bytes::from(serde_json::to_vec(&self.payload)?),
            timeout: settings.request_timeout,
            auto_ban_codes: settings.auto_ban_codes.clone(),
        })
    }

    fn headers(&self, user_agent: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value(user_agent)?);
        headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", self.credential.access_token))?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(REQUEST_ID_HEADER, header_value(&format!("req-{}", uuid::Uuid::new_v4()))?);
        let request_type = if self.image { "image_gen" } else { "agent" };
        headers.insert(REQUEST_TYPE_HEADER, HeaderValue::from_static(request_type));
        Ok(headers)
    }
}

fn is_rate_limited(error: &ProxyError) -> bool {
    matches!(error, ProxyError::BackendRateLimited { .. } | ProxyError::BackendUnavailable { .. })
}

/// Record a failed call against the credential, with the backend's cooldown hint for rate limits
async fn report_failure(pool: &CredentialPool, credential_id: &str, scope: &str, error: &ProxyError) {
    let cooldown = match error.backend_body() {
        Some(body) if is_rate_limited(error) => parse_cooldown(body, pool.now()),
        _ => None,
    };
    pool.report_error(credential_id, error.recorded_status(), cooldown, scope).await;
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| ProxyError::Auth(format!("Invalid header value: {}", e)))
}

impl Prefetch {
    fn spawn(pool: Arc<CredentialPool>, scope: String) -> Self {
        let handle = tokio::spawn(async move { pool.acquire(&scope).await });
        Self { handle: Some(handle) }
    }

    ///
    /// Result of the prefetch, if it already finished with a usable credential.
    async fn take(mut self) -> Option<Credential> {
        let handle = self.handle.take()?;
        if !handle.is_finished() {
            handle.abort();
            return None;
        }
        match handle.await {
            Ok(Ok(credential)) if credential.is_complete() => Some(credential),
            Ok(Ok(credential)) => {
                tracing::debug!("Prefetched credential {} is incomplete", credential.id);
                None
            }
            _ => None,
        }
    }
}

impl Drop for Prefetch {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

///
/// Classify a non-200 backend status.
///
/// # Arguments
///  * `status` - HTTP status
///  * `body` - response body, kept verbatim
///  * `auto_ban_codes` - statuses retried like 503
pub fn classify_status(status: u16, body: String, auto_ban_codes: &BTreeSet<u16>) -> ProxyError {
    match status {
        429 => ProxyError::BackendRateLimited { status, body },
        503 => ProxyError::BackendUnavailable { status, body },
        s if auto_ban_codes.contains(&s) => ProxyError::BackendUnavailable { status, body },
        _ => ProxyError::BackendRejected { status, body },
    }
}

impl DataLines {
    fn new(inner: ByteStream, auto_ban_codes: BTreeSet<u16>) -> Self {
        Self {
            pending: VecDeque::new(),
            buffer: LineBuffer::new(),
            inner: Some(inner),
            auto_ban_codes,
            reporter: None,
        }
    }

    fn absorb(&mut self, line: &str) {
        if let Some(data) = extract_sse_data(line) {
            let data = data.trim();
            if !data.is_empty() {
                self.pending.push_back(data.to_string());
            }
        }
    }

    async fn next_item(&mut self) -> Option<Result<String>> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Some(Ok(line));
            }
            let inner = self.inner.as_mut()?;
            match inner.next().await {
                Some(StreamItem::Chunk(bytes)) => match self.buffer.push(&bytes) {
                    Ok(lines) => {
                        for line in lines {
                            self.absorb(&line);
                        }
                    }
                    Err(error) => {
                        self.inner = None;
                        return Some(Err(error));
                    }
                },
                Some(StreamItem::Error(envelope)) => {
                    self.inner = None;
                    let error = classify_status(envelope.status, envelope.body, &self.auto_ban_codes);
                    if let Some(reporter) = &self.reporter {
                        tracing::warn!(
                            "Backend failed mid-stream on credential {}: {}",
                            reporter.credential_id,
                            error
                        );
                        report_failure(&reporter.pool, &reporter.credential_id, &reporter.scope, &error).await;
                    }
                    return Some(Err(error));
                }
                Some(StreamItem::Interrupted(reason)) => {
                    self.inner = None;
                    return Some(Err(ProxyError::Transport(reason)));
                }
                None => {
                    self.inner = None;
                    if let Some(rest) = self.buffer.flush() {
                        self.absorb(&rest);
                    }
                }
            }
        }
    }

    fn into_stream(self) -> DataStream {
        Box::pin(futures::stream::unfold(self, |mut lines| async move {
            let item = lines.next_item().await?;
            Some((item, lines))
        }))
    }
}

/// Open a stream and hold it back until its first data line arrives
async fn open_stream(attempt: ExecutionAttempt) -> Result<DataLines> {
    let inner = attempt.transport.send_stream(&attempt.url, attempt.body, attempt.headers).await?;
    let mut lines = DataLines::new(inner, attempt.auto_ban_codes);
    match lines.next_item().await {
        Some(Ok(first)) => {
            lines.pending.push_front(first);
            Ok(lines)
        }
        Some(Err(error)) => Err(error),
        None => Err(ProxyError::BackendSilentFailure),
    }
}

/// Stream a unary call and merge its chunks, all within the attempt's timeout
async fn collect_stream(attempt: ExecutionAttempt) -> Result<GenerateContentResponse> {
    let timeout = attempt.timeout;
    tokio::time::timeout(timeout, collect_chunks(attempt))
        .await
        .map_err(|_| ProxyError::Transport(format!("backend timed out after {:?}", timeout)))?
}

async fn collect_chunks(attempt: ExecutionAttempt) -> Result<GenerateContentResponse> {
    let mut lines = open_stream(attempt).await?;
    let mut collector = StreamCollector::new();
    while let Some(item) = lines.next_item().await {
        match parse_chunk(&item?) {
            Some(chunk) => collector.push(chunk),
            None => tracing::debug!("Skipping undecodable stream chunk"),
        }
    }
    let response = collector.finish();
    if response.has_payload() { Ok(response) } else { Err(ProxyError::BackendSilentFailure) }
}

async fn send_unary_json(attempt: ExecutionAttempt) -> Result<Value> {
    let response = attempt.transport.send_unary(&attempt.url, attempt.body, attempt.headers, attempt.timeout).await?;
    if response.status != 200 {
        let body = String::from_utf8_lossy(&response.body).to_string();
        return Err(classify_status(response.status, body, &attempt.auto_ban_codes));
    }
    if response.body.iter().all(u8::is_ascii_whitespace) {
        return Err(ProxyError::BackendSilentFailure);
    }
    Ok(unwrap_response(serde_json::from_slice(&response.body)?))
}

async fn send_unary(attempt: ExecutionAttempt) -> Result<GenerateContentResponse> {
    let response: GenerateContentResponse = serde_json::from_value(send_unary_json(attempt).await?)?;
    if response.has_payload() { Ok(response) } else { Err(ProxyError::BackendSilentFailure) }
}

impl Serialize for ExecutorStats {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        json!({
            "retry_attempts": self.retry_attempts.load(Ordering::Relaxed),
            "rate_limited": self.rate_limited.load(Ordering::Relaxed),
            "silent_failures": self.silent_failures.load(Ordering::Relaxed),
        })
        .serialize(serializer)
    }
}

/* --- tests ----------------------------------------------------------------------------------- */
