//!
//! HTTP surface of the gateway.
//!
//! Thin axum glue: each handler authenticates, decodes its protocol's request,
//! hands the translated call to the executor (directly, through truncation
//! recovery or behind synthetic streaming) and renders the outcome in the
//! caller's protocol, errors included.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use axum::routing::{get, post};
use futures::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::config::paths::expand_path;
use crate::converter::anthropic::MessagesRequest;
use crate::converter::gemini::{GenerateContentRequest, GenerateContentResponse, parse_chunk};
use crate::converter::models::apply_thinking_defaults;
use crate::converter::openai::ChatCompletionRequest;
use crate::converter::{
    AnthropicConverter, ClientProtocol, GeminiPassthrough, ModelFeature, ModelSpec, OpenAiConverter,
    StreamTranslator,
};
use crate::credential::store::{ChainedCredentialStore, EncodedCredentialStore};
use crate::credential::{AutoDisableRule, CredentialPool, CredentialStore, FileCredentialStore};
use crate::error::{ProxyError, Result};
use crate::executor::{BackendRequest, DataStream, ExecutorSettings, RequestExecutor};
use crate::fake_stream::SyntheticStream;
use crate::sse::SseFrame;
use crate::transport::{ReqwestTransport, Transport};
use crate::truncation::{ChunkStream, TruncationRecovery};

/* --- types ----------------------------------------------------------------------------------- */

///
/// Application state containing all dependencies.
///
/// The pool and transport are injected, so the whole stack can run against
/// in-memory credentials and a scripted backend.
pub struct AppState {
    /** application configuration */
    pub config: Config,
    /** retry/failover engine, owns the credential pool */
    pub executor: Arc<RequestExecutor>,
    pub truncation: TruncationRecovery,
    pub synthetic: SyntheticStream,
    pub openai: OpenAiConverter,
    pub anthropic: AnthropicConverter,
    /** metrics for monitoring */
    pub metrics: AppMetrics,
}

///
/// Application metrics for monitoring and observability.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /** inference requests received */
    pub total_requests: AtomicU64,
    /** requests answered with content (streams count once started) */
    pub successful_requests: AtomicU64,
    /** requests answered with an error */
    pub failed_requests: AtomicU64,
    /** requests answered as a stream */
    pub streaming_requests: AtomicU64,
}

/* --- constants ------------------------------------------------------------------------------ */

/** Channel buffer size for streaming responses */
const STREAMING_CHANNEL_BUFFER: usize = 100;

/** Bearer token prefix */
const BEARER_PREFIX: &str = "Bearer ";

/** Pool scope used for the model-listing call */
const MODEL_LIST_SCOPE: &str = "models";

/* --- start of code -------------------------------------------------------------------------- */

impl AppState {
    ///
    /// Assemble the engine around an explicit credential store and transport.
    ///
    /// # Arguments
    ///  * `config` - application configuration
    ///  * `store` - credential source for the pool
    ///  * `transport` - backend transport
    pub fn new(config: Config, store: Arc<dyn CredentialStore>, transport: Arc<dyn Transport>) -> Self {
        let pool = Arc::new(CredentialPool::new(
            store,
            config.credentials.selection,
            AutoDisableRule::from_config(&config.retry),
        ));
        let executor = Arc::new(RequestExecutor::new(pool, transport, ExecutorSettings::from_config(&config)));
        let truncation = TruncationRecovery::new(executor.clone(), config.truncation.max_attempts);
        let synthetic = SyntheticStream::new(executor.clone(), &config.fake_stream);
        let openai = OpenAiConverter::new(config.server.log_level);
        let anthropic = AnthropicConverter::new(config.server.log_level);

        Self { config, executor, truncation, synthetic, openai, anthropic, metrics: AppMetrics::default() }
    }

    ///
    /// Create application state from configuration alone.
    ///
    /// Credentials come from `credentials.dir`, plus the base64 environment
    /// variable when it is set; the backend is reached over reqwest.
    ///
    /// # Returns
    ///  * Application state with initialized dependencies
    ///  * `ProxyError` if the credentials path or HTTP client cannot be set up
    pub fn from_config(config: Config) -> Result<Self> {
        let dir = expand_path(&config.credentials.dir)?;
        let mut stores: Vec<Arc<dyn CredentialStore>> = vec![Arc::new(FileCredentialStore::new(dir))];
        if let Some(encoded) = EncodedCredentialStore::from_env() {
            stores.push(Arc::new(encoded));
        }
        let store = Arc::new(ChainedCredentialStore::new(stores));
        let transport = Arc::new(ReqwestTransport::new()?);
        Ok(Self::new(config, store, transport))
    }

    fn pool(&self) -> &Arc<CredentialPool> {
        self.executor.pool()
    }

    fn fail(&self, protocol: ClientProtocol, error: &ProxyError) -> Response {
        self.metrics.failed_requests.fetch_add(1, Ordering::Relaxed);
        error_response(protocol, error)
    }

    fn succeed(&self) {
        self.metrics.successful_requests.fetch_add(1, Ordering::Relaxed);
    }
}

///
/// Build the router over prepared state.
///
/// # Arguments
///  * `state` - shared application state
///
/// # Returns
///  * Router with all gateway routes, CORS and request tracing
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/messages", post(messages))
        .route("/v1beta/models/{target}", post(gemini_generate))
        .route("/v1/models", get(models))
        .route("/health", get(health))
        .route("/admin/credentials", get(list_credentials))
        .route("/admin/credentials/reload", post(reload_credentials))
        .route("/admin/credentials/{id}/{action}", post(update_credential))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()))
        .with_state(state)
}

///
/// Handle OpenAI-compatible chat completions endpoint.
///
/// # Arguments
///  * `state` - shared application state
///  * `headers` - request headers, checked for the API key
///  * `query` - query parameters, checked for `key`
///  * `body` - OpenAI chat completion request
///
/// # Returns
///  * Completion, SSE stream of chunks, or an OpenAI-shaped error
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let protocol = ClientProtocol::OpenAi;
    state.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
    if let Err(e) = authorize(&state.config, &headers, &query) {
        return state.fail(protocol, &e);
    }

    let request: ChatCompletionRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(e) => return state.fail(protocol, &e),
    };
    let spec = ModelSpec::parse(&request.model);
    log_incoming_request(protocol, &spec, request.stream, request.messages.len());

    let backend = match state.openai.to_backend(&request) {
        Ok(backend) => backend,
        Err(e) => return state.fail(protocol, &e),
    };
    state.openai.debug(&format!("Backend request: {}", to_log_json(&backend)));

    let model = spec.requested.clone();
    let translator = Box::new(state.openai.stream_translator(&model));
    let converter = state.openai;
    respond(state, protocol, spec, backend, request.stream, translator, move |response| {
        converter.from_backend(response, &model)
    })
    .await
}

///
/// Handle Anthropic messages endpoint.
///
/// # Returns
///  * Message, SSE event stream, or an Anthropic-shaped error
pub async fn messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let protocol = ClientProtocol::Anthropic;
    state.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
    if let Err(e) = authorize(&state.config, &headers, &query) {
        return state.fail(protocol, &e);
    }

    let request: MessagesRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(e) => return state.fail(protocol, &e),
    };
    let spec = ModelSpec::parse(&request.model);
    log_incoming_request(protocol, &spec, request.stream, request.messages.len());

    let backend = match state.anthropic.to_backend(&request) {
        Ok(backend) => backend,
        Err(e) => return state.fail(protocol, &e),
    };
    state.anthropic.debug(&format!("Backend request: {}", to_log_json(&backend)));

    let model = spec.requested.clone();
    let translator = Box::new(state.anthropic.stream_translator(&model));
    let converter = state.anthropic;
    respond(state, protocol, spec, backend, request.stream, translator, move |response| {
        converter.from_backend(response, &model)
    })
    .await
}

///
/// Handle Gemini-native `{model}:generateContent` and `{model}:streamGenerateContent`.
///
/// The body is already in backend schema and is forwarded untranslated.
pub async fn gemini_generate(
    State(state): State<Arc<AppState>>,
    Path(target): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let protocol = ClientProtocol::Gemini;
    state.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
    if let Err(e) = authorize(&state.config, &headers, &query) {
        return state.fail(protocol, &e);
    }

    let (model, stream) = match target.rsplit_once(':') {
        Some((model, "generateContent")) => (model, false),
        Some((model, "streamGenerateContent")) => (model, true),
        _ => {
            state.metrics.failed_requests.fetch_add(1, Ordering::Relaxed);
            let message = format!("Unknown method in '{}'", target);
            return (StatusCode::NOT_FOUND, Json(protocol.error_body(404, &message))).into_response();
        }
    };

    let request: GenerateContentRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(e) => return state.fail(protocol, &e),
    };
    let spec = ModelSpec::parse(model);
    log_incoming_request(protocol, &spec, stream, request.contents.len());

    let translator = Box::new(GeminiPassthrough::default());
    respond(state, protocol, spec, request, stream, translator, GenerateContentResponse::clone).await
}

///
/// Route one translated call and render its outcome.
///
/// # Arguments
///  * `state` - shared application state
///  * `protocol` - caller's protocol, for error rendering
///  * `spec` - parsed model name, selects the streaming strategy
///  * `body` - translated backend request
///  * `stream` - whether the client asked for a stream
///  * `translator` - stream translator for the caller's protocol
///  * `render` - unary response mapping for the caller's protocol
async fn respond<R, F>(
    state: Arc<AppState>,
    protocol: ClientProtocol,
    spec: ModelSpec,
    mut body: GenerateContentRequest,
    stream: bool,
    translator: Box<dyn StreamTranslator>,
    render: F,
) -> Response
where
    R: Serialize,
    F: FnOnce(&GenerateContentResponse) -> R,
{
    apply_thinking_defaults(&spec, &mut body);
    let request = BackendRequest { model: spec, body };

    if !stream {
        return match state.executor.execute_unary(&request).await {
            Ok(response) => {
                state.succeed();
                Json(render(&response)).into_response()
            }
            Err(e) => state.fail(protocol, &e),
        };
    }

    state.metrics.streaming_requests.fetch_add(1, Ordering::Relaxed);
    let feature = request.model.feature;
    let chunks = match feature {
        ModelFeature::FakeStream => {
            state.succeed();
            let frames = state.synthetic.start(request, translator);
            return Sse::new(frames.map(|frame| Ok::<Event, ProxyError>(frame.into_event()))).into_response();
        }
        ModelFeature::AntiTruncation => state.truncation.execute(request).await,
        ModelFeature::None => state.executor.execute_stream(&request).await.map(decode_chunks),
    };

    match chunks {
        Ok(chunks) => {
            state.succeed();
            stream_response(chunks, translator)
        }
        Err(e) => state.fail(protocol, &e),
    }
}

/// Decode backend data lines into response chunks, skipping undecodable ones
fn decode_chunks(lines: DataStream) -> ChunkStream {
    Box::pin(lines.filter_map(|item| async move {
        match item {
            Ok(data) => parse_chunk(&data).map(Ok),
            Err(e) => Some(Err(e)),
        }
    }))
}

///
/// Translate a chunk stream into a client SSE response.
///
/// The translation runs in its own task; it stops, dropping the backend
/// stream, as soon as the client goes away.
fn stream_response(chunks: ChunkStream, translator: Box<dyn StreamTranslator>) -> Response {
    let (tx, rx) = mpsc::channel::<Result<Event>>(STREAMING_CHANNEL_BUFFER);
    tokio::spawn(forward_chunks(chunks, translator, tx));
    Sse::new(ReceiverStream::new(rx)).into_response()
}

async fn forward_chunks(
    mut chunks: ChunkStream,
    mut translator: Box<dyn StreamTranslator>,
    tx: mpsc::Sender<Result<Event>>,
) {
    while let Some(item) = chunks.next().await {
        let frames = match item {
            Ok(chunk) => translator.on_chunk(&chunk),
            Err(e) => {
                tracing::warn!("Stream failed after it started: {}", e);
                let body = e.backend_body().map(str::to_string).unwrap_or_else(|| e.to_string());
                translator.on_error(e.status_code(), &body)
            }
        };
        if !send_frames(&tx, frames).await {
            tracing::debug!("Client disconnected, dropping backend stream");
            return;
        }
    }
    send_frames(&tx, translator.finish()).await;
}

async fn send_frames(tx: &mpsc::Sender<Result<Event>>, frames: Vec<SseFrame>) -> bool {
    for frame in frames {
        if tx.send(Ok(frame.into_event())).await.is_err() {
            return false;
        }
    }
    true
}

///
/// Render an error in the caller's protocol.
///
/// Backend failures keep their status; the body is the backend's own for
/// Gemini callers and wrapped in the protocol's schema otherwise.
pub fn error_response(protocol: ClientProtocol, error: &ProxyError) -> Response {
    let status = StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = match error.backend_body() {
        Some(backend) => protocol.backend_error_body(status.as_u16(), backend),
        None => protocol.error_body(status.as_u16(), &error.to_string()),
    };
    if status.is_server_error() {
        tracing::error!("Request failed with {}: {}", status, error);
    } else {
        tracing::warn!("Request failed with {}: {}", status, error);
    }
    (status, Json(body)).into_response()
}

///
/// Check the inbound API key, when one is configured.
///
/// Accepted as `Authorization: Bearer`, `x-api-key`, `x-goog-api-key` or `?key=`.
fn authorize(config: &Config, headers: &HeaderMap, query: &HashMap<String, String>) -> Result<()> {
    let Some(expected) = config.server.api_key.as_deref().filter(|k| !k.is_empty()) else {
        return Ok(());
    };
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let presented = header(AUTHORIZATION.as_str())
        .and_then(|v| v.strip_prefix(BEARER_PREFIX))
        .or_else(|| header("x-api-key"))
        .or_else(|| header("x-goog-api-key"))
        .or_else(|| query.get("key").map(String::as_str));

    match presented {
        Some(key) if key == expected => Ok(()),
        Some(_) => Err(ProxyError::Auth("Invalid API key".to_string())),
        None => Err(ProxyError::Auth("Missing API key".to_string())),
    }
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| ProxyError::Translation(format!("Invalid request body: {}", e)))
}

fn log_incoming_request(protocol: ClientProtocol, spec: &ModelSpec, stream: bool, turns: usize) {
    tracing::info!(
        "{:?} request: model={} backend={} feature={:?} stream={} turns={}",
        protocol,
        spec.requested,
        spec.backend,
        spec.feature,
        stream,
        turns
    );
}

fn to_log_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("<unserializable: {}>", e))
}

///
/// Handle models listing endpoint for OpenAI compatibility.
///
/// # Returns
///  * Backend models with their feature variants, in OpenAI list format
pub async fn models(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let protocol = ClientProtocol::OpenAi;
    if let Err(e) = authorize(&state.config, &headers, &query) {
        return error_response(protocol, &e);
    }
    match state.executor.list_available_models(MODEL_LIST_SCOPE).await {
        Ok(ids) => {
            let created = chrono::Utc::now().timestamp();
            let data: Vec<Value> = ids
                .into_iter()
                .map(|id| json!({"id": id, "object": "model", "created": created, "owned_by": "poolmux"}))
                .collect();
            Json(json!({"object": "list", "data": data})).into_response()
        }
        Err(e) => error_response(protocol, &e),
    }
}

///
/// Handle health check endpoint.
///
/// # Returns
///  * Status, request metrics, executor counters and pool summary
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let total_requests = state.metrics.total_requests.load(Ordering::Relaxed);
    let successful_requests = state.metrics.successful_requests.load(Ordering::Relaxed);
    let failed_requests = state.metrics.failed_requests.load(Ordering::Relaxed);
    let streaming_requests = state.metrics.streaming_requests.load(Ordering::Relaxed);
    let pool = state.pool().summary().await;

    Json(json!({
      "status": "ok",
      "metrics": {
        "total_requests": total_requests,
        "successful_requests": successful_requests,
        "failed_requests": failed_requests,
        "streaming_requests": streaming_requests,
        "success_rate": if total_requests > 0 {
          (successful_requests as f64 / total_requests as f64 * 100.0).round()
        } else {
          100.0
        }
      },
      "executor": state.executor.stats(),
      "credentials": pool
    }))
}

/// `GET /admin/credentials`: every credential with its health state, tokens omitted
pub async fn list_credentials(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let protocol = ClientProtocol::OpenAi;
    if let Err(e) = authorize(&state.config, &headers, &query) {
        return error_response(protocol, &e);
    }
    match state.pool().snapshot().await {
        Ok(credentials) => Json(json!({"credentials": credentials})).into_response(),
        Err(e) => error_response(protocol, &e),
    }
}

/// `POST /admin/credentials/reload`: re-read the credential store
pub async fn reload_credentials(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let protocol = ClientProtocol::OpenAi;
    if let Err(e) = authorize(&state.config, &headers, &query) {
        return error_response(protocol, &e);
    }
    match state.pool().reload().await {
        Ok(loaded) => Json(json!({"loaded": loaded})).into_response(),
        Err(e) => error_response(protocol, &e),
    }
}

///
/// `POST /admin/credentials/{id}/enable|disable`.
///
/// Re-enabling also clears the credential's error history.
pub async fn update_credential(
    State(state): State<Arc<AppState>>,
    Path((id, action)): Path<(String, String)>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let protocol = ClientProtocol::OpenAi;
    if let Err(e) = authorize(&state.config, &headers, &query) {
        return error_response(protocol, &e);
    }
    let disabled = match action.as_str() {
        "enable" => false,
        "disable" => true,
        other => {
            let message = format!("Unknown action '{}', expected enable or disable", other);
            return (StatusCode::BAD_REQUEST, Json(protocol.error_body(400, &message))).into_response();
        }
    };

    match state.pool().set_disabled(&id, disabled).await {
        Ok(true) => Json(json!({"id": id, "disabled": disabled})).into_response(),
        Ok(false) => {
            let message = format!("No credential with id '{}'", id);
            (StatusCode::NOT_FOUND, Json(protocol.error_body(404, &message))).into_response()
        }
        Err(e) => error_response(protocol, &e),
    }
}

/* --- tests ----------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn config_with_key(key: Option<&str>) -> Config {
        let mut config = Config::default();
        config.server.api_key = key.map(str::to_string);
        config
    }

    #[test]
    fn test_authorize_without_key_accepts_everything() {
        let config = config_with_key(None);
        tokio_test::assert_ok!(authorize(&config, &HeaderMap::new(), &HashMap::new()));
    }

    #[test]
    fn test_authorize_accepts_every_key_location() {
        let config = config_with_key(Some("secret"));

        let mut bearer = HeaderMap::new();
        bearer.insert(AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        assert!(authorize(&config, &bearer, &HashMap::new()).is_ok());

        for name in ["x-api-key", "x-goog-api-key"] {
            let mut headers = HeaderMap::new();
            headers.insert(name, HeaderValue::from_static("secret"));
            assert!(authorize(&config, &headers, &HashMap::new()).is_ok(), "{}", name);
        }

        let query = HashMap::from([("key".to_string(), "secret".to_string())]);
        assert!(authorize(&config, &HeaderMap::new(), &query).is_ok());
    }

    #[test]
    fn test_authorize_rejects_missing_and_wrong_key() {
        let config = config_with_key(Some("secret"));
        let missing = tokio_test::assert_err!(authorize(&config, &HeaderMap::new(), &HashMap::new()));
        assert_eq!(missing.status_code(), 401);

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("guess"));
        assert!(matches!(authorize(&config, &headers, &HashMap::new()), Err(ProxyError::Auth(_))));
    }

    #[test]
    fn test_error_response_keeps_backend_status() {
        let error = ProxyError::BackendRejected {
            status: 404,
            body: r#"{"error":{"code":404,"message":"model not found"}}"#.to_string(),
        };
        assert_eq!(error_response(ClientProtocol::OpenAi, &error).status(), StatusCode::NOT_FOUND);

        let unavailable = ProxyError::CredentialUnavailable("empty pool".to_string());
        assert_eq!(
            error_response(ClientProtocol::Anthropic, &unavailable).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
