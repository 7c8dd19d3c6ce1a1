//!
//! Error handling for the PoolMux gateway.
//!
//! Defines the error taxonomy used throughout the engine using thiserror.
//! Backend failures are split into retryable and fatal classes so the request
//! executor can absorb the former and surface the latter unchanged.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use thiserror::Error;

/* --- types ----------------------------------------------------------------------------------- */

///
/// Application error types.
///
/// Covers configuration, inbound authentication, translation, credential
/// availability and every backend outcome the executor classifies.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("No credential available: {0}")]
    CredentialUnavailable(String),

    #[error("Backend rate limited (status {status})")]
    BackendRateLimited { status: u16, body: String },

    #[error("Backend unavailable (status {status})")]
    BackendUnavailable { status: u16, body: String },

    #[error("Backend returned an empty response")]
    BackendSilentFailure,

    #[error("Backend rejected request (status {status})")]
    BackendRejected { status: u16, body: String },

    #[error("Transport failure: {0}")]
    Transport(String),
}

/* --- start of code -------------------------------------------------------------------------- */

/// Result type alias for cleaner error handling throughout the application
pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    ///
    /// Whether the executor may absorb this error and try again.
    ///
    /// # Returns
    ///  * `true` for rate limits, unavailability, silent failures and transport errors
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProxyError::BackendRateLimited { .. }
                | ProxyError::BackendUnavailable { .. }
                | ProxyError::BackendSilentFailure
                | ProxyError::Transport(_)
        )
    }

    ///
    /// Status code to record against a credential for this failure.
    ///
    /// Silent failures are recorded as 200; transport failures carry no code.
    pub fn recorded_status(&self) -> Option<u16> {
        match self {
            ProxyError::BackendRateLimited { status, .. }
            | ProxyError::BackendUnavailable { status, .. }
            | ProxyError::BackendRejected { status, .. } => Some(*status),
            ProxyError::BackendSilentFailure => Some(200),
            _ => None,
        }
    }

    ///
    /// HTTP status the error is surfaced to clients with.
    ///
    /// Backend failures keep the backend's own status; failures that never
    /// produced a backend error response become 500.
    pub fn status_code(&self) -> u16 {
        match self {
            ProxyError::BackendRateLimited { status, .. }
            | ProxyError::BackendUnavailable { status, .. }
            | ProxyError::BackendRejected { status, .. } => *status,
            ProxyError::Auth(_) => 401,
            ProxyError::Translation(_) | ProxyError::Http(_) | ProxyError::Serialization(_) => 400,
            ProxyError::CredentialUnavailable(_) => 503,
            ProxyError::BackendSilentFailure
            | ProxyError::Transport(_)
            | ProxyError::Config(_)
            | ProxyError::Request(_) => 500,
        }
    }

    /// Backend error body, when the failure originated from a backend response
    pub fn backend_body(&self) -> Option<&str> {
        match self {
            ProxyError::BackendRateLimited { body, .. }
            | ProxyError::BackendUnavailable { body, .. }
            | ProxyError::BackendRejected { body, .. } => Some(body),
            _ => None,
        }
    }
}

/* --- tests ----------------------------------------------------------------------------------- */
