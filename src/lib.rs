//! # PoolMux - credential-pool gateway library
//!
//! Serves OpenAI, Anthropic and Gemini clients from one backend reached
//! through a pool of rotating credentials. While primarily designed as a
//! binary application, this library exposes its core functionality for
//! programmatic use.
//!
//! ## Library Usage
//!
//! ```rust,no_run
//! use poolmux::{Config, create_app};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load()?;
//!     let app = create_app(config)?;
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Layered configuration (defaults, files, environment) and CLI helpers
//! - [`credential`] - Credential stores and the health-tracking pool
//! - [`converter`] - OpenAI / Anthropic / Gemini protocol conversion
//! - [`executor`] - Backend calls with retry, failover and credential prefetch
//! - [`truncation`] - Continuation of streams cut off before their completion marker
//! - [`fake_stream`] - Streaming emulation over unary calls with heartbeats
//! - [`server`] - HTTP routes and handlers
//! - [`error`] - Error types and handling
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

pub mod config;
pub mod converter;
pub mod credential;
pub mod error;
pub mod executor;
pub mod fake_stream;
pub mod server;
pub mod sse;
pub mod transport;
pub mod truncation;

// Re-export commonly used types
pub use config::Config;
pub use error::ProxyError;

/// Creates a new PoolMux application with the given configuration.
///
/// Credentials are read from the configured directory (and the encoded
/// environment variable, when set); the backend is reached over HTTP.
///
/// # Arguments
///
/// * `config` - Application configuration
///
/// # Returns
///
/// Returns an Axum Router that can be served directly.
///
/// # Errors
///
/// Returns a `ProxyError` if the credentials path cannot be resolved or the
/// HTTP client cannot be built.
pub fn create_app(config: Config) -> Result<axum::Router, ProxyError> {
    let state = server::AppState::from_config(config)?;
    Ok(server::router(std::sync::Arc::new(state)))
}
