//! # PoolMux - credential-pool gateway server
//!
//! Serves OpenAI-compatible (`/v1/chat/completions`), Anthropic-compatible
//! (`/v1/messages`) and Gemini-native (`/v1beta/models/...`) clients from one
//! backend, rotating through a pool of credentials.
//!
//! ## Features
//!
//! - **Credential pool**: round-robin or random selection, per-model cooldowns, auto-disable
//! - **Retry and failover**: transparent credential switching with prefetch on rate limits
//! - **Truncation recovery**: `anti-truncation/` models are continued until complete
//! - **Synthetic streaming**: `fake-stream/` models stream heartbeats over a unary call
//!
//! ## Configuration
//!
//! Layered from defaults, `/etc/poolmux/config.toml`, the user config file and
//! `POOLMUX_*` environment variables. Run `poolmux config init` to start.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::env;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use poolmux::config::Config;
use poolmux::config::cli::ConfigCli;
use poolmux::server::{self, AppState};

/* --- constants ------------------------------------------------------------------------------ */

/** the version as defined in cargo.toml */
const VERSION: &str = env!("CARGO_PKG_VERSION");

/* --- start of code -------------------------------------------------------------------------- */

///
/// Main application entry point.
///
/// Handles CLI commands first, then loads configuration, initializes logging
/// and serves until Ctrl-C.
#[tokio::main]
async fn main() {
    handle_cli_args();

    if let Err(e) = run().await {
        eprintln!("Error:");
        for line in format!("{:#}", e).lines() {
            eprintln!("{}", line);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    initialize_logging(&config);
    config.validate()?;

    let state = AppState::from_config(config.clone()).context("Failed to initialize gateway")?;
    let loaded = state.executor.pool().reload().await?;
    if loaded == 0 {
        tracing::warn!(
            "No credentials found in '{}'; requests will fail until credentials are added and reloaded",
            config.credentials.dir
        );
    }

    start_server(&config, server::router(Arc::new(state))).await
}

///
/// Handle command line arguments before config loading.
///
/// This ensures these commands work even without a valid configuration.
fn handle_cli_args() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        return;
    }

    match args[1].as_str() {
        "--version" | "-V" => {
            println!("poolmux {}", VERSION);
            std::process::exit(0);
        }
        "--help" | "-h" => {
            print_help();
            std::process::exit(0);
        }
        "config" => {
            let code = match run_config_command(&args[2..]) {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    1
                }
            };
            std::process::exit(code);
        }
        other => {
            if other.starts_with('-') {
                eprintln!("Error: Unknown option: {}", other);
            } else {
                eprintln!("Error: Unknown command: {}", other);
            }
            eprintln!();
            print_help();
            std::process::exit(1);
        }
    }
}

fn run_config_command(args: &[String]) -> poolmux::error::Result<()> {
    match args.first().map(String::as_str) {
        Some("init") => ConfigCli::init(args.iter().any(|a| a == "--force")),
        Some("show") => ConfigCli::show(),
        Some("validate") => ConfigCli::validate(),
        Some("path") => ConfigCli::path(),
        Some(other) => Err(poolmux::ProxyError::Config(format!(
            "Unknown config command '{}'. Expected one of: init, show, validate, path",
            other
        ))),
        None => Err(poolmux::ProxyError::Config(
            "Missing config command. Expected one of: init, show, validate, path".to_string(),
        )),
    }
}

///
/// Print help information for the PoolMux CLI.
fn print_help() {
    println!("PoolMux v{}", VERSION);
    println!("Gateway serving OpenAI, Anthropic and Gemini clients from a pool of backend credentials");
    println!();
    println!("USAGE:");
    println!("    poolmux [COMMAND] [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    config init [--force]   Write an example configuration file");
    println!("    config show             Display the effective configuration");
    println!("    config validate         Validate configuration and credentials directory");
    println!("    config path             Print configuration file locations");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help              Print help information");
    println!("    -V, --version           Print version information");
    println!();
    println!("ENVIRONMENT VARIABLES:");
    println!("    POOLMUX_SERVER_PORT           Listen port (default: 7861)");
    println!("    POOLMUX_SERVER_LOG_LEVEL      trace, debug, info, warn, error (default: info)");
    println!("    POOLMUX_CREDENTIALS_DIR       Directory of credential JSON files");
    println!("    RUST_LOG                      Overrides the log filter");
    println!();
    println!("MODEL PREFIXES:");
    println!("    fake-stream/<model>       Stream heartbeats while a unary call runs");
    println!("    anti-truncation/<model>   Continue responses cut off before completion");
}

///
/// Initialize logging with the configured level.
///
/// `RUST_LOG` takes precedence over the configuration when set.
fn initialize_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.server.log_level.as_directive()));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

///
/// Bind the listener and serve until Ctrl-C.
///
/// # Arguments
///  * `config` - application configuration
///  * `app` - configured Axum application
async fn start_server(config: &Config, app: axum::Router) -> anyhow::Result<()> {
    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await.with_context(|| {
        format!(
            "Failed to bind to {}\n\n\
             Check that the port is free (lsof -i :{}) or choose another one:\n\
             export POOLMUX_SERVER_PORT=7862",
            address, config.server.port
        )
    })?;

    log_startup_info(config);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.context("Server error")?;
    info!("PoolMux stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining connections");
}

fn log_startup_info(config: &Config) {
    let base = format!("http://{}:{}", config.server.host, config.server.port);
    info!("PoolMux v{} listening on {}", VERSION, base);
    info!("OpenAI-compatible endpoint: {}/v1/chat/completions", base);
    info!("Anthropic-compatible endpoint: {}/v1/messages", base);
    info!("Gemini-native endpoint: {}/v1beta/models/{{model}}:generateContent", base);
    info!("Credential selection: {:?}", config.credentials.selection);

    if config.server.log_level.is_trace_enabled() {
        info!("[TRACE] Trace logging is ENABLED - converted requests will be logged");
    }
}
