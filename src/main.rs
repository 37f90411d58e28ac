//! cartbot-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables (missing required
//!    variables are startup-fatal).
//! 2. Initialise structured tracing (JSON in production, pretty in dev).
//! 3. Open the SQLite database and run pending migrations.
//! 4. Pick the response-generation strategy.
//! 5. Build the Axum router and start the HTTP server with graceful shutdown.

mod chat;
mod config;
mod db;
mod error;
mod generator;
mod middleware;
mod routes;
mod schemas;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::chat::ChatService;
use crate::config::{Config, GeneratorKind};
use crate::db::sqlite::SqliteStore;
use crate::generator::llm::LlmGenerator;
use crate::generator::rules::RuleBasedGenerator;
use crate::generator::ResponseGenerator;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env()?;

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    // Build the log-level filter, warning loudly if the configured value is
    // not a valid tracing filter expression.
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: CARTBOT_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "cartbot-server starting");

    // ── 3. Database ────────────────────────────────────────────────────────────
    let store = Arc::new(SqliteStore::connect(&cfg.database_url).await?);
    info!(database_url = %cfg.database_url, "database ready");

    // ── 4. Response generator ──────────────────────────────────────────────────
    let generator: Arc<dyn ResponseGenerator> = match cfg.generator {
        GeneratorKind::Rule => {
            info!("using rule-based response generator");
            Arc::new(RuleBasedGenerator)
        }
        GeneratorKind::Llm => {
            let api_key = cfg
                .llm_api_key
                .clone()
                .context("CARTBOT_LLM_API_KEY must be set when CARTBOT_GENERATOR=llm")?;
            info!(model = %cfg.llm_model, url = %cfg.llm_api_url, "using LLM response generator");
            Arc::new(LlmGenerator::new(
                api_key,
                cfg.llm_api_url.clone(),
                cfg.llm_model.clone(),
                cfg.generator_timeout,
            ))
        }
    };

    // ── 5. Shared application state ────────────────────────────────────────────
    let chat = Arc::new(ChatService::new(
        store.clone(),
        generator,
        cfg.generator_timeout,
    ));
    let state = Arc::new(AppState {
        config: Arc::new(cfg.clone()),
        store,
        chat,
    });

    // ── 6. HTTP server with graceful shutdown ──────────────────────────────────
    let app = routes::build(Arc::clone(&state));
    let addr: SocketAddr = cfg.bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("cartbot-server stopped");
    Ok(())
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c   => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
