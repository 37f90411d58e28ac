//! Server configuration, loaded from environment variables at startup.

use std::time::Duration;

use anyhow::{bail, Context};

/// Which response-generation strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorKind {
    /// Deterministic keyword matching; no external calls, no API key needed.
    Rule,
    /// Hosted LLM via an OpenAI-compatible chat-completions endpoint.
    Llm,
}

/// Runtime configuration for cartbot-server.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// SQLite (or other) database URL.  Required; startup fails without it.
    /// Supports any sqlx-compatible connection string, e.g.
    /// `"sqlite://cartbot.db?mode=rwc"`.
    pub database_url: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Comma-separated CORS origin allow-list; `None` means wildcard.
    pub cors_allowed_origins: Option<String>,

    /// Serve Swagger UI at `/swagger-ui` (default: `true`; disable in
    /// production to avoid exposing the API structure).
    pub enable_swagger: bool,

    /// Response-generation strategy (default: rule-based).
    pub generator: GeneratorKind,

    /// API key for the LLM endpoint.  Required when `generator` is `Llm`;
    /// startup fails without it.
    pub llm_api_key: Option<String>,

    /// Chat-completions endpoint URL.
    pub llm_api_url: String,

    /// Model identifier sent to the LLM endpoint.
    pub llm_model: String,

    /// Upper bound on one generation call; expiry becomes the fallback
    /// reply, not a failed turn.
    pub generator_timeout: Duration,
}

impl Config {
    /// Build [`Config`] from environment variables.
    ///
    /// `CARTBOT_DATABASE_URL` is always required; `CARTBOT_LLM_API_KEY` is
    /// required when `CARTBOT_GENERATOR=llm`.  Everything else has a default.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("CARTBOT_DATABASE_URL")
            .context("CARTBOT_DATABASE_URL must be set")?;

        let generator = match env_or("CARTBOT_GENERATOR", "rule").as_str() {
            "rule" => GeneratorKind::Rule,
            "llm" => GeneratorKind::Llm,
            other => bail!("CARTBOT_GENERATOR must be 'rule' or 'llm', got '{other}'"),
        };

        let llm_api_key = std::env::var("CARTBOT_LLM_API_KEY").ok();
        if generator == GeneratorKind::Llm && llm_api_key.is_none() {
            bail!("CARTBOT_LLM_API_KEY must be set when CARTBOT_GENERATOR=llm");
        }

        Ok(Self {
            bind_address: env_or("CARTBOT_BIND", "0.0.0.0:3000"),
            database_url,
            log_level: env_or("CARTBOT_LOG", "info"),
            log_json: std::env::var("CARTBOT_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            cors_allowed_origins: std::env::var("CARTBOT_CORS_ORIGINS").ok(),
            enable_swagger: std::env::var("CARTBOT_ENABLE_SWAGGER")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
            generator,
            llm_api_key,
            llm_api_url: env_or(
                "CARTBOT_LLM_API_URL",
                "https://api.groq.com/openai/v1/chat/completions",
            ),
            llm_model: env_or("CARTBOT_LLM_MODEL", "mixtral-8x7b-32768"),
            generator_timeout: Duration::from_secs(parse_env(
                "CARTBOT_GENERATOR_TIMEOUT_SECS",
                30,
            )),
        })
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
