use std::str::FromStr;

use anyhow::{bail, Context, Result};

use crate::rate_limit::MAX_WINDOW_SECONDS;

const DEFAULT_REDIRECT_URI: &str = "http://localhost:3000/zume/settings/gmail/callback";
const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";

/// Where per-client rate limit records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitBackend {
    Memory,
    Redis,
}

impl FromStr for RateLimitBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(RateLimitBackend::Memory),
            "redis" => Ok(RateLimitBackend::Redis),
            other => bail!("RATE_LIMIT_BACKEND must be 'memory' or 'redis', got '{other}'"),
        }
    }
}

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub gemini_api_key: String,
    pub google_client_id: String,
    pub google_client_secret: String,
    pub google_redirect_uri: String,
    pub frontend_url: String,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_secs: u64,
    pub rate_limit_backend: RateLimitBackend,
    pub rate_limit_sweep_secs: u64,
    pub scan_max_results: u32,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let rate_limit_backend: RateLimitBackend = optional_env("RATE_LIMIT_BACKEND", "memory")
            .parse()?;
        let redis_url = std::env::var("REDIS_URL").ok().filter(|v| !v.is_empty());
        if rate_limit_backend == RateLimitBackend::Redis && redis_url.is_none() {
            bail!("RATE_LIMIT_BACKEND=redis requires REDIS_URL");
        }

        let rate_limit_window_secs = parse_env("RATE_LIMIT_WINDOW_SECS", 60)?;
        let rate_limit_sweep_secs = parse_env("RATE_LIMIT_SWEEP_SECS", 300)?;
        check_rate_limit_periods(rate_limit_window_secs, rate_limit_sweep_secs)?;

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url,
            gemini_api_key: require_env("GEMINI_API_KEY")?,
            google_client_id: require_env("GOOGLE_CLIENT_ID")?,
            google_client_secret: require_env("GOOGLE_CLIENT_SECRET")?,
            google_redirect_uri: optional_env("GOOGLE_REDIRECT_URI", DEFAULT_REDIRECT_URI),
            frontend_url: optional_env("FRONTEND_URL", DEFAULT_FRONTEND_URL),
            rate_limit_max_requests: parse_env("RATE_LIMIT_MAX_REQUESTS", 100)?,
            rate_limit_window_secs,
            rate_limit_backend,
            rate_limit_sweep_secs,
            scan_max_results: parse_env("SCAN_MAX_RESULTS", 50)?,
            port: parse_env("PORT", 8080)?,
            rust_log: optional_env("RUST_LOG", "info"),
        })
    }
}

fn check_rate_limit_periods(window_secs: u64, sweep_secs: u64) -> Result<()> {
    if !(1..=MAX_WINDOW_SECONDS).contains(&window_secs) {
        bail!("RATE_LIMIT_WINDOW_SECS must be between 1 and {MAX_WINDOW_SECONDS}, got {window_secs}");
    }
    if sweep_secs == 0 {
        bail!("RATE_LIMIT_SWEEP_SECS must be at least 1");
    }
    Ok(())
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value: '{raw}'")),
        Err(_) => Ok(default),
    }
}
