use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres for interview checkpoints. `None` degrades to in-memory state.
    pub database_url: Option<String>,
    /// Redis for the session context cache. `None` disables caching.
    pub redis_url: Option<String>,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub llm_api_base: String,
    /// Round budget written into every new interview.
    pub max_round: u32,
    /// Force the interview to end once `total_round >= max_round`.
    pub enforce_round_limit: bool,
    pub context_cache_ttl_secs: u64,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: optional_env("DATABASE_URL"),
            redis_url: optional_env("REDIS_URL"),
            supabase_url: require_env("SUPABASE_URL")?
                .trim()
                .trim_end_matches('/')
                .to_string(),
            supabase_anon_key: require_env("SUPABASE_ANON_KEY")?.trim().to_string(),
            llm_api_base: optional_env("LLM_API_BASE")
                .unwrap_or_else(|| crate::llm_client::DEFAULT_API_BASE.to_string()),
            max_round: parse_env("MAX_ROUND", 20)?,
            enforce_round_limit: parse_env("ENFORCE_ROUND_LIMIT", false)?,
            context_cache_ttl_secs: parse_env("CONTEXT_CACHE_TTL_SECS", 3600)?,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// PostgREST base for the external session directory.
    pub fn supabase_rest_url(&self) -> String {
        format!("{}/rest/v1", self.supabase_url)
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

/// Unset and blank values are both treated as absent.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value: {raw}")),
        None => Ok(default),
    }
}
