// src/config/mod.rs
// Engine configuration, constructed once and passed by reference into the
// orchestrator and adapters. Never stored in a process-wide global.

use std::time::Duration;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Credentials and endpoint for one upstream provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub openai: ProviderConfig,
    pub anthropic: ProviderConfig,
    pub google: ProviderConfig,
    pub deepseek: ProviderConfig,

    /// Deadline applied to each outbound provider call.
    pub call_timeout_secs: u64,
    /// Expected response length assumed when estimating cost up front.
    pub expected_output_tokens: u32,
    /// Default max_tokens sent to providers that require one (Anthropic).
    pub default_max_tokens: u32,

    pub database_url: String,
}

impl RelayConfig {
    /// Load from the environment (reads .env if present).
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            openai: ProviderConfig {
                api_key: env_or("OPENAI_API_KEY", ""),
                base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com"),
            },
            anthropic: ProviderConfig {
                api_key: env_or("ANTHROPIC_API_KEY", ""),
                base_url: env_or("ANTHROPIC_BASE_URL", "https://api.anthropic.com"),
            },
            google: ProviderConfig {
                api_key: env_or("GOOGLE_API_KEY", ""),
                base_url: env_or(
                    "GOOGLE_BASE_URL",
                    "https://generativelanguage.googleapis.com",
                ),
            },
            deepseek: ProviderConfig {
                api_key: env_or("DEEPSEEK_API_KEY", ""),
                base_url: env_or("DEEPSEEK_BASE_URL", "https://api.deepseek.com"),
            },
            call_timeout_secs: env_parse("RELAY_CALL_TIMEOUT_SECS", 120),
            expected_output_tokens: env_parse("RELAY_EXPECTED_OUTPUT_TOKENS", 500),
            default_max_tokens: env_parse("RELAY_DEFAULT_MAX_TOKENS", 1024),
            database_url: env_or("DATABASE_URL", "sqlite://relay.db"),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        let empty = |base: &str| ProviderConfig { api_key: String::new(), base_url: base.into() };
        Self {
            openai: empty("https://api.openai.com"),
            anthropic: empty("https://api.anthropic.com"),
            google: empty("https://generativelanguage.googleapis.com"),
            deepseek: empty("https://api.deepseek.com"),
            call_timeout_secs: 120,
            expected_output_tokens: 500,
            default_max_tokens: 1024,
            database_url: "sqlite::memory:".into(),
        }
    }
}
