use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding [`ClientConfig::api_base_url`].
pub const ENV_API_BASE_URL: &str = "INSIGHT_API_BASE_URL";
/// Environment variable overriding [`HttpConfig::timeout_secs`].
pub const ENV_HTTP_TIMEOUT_SECS: &str = "INSIGHT_HTTP_TIMEOUT_SECS";
/// Environment variable overriding [`BillingConfig::checkout_grace_ms`].
pub const ENV_CHECKOUT_GRACE_MS: &str = "INSIGHT_CHECKOUT_GRACE_MS";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Base URL of the backend API, without a trailing slash.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub billing: BillingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            auth: AuthConfig::default(),
            http: HttpConfig::default(),
            billing: BillingConfig::default(),
        }
    }
}

fn default_api_base_url() -> String {
    "http://localhost:8000".to_string()
}

/// Credential renewal and expiry detection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Lifetime the identity provider usually grants a token. Default: 3600
    #[serde(default = "default_token_lifetime_secs")]
    pub token_lifetime_secs: u64,
    /// Background renewal period. Default: 1500 (25 minutes)
    #[serde(default = "default_renewal_interval_secs")]
    pub renewal_interval_secs: u64,
    /// Expiry watchdog period. Default: 60
    #[serde(default = "default_watchdog_interval_secs")]
    pub watchdog_interval_secs: u64,
    /// Minimum remaining lifetime of a token handed to callers. Default: 300
    #[serde(default = "default_safety_margin_secs")]
    pub safety_margin_secs: u64,
    /// Consecutive failed watchdog checks before the session is declared expired. Default: 3
    #[serde(default = "default_expiry_strikes")]
    pub expiry_strikes: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_lifetime_secs: default_token_lifetime_secs(),
            renewal_interval_secs: default_renewal_interval_secs(),
            watchdog_interval_secs: default_watchdog_interval_secs(),
            safety_margin_secs: default_safety_margin_secs(),
            expiry_strikes: default_expiry_strikes(),
        }
    }
}

impl AuthConfig {
    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_interval_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }

    pub fn safety_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.safety_margin_secs as i64)
    }
}

fn default_token_lifetime_secs() -> u64 {
    3600
}

fn default_renewal_interval_secs() -> u64 {
    1500
}

fn default_watchdog_interval_secs() -> u64 {
    60
}

fn default_safety_margin_secs() -> u64 {
    300
}

fn default_expiry_strikes() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    /// Whole-request timeout for plain requests. Default: 30
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Connect timeout for the long-lived progress stream. Default: 10
    #[serde(default = "default_stream_connect_timeout_secs")]
    pub stream_connect_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            stream_connect_timeout_secs: default_stream_connect_timeout_secs(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn stream_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_connect_timeout_secs)
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_stream_connect_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BillingConfig {
    /// How long a fetched snapshot satisfies `refresh()`. Default: 30
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Wait after a completed checkout before reloading billing state,
    /// covering webhook propagation. Default: 3000
    #[serde(default = "default_checkout_grace_ms")]
    pub checkout_grace_ms: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            checkout_grace_ms: default_checkout_grace_ms(),
        }
    }
}

impl BillingConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn checkout_grace(&self) -> Duration {
        Duration::from_millis(self.checkout_grace_ms)
    }
}

fn default_cache_ttl_secs() -> u64 {
    30
}

fn default_checkout_grace_ms() -> u64 {
    3000
}

impl ClientConfig {
    /// Parses a YAML document. Missing fields take their defaults.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: ClientConfig =
            serde_yaml::from_str(content).context("Failed to parse client config")?;
        Ok(config)
    }

    /// Loads a YAML config file, applies environment overrides and validates.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config = Self::from_yaml_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `INSIGHT_*` environment overrides on top of the current values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var(ENV_API_BASE_URL) {
            self.api_base_url = url;
        }
        if let Ok(raw) = std::env::var(ENV_HTTP_TIMEOUT_SECS) {
            self.http.timeout_secs = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be an integer, got {:?}", ENV_HTTP_TIMEOUT_SECS, raw))?;
        }
        if let Ok(raw) = std::env::var(ENV_CHECKOUT_GRACE_MS) {
            self.billing.checkout_grace_ms = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be an integer, got {:?}", ENV_CHECKOUT_GRACE_MS, raw))?;
        }
        Ok(())
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.api_base_url.trim().is_empty() {
            anyhow::bail!("api_base_url must not be empty");
        }

        let auth = &self.auth;
        // A failed renewal must still leave room for one more attempt before expiry.
        if auth.renewal_interval_secs.saturating_mul(2) >= auth.token_lifetime_secs {
            anyhow::bail!(
                "auth.renewal_interval_secs ({}) must be less than half of auth.token_lifetime_secs ({})",
                auth.renewal_interval_secs,
                auth.token_lifetime_secs
            );
        }
        if auth.watchdog_interval_secs == 0 || auth.watchdog_interval_secs >= auth.renewal_interval_secs {
            anyhow::bail!(
                "auth.watchdog_interval_secs ({}) must be non-zero and shorter than auth.renewal_interval_secs ({})",
                auth.watchdog_interval_secs,
                auth.renewal_interval_secs
            );
        }
        if auth.safety_margin_secs >= auth.renewal_interval_secs {
            anyhow::bail!(
                "auth.safety_margin_secs ({}) must be shorter than auth.renewal_interval_secs ({})",
                auth.safety_margin_secs,
                auth.renewal_interval_secs
            );
        }
        if auth.expiry_strikes == 0 {
            anyhow::bail!("auth.expiry_strikes must be at least 1");
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/config_tests/client_config_tests.rs"]
mod tests;
