//! Client configuration.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

fn default_synchronous() -> bool {
    true
}

fn default_request_completion_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_delay_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retries() -> u32 {
    5
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_power_state_timeout() -> Duration {
    Duration::from_secs(120)
}

/// Configuration for [`Client`](crate::Client).
///
/// Deserializing rejects unknown options. Durations use the humantime format
/// (`"500ms"`, `"5m"`).
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Base URL of the API, e.g. `https://api.example.com`.
    pub api_url: String,
    pub user_id: String,
    pub api_token: String,
    /// When true, mutating calls block until their async request is done.
    #[serde(default = "default_synchronous")]
    pub synchronous: bool,
    /// Deadline for one async request to reach a terminal state.
    #[serde(default = "default_request_completion_timeout", with = "humantime_serde")]
    pub request_completion_timeout: Duration,
    /// Base delay between retries and between status polls.
    #[serde(default = "default_delay_interval", with = "humantime_serde")]
    pub delay_interval: Duration,
    /// Upper bound for the attempt-scaled retry delay.
    #[serde(default = "default_max_delay_interval", with = "humantime_serde")]
    pub max_delay_interval: Duration,
    /// Retry cap for retryable errors; 0 disables retries.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Network timeout of a single HTTP exchange.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Deadline for a server to reach a requested power state.
    #[serde(default = "default_power_state_timeout", with = "humantime_serde")]
    pub power_state_timeout: Duration,
    /// Extra headers, overriding the defaults by name.
    #[serde(default)]
    pub http_headers: HashMap<String, String>,
    /// Injected HTTP client. When set, `request_timeout` is not applied.
    #[serde(skip)]
    pub http_client: Option<reqwest::Client>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_url", &self.api_url)
            .field("user_id", &self.user_id)
            .field("api_token", &"<redacted>")
            .field("synchronous", &self.synchronous)
            .field("request_completion_timeout", &self.request_completion_timeout)
            .field("delay_interval", &self.delay_interval)
            .field("max_delay_interval", &self.max_delay_interval)
            .field("max_retries", &self.max_retries)
            .field("request_timeout", &self.request_timeout)
            .field("power_state_timeout", &self.power_state_timeout)
            .field("http_headers", &self.http_headers.keys().collect::<Vec<_>>())
            .field("http_client", &self.http_client.is_some())
            .finish()
    }
}

impl ClientConfig {
    /// Create a configuration with default settings.
    pub fn new(
        api_url: impl Into<String>,
        user_id: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        Self {
            api_url: api_url.into(),
            user_id: user_id.into(),
            api_token: api_token.into(),
            synchronous: default_synchronous(),
            request_completion_timeout: default_request_completion_timeout(),
            delay_interval: default_delay_interval(),
            max_delay_interval: default_max_delay_interval(),
            max_retries: default_max_retries(),
            request_timeout: default_request_timeout(),
            power_state_timeout: default_power_state_timeout(),
            http_headers: HashMap::new(),
            http_client: None,
        }
    }

    /// Parse a JSON configuration document. Unknown options are rejected.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Create a configuration from environment variables.
    ///
    /// Environment variables:
    /// - `VDC_API_URL`: Base URL (required)
    /// - `VDC_USER_ID`: User id (required)
    /// - `VDC_API_TOKEN`: API token (required)
    /// - `VDC_SYNCHRONOUS`: Block on request completion (default: "true")
    /// - `VDC_MAX_RETRIES`: Retry cap (default: 5)
    /// - `VDC_DELAY_INTERVAL_MS`: Retry/poll delay in milliseconds (default: 1000)
    /// - `VDC_REQUEST_COMPLETION_TIMEOUT_SECS`: Request completion deadline (default: 300)
    pub fn from_env() -> Result<Self> {
        let required = |name: &str| {
            std::env::var(name).map_err(|_| Error::Config(format!("{name} is required")))
        };

        let mut config = Self::new(
            required("VDC_API_URL")?,
            required("VDC_USER_ID")?,
            required("VDC_API_TOKEN")?,
        );

        if let Ok(v) = std::env::var("VDC_SYNCHRONOUS") {
            config.synchronous = v.to_lowercase() == "true" || v == "1";
        }

        if let Ok(v) = std::env::var("VDC_MAX_RETRIES") {
            config.max_retries = v
                .parse()
                .map_err(|e| Error::Config(format!("invalid VDC_MAX_RETRIES: {}", e)))?;
        }

        if let Ok(v) = std::env::var("VDC_DELAY_INTERVAL_MS") {
            let ms: u64 = v
                .parse()
                .map_err(|e| Error::Config(format!("invalid VDC_DELAY_INTERVAL_MS: {}", e)))?;
            config.delay_interval = Duration::from_millis(ms);
        }

        if let Ok(v) = std::env::var("VDC_REQUEST_COMPLETION_TIMEOUT_SECS") {
            let secs: u64 = v.parse().map_err(|e| {
                Error::Config(format!("invalid VDC_REQUEST_COMPLETION_TIMEOUT_SECS: {}", e))
            })?;
            config.request_completion_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check required fields and timeouts.
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.api_url)
            .map_err(|e| Error::Config(format!("invalid api_url {:?}: {}", self.api_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "invalid api_url {:?}: scheme must be http or https",
                self.api_url
            )));
        }
        if self.user_id.trim().is_empty() {
            return Err(Error::Config("user_id must not be empty".to_string()));
        }
        if self.api_token.trim().is_empty() {
            return Err(Error::Config("api_token must not be empty".to_string()));
        }

        for (name, value) in [
            ("request_completion_timeout", self.request_completion_timeout),
            ("delay_interval", self.delay_interval),
            ("request_timeout", self.request_timeout),
            ("power_state_timeout", self.power_state_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }
        if self.max_delay_interval < self.delay_interval {
            return Err(Error::Config(
                "max_delay_interval must not be smaller than delay_interval".to_string(),
            ));
        }
        Ok(())
    }

    /// Block on request completion (`true`) or return pending handles (`false`).
    pub fn with_synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    pub fn with_request_completion_timeout(mut self, timeout: Duration) -> Self {
        self.request_completion_timeout = timeout;
        self
    }

    /// Set the base retry/poll delay. The maximum retry delay is raised to
    /// match if it would be smaller.
    pub fn with_delay_interval(mut self, delay: Duration) -> Self {
        self.delay_interval = delay;
        self.max_delay_interval = self.max_delay_interval.max(delay);
        self
    }

    pub fn with_max_delay_interval(mut self, delay: Duration) -> Self {
        self.max_delay_interval = delay;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_power_state_timeout(mut self, timeout: Duration) -> Self {
        self.power_state_timeout = timeout;
        self
    }

    pub fn with_http_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.http_headers.insert(name.into(), value.into());
        self
    }

    /// Use a preconfigured HTTP client (tests, proxies, custom TLS).
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }
}
