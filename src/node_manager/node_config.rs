use serde::{Deserialize, Serialize};

/// A single Tezos node endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEndpointConfig {
    /// Base URL, e.g. `https://rpc.tzkt.io/mainnet`
    pub url: String,

    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

/// Node pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub endpoints: Vec<NodeEndpointConfig>,

    /// Consecutive endpoint failures before a cooldown
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u64,

    /// Cooldown period in seconds
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_failure_threshold() -> u64 {
    3
}

fn default_cooldown_secs() -> u64 {
    30
}

impl NodeConfig {
    /// Load configuration from environment variables
    /// Expected format: TEZOS_RPC_URLS=url1,url2,url3
    pub fn from_env() -> Result<Self, ConfigError> {
        let urls_str = std::env::var("TEZOS_RPC_URLS")
            .map_err(|_| ConfigError::MissingEnvVar("TEZOS_RPC_URLS".to_string()))?;

        let urls: Vec<String> = urls_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if urls.is_empty() {
            return Err(ConfigError::ValidationError("No node URLs provided".to_string()));
        }

        let mut config = Self::from_urls(&urls);
        if let Some(timeout_ms) = std::env::var("TEZOS_RPC_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            for endpoint in &mut config.endpoints {
                endpoint.timeout_ms = timeout_ms;
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one node endpoint must be configured".to_string(),
            ));
        }

        let mut seen_urls = std::collections::HashSet::new();
        for endpoint in &self.endpoints {
            if !seen_urls.insert(&endpoint.url) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate node URL: {}",
                    endpoint.url
                )));
            }

            if !endpoint.url.starts_with("http://") && !endpoint.url.starts_with("https://") {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid URL format: {}",
                    endpoint.url
                )));
            }

            if endpoint.timeout_ms == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid timeout for {}: must be > 0",
                    endpoint.url
                )));
            }
        }

        if self.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "failure_threshold must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Create a default configuration from a list of URLs
    pub fn from_urls(urls: &[String]) -> Self {
        let endpoints = urls
            .iter()
            .map(|url| NodeEndpointConfig {
                url: url.trim_end_matches('/').to_string(),
                timeout_ms: default_timeout_ms(),
            })
            .collect();

        Self {
            endpoints,
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    ParseError(String),
    ValidationError(String),
    MissingEnvVar(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            ConfigError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            ConfigError::MissingEnvVar(var) => write!(f, "Missing environment variable: {}", var),
        }
    }
}

impl std::error::Error for ConfigError {}
