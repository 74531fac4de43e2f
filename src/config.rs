//! Configuration for the operation pipeline
//!
//! Loaded from TOML, with optional environment overrides.

use serde::{Deserialize, Serialize};

use crate::node_manager::{ConfigError, NodeConfig};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub node: NodeConfig,

    #[serde(default)]
    pub fees: FeeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Fee coefficients and estimation buffers
///
/// Defaults reproduce the node's minimal-fee filter:
/// `100 mutez + 1000 nanotez/byte + 100 nanotez/gas`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeConfig {
    #[serde(default = "default_minimal_fee_mutez")]
    pub minimal_fee_mutez: u64,

    #[serde(default = "default_fee_per_byte_nanotez")]
    pub fee_per_byte_nanotez: u64,

    #[serde(default = "default_fee_per_gas_nanotez")]
    pub fee_per_gas_nanotez: u64,

    /// Added on top of the computed fee
    #[serde(default)]
    pub fee_margin_mutez: u64,

    /// Headroom for kinds whose gas varies between simulation and inclusion
    #[serde(default = "default_milligas_buffer")]
    pub milligas_buffer: u64,

    /// Added to any non-zero storage estimate
    #[serde(default = "default_storage_buffer")]
    pub storage_buffer: u64,

    /// Hex characters the signature adds to the dry-forged group
    #[serde(default = "default_op_size_buffer_hex")]
    pub op_size_buffer_hex: u64,

    /// Hex length of an injected reveal
    #[serde(default = "default_reveal_op_size_hex")]
    pub reveal_op_size_hex: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `info,tezos_pipeline=debug`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_minimal_fee_mutez() -> u64 { 100 }
fn default_fee_per_byte_nanotez() -> u64 { 1000 }
fn default_fee_per_gas_nanotez() -> u64 { 100 }
fn default_milligas_buffer() -> u64 { 100_000 }
fn default_storage_buffer() -> u64 { 20 }
fn default_op_size_buffer_hex() -> u64 { 130 }
fn default_reveal_op_size_hex() -> u64 { 324 }
fn default_log_level() -> String { "info".to_string() }

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            minimal_fee_mutez: default_minimal_fee_mutez(),
            fee_per_byte_nanotez: default_fee_per_byte_nanotez(),
            fee_per_gas_nanotez: default_fee_per_gas_nanotez(),
            fee_margin_mutez: 0,
            milligas_buffer: default_milligas_buffer(),
            storage_buffer: default_storage_buffer(),
            op_size_buffer_hex: default_op_size_buffer_hex(),
            reveal_op_size_hex: default_reveal_op_size_hex(),
        }
    }
}

impl FeeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.op_size_buffer_hex % 2 != 0 || self.reveal_op_size_hex % 2 != 0 {
            return Err(ConfigError::ValidationError(
                "hex sizes must be an even number of characters".to_string(),
            ));
        }
        if self.reveal_op_size_hex == 0 {
            return Err(ConfigError::ValidationError(
                "reveal_op_size_hex must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    ///
    /// Reads `.env` if present, then honours `TEZOS_RPC_URLS`,
    /// `TEZOS_FEE_MARGIN_MUTEZ` and `TEZOS_LOG`.
    pub fn from_file_with_env(path: &str) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Build the whole configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self {
            node: NodeConfig::from_env()?,
            fees: FeeConfig::default(),
            logging: LoggingConfig::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration pointed at the given nodes
    pub fn from_urls(urls: &[String]) -> Self {
        Self {
            node: NodeConfig::from_urls(urls),
            fees: FeeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if std::env::var("TEZOS_RPC_URLS").is_ok() {
            let node = NodeConfig::from_env()?;
            self.node.endpoints = node.endpoints;
        }
        if let Ok(margin) = std::env::var("TEZOS_FEE_MARGIN_MUTEZ") {
            self.fees.fee_margin_mutez = margin.parse().map_err(|_| {
                ConfigError::ParseError(format!("TEZOS_FEE_MARGIN_MUTEZ is not a number: {}", margin))
            })?;
        }
        if let Ok(level) = std::env::var("TEZOS_LOG") {
            self.logging.level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.node.validate()?;
        self.fees.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_fee_defaults() {
        let fees = FeeConfig::default();
        assert_eq!(fees.minimal_fee_mutez, 100);
        assert_eq!(fees.fee_per_byte_nanotez, 1000);
        assert_eq!(fees.fee_per_gas_nanotez, 100);
        assert_eq!(fees.milligas_buffer, 100_000);
        assert_eq!(fees.storage_buffer, 20);
        assert_eq!(fees.reveal_op_size_hex, 324);
        assert!(fees.validate().is_ok());
    }

    #[test]
    fn test_from_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[node]
[[node.endpoints]]
url = "https://rpc.tzbeta.net"

[fees]
fee_margin_mutez = 50
"#
        )
        .unwrap();

        let config = PipelineConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.node.endpoints.len(), 1);
        assert_eq!(config.fees.fee_margin_mutez, 50);
        assert_eq!(config.fees.minimal_fee_mutez, 100);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_odd_hex_sizes_rejected() {
        let fees = FeeConfig {
            op_size_buffer_hex: 131,
            ..FeeConfig::default()
        };
        assert!(fees.validate().is_err());
    }
}
