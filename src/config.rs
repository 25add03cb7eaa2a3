//! Configuration management for the registry tools
//!
//! Loads configuration from TOML files with environment variable substitution.
//! Every network the tools talk to is a named profile, so contract addresses,
//! endpoints and signing credentials never live in code.

use anyhow::{Context, Result};
use ethers::types::Address;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub submission: SubmissionConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    pub networks: HashMap<String, NetworkConfig>,
}

/// Retry and fee-escalation parameters for the submission engine
#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_inclusion_timeout_secs")]
    pub inclusion_timeout_secs: u64,
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactsConfig {
    #[serde(default = "default_artifacts_dir")]
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    pub registry_address: String,
    #[serde(default)]
    pub deploy_block: u64,
    #[serde(default = "default_log_chunk_size")]
    pub log_chunk_size: u64,
    #[serde(default)]
    pub signer: SignerConfig,
}

/// Signing credential: either a raw private key or an encrypted keystore
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignerConfig {
    pub private_key: Option<String>,
    pub keystore_path: Option<PathBuf>,
    pub keystore_password: Option<String>,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_inclusion_timeout_secs() -> u64 {
    60
}

fn default_receipt_poll_interval_ms() -> u64 {
    1_000
}

fn default_gas_limit() -> u64 {
    3_000_000
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_log_chunk_size() -> u64 {
    50_000
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            inclusion_timeout_secs: default_inclusion_timeout_secs(),
            receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
            gas_limit: default_gas_limit(),
        }
    }
}

impl SubmissionConfig {
    pub fn inclusion_timeout(&self) -> Duration {
        Duration::from_secs(self.inclusion_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: default_artifacts_dir(),
        }
    }
}

impl NetworkConfig {
    /// Parsed registry contract address
    pub fn registry(&self) -> Result<Address> {
        self.registry_address
            .parse()
            .with_context(|| format!("Invalid registry address: {}", self.registry_address))
    }
}

impl Settings {
    /// Load settings from the file named by `REGISTRY_TOOLS_CONFIG`, or the given path
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => env::var("REGISTRY_TOOLS_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("config/default.toml")),
        };

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    /// Parse settings from TOML text, substituting `${VAR}` from the environment
    pub fn from_toml(input: &str) -> Result<Self> {
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.networks.is_empty() {
            anyhow::bail!("At least one network must be configured");
        }

        if self.submission.max_attempts == 0 {
            anyhow::bail!("submission.max_attempts must be at least 1");
        }

        if self.submission.inclusion_timeout_secs == 0 {
            anyhow::bail!("submission.inclusion_timeout_secs must be non-zero");
        }

        for (name, network) in &self.networks {
            if network.rpc_url.is_empty() {
                anyhow::bail!("Network {} has no RPC URL configured", name);
            }
            network
                .registry()
                .with_context(|| format!("Network {} is misconfigured", name))?;
            if network.log_chunk_size == 0 {
                anyhow::bail!("Network {} has a zero log_chunk_size", name);
            }
            if network.signer.private_key.is_none() && network.signer.keystore_path.is_none() {
                tracing::debug!("Network {} has no signer - read-only commands only", name);
            }
        }

        Ok(())
    }

    /// Get a network profile by name
    pub fn network(&self, name: &str) -> Result<&NetworkConfig> {
        self.networks.get(name).with_context(|| {
            let mut known: Vec<_> = self.networks.keys().cloned().collect();
            known.sort();
            format!("Unknown network {}, configured: {}", name, known.join(", "))
        })
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR
        .replace_all(input, |caps: &regex::Captures| {
            env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [submission]
        max_attempts = 5

        [networks.holesky]
        chain_id = 17000
        rpc_url = "https://ethereum-holesky-rpc.publicnode.com"
        registry_address = "0x5d4fC7B5Aeea4CF4F0Ca6Be09A2F5AaDAd2F2803"
        deploy_block = 1700000

        [networks.holesky.signer]
        private_key = "${REGISTRY_TOOLS_TEST_KEY}"
    "#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_parse_with_defaults() {
        env::set_var("REGISTRY_TOOLS_TEST_KEY", "0xabc");
        let settings = Settings::from_toml(SAMPLE).unwrap();

        assert_eq!(settings.submission.max_attempts, 5);
        assert_eq!(settings.submission.inclusion_timeout(), Duration::from_secs(60));
        assert_eq!(settings.submission.gas_limit, 3_000_000);
        assert_eq!(settings.artifacts.dir, PathBuf::from("artifacts"));

        let holesky = settings.network("holesky").unwrap();
        assert_eq!(holesky.chain_id, 17000);
        assert_eq!(holesky.deploy_block, 1_700_000);
        assert_eq!(holesky.log_chunk_size, 50_000);
        assert_eq!(holesky.signer.private_key.as_deref(), Some("0xabc"));
        assert!(holesky.registry().is_ok());
    }

    #[test]
    fn test_unknown_network_lists_known() {
        let settings = Settings::from_toml(SAMPLE).unwrap();
        let err = settings.network("mainnet").unwrap_err();
        assert!(err.to_string().contains("holesky"));
    }

    #[test]
    fn test_shipped_profiles_parse() {
        let settings = Settings::from_toml(include_str!("../config/default.toml")).unwrap();

        for name in ["mev-commit-testnet", "holesky", "mainnet"] {
            assert!(settings.network(name).is_ok(), "missing profile {}", name);
        }
        assert_eq!(settings.network("holesky").unwrap().chain_id, 17000);
        assert_eq!(settings.submission.max_attempts, 10);
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let input = SAMPLE.replace("max_attempts = 5", "max_attempts = 0");
        assert!(Settings::from_toml(&input).is_err());
    }

    #[test]
    fn test_rejects_bad_registry_address() {
        let input = SAMPLE.replace("0x5d4fC7B5Aeea4CF4F0Ca6Be09A2F5AaDAd2F2803", "not-an-address");
        assert!(Settings::from_toml(&input).is_err());
    }
}
