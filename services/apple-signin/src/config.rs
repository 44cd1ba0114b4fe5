//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The `.p8` signing key is loaded from the APPLE_PRIVATE_KEY env var or
//! `private_key_file`, and should not be written into the TOML directly.

use apple_auth::StrategyConfig;
use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Env var holding the PEM contents of the `.p8` signing key
pub const PRIVATE_KEY_ENV: &str = "APPLE_PRIVATE_KEY";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub apple: AppleConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Timeout for calls to Apple (token exchange, key fetch)
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

/// Sign in with Apple settings
#[derive(Debug, Deserialize)]
pub struct AppleConfig {
    #[serde(flatten)]
    pub strategy: StrategyConfig,
    /// Path to the `.p8` key (alternative to APPLE_PRIVATE_KEY)
    #[serde(default)]
    pub private_key_file: Option<PathBuf>,
    /// JWKS endpoint override, for staging environments
    #[serde(default)]
    pub keys_url: Option<String>,
}

fn default_max_connections() -> usize {
    1000
}

fn default_http_timeout() -> u64 {
    10
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Private key resolution order:
    /// 1. APPLE_PRIVATE_KEY env var
    /// 2. private_key_file path from config
    /// 3. inline `private_key` (discouraged)
    pub fn load(path: &Path) -> common::Result<Self> {
        let mut config: Config = common::load_toml(path)?;

        if config.server.http_timeout_secs == 0 {
            return Err(common::Error::Config(
                "http_timeout_secs must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if let Ok(key) = std::env::var(PRIVATE_KEY_ENV) {
            config.apple.strategy.private_key = Secret::new(key);
        } else if let Some(ref key_file) = config.apple.private_key_file {
            if let Some(key) = common::read_trimmed(key_file)? {
                config.apple.strategy.private_key = Secret::new(key);
            }
        }

        if config.apple.strategy.private_key.is_blank() {
            return Err(common::Error::Config(format!(
                "no private key: set {PRIVATE_KEY_ENV} or apple.private_key_file"
            )));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("apple-signin.toml")
    }
}
