use serde::{Deserialize, Serialize};
use std::fs;

use anyhow::{Context, Result};

use crate::notify::NotifyConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub server: ServerConfig,
    /// Root for absolute resource URIs in responses (no trailing slash).
    pub base_uri: String,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub notifications: NotifyConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    /// 32-byte hex seed for the state-receipt signing key. An ephemeral key
    /// is generated when absent.
    #[serde(default)]
    pub signing_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Bootstrap credentials for the admin account, provisioned at startup.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AdminConfig {
    pub name: String,
    pub password: Option<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            name: "admin".to_string(),
            password: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthConfig {
    /// Accepted skew between the request Date header and server time.
    pub signature_time_window_ms: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            signature_time_window_ms: 30_000,
        }
    }
}

impl AppConfig {
    /// Load config from YAML file based on environment
    pub fn load(env: &str) -> Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        let mut config: Self =
            serde_yaml::from_str(&content).context("Failed to parse config yaml")?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Environment variables take precedence over YAML config.
    ///
    /// Supported overrides:
    /// - LEDGER_SERVER_PORT: listen port (u16)
    /// - LEDGER_SERVER_HOST: listen host
    /// - LEDGER_BASE_URI: resource URI root
    /// - LEDGER_LOG_LEVEL: log level (trace/debug/info/warn/error)
    /// - LEDGER_ADMIN_PASSWORD: admin bootstrap password
    /// - LEDGER_SIGNING_KEY: receipt signing key seed (hex)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("LEDGER_SERVER_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                tracing::info!("Config override: server.port = {} (from LEDGER_SERVER_PORT)", p);
                self.server.port = p;
            }
        }
        if let Ok(host) = std::env::var("LEDGER_SERVER_HOST") {
            tracing::info!("Config override: server.host = {} (from LEDGER_SERVER_HOST)", host);
            self.server.host = host;
        }
        if let Ok(base_uri) = std::env::var("LEDGER_BASE_URI") {
            tracing::info!("Config override: base_uri = {} (from LEDGER_BASE_URI)", base_uri);
            self.base_uri = base_uri;
        }
        if let Ok(level) = std::env::var("LEDGER_LOG_LEVEL") {
            tracing::info!("Config override: log_level = {} (from LEDGER_LOG_LEVEL)", level);
            self.log_level = level;
        }
        if let Ok(password) = std::env::var("LEDGER_ADMIN_PASSWORD") {
            tracing::info!("Config override: admin.password = [REDACTED] (from LEDGER_ADMIN_PASSWORD)");
            self.admin.password = Some(password);
        }
        if let Ok(seed) = std::env::var("LEDGER_SIGNING_KEY") {
            tracing::info!("Config override: signing_key = [REDACTED] (from LEDGER_SIGNING_KEY)");
            self.signing_key = Some(seed);
        }
    }

    /// Validate configuration at startup
    ///
    /// Returns an error if any critical configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Invalid server.port: must be > 0");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log_level '{}': must be one of {:?}",
                self.log_level,
                valid_levels
            );
        }

        if !self.base_uri.starts_with("http://") && !self.base_uri.starts_with("https://") {
            anyhow::bail!("Invalid base_uri '{}': must be http(s)", self.base_uri);
        }
        if self.base_uri.ends_with('/') {
            anyhow::bail!("Invalid base_uri '{}': no trailing slash", self.base_uri);
        }

        if self.notifications.workers == 0 {
            anyhow::bail!("Invalid notifications.workers: must be >= 1");
        }
        if self.notifications.max_attempts == 0 {
            anyhow::bail!("Invalid notifications.max_attempts: must be >= 1");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "ledgerd.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            base_uri: "http://localhost:3000".to_string(),
            admin: AdminConfig::default(),
            notifications: NotifyConfig::default(),
            auth: AuthConfig::default(),
            signing_key: None,
        }
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_port() {
        let mut config = base_config();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = base_config();
        config.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_base_uri() {
        let mut config = base_config();
        config.base_uri = "localhost:3000".to_string();
        assert!(config.validate().is_err());

        let mut config = base_config();
        config.base_uri = "http://localhost:3000/".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_worker_pool() {
        let mut config = base_config();
        config.notifications.workers = 0;
        assert!(config.validate().is_err());
    }
}
