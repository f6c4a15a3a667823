//! Application configuration
//!
//! Loaded from a YAML file with defaults for every field; a few settings
//! can be overridden through environment variables for container use.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scenarios: ScenariosConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP admin server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://fleetsim.db".to_string(),
        }
    }
}

/// Scenario directory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenariosConfig {
    pub dir: String,
}

impl Default for ScenariosConfig {
    fn default() -> Self {
        Self {
            dir: "scenarios".to_string(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load from a YAML file, falling back to defaults when the file does
    /// not exist, then apply environment overrides
    pub fn load(path: &Path) -> Result<Self, crate::ServerError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| crate::ServerError::Config(e.to_string()))?;
            serde_yaml::from_str(&content)
                .map_err(|e| crate::ServerError::Config(e.to_string()))?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(listen) = std::env::var("FLEETSIM_LISTEN") {
            if let Some((host, port)) = listen.rsplit_once(':') {
                if let Ok(port) = port.parse() {
                    self.server.host = host.to_string();
                    self.server.port = port;
                }
            }
        }
        if let Ok(url) = std::env::var("FLEETSIM_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(dir) = std::env::var("FLEETSIM_SCENARIO_DIR") {
            self.scenarios.dir = dir;
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
