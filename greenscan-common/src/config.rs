//! Configuration loading
//!
//! Bootstrap settings come from a TOML file resolved in this order:
//! 1. Explicit path (command-line `--config`)
//! 2. `GREENSCAN_CONFIG` environment variable
//! 3. `<config_dir>/greenscan/config.toml`
//! 4. Built-in defaults (a missing default file is not an error)
//!
//! Individual values may then be overridden by environment variables and,
//! in the binary, by command-line flags.

use crate::{Category, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const CONFIG_ENV_VAR: &str = "GREENSCAN_CONFIG";
pub const DATABASE_URL_ENV_VAR: &str = "GREENSCAN_DATABASE_URL";
pub const BACKEND_URL_ENV_VAR: &str = "GREENSCAN_BACKEND_URL";
pub const ENVIRONMENT_ENV_VAR: &str = "GREENSCAN_ENV";

/// Which backend URL is used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl std::str::FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(Error::InvalidInput(format!(
                "Unknown environment '{}'. Expected development or production",
                other
            ))),
        }
    }
}

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub environment: Environment,

    /// Categories tracked by the home screen, in display order
    pub categories: Vec<Category>,

    pub store: StoreConfig,
    pub backend: BackendConfig,
    pub logging: LoggingConfig,
}

/// Remote store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Realtime database URL, e.g. `https://<project>.firebaseio.com`
    pub database_url: Option<String>,

    /// Parent path of the per-category records
    pub root_path: String,

    /// Delay before re-opening a dropped live stream
    pub reconnect_delay_ms: u64,
}

/// Analysis backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub development_url: String,
    pub production_url: Option<String>,
    pub timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            categories: Category::ALL.to_vec(),
            store: StoreConfig::default(),
            backend: BackendConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            root_path: "plant_info".to_string(),
            reconnect_delay_ms: 2000,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            development_url: "http://127.0.0.1:5000".to_string(),
            production_url: None,
            timeout_secs: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Read and parse a configuration file
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Resolve, load, apply environment overrides and validate
    ///
    /// An explicitly named file (argument or environment) must exist; the
    /// platform default file is optional.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let explicit = cli_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => {
                info!("Loading config from {}", path.display());
                Self::load_file(&path)?
            }
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => {
                    info!("Loading config from {}", path.display());
                    Self::load_file(&path)?
                }
                None => {
                    warn!("No config file found, using built-in defaults");
                    Self::default()
                }
            },
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override values from `GREENSCAN_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var(DATABASE_URL_ENV_VAR) {
            if !url.trim().is_empty() {
                self.store.database_url = Some(url);
            }
        }
        if let Ok(env) = std::env::var(ENVIRONMENT_ENV_VAR) {
            self.environment = env.parse()?;
        }
        if let Ok(url) = std::env::var(BACKEND_URL_ENV_VAR) {
            if !url.trim().is_empty() {
                match self.environment {
                    Environment::Development => self.backend.development_url = url,
                    Environment::Production => self.backend.production_url = Some(url),
                }
            }
        }
        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.categories.is_empty() {
            return Err(Error::Config("At least one category must be tracked".to_string()));
        }
        let mut seen = HashSet::new();
        for category in &self.categories {
            if !seen.insert(category) {
                return Err(Error::Config(format!("Duplicate category '{}'", category)));
            }
        }
        if let Some(url) = &self.store.database_url {
            check_http_url("store.database_url", url)?;
        }
        check_http_url("backend.development_url", &self.backend.development_url)?;
        if let Some(url) = &self.backend.production_url {
            check_http_url("backend.production_url", url)?;
        }
        Ok(())
    }

    /// Backend URL for the configured environment
    pub fn backend_url(&self) -> Result<&str> {
        match self.environment {
            Environment::Development => Ok(self.backend.development_url.as_str()),
            Environment::Production => self.backend.production_url.as_deref().ok_or_else(|| {
                Error::Config("backend.production_url is required in production".to_string())
            }),
        }
    }
}

fn check_http_url(field: &str, url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{} must be an http(s) URL, got '{}'",
            field, url
        )))
    }
}

/// Platform config file location (`~/.config/greenscan/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("greenscan").join("config.toml"))
}
