use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, EdrError};

type Result<T> = std::result::Result<T, EdrError>;

/// Pool size bounds; user-configured counts are clamped, never rejected.
pub const MIN_CONNECTIONS: u16 = 1;
pub const MAX_CONNECTIONS: u16 = 64;

/// Expand tilde (~) in paths to the actual home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(path_str) = path.to_str() {
        if path_str.starts_with("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(&path_str[2..]);
            }
        } else if path_str == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub download: DownloadConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// NNTP provider endpoint and fetch behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub host: String,
    pub port: u16,
    pub ssl: bool,
    pub verify_ssl_certs: bool,
    pub user: String,
    pub pass: String,
    pub connections: u16,
    pub command_timeout_secs: u64,
    pub prefetch_segments: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub cache_dir: PathBuf,
    pub cache_max_bytes: u64,
    pub mount_point: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

// Default implementations
impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            host: "news.example.com".to_string(),
            port: 563,
            ssl: true,
            verify_ssl_certs: true,
            user: String::new(),
            pass: String::new(),
            connections: 8,
            command_timeout_secs: 15,
            prefetch_segments: 2,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.local/share/edrmount/catalog.db"),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("~/.cache/edrmount"),
            cache_max_bytes: 10 * 1024 * 1024 * 1024, // 10 GiB
            mount_point: PathBuf::from("~/edrmount"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download: DownloadConfig::default(),
            catalog: CatalogConfig::default(),
            paths: PathsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Configuration builder for flexible configuration loading
pub struct ConfigBuilder {
    config: ConfigLib,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            config: ConfigLib::builder().build().unwrap(),
        }
    }

    /// Add a configuration file
    pub fn add_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config = ConfigLib::builder()
            .add_source(self.config)
            .add_source(File::from(path.as_ref()))
            .build()
            .unwrap();
        self
    }

    /// Add environment variables with prefix
    pub fn add_env_prefix(mut self, prefix: &str) -> Self {
        self.config = ConfigLib::builder()
            .add_source(self.config)
            .add_source(
                Environment::with_prefix(prefix)
                    .separator("_")
                    .try_parsing(true),
            )
            .build()
            .unwrap();
        self
    }

    /// Build, normalize and validate the configuration
    pub fn build(self) -> Result<Config> {
        let mut config: Config = self
            .config
            .try_deserialize()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.normalize();
        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Get the standard config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::Invalid {
            field: "config_dir".to_string(),
            reason: "Could not determine config directory".to_string(),
        })?;
        Ok(config_dir.join("edrmount").join("config.toml"))
    }

    /// Load configuration from local or standard location
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("edrmount.toml");
        let standard_config = Self::config_path()?;

        // Check for local config first (for development/testing)
        let config_path = if local_config.exists() {
            local_config
        } else {
            // Create standard config file with defaults if it doesn't exist
            if !standard_config.exists() {
                if let Some(parent) = standard_config.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                Self::create_sample(&standard_config)?;
                tracing::info!(
                    path = %standard_config.display(),
                    "created default configuration, edit it with your Usenet credentials"
                );
            }
            standard_config
        };
        tracing::debug!(path = %config_path.display(), "loading configuration");

        ConfigBuilder::new()
            .add_file(&config_path)
            .add_env_prefix("EDRMOUNT")
            .build()
    }

    /// Create a sample configuration file
    pub fn create_sample<P: AsRef<Path>>(path: P) -> Result<()> {
        let sample = Self::default();
        let content = toml::to_string_pretty(&sample)
            .map_err(|e| ConfigError::Parse(format!("Failed to serialize config: {}", e)))?;

        let commented_content = format!(
            r#"# edrmount Configuration File
#
# All settings can be overridden via environment variables with the
# EDRMOUNT_ prefix, e.g. EDRMOUNT_DOWNLOAD_HOST=news.example.com
#
# [download]   NNTP provider endpoint; connections is clamped to 1-64
# [catalog]    path to the importer's catalog database (read-only)
# [paths]      segment cache directory, its soft byte cap, FUSE mountpoint
# [logging]    level also honors RUST_LOG

{}"#,
            content
        );

        std::fs::write(path, commented_content)?;
        Ok(())
    }

    /// Clamp out-of-range values instead of rejecting them
    fn normalize(&mut self) {
        self.download.connections = self
            .download
            .connections
            .clamp(MIN_CONNECTIONS, MAX_CONNECTIONS);
        if self.download.command_timeout_secs == 0 {
            self.download.command_timeout_secs = 15;
        }

        self.catalog.path = expand_tilde(&self.catalog.path);
        self.paths.cache_dir = expand_tilde(&self.paths.cache_dir);
        self.paths.mount_point = expand_tilde(&self.paths.mount_point);
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.download.host.is_empty() || self.download.host == "news.example.com" {
            return Err(ConfigError::NoServer.into());
        }

        if self.download.user.is_empty() || self.download.pass.is_empty() {
            return Err(ConfigError::NoCredentials.into());
        }

        if self.paths.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidPath {
                path: self.paths.cache_dir.clone(),
                reason: "cache directory not specified".to_string(),
            }
            .into());
        }

        if self.paths.mount_point.as_os_str().is_empty() {
            return Err(ConfigError::InvalidPath {
                path: self.paths.mount_point.clone(),
                reason: "mount point not specified".to_string(),
            }
            .into());
        }

        if self.paths.cache_max_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "paths.cache_max_bytes".to_string(),
                reason: "must be at least one segment's worth of bytes".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Ensure required directories exist
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.paths.cache_dir)?;
        std::fs::create_dir_all(&self.paths.mount_point)?;
        Ok(())
    }

    /// Apply command-line overrides
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(host) = overrides.host {
            self.download.host = host;
        }
        if let Some(port) = overrides.port {
            self.download.port = port;
        }
        if let Some(connections) = overrides.connections {
            self.download.connections = connections.clamp(MIN_CONNECTIONS, MAX_CONNECTIONS);
        }
        if let Some(ssl) = overrides.ssl {
            self.download.ssl = ssl;
        }
        if let Some(mount_point) = overrides.mount_point {
            self.paths.mount_point = expand_tilde(&mount_point);
        }
        if let Some(catalog) = overrides.catalog {
            self.catalog.path = expand_tilde(&catalog);
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
    }
}

/// Command-line configuration overrides
#[derive(Debug, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub connections: Option<u16>,
    pub ssl: Option<bool>,
    pub mount_point: Option<PathBuf>,
    pub catalog: Option<PathBuf>,
    pub log_level: Option<String>,
}
