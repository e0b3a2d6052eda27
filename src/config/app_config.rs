//! Application configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) is a
//! valid configuration.

use super::defaults;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "SAFESCAN_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "safescan.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O error ({path}): {err}", path = .0.display(), err = .1)]
    Io(PathBuf, #[source] std::io::Error),
    #[error("config parse error ({path}): {err}", path = .0.display(), err = .1)]
    Parse(PathBuf, #[source] toml::de::Error),
    #[error("config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Can be overridden by `--addr` / `SAFESCAN_ADDR`.
    pub bind_address: String,
    pub max_upload_mb: usize,
    /// Allowed CORS origins; empty means same-origin only
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: defaults::BIND_ADDRESS.to_string(),
            max_upload_mb: defaults::MAX_UPLOAD_MB,
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// 0 = one worker per CPU
    pub count: usize,
    pub queue_factor: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub job_timeout_ms: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: 0,
            queue_factor: defaults::QUEUE_FACTOR,
            max_retries: defaults::MAX_RETRIES,
            retry_delay_ms: defaults::RETRY_DELAY_MS,
            job_timeout_ms: defaults::JOB_TIMEOUT_MS,
        }
    }
}

impl WorkersConfig {
    /// Configured count, with 0 resolved to the CPU count.
    pub fn effective_count(&self) -> usize {
        if self.count == 0 {
            defaults::cpu_count()
        } else {
            self.count
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub purge_interval_secs: u64,
    pub timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: defaults::CACHE_TTL_SECS,
            purge_interval_secs: defaults::CACHE_PURGE_INTERVAL_SECS,
            timeout_ms: defaults::CACHE_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(defaults::DB_PATH),
            timeout_ms: defaults::STORAGE_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    pub upload_dir: PathBuf,
    pub temp_upload_dir: PathBuf,
    pub public_prefix: String,
    /// Sniffed MIME types accepted for classification
    pub allowed_mime_types: Vec<String>,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from(defaults::UPLOAD_DIR),
            temp_upload_dir: PathBuf::from(defaults::TEMP_UPLOAD_DIR),
            public_prefix: defaults::PUBLIC_PREFIX.to_string(),
            allowed_mime_types: crate::validation::default_allowed_types(),
        }
    }
}

impl FilesConfig {
    /// Create the upload and temp directories if missing.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.upload_dir)?;
        std::fs::create_dir_all(&self.temp_upload_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSection {
    pub client_buffer: usize,
    pub command_buffer: usize,
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            client_buffer: defaults::HUB_CLIENT_BUFFER,
            command_buffer: defaults::HUB_COMMAND_BUFFER,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Inference program; the image path is appended as last argument
    pub program: Option<String>,
    pub args: Vec<String>,
}

// ============================================================================
// Root
// ============================================================================

/// Complete service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub workers: WorkersConfig,
    pub cache: CacheConfig,
    pub storage: StorageConfig,
    pub files: FilesConfig,
    pub hub: HubSection,
    pub classifier: ClassifierConfig,
}

impl AppConfig {
    /// Load configuration using the standard search order:
    ///
    /// 1. `$SAFESCAN_CONFIG`
    /// 2. `./safescan.toml`
    /// 3. Built-in defaults
    ///
    /// An unreadable or invalid file is logged and skipped.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from {}", CONFIG_ENV);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No config file found, using built-in defaults");
        Self::default()
    }

    /// Load and validate a specific TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.server.bind_address.trim().is_empty() {
            errors.push("server.bind_address must not be empty".to_string());
        }
        if self.server.max_upload_mb == 0 {
            errors.push("server.max_upload_mb must be > 0".to_string());
        }
        if self.workers.queue_factor == 0 {
            errors.push("workers.queue_factor must be > 0".to_string());
        }
        if self.workers.max_retries == 0 {
            errors.push("workers.max_retries must be > 0".to_string());
        }
        for (name, value) in [
            ("workers.job_timeout_ms", self.workers.job_timeout_ms),
            ("cache.ttl_secs", self.cache.ttl_secs),
            ("cache.purge_interval_secs", self.cache.purge_interval_secs),
            ("cache.timeout_ms", self.cache.timeout_ms),
            ("storage.timeout_ms", self.storage.timeout_ms),
        ] {
            if value == 0 {
                errors.push(format!("{name} must be > 0"));
            }
        }
        for (name, value) in [
            ("cache.ttl_secs", self.cache.ttl_secs),
            ("cache.purge_interval_secs", self.cache.purge_interval_secs),
        ] {
            if value > defaults::MAX_CACHE_TTL_SECS {
                errors.push(format!("{name} must be <= {}", defaults::MAX_CACHE_TTL_SECS));
            }
        }
        if self.files.allowed_mime_types.is_empty() {
            errors.push("files.allowed_mime_types must not be empty".to_string());
        }
        if self.hub.client_buffer == 0 || self.hub.command_buffer == 0 {
            errors.push("hub buffers must be > 0".to_string());
        }
        for (name, dir) in [
            ("files.upload_dir", &self.files.upload_dir),
            ("files.temp_upload_dir", &self.files.temp_upload_dir),
            ("storage.db_path", &self.storage.db_path),
        ] {
            if dir.as_os_str().is_empty() {
                errors.push(format!("{name} must not be empty"));
            }
        }
        let prefix = &self.files.public_prefix;
        if !prefix.starts_with('/') || prefix.trim_end_matches('/').is_empty() {
            errors.push("files.public_prefix must be an absolute path other than '/'".to_string());
        }
        if matches!(&self.classifier.program, Some(p) if p.trim().is_empty()) {
            errors.push("classifier.program must not be empty when set".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.workers.job_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.workers.retry_delay_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache.timeout_ms)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.cache.purge_interval_secs)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage.timeout_ms)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.server.max_upload_mb.saturating_mul(1024 * 1024)
    }
}
