//! Configuration schema and providers.
//!
//! The schema is fixed and enumerated: a default region, the cache location,
//! job wait bounds, and the retrieval preferences that drive the retrieval
//! policy. Files are TOML; `ICEBOX_`-prefixed environment variables override
//! file values (`__` separates nested keys, e.g. `ICEBOX_JOBS__MAX_POLLS`).

use async_trait::async_trait;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use time::OffsetDateTime;

/// Top-level configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IceboxConfig {
    /// Default region for remote calls.
    #[serde(default = "default_region")]
    pub region: String,
    /// Local cache location.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Bounds for blocking waits on remote jobs.
    #[serde(default)]
    pub jobs: JobWaitConfig,
    /// Retrieval preferences and budget counters.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

/// Cache database configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// SQLite database path. Defaults to the user cache directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Blocking wait bounds for remote jobs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobWaitConfig {
    /// Seconds between polls of the remote job listing.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Maximum number of polls before the wait times out.
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

/// Retrieval preferences.
///
/// `consumed_bytes` and `last_reset` are counters maintained by the
/// retrieval policy; the remaining fields are user preferences.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Refuse new retrievals once the daily free allowance is used up.
    #[serde(default = "default_free_tier_only")]
    pub free_tier_only: bool,
    /// Longest a retrieval may be waited on, in days.
    #[serde(default = "default_max_retrieval_days")]
    pub max_retrieval_days: u32,
    /// Bytes that may be retrieved per day without charge.
    #[serde(default = "default_daily_free_bytes")]
    pub daily_free_bytes: u64,
    /// Bytes requested since `last_reset`.
    #[serde(default)]
    pub consumed_bytes: u64,
    /// When the consumed counter was last reset.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_reset: Option<OffsetDateTime>,
    /// Chunk size for ranged downloads of retrieved archives.
    #[serde(default = "default_multipart_size")]
    pub multipart_size: u64,
}

fn default_region() -> String {
    crate::DEFAULT_REGION.to_string()
}

fn default_poll_interval_secs() -> u64 {
    600
}

fn default_max_polls() -> u32 {
    144
}

fn default_free_tier_only() -> bool {
    true
}

fn default_max_retrieval_days() -> u32 {
    30
}

fn default_daily_free_bytes() -> u64 {
    // 10 GiB a month, spread evenly
    10 * 1024 * 1024 * 1024 / 30
}

fn default_multipart_size() -> u64 {
    crate::DEFAULT_MULTIPART_SIZE
}

impl Default for IceboxConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            cache: CacheConfig::default(),
            jobs: JobWaitConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

impl Default for JobWaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_polls: default_max_polls(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            free_tier_only: default_free_tier_only(),
            max_retrieval_days: default_max_retrieval_days(),
            daily_free_bytes: default_daily_free_bytes(),
            consumed_bytes: 0,
            last_reset: None,
            multipart_size: default_multipart_size(),
        }
    }
}

impl JobWaitConfig {
    /// Poll interval as a Duration.
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_secs)
    }
}

impl RetrievalConfig {
    /// Reset the consumed counter if `last_reset` falls on an earlier UTC day.
    ///
    /// Returns true when the counters changed.
    pub fn roll_over(&mut self, now: OffsetDateTime) -> bool {
        let today = now.date();
        match self.last_reset {
            Some(last) if last.date() >= today => false,
            _ => {
                self.consumed_bytes = 0;
                self.last_reset = Some(now);
                true
            }
        }
    }

    /// Bytes still available today under the free allowance.
    pub fn remaining_free_bytes(&self) -> u64 {
        self.daily_free_bytes.saturating_sub(self.consumed_bytes)
    }
}

impl IceboxConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.region.trim().is_empty() {
            return Err("region cannot be empty".to_string());
        }
        if self.jobs.poll_interval_secs == 0 {
            return Err("jobs.poll_interval_secs must be greater than 0".to_string());
        }
        if self.jobs.max_polls == 0 {
            return Err("jobs.max_polls must be greater than 0".to_string());
        }
        let mib = 1024 * 1024;
        let size = self.retrieval.multipart_size;
        if size < mib || size % mib != 0 || !(size / mib).is_power_of_two() {
            return Err(format!(
                "retrieval.multipart_size must be a power-of-two multiple of 1 MiB, got {size}"
            ));
        }
        Ok(())
    }

    /// Resolve the cache database path.
    pub fn cache_path(&self) -> crate::Result<PathBuf> {
        if let Some(path) = &self.cache.path {
            return Ok(path.clone());
        }
        Ok(user_dir("XDG_CACHE_HOME", ".cache")?
            .join("icebox")
            .join("cache.db"))
    }

    /// Configuration suitable for tests: short waits, no budget limits.
    pub fn for_testing() -> Self {
        Self {
            jobs: JobWaitConfig {
                poll_interval_secs: 1,
                max_polls: 3,
            },
            retrieval: RetrievalConfig {
                free_tier_only: false,
                ..RetrievalConfig::default()
            },
            ..Self::default()
        }
    }
}

/// Default config file location: `$XDG_CONFIG_HOME/icebox/config.toml`.
pub fn default_config_path() -> crate::Result<PathBuf> {
    Ok(user_dir("XDG_CONFIG_HOME", ".config")?
        .join("icebox")
        .join("config.toml"))
}

fn user_dir(xdg_var: &str, home_fallback: &str) -> crate::Result<PathBuf> {
    if let Some(path) = std::env::var_os(xdg_var) {
        return Ok(PathBuf::from(path));
    }
    let home = std::env::var_os("HOME")
        .ok_or_else(|| crate::Error::Config(format!("HOME not set; set {xdg_var}")))?;
    Ok(PathBuf::from(home).join(home_fallback))
}

/// Source and sink for the configuration.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Load the effective configuration.
    async fn load(&self) -> crate::Result<IceboxConfig>;

    /// Persist the configuration.
    async fn save(&self, config: &IceboxConfig) -> crate::Result<()>;
}

/// TOML file provider with environment overrides.
#[derive(Clone, Debug)]
pub struct FileConfigProvider {
    path: PathBuf,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn load(&self) -> crate::Result<IceboxConfig> {
        let mut figment = Figment::from(Serialized::defaults(IceboxConfig::default()));
        if self.path.exists() {
            tracing::debug!(path = %self.path.display(), "loading configuration file");
            figment = figment.merge(Toml::file(&self.path));
        }
        figment = figment.merge(Env::prefixed("ICEBOX_").split("__"));

        let config: IceboxConfig = figment
            .extract()
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        config.validate().map_err(crate::Error::Config)?;
        Ok(config)
    }

    async fn save(&self, config: &IceboxConfig) -> crate::Result<()> {
        config.validate().map_err(crate::Error::Config)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = toml::to_string_pretty(config)
            .map_err(|e| crate::Error::Serialization(e.to_string()))?;
        tokio::fs::write(&self.path, contents).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&self.path, perms).await?;
        }

        Ok(())
    }
}

/// In-memory provider, mainly for tests.
#[derive(Debug, Default)]
pub struct MemoryConfigProvider {
    config: Mutex<IceboxConfig>,
}

impl MemoryConfigProvider {
    pub fn new(config: IceboxConfig) -> Self {
        Self {
            config: Mutex::new(config),
        }
    }

    /// Snapshot of the current value.
    pub fn current(&self) -> IceboxConfig {
        match self.config.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl ConfigProvider for MemoryConfigProvider {
    async fn load(&self) -> crate::Result<IceboxConfig> {
        Ok(self.current())
    }

    async fn save(&self, config: &IceboxConfig) -> crate::Result<()> {
        config.validate().map_err(crate::Error::Config)?;
        match self.config.lock() {
            Ok(mut guard) => *guard = config.clone(),
            Err(poisoned) => *poisoned.into_inner() = config.clone(),
        }
        Ok(())
    }
}
