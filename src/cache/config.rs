//! Configuration for the cache system

use crate::error::{CacheError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// What the disk tier does with files left over from a previous process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskStartup {
    /// Scan the directory and re-index every valid, unexpired entry file
    Rebuild,

    /// Treat the directory as scratch space and delete every entry file
    Wipe,
}

/// Configuration for the tiered cache
///
/// Read once at construction; there is no hot reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Hard bound on the summed `size_bytes` of memory-tier entries
    pub memory_capacity_bytes: usize,

    /// Upper bound on the number of memory-tier entries
    pub max_memory_entries: usize,

    /// Disk tier budget; advisory only, overruns are logged
    pub disk_capacity_bytes: usize,

    /// TTL used when a write does not specify one, and for promotions
    pub default_ttl: Duration,

    /// TTL jitter factor (0.0 - 1.0), applied to `default_ttl` only
    pub ttl_jitter: f64,

    /// Interval between background reclamation passes
    pub reclaim_interval: Duration,

    /// Keys examined per lock acquisition during reclamation
    pub reclaim_batch_size: usize,

    /// Directory holding disk-tier entry files
    pub disk_dir: PathBuf,

    /// Deadline for a single disk read/write/delete
    pub disk_timeout: Duration,

    /// Also persist every memory write to disk
    pub write_through: bool,

    /// Startup policy for the disk directory
    pub disk_startup: DiskStartup,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            // 100 MB memory tier
            memory_capacity_bytes: 100 * 1024 * 1024,
            max_memory_entries: 10_000,
            // 1 GB disk tier
            disk_capacity_bytes: 1024 * 1024 * 1024,
            // 1 hour default TTL
            default_ttl: Duration::from_secs(3600),
            ttl_jitter: 0.0,
            // Reclaim every 5 minutes
            reclaim_interval: Duration::from_secs(300),
            reclaim_batch_size: 64,
            disk_dir: std::env::temp_dir().join("tiered-cache"),
            disk_timeout: Duration::from_secs(5),
            write_through: true,
            disk_startup: DiskStartup::Rebuild,
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Parse a configuration from JSON; missing fields fall back to defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let partial: CacheConfigBuilder = serde_json::from_str(json)?;
        let config = partial.build();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.memory_capacity_bytes == 0 {
            return Err(CacheError::Config(
                "memory_capacity_bytes must be greater than 0".to_string(),
            ));
        }

        if self.max_memory_entries == 0 {
            return Err(CacheError::Config(
                "max_memory_entries must be greater than 0".to_string(),
            ));
        }

        if self.default_ttl.is_zero() {
            return Err(CacheError::Config(
                "default_ttl must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err(CacheError::Config(
                "ttl_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        // the longest jittered TTL must still give every entry a valid expiry
        let longest = Duration::try_from_secs_f64(
            self.default_ttl.as_secs_f64() * (1.0 + self.ttl_jitter),
        )
        .ok()
        .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
        .and_then(|ttl| Utc::now().checked_add_signed(ttl));
        if longest.is_none() {
            return Err(CacheError::Config(
                "default_ttl is too large to compute an expiry".to_string(),
            ));
        }

        if self.reclaim_interval.is_zero() {
            return Err(CacheError::Config(
                "reclaim_interval must be greater than 0".to_string(),
            ));
        }

        if self.reclaim_batch_size == 0 {
            return Err(CacheError::Config(
                "reclaim_batch_size must be greater than 0".to_string(),
            ));
        }

        if self.disk_timeout.is_zero() {
            return Err(CacheError::Config(
                "disk_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Default TTL with jitter applied
    pub fn ttl_with_jitter(&self) -> Duration {
        if self.ttl_jitter == 0.0 {
            return self.default_ttl;
        }

        let base_secs = self.default_ttl.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(1.0);

        Duration::try_from_secs_f64(final_secs).unwrap_or(self.default_ttl)
    }
}

/// Builder for cache configuration
///
/// Also the deserialization target for [`CacheConfig::from_json_str`], so a
/// config file only needs the fields it overrides.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CacheConfigBuilder {
    memory_capacity_bytes: Option<usize>,
    max_memory_entries: Option<usize>,
    disk_capacity_bytes: Option<usize>,
    default_ttl: Option<Duration>,
    ttl_jitter: Option<f64>,
    reclaim_interval: Option<Duration>,
    reclaim_batch_size: Option<usize>,
    disk_dir: Option<PathBuf>,
    disk_timeout: Option<Duration>,
    write_through: Option<bool>,
    disk_startup: Option<DiskStartup>,
}

impl CacheConfigBuilder {
    /// Set memory tier capacity in bytes
    pub fn memory_capacity_bytes(mut self, size: usize) -> Self {
        self.memory_capacity_bytes = Some(size);
        self
    }

    /// Set maximum number of memory entries
    pub fn max_memory_entries(mut self, max: usize) -> Self {
        self.max_memory_entries = Some(max);
        self
    }

    /// Set advisory disk capacity in bytes
    pub fn disk_capacity_bytes(mut self, size: usize) -> Self {
        self.disk_capacity_bytes = Some(size);
        self
    }

    /// Set default TTL for cache entries
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Set reclamation interval
    pub fn reclaim_interval(mut self, interval: Duration) -> Self {
        self.reclaim_interval = Some(interval);
        self
    }

    /// Set reclamation batch size
    pub fn reclaim_batch_size(mut self, size: usize) -> Self {
        self.reclaim_batch_size = Some(size);
        self
    }

    /// Set disk storage directory
    pub fn disk_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.disk_dir = Some(dir.into());
        self
    }

    /// Set per-operation disk timeout
    pub fn disk_timeout(mut self, timeout: Duration) -> Self {
        self.disk_timeout = Some(timeout);
        self
    }

    /// Enable or disable write-through to disk
    pub fn write_through(mut self, enable: bool) -> Self {
        self.write_through = Some(enable);
        self
    }

    /// Set the disk startup policy
    pub fn disk_startup(mut self, policy: DiskStartup) -> Self {
        self.disk_startup = Some(policy);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            memory_capacity_bytes: self
                .memory_capacity_bytes
                .unwrap_or(defaults.memory_capacity_bytes),
            max_memory_entries: self
                .max_memory_entries
                .unwrap_or(defaults.max_memory_entries),
            disk_capacity_bytes: self
                .disk_capacity_bytes
                .unwrap_or(defaults.disk_capacity_bytes),
            default_ttl: self.default_ttl.unwrap_or(defaults.default_ttl),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            reclaim_interval: self.reclaim_interval.unwrap_or(defaults.reclaim_interval),
            reclaim_batch_size: self
                .reclaim_batch_size
                .unwrap_or(defaults.reclaim_batch_size),
            disk_dir: self.disk_dir.unwrap_or(defaults.disk_dir),
            disk_timeout: self.disk_timeout.unwrap_or(defaults.disk_timeout),
            write_through: self.write_through.unwrap_or(defaults.write_through),
            disk_startup: self.disk_startup.unwrap_or(defaults.disk_startup),
        }
    }
}

/// Preset configurations for common use cases
impl CacheConfig {
    /// Short-lived data such as live weather or flight status
    pub fn realtime() -> Self {
        Self {
            default_ttl: Duration::from_secs(300), // 5 minutes
            memory_capacity_bytes: 50 * 1024 * 1024,
            reclaim_interval: Duration::from_secs(60),
            ttl_jitter: 0.10,
            ..Default::default()
        }
    }

    /// Memory-constrained environments
    pub fn small() -> Self {
        Self {
            default_ttl: Duration::from_secs(1800), // 30 minutes
            memory_capacity_bytes: 10 * 1024 * 1024,
            max_memory_entries: 1_000,
            disk_capacity_bytes: 100 * 1024 * 1024,
            ..Default::default()
        }
    }

    /// Large deployments
    pub fn large() -> Self {
        Self {
            default_ttl: Duration::from_secs(7200), // 2 hours
            memory_capacity_bytes: 1024 * 1024 * 1024,
            max_memory_entries: 1_000_000,
            disk_capacity_bytes: 10 * 1024 * 1024 * 1024,
            ..Default::default()
        }
    }
}
