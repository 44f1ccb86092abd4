//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - constellation.toml (default configuration)
//! - constellation.local.toml (git-ignored local overrides)
//! - Environment variables (CONSTELLATION_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # constellation.toml
//! [executor]
//! max_concurrent_modules = 64
//! run_timeout_ms = 300000
//!
//! [scheduler]
//! mode = "bounded"
//! max_concurrency = 32
//! max_queue_size = 2048
//!
//! [json]
//! max_payload_bytes = 1048576
//! max_nesting_depth = 32
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! CONSTELLATION_EXECUTOR__RUN_TIMEOUT_MS=60000
//! CONSTELLATION_SCHEDULER__MODE=unbounded
//! ```

use crate::cvalue::JsonLimits;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub json: JsonLimits,
    #[serde(default)]
    pub suspension: SuspensionSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// DAG executor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSection {
    /// Whole-run timeout in milliseconds (None = no run-level timeout)
    #[serde(default)]
    pub run_timeout_ms: Option<u64>,

    /// Collect node timings and provenance into signatures
    #[serde(default = "default_true")]
    pub include_metadata: bool,

    /// Drain budget for graceful shutdown
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        ExecutorSection {
            run_timeout_ms: None,
            include_metadata: true,
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

/// Global scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    /// "unbounded" or "bounded"
    #[serde(default = "default_scheduler_mode")]
    pub mode: SchedulerMode,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    #[serde(default = "default_aging_interval_ms")]
    pub aging_interval_ms: u64,

    /// Priority points added per 5 seconds of waiting
    #[serde(default = "default_boost_per_interval")]
    pub boost_per_interval: u8,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        SchedulerSection {
            mode: default_scheduler_mode(),
            max_concurrency: default_max_concurrency(),
            max_queue_size: default_max_queue_size(),
            aging_interval_ms: default_aging_interval_ms(),
            boost_per_interval: default_boost_per_interval(),
        }
    }
}

/// Scheduler operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerMode {
    Unbounded,
    Bounded,
}

/// Default cache backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,

    /// Default TTL applied when a call enables caching without a TTL
    #[serde(default = "default_cache_ttl_ms")]
    pub default_ttl_ms: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        CacheSection {
            max_entries: default_cache_entries(),
            default_ttl_ms: default_cache_ttl_ms(),
        }
    }
}

/// Suspension store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspensionSection {
    /// Enable the in-memory suspension store
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Snapshot TTL in milliseconds (None = keep forever)
    #[serde(default)]
    pub ttl_ms: Option<u64>,

    /// Round-trip snapshots through the codec on save
    #[serde(default)]
    pub validate_codec: bool,
}

impl Default for SuspensionSection {
    fn default() -> Self {
        SuspensionSection {
            enabled: true,
            ttl_ms: None,
            validate_codec: false,
        }
    }
}

/// Logging configuration consumed by test and bench harnesses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        LoggingSection {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl EngineConfig {
    /// Load from constellation.toml, constellation.local.toml, and
    /// CONSTELLATION_* environment variables (later sources win)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("constellation.toml"))
            .merge(Toml::file("constellation.local.toml"))
            .merge(Env::prefixed("CONSTELLATION_").split("__"))
            .extract()
    }

    /// Load from an explicit file plus environment overrides
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("CONSTELLATION_").split("__"))
            .extract()
    }
}

fn default_true() -> bool {
    true
}

fn default_drain_timeout_ms() -> u64 {
    30_000
}

fn default_scheduler_mode() -> SchedulerMode {
    SchedulerMode::Unbounded
}

fn default_max_concurrency() -> usize {
    64
}

fn default_max_queue_size() -> usize {
    4096
}

fn default_aging_interval_ms() -> u64 {
    1000
}

fn default_boost_per_interval() -> u8 {
    5
}

fn default_cache_entries() -> usize {
    1024
}

fn default_cache_ttl_ms() -> u64 {
    60_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
