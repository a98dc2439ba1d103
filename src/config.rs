//! Configuration management
//!
//! Handles loading and validating pool configuration from TOML files.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Arena and buffer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Page size in bytes (power of two, >= 4096)
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Chunk size is `page_size << max_order`
    #[serde(default = "default_max_order")]
    pub max_order: u32,
    /// Maximum pooled chunks per arena (0 = unlimited)
    #[serde(default)]
    pub max_chunks: usize,
    /// Handle objects kept for reuse (0 = no recycling)
    #[serde(default = "default_recycler_capacity")]
    pub recycler_capacity: usize,
    /// Keep the last idle subpage of each size class instead of
    /// returning its page to the chunk
    #[serde(default = "default_true")]
    pub retain_sole_subpage: bool,
    /// Capacity ceiling for buffers allocated without an explicit one
    #[serde(default = "default_max_capacity")]
    pub default_max_capacity: usize,
}

impl PoolConfig {
    /// Bytes per chunk
    pub fn chunk_size(&self) -> usize {
        self.page_size << self.max_order
    }

    /// Pages per chunk
    pub fn pages_per_chunk(&self) -> usize {
        1 << self.max_order
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two() || self.page_size < 4096 {
            anyhow::bail!(
                "page_size must be a power of two >= 4096, got {}",
                self.page_size
            );
        }
        if self.max_order > 14 {
            anyhow::bail!("max_order must be <= 14, got {}", self.max_order);
        }
        if self.page_size.checked_shl(self.max_order).is_none()
            || self.chunk_size() > (1 << 30)
        {
            anyhow::bail!(
                "chunk size {} << {} exceeds 1 GiB",
                self.page_size,
                self.max_order
            );
        }
        if self.default_max_capacity == 0 {
            anyhow::bail!("default_max_capacity must be > 0");
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_order: default_max_order(),
            max_chunks: 0,
            recycler_capacity: default_recycler_capacity(),
            retain_sole_subpage: true,
            default_max_capacity: default_max_capacity(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics endpoint
    #[serde(default)]
    pub enabled: bool,
    /// Metrics server bind address
    #[serde(default = "default_metrics_addr")]
    pub bind_addr: SocketAddr,
    /// Interval between counter syncs, in milliseconds
    #[serde(default = "default_sync_interval")]
    pub sync_interval_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: default_metrics_addr(),
            sync_interval_ms: default_sync_interval(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_page_size() -> usize { 8192 }
fn default_max_order() -> u32 { 11 }
fn default_recycler_capacity() -> usize { 4096 }
fn default_true() -> bool { true }
fn default_max_capacity() -> usize { i32::MAX as usize }
fn default_metrics_addr() -> SocketAddr { SocketAddr::from(([127, 0, 0, 1], 9090)) }
fn default_sync_interval() -> u64 { 1000 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> LogFormat { LogFormat::Json }

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        self.pool.validate()?;
        if self.metrics.enabled && self.metrics.sync_interval_ms == 0 {
            anyhow::bail!("sync_interval_ms must be > 0");
        }
        Ok(())
    }
}
