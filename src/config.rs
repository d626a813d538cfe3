//! Run configuration, loaded from TOML. Every field has a default so an
//! empty file (or no file) is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::pagination::FetchOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RateLimitKind {
    /// Fixed pause after every search batch
    BatchDelay,
    /// Token bucket consulted before every search
    TokenBucket,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub kind: RateLimitKind,
    /// Only used by the token bucket
    pub requests_per_second: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            kind: RateLimitKind::BatchDelay,
            requests_per_second: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Concurrent searches per batch
    pub search_batch_size: usize,
    /// Pause between search batches, in milliseconds
    pub search_delay_ms: u64,
    pub rate_limit: RateLimitConfig,
    pub track_page_size: usize,
    pub playlist_page_size: usize,
    /// Concurrent page requests after the first page
    pub page_workers: usize,
    /// Items per remove/add request when rewriting a playlist
    pub write_chunk_size: usize,
    /// SQLite file holding the failure ledger and transfer reports
    pub database: PathBuf,
    /// Label stored with transfer reports and statistics
    pub platform: String,
    pub report_retention_days: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            search_batch_size: 3,
            search_delay_ms: 800,
            rate_limit: RateLimitConfig::default(),
            track_page_size: 20,
            playlist_page_size: 10,
            page_workers: 5,
            write_chunk_size: 20,
            database: PathBuf::from(".cache.db"),
            platform: "target".to_string(),
            report_retention_days: 30,
        }
    }
}

impl SyncConfig {
    pub fn load(path: &Path) -> anyhow::Result<SyncConfig> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: SyncConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config TOML {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall a run.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.search_batch_size > 0, "search_batch_size must be positive");
        anyhow::ensure!(self.track_page_size > 0, "track_page_size must be positive");
        anyhow::ensure!(self.playlist_page_size > 0, "playlist_page_size must be positive");
        anyhow::ensure!(self.write_chunk_size > 0, "write_chunk_size must be positive");
        if self.rate_limit.kind == RateLimitKind::TokenBucket {
            anyhow::ensure!(
                self.rate_limit.requests_per_second > 0,
                "rate_limit.requests_per_second must be positive"
            );
        }
        Ok(())
    }

    pub fn search_delay(&self) -> Duration {
        Duration::from_millis(self.search_delay_ms)
    }

    pub fn track_fetch(&self) -> FetchOptions {
        FetchOptions {
            page_size: self.track_page_size,
            workers: self.page_workers,
        }
    }

    pub fn playlist_fetch(&self) -> FetchOptions {
        FetchOptions {
            page_size: self.playlist_page_size,
            workers: self.page_workers,
        }
    }
}
