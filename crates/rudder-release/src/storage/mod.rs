//! Storage drivers for persisting releases
//!
//! Rudder ships two backends:
//! - **Memory**: process-local maps, used by tests and embedded setups
//! - **File**: one JSON document per release version, optionally compressed
//!
//! Drivers only implement the storage primitives. The release queries
//! (latest, latest deployed, rollback target, ...) are provided methods
//! computed from a name's history, so every driver answers them the same
//! way.

mod file;
mod memory;

pub use file::FileReleaseStore;
pub use memory::{MemoryReleaseStore, OperationCounts};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ReleaseError, Result};
use crate::release::{AppDeployerData, Release, StatusCode};

/// Storage driver trait for release persistence
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Store a new release version; fails if the version already exists
    async fn create(&self, release: &Release) -> Result<()>;

    /// Replace an existing release version
    async fn update(&self, release: &Release) -> Result<()>;

    /// Exact lookup
    async fn get(&self, name: &str, version: u32) -> Result<Release>;

    /// Every version of a name, highest first; empty when unknown
    async fn history(&self, name: &str) -> Result<Vec<Release>>;

    /// Every release name, sorted
    async fn names(&self) -> Result<Vec<String>>;

    /// Store the unit to platform id mapping of one release version
    async fn save_deployer_data(&self, data: &AppDeployerData) -> Result<()>;

    async fn deployer_data(&self, name: &str, version: u32) -> Result<Option<AppDeployerData>>;

    /// Highest version for a name
    async fn latest(&self, name: &str) -> Result<Release> {
        self.history(name)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ReleaseError::not_found(name, None))
    }

    /// Highest version with status DEPLOYED
    async fn latest_deployed(&self, name: &str) -> Result<Release> {
        self.history(name)
            .await?
            .into_iter()
            .find(|r| r.status() == StatusCode::Deployed)
            .ok_or_else(|| ReleaseError::not_found(name, None))
    }

    /// Highest version with status DEPLOYED or DELETED: the baseline for
    /// upgrade and rollback
    async fn latest_for_update(&self, name: &str) -> Result<Release> {
        self.history(name)
            .await?
            .into_iter()
            .find(|r| r.status().is_update_baseline())
            .ok_or_else(|| ReleaseError::not_found(name, None))
    }

    /// Highest DEPLOYED or DELETED version below `latest_for_update`
    async fn rollback_target(&self, name: &str) -> Result<Release> {
        self.history(name)
            .await?
            .into_iter()
            .filter(|r| r.status().is_update_baseline())
            .nth(1)
            .ok_or_else(|| ReleaseError::RollbackTargetNotFound {
                name: name.to_string(),
            })
    }

    /// Versions in `(latest - count, latest]`, highest first
    async fn revision_range(&self, name: &str, count: u32) -> Result<Vec<Release>> {
        let history = self.history(name).await?;
        let latest = history
            .first()
            .map(|r| r.version)
            .ok_or_else(|| ReleaseError::not_found(name, None))?;
        let floor = latest.saturating_sub(count);
        Ok(history.into_iter().filter(|r| r.version > floor).collect())
    }

    /// Latest version of every name, optionally filtered by a
    /// case-insensitive name substring
    async fn list(&self, filter: Option<&str>) -> Result<Vec<Release>> {
        let filter = filter.map(str::to_lowercase);
        let mut releases = Vec::new();
        for name in self.names().await? {
            if filter
                .as_ref()
                .is_some_and(|f| !name.to_lowercase().contains(f.as_str()))
            {
                continue;
            }
            if let Some(latest) = self.history(&name).await?.into_iter().next() {
                releases.push(latest);
            }
        }
        Ok(releases)
    }

    /// Latest version of every (filtered) name whose status is DEPLOYED or FAILED
    async fn deployed_or_failed(&self, filter: Option<&str>) -> Result<Vec<Release>> {
        Ok(self
            .list(filter)
            .await?
            .into_iter()
            .filter(|r| matches!(r.status(), StatusCode::Deployed | StatusCode::Failed))
            .collect())
    }

    /// The latest version, only when it is DELETED
    async fn last_if_deleted(&self, name: &str) -> Result<Option<Release>> {
        Ok(self
            .history(name)
            .await?
            .into_iter()
            .next()
            .filter(|r| r.status() == StatusCode::Deleted))
    }
}

/// Compression method for stored release data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum CompressionMethod {
    /// No compression
    None,

    /// Gzip compression
    Gzip {
        #[serde(default = "default_gzip_level")]
        level: u32,
    },

    /// Zstd compression
    Zstd {
        #[serde(default = "default_zstd_level")]
        level: i32,
    },
}

fn default_gzip_level() -> u32 {
    6
}

fn default_zstd_level() -> i32 {
    3
}

impl Default for CompressionMethod {
    fn default() -> Self {
        Self::Zstd { level: 3 }
    }
}

/// Compress data using the configured method
#[must_use = "compression result should be used"]
pub fn compress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Gzip { level } => {
            use std::io::Write;
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(level));
            encoder
                .write_all(data)
                .map_err(|e| ReleaseError::Compression(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| ReleaseError::Compression(e.to_string()))
        }
        CompressionMethod::Zstd { level } => zstd::encode_all(std::io::Cursor::new(data), level)
            .map_err(|e| ReleaseError::Compression(e.to_string())),
    }
}

/// Decompress data
#[must_use = "decompression result should be used"]
pub fn decompress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Gzip { .. } => {
            use std::io::Read;
            let mut decoder = flate2::read::GzDecoder::new(data);
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|e| ReleaseError::Compression(e.to_string()))?;
            Ok(decompressed)
        }
        CompressionMethod::Zstd { .. } => zstd::decode_all(std::io::Cursor::new(data))
            .map_err(|e| ReleaseError::Compression(e.to_string())),
    }
}
