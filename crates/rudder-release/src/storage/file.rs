//! File-based release store
//!
//! Layout under the base directory:
//!
//! ```text
//! <name>/v<version>.json           release record
//! <name>/v<version>.deployer.json  AppDeployerData
//! ```
//!
//! Records are JSON, optionally compressed with the configured method.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

use super::{CompressionMethod, ReleaseStore, compress, decompress};
use crate::error::{ReleaseError, Result};
use crate::release::{AppDeployerData, Release};

/// File-based storage driver
pub struct FileReleaseStore {
    /// Base directory for storing releases
    base_dir: PathBuf,
    compression: CompressionMethod,
}

impl FileReleaseStore {
    /// Create a new file store, creating the base directory if needed
    pub fn new(base_dir: impl Into<PathBuf>, compression: CompressionMethod) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            compression,
        })
    }

    fn release_dir(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(ReleaseError::InvalidRequest(format!(
                "'{}' cannot be used as a release name",
                name
            )));
        }
        Ok(self.base_dir.join(name))
    }

    fn release_path(&self, name: &str, version: u32) -> Result<PathBuf> {
        Ok(self.release_dir(name)?.join(format!("v{}.json", version)))
    }

    fn deployer_path(&self, name: &str, version: u32) -> Result<PathBuf> {
        Ok(self.release_dir(name)?.join(format!("v{}.deployer.json", version)))
    }

    fn write_record<T: Serialize>(&self, path: &Path, record: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec(record)?;
        let data = compress(&json, self.compression)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    fn read_record<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let data = std::fs::read(path)?;
        let decompressed = decompress(&data, self.compression)?;
        Ok(serde_json::from_slice(&decompressed)?)
    }

    /// Version numbers stored for a name, highest first
    fn versions(&self, name: &str) -> Result<Vec<u32>> {
        let dir = self.release_dir(name)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut versions: Vec<u32> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let file_name = e.file_name();
                let stem = file_name.to_str()?.strip_suffix(".json")?;
                stem.strip_prefix('v')?.parse().ok()
            })
            .collect();
        versions.sort_unstable_by(|a, b| b.cmp(a));
        Ok(versions)
    }
}

#[async_trait]
impl ReleaseStore for FileReleaseStore {
    async fn create(&self, release: &Release) -> Result<()> {
        let path = self.release_path(&release.name, release.version)?;
        if path.exists() {
            return Err(ReleaseError::Storage(format!(
                "release {} already stored",
                release.storage_key()
            )));
        }
        self.write_record(&path, release)
    }

    async fn update(&self, release: &Release) -> Result<()> {
        let path = self.release_path(&release.name, release.version)?;
        if !path.exists() {
            return Err(ReleaseError::not_found(&release.name, Some(release.version)));
        }
        self.write_record(&path, release)
    }

    async fn get(&self, name: &str, version: u32) -> Result<Release> {
        let path = self.release_path(name, version)?;
        if !path.exists() {
            return Err(ReleaseError::not_found(name, Some(version)));
        }
        self.read_record(&path)
    }

    async fn history(&self, name: &str) -> Result<Vec<Release>> {
        self.versions(name)?
            .into_iter()
            .map(|version| self.read_record(&self.release_path(name, version)?))
            .collect()
    }

    async fn names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = std::fs::read_dir(&self.base_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(String::from))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn save_deployer_data(&self, data: &AppDeployerData) -> Result<()> {
        let path = self.deployer_path(&data.release_name, data.release_version)?;
        self.write_record(&path, data)
    }

    async fn deployer_data(&self, name: &str, version: u32) -> Result<Option<AppDeployerData>> {
        let path = self.deployer_path(name, version)?;
        if !path.exists() {
            return Ok(None);
        }
        self.read_record(&path).map(Some)
    }
}
