//! In-memory release store
//!
//! Keeps every release version in process memory. Used by tests and by
//! embedders that do not need history to survive a restart.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::ReleaseStore;
use crate::error::{ReleaseError, Result};
use crate::release::{AppDeployerData, Release};

type Releases = HashMap<String, BTreeMap<u32, Release>>;
type DeployerData = HashMap<(String, u32), AppDeployerData>;

/// In-memory storage driver
#[derive(Clone, Default)]
pub struct MemoryReleaseStore {
    /// name -> version -> release
    releases: Arc<RwLock<Releases>>,
    deployer_data: Arc<RwLock<DeployerData>>,
    /// Track operation counts for assertions
    operations: Arc<RwLock<OperationCounts>>,
}

/// Counts of operations performed, for assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub creates: usize,
    pub updates: usize,
    pub deployer_writes: usize,
}

fn poisoned<T>(_: T) -> ReleaseError {
    ReleaseError::Storage("release store lock poisoned".to_string())
}

impl MemoryReleaseStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-populated releases
    pub fn with_releases(releases: Vec<Release>) -> Result<Self> {
        let store = Self::new();
        {
            let mut map = store.write()?;
            for release in releases {
                map.entry(release.name.clone())
                    .or_default()
                    .insert(release.version, release);
            }
        }
        Ok(store)
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.operations
            .read()
            .map(|ops| ops.clone())
            .unwrap_or_default()
    }

    /// Count stored release versions
    pub fn release_count(&self) -> usize {
        self.releases
            .read()
            .map(|map| map.values().map(BTreeMap::len).sum())
            .unwrap_or_default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Releases>> {
        self.releases.read().map_err(poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Releases>> {
        self.releases.write().map_err(poisoned)
    }

    fn count(&self, bump: impl FnOnce(&mut OperationCounts)) {
        if let Ok(mut ops) = self.operations.write() {
            bump(&mut ops);
        }
    }
}

#[async_trait]
impl ReleaseStore for MemoryReleaseStore {
    async fn create(&self, release: &Release) -> Result<()> {
        self.count(|ops| ops.creates += 1);

        let mut map = self.write()?;
        let versions = map.entry(release.name.clone()).or_default();
        if versions.contains_key(&release.version) {
            return Err(ReleaseError::Storage(format!(
                "release {} already stored",
                release.storage_key()
            )));
        }
        versions.insert(release.version, release.clone());
        Ok(())
    }

    async fn update(&self, release: &Release) -> Result<()> {
        self.count(|ops| ops.updates += 1);

        let mut map = self.write()?;
        let slot = map
            .get_mut(&release.name)
            .and_then(|versions| versions.get_mut(&release.version))
            .ok_or_else(|| ReleaseError::not_found(&release.name, Some(release.version)))?;
        *slot = release.clone();
        Ok(())
    }

    async fn get(&self, name: &str, version: u32) -> Result<Release> {
        self.count(|ops| ops.gets += 1);

        self.read()?
            .get(name)
            .and_then(|versions| versions.get(&version))
            .cloned()
            .ok_or_else(|| ReleaseError::not_found(name, Some(version)))
    }

    async fn history(&self, name: &str) -> Result<Vec<Release>> {
        self.count(|ops| ops.gets += 1);

        Ok(self
            .read()?
            .get(name)
            .map(|versions| versions.values().rev().cloned().collect())
            .unwrap_or_default())
    }

    async fn names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.read()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn save_deployer_data(&self, data: &AppDeployerData) -> Result<()> {
        self.count(|ops| ops.deployer_writes += 1);

        self.deployer_data
            .write()
            .map_err(poisoned)?
            .insert((data.release_name.clone(), data.release_version), data.clone());
        Ok(())
    }

    async fn deployer_data(&self, name: &str, version: u32) -> Result<Option<AppDeployerData>> {
        Ok(self
            .deployer_data
            .read()
            .map_err(poisoned)?
            .get(&(name.to_string(), version))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::StatusCode;
    use crate::storage::tests::release;

    #[tokio::test]
    async fn test_create_get_update() {
        let store = MemoryReleaseStore::new();
        let mut r1 = release("ticktock", 1, StatusCode::PendingInstall);

        store.create(&r1).await.unwrap();
        assert!(store.create(&r1).await.is_err());

        r1.mark_deployed();
        store.update(&r1).await.unwrap();
        assert_eq!(store.get("ticktock", 1).await.unwrap().status(), StatusCode::Deployed);

        let missing = release("ticktock", 7, StatusCode::Deployed);
        assert!(store.update(&missing).await.unwrap_err().is_not_found());

        let counts = store.operation_counts();
        assert_eq!(counts.creates, 2);
        assert_eq!(counts.updates, 2);
        assert_eq!(store.release_count(), 1);
    }

    #[tokio::test]
    async fn test_history_is_descending() {
        let store = MemoryReleaseStore::with_releases(vec![
            release("r1", 1, StatusCode::Deployed),
            release("r1", 3, StatusCode::Deployed),
            release("r1", 2, StatusCode::Deployed),
        ])
        .unwrap();

        let versions: Vec<u32> = store.history("r1").await.unwrap().iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![3, 2, 1]);
        assert!(store.history("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deployer_data() {
        let store = MemoryReleaseStore::new();
        let mut data = AppDeployerData::new("ticktock", 1);
        data.insert("log", "ticktock-log-v1");
        store.save_deployer_data(&data).await.unwrap();

        let loaded = store.deployer_data("ticktock", 1).await.unwrap().unwrap();
        assert_eq!(loaded.platform_id("log"), Some("ticktock-log-v1"));
        assert!(store.deployer_data("ticktock", 2).await.unwrap().is_none());
    }
}
