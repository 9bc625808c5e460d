//! Engine configuration
//!
//! Stored in `~/.config/rudder/config.yaml`:
//!
//! ```yaml
//! reconcileInterval: 30s
//! redaction:
//!   patterns: [password, secret]
//! storage:
//!   type: file
//!   path: /var/lib/rudder/releases
//!   compression:
//!     method: zstd
//!     level: 3
//! repositories:
//!   - name: local
//!     url: local
//!     local: true
//! ```

use rudder_core::{DEFAULT_PATTERNS, Redactor, Repository};
use rudder_repo::LocalCatalog;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::controller::ReleaseController;
use crate::deployer::DeployerRegistry;
use crate::error::{ReleaseError, Result};
use crate::storage::{CompressionMethod, FileReleaseStore, MemoryReleaseStore, ReleaseStore};

/// Engine configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Period of the status reconciler
    #[serde(default = "default_reconcile_interval", with = "humantime_serde")]
    pub reconcile_interval: Duration,

    #[serde(default)]
    pub redaction: RedactionConfig,

    #[serde(default)]
    pub storage: StorageSettings,

    /// Package repositories, in registration order
    #[serde(default = "default_repositories")]
    pub repositories: Vec<Repository>,
}

fn default_reconcile_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_repositories() -> Vec<Repository> {
    vec![Repository::local("local")]
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: default_reconcile_interval(),
            redaction: RedactionConfig::default(),
            storage: StorageSettings::default(),
            repositories: default_repositories(),
        }
    }
}

/// Keys whose values are masked in displayed manifests and values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionConfig {
    /// Case-insensitive; plain words match key suffixes, patterns with
    /// `*`, `$`, `^` or `+` are regular expressions over the whole key
    #[serde(default = "default_patterns")]
    pub patterns: Vec<String>,
}

fn default_patterns() -> Vec<String> {
    DEFAULT_PATTERNS.iter().map(|p| p.to_string()).collect()
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            patterns: default_patterns(),
        }
    }
}

/// Release store backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageSettings {
    /// Process memory; history is lost on restart
    #[default]
    Memory,

    /// One file per release version
    File {
        path: PathBuf,
        #[serde(default)]
        compression: CompressionMethod,
    },
}

impl StorageSettings {
    /// Open the configured store
    pub fn open(&self) -> Result<Arc<dyn ReleaseStore>> {
        let store: Arc<dyn ReleaseStore> = match self {
            StorageSettings::Memory => Arc::new(MemoryReleaseStore::new()),
            StorageSettings::File { path, compression } => {
                Arc::new(FileReleaseStore::new(path, *compression)?)
            }
        };
        Ok(store)
    }
}

impl EngineConfig {
    /// Load configuration from default location
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        rudder_core::yaml::parse_document(&content)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.redactor()?;
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Get default configuration path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            ReleaseError::InvalidConfig("Could not determine config directory".to_string())
        })?;
        Ok(config_dir.join("rudder").join("config.yaml"))
    }

    /// Compile the redaction patterns
    pub fn redactor(&self) -> Result<Redactor> {
        Redactor::new(&self.redaction.patterns)
            .map_err(|e| ReleaseError::InvalidConfig(e.to_string()))
    }

    /// Catalog over the configured repositories
    pub fn catalog(&self) -> Result<LocalCatalog> {
        Ok(LocalCatalog::new(self.repositories.clone())?)
    }

    /// Wire store, catalog and redaction into a controller
    pub fn controller(&self, deployers: DeployerRegistry) -> Result<ReleaseController> {
        let store = self.storage.open()?;
        let catalog = Arc::new(self.catalog()?);
        Ok(ReleaseController::builder(store, catalog, deployers)
            .redactor(self.redactor()?)
            .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config: EngineConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.reconcile_interval, Duration::from_secs(30));
        assert_eq!(config.storage, StorageSettings::Memory);
        assert_eq!(config.repositories[0].name, "local");
        assert!(config.redactor().unwrap().is_sensitive("db_password"));
    }

    #[test]
    fn test_parse_full() {
        let yaml = r#"
reconcileInterval: 2m
redaction:
  patterns: [pin]
storage:
  type: file
  path: /tmp/releases
  compression:
    method: gzip
repositories:
  - name: central
    url: https://packages.example.com
    order: 5
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.reconcile_interval, Duration::from_secs(120));
        assert_eq!(
            config.storage,
            StorageSettings::File {
                path: PathBuf::from("/tmp/releases"),
                compression: CompressionMethod::Gzip { level: 6 },
            }
        );
        assert_eq!(config.repositories[0].order, 5);

        let redactor = config.redactor().unwrap();
        assert!(redactor.is_sensitive("SIM_PIN"));
        assert!(!redactor.is_sensitive("password"));
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("rudder").join("config.yaml");

        let config = EngineConfig {
            storage: StorageSettings::File {
                path: temp.path().join("releases"),
                compression: CompressionMethod::None,
            },
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        let loaded = EngineConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(loaded.storage.open().is_ok());
        assert!(temp.path().join("releases").is_dir());
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "redaction:\n  patterns: ['(unclosed*']\n").unwrap();

        assert!(matches!(
            EngineConfig::load_from(&path),
            Err(ReleaseError::InvalidConfig(_))
        ));
    }
}
