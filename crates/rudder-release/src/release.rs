//! Release types and status codes

use chrono::{DateTime, Utc};
use rudder_core::{ConfigValues, Package, Values};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::deployer::UnitState;

/// One versioned deployment of a package under a release name
///
/// Everything except `info` is fixed once the record is first stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    /// Release name
    pub name: String,

    /// Version number (1-indexed, never reused for a name)
    pub version: u32,

    /// Package tree snapshot
    pub package: Package,

    /// Caller supplied overrides, kept for rollback
    #[serde(default)]
    pub config_values: ConfigValues,

    /// Effective values (package defaults merged with overrides)
    pub values: Values,

    /// Rendered manifest
    pub manifest: String,

    /// Target platform name
    pub platform: String,

    pub info: Info,
}

impl Release {
    /// Create a record in a pending state
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        name: impl Into<String>,
        version: u32,
        package: Package,
        config_values: ConfigValues,
        values: Values,
        manifest: String,
        platform: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            name: name.into(),
            version,
            package,
            config_values,
            values,
            manifest,
            platform: platform.into(),
            info: Info::new(status, format!("{} in progress", status.operation())),
        }
    }

    /// Storage key for this release
    pub fn storage_key(&self) -> String {
        format!("{}.v{}", self.name, self.version)
    }

    pub fn status(&self) -> StatusCode {
        self.info.status
    }

    /// `name:version` of the package snapshot
    pub fn package_coordinates(&self) -> String {
        format!("{}:{}", self.package.name(), self.package.version())
    }

    /// Replace status and description, stamping the transition time
    pub fn set_status(&mut self, status: StatusCode, description: impl Into<String>) {
        self.info.status = status;
        self.info.description = description.into();
        self.info.last_deployed = Utc::now();
    }

    pub fn mark_deployed(&mut self) {
        self.set_status(StatusCode::Deployed, "Release deployed");
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.set_status(StatusCode::Failed, reason);
    }

    pub fn mark_deleted(&mut self) {
        self.set_status(StatusCode::Deleted, "Release deleted");
    }
}

/// Mutable part of a release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Info {
    pub status: StatusCode,

    /// Human readable status detail
    #[serde(default)]
    pub description: String,

    /// Time of the last status transition
    pub last_deployed: DateTime<Utc>,

    /// Per-unit health as last observed
    #[serde(default)]
    pub units: Vec<UnitHealth>,
}

impl Info {
    pub fn new(status: StatusCode, description: impl Into<String>) -> Self {
        Self {
            status,
            description: description.into(),
            last_deployed: Utc::now(),
            units: Vec::new(),
        }
    }
}

/// Release status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
    Deployed,
    Deleting,
    Deleted,
    Failed,
    Unknown,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::PendingInstall => "PENDING_INSTALL",
            StatusCode::PendingUpgrade => "PENDING_UPGRADE",
            StatusCode::PendingRollback => "PENDING_ROLLBACK",
            StatusCode::Deployed => "DEPLOYED",
            StatusCode::Deleting => "DELETING",
            StatusCode::Deleted => "DELETED",
            StatusCode::Failed => "FAILED",
            StatusCode::Unknown => "UNKNOWN",
        }
    }

    /// A transition is still in flight
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            StatusCode::PendingInstall
                | StatusCode::PendingUpgrade
                | StatusCode::PendingRollback
                | StatusCode::Deleting
        )
    }

    /// Eligible as an upgrade or rollback baseline
    pub fn is_update_baseline(&self) -> bool {
        matches!(self, StatusCode::Deployed | StatusCode::Deleted)
    }

    /// Watched by the status reconciler
    pub fn is_reconcilable(&self) -> bool {
        matches!(
            self,
            StatusCode::PendingInstall
                | StatusCode::PendingUpgrade
                | StatusCode::PendingRollback
                | StatusCode::Deployed
                | StatusCode::Unknown
        )
    }

    fn operation(&self) -> &'static str {
        match self {
            StatusCode::PendingInstall => "Install",
            StatusCode::PendingUpgrade => "Upgrade",
            StatusCode::PendingRollback => "Rollback",
            StatusCode::Deleting => "Delete",
            _ => "Operation",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last observed health of one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitHealth {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_id: Option<String>,

    pub state: UnitState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Logical unit name to platform deployment id for one release version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDeployerData {
    pub release_name: String,
    pub release_version: u32,
    #[serde(default)]
    pub units: BTreeMap<String, String>,
}

impl AppDeployerData {
    pub fn new(release_name: impl Into<String>, release_version: u32) -> Self {
        Self {
            release_name: release_name.into(),
            release_version,
            units: BTreeMap::new(),
        }
    }

    pub fn platform_id(&self, unit: &str) -> Option<&str> {
        self.units.get(unit).map(String::as_str)
    }

    pub fn insert(&mut self, unit: impl Into<String>, platform_id: impl Into<String>) {
        self.units.insert(unit.into(), platform_id.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rudder_core::PackageInfo;
    use semver::Version;

    #[test]
    fn test_status_code_serialization() {
        let json = serde_json::to_string(&StatusCode::PendingRollback).unwrap();
        assert_eq!(json, "\"PENDING_ROLLBACK\"");

        let parsed: StatusCode = serde_json::from_str("\"DELETED\"").unwrap();
        assert_eq!(parsed, StatusCode::Deleted);
        assert_eq!(StatusCode::Failed.to_string(), "FAILED");
    }

    #[test]
    fn test_status_transitions() {
        let package = Package::new(PackageInfo::new("log", Version::new(1, 0, 0)));
        let mut release = Release::pending(
            "r1",
            1,
            package,
            ConfigValues::default(),
            Values::new(),
            String::new(),
            "default",
            StatusCode::PendingInstall,
        );
        assert!(release.status().is_pending());
        assert_eq!(release.info.description, "Install in progress");
        assert_eq!(release.storage_key(), "r1.v1");
        assert_eq!(release.package_coordinates(), "log:1.0.0");

        release.mark_failed("deploy log: boom");
        assert_eq!(release.status(), StatusCode::Failed);
        assert!(!release.status().is_update_baseline());

        release.mark_deleted();
        assert!(release.status().is_update_baseline());
    }
}
