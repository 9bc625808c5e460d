//! Requests accepted by the release controller

use rudder_core::{ConfigValues, Package};
use semver::Version;
use std::collections::BTreeMap;

/// Where the package of a transition comes from
#[derive(Debug, Clone, PartialEq)]
pub enum PackageRef {
    /// A package tree supplied by the caller
    Inline(Package),

    /// A catalog lookup; the highest version wins when none is given
    Catalog {
        name: String,
        version: Option<Version>,
    },
}

impl PackageRef {
    pub fn catalog(name: impl Into<String>, version: Option<Version>) -> Self {
        Self::Catalog {
            name: name.into(),
            version,
        }
    }
}

impl From<Package> for PackageRef {
    fn from(package: Package) -> Self {
        Self::Inline(package)
    }
}

/// Install a package under a new or deleted release name
#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// Release name
    pub name: String,

    pub package: PackageRef,

    /// Caller overrides
    pub config_values: ConfigValues,

    /// Target platform
    pub platform: String,
}

impl InstallRequest {
    pub fn new(name: impl Into<String>, package: impl Into<PackageRef>, platform: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            package: package.into(),
            config_values: ConfigValues::default(),
            platform: platform.into(),
        }
    }

    pub fn with_values(mut self, raw: impl Into<String>) -> Self {
        self.config_values = ConfigValues::new(raw);
        self
    }
}

/// Upgrade a release to a new package or new overrides
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub name: String,
    pub package: PackageRef,
    pub config_values: ConfigValues,
}

impl UpgradeRequest {
    pub fn new(name: impl Into<String>, package: impl Into<PackageRef>) -> Self {
        Self {
            name: name.into(),
            package: package.into(),
            config_values: ConfigValues::default(),
        }
    }

    pub fn with_values(mut self, raw: impl Into<String>) -> Self {
        self.config_values = ConfigValues::new(raw);
        self
    }
}

/// Instance counts per unit name
pub type ScaleRequest = BTreeMap<String, u32>;
