//! Error types for rudder-release

use rudder_core::CoreError;
use rudder_engine::EngineError;
use rudder_repo::RepoError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for release operations
pub type Result<T> = std::result::Result<T, ReleaseError>;

/// One failed platform call during an apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitFailure {
    /// Logical unit name
    pub unit: String,

    /// `deploy`, `undeploy`, `scale` or `status`
    pub operation: String,

    pub message: String,
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.operation, self.unit, self.message)
    }
}

fn join_failures(failures: &[UnitFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur while managing releases
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReleaseError {
    /// Override or package values are not a mapping
    #[error("invalid configuration values: {0}")]
    ConfigFormat(String),

    #[error("package '{name}'{} not found", version.as_ref().map(|v| format!(" version {}", v)).unwrap_or_default())]
    PackageNotFound {
        name: String,
        version: Option<String>,
    },

    #[error("release '{name}'{} not found", version.map(|v| format!(" version {}", v)).unwrap_or_default())]
    ReleaseNotFound { name: String, version: Option<u32> },

    /// No eligible earlier version to roll back to
    #[error("release '{name}' has no earlier deployed version to roll back to")]
    RollbackTargetNotFound { name: String },

    /// Delete with package blocked by other releases
    #[error("package {package} is still used by release(s): {}", releases.join(", "))]
    PackageInUse {
        package: String,
        releases: Vec<String>,
    },

    #[error("{} unit operation(s) failed: {}", failures.len(), join_failures(failures))]
    DeploymentApply { failures: Vec<UnitFailure> },

    /// Another transition holds the release name
    #[error("release '{name}' is already being modified by another operation")]
    ConcurrentModification { name: String },

    #[error("release '{name}' already exists with status {status}")]
    ReleaseAlreadyExists { name: String, status: String },

    /// Malformed caller input
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unsupported manifest kind '{0}'")]
    UnsupportedKind(String),

    #[error("no deployer registered for platform '{0}'")]
    PlatformNotFound(String),

    /// Package tree problems other than value formats
    #[error("package error: {0}")]
    Package(String),

    /// Template rendering error
    #[error("template error: {0}")]
    Template(String),

    /// Catalog error other than a missing package
    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("compression error: {0}")]
    Compression(String),

    /// A Deployer SPI call failed
    #[error("deployer error: {0}")]
    Deployer(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ReleaseError {
    fn from(e: serde_json::Error) -> Self {
        ReleaseError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for ReleaseError {
    fn from(e: serde_yaml::Error) -> Self {
        ReleaseError::Serialization(e.to_string())
    }
}

impl From<CoreError> for ReleaseError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::ConfigFormat { message } => ReleaseError::ConfigFormat(message),
            CoreError::Io(e) => ReleaseError::Io(e),
            other => ReleaseError::Package(other.to_string()),
        }
    }
}

impl From<EngineError> for ReleaseError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Core(core) => core.into(),
            other => ReleaseError::Template(other.to_string()),
        }
    }
}

impl From<RepoError> for ReleaseError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::PackageNotFound { name, version } => {
                ReleaseError::PackageNotFound { name, version }
            }
            RepoError::Core(core) => core.into(),
            RepoError::Io(e) => ReleaseError::Io(e),
            other => ReleaseError::Catalog(other.to_string()),
        }
    }
}

impl ReleaseError {
    pub(crate) fn not_found(name: &str, version: Option<u32>) -> Self {
        ReleaseError::ReleaseNotFound {
            name: name.to_string(),
            version,
        }
    }

    /// Whether this is a release-not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReleaseError::ReleaseNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_format_surfaces() {
        let err: ReleaseError = CoreError::ConfigFormat {
            message: "override values must be a mapping".to_string(),
        }
        .into();
        assert!(matches!(err, ReleaseError::ConfigFormat(_)));
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            ReleaseError::not_found("ticktock", Some(3)).to_string(),
            "release 'ticktock' version 3 not found"
        );
        assert_eq!(
            ReleaseError::not_found("ticktock", None).to_string(),
            "release 'ticktock' not found"
        );

        let err = ReleaseError::DeploymentApply {
            failures: vec![UnitFailure {
                unit: "log".to_string(),
                operation: "deploy".to_string(),
                message: "boom".to_string(),
            }],
        };
        assert_eq!(err.to_string(), "1 unit operation(s) failed: deploy log: boom");
    }
}
