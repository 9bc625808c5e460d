//! Error types for catalog operations

use rudder_core::CoreError;
use thiserror::Error;

/// Catalog and repository errors
#[derive(Debug, Error)]
pub enum RepoError {
    // ============ Configuration Errors ============
    #[error("Repository not found: {name}")]
    RepositoryNotFound { name: String },

    #[error("Repository already exists: {name}")]
    RepositoryAlreadyExists { name: String },

    #[error("Invalid repository configuration: {message}")]
    InvalidConfig { message: String },

    // ============ Package Errors ============
    #[error("Package not found: {name}{}", version.as_ref().map(|v| format!(":{}", v)).unwrap_or_default())]
    PackageNotFound {
        name: String,
        version: Option<String>,
    },

    #[error("Package {name}:{version} already exists in repository {repo}")]
    PackageAlreadyExists {
        name: String,
        version: String,
        repo: String,
    },

    // ============ Upload Errors ============
    #[error("Invalid upload: {message}")]
    InvalidUpload { message: String },

    #[error("Repository {name} is not local; packages can only be changed in local repositories")]
    RemoteRepository { name: String },

    // ============ Other ============
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for catalog operations
pub type Result<T> = std::result::Result<T, RepoError>;

impl From<serde_yaml::Error> for RepoError {
    fn from(e: serde_yaml::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl RepoError {
    pub(crate) fn invalid_upload(message: impl Into<String>) -> Self {
        RepoError::InvalidUpload {
            message: message.into(),
        }
    }
}
