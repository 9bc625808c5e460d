//! Rudder Repository Management
//!
//! This crate provides the package catalog used by the release engine:
//!
//! - **Repositories**: named sources with a resolution priority (`order`)
//! - **Resolution**: highest version wins, then highest repository order
//! - **Uploads**: archives stored and indexed in local repositories
//! - **Deletion**: packages removed from local repositories on request
//!
//! ## Example
//!
//! ```rust,no_run
//! use rudder_repo::{LocalCatalog, PackageCatalog, RepositoryConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RepositoryConfig::load()?;
//! let catalog = LocalCatalog::from_config(&config)?;
//!
//! let log = catalog.fetch("log", None).await?;
//! println!("resolved {}:{}", log.name(), log.version());
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod error;

pub use catalog::{LocalCatalog, PackageCatalog, UploadRequest};
pub use config::RepositoryConfig;
pub use error::{RepoError, Result};
