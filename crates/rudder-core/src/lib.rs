//! Rudder Core - Core types for the release engine
//!
//! This crate provides the foundational types used throughout Rudder:
//! - `Package`: The package tree (templates, default values, dependencies)
//! - `Values`: Configuration values and the package-aware merge
//! - `Redactor`: Masking of sensitive keys for display
//! - `archive`: Reading and writing package archives
//! - `yaml`: Restricted YAML loading shared by every crate

pub mod archive;
pub mod error;
pub mod package;
pub mod redact;
pub mod values;
pub mod yaml;

pub use archive::{ArchiveFormat, read_package, sha256_hex, write_package};
pub use error::{CoreError, Result};
pub use package::{
    ConfigValues, Package, PackageIndex, PackageInfo, PackageMetadata, Repository, Template,
};
pub use redact::{DEFAULT_PATTERNS, REDACTION_MARKER, Redactor};
pub use values::{Values, merge_config, merge_lists};
