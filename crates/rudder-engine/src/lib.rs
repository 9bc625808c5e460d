//! Rudder Engine - Manifest rendering
//!
//! Turns a package tree plus merged values into the manifest text stored
//! on a release: templates are rendered with MiniJinja, then every block is
//! re-parsed and emitted in a canonical, literal-preserving YAML form.

pub mod engine;
pub mod error;
pub mod filters;
pub mod normalize;

pub use engine::{ManifestRenderer, RenderedBlock, escape_backslashes, resolve_kind};
pub use error::{EngineError, Result, TemplateError};
