//! Engine error types

use miette::{Diagnostic, NamedSource, SourceSpan};
use rudder_core::CoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Main engine error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("template '{template}' did not render to valid YAML: {message}")]
    InvalidManifest { template: String, message: String },

    #[error("cannot emit YAML: {message}")]
    Emit { message: String },

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Template-specific error with source information
#[derive(Error, Debug, Diagnostic, Clone)]
#[error("failed to render '{template}': {message}")]
#[diagnostic(code(rudder::template::render))]
pub struct TemplateError {
    /// Template name
    pub template: String,

    /// Error message
    pub message: String,

    /// Template source code
    #[source_code]
    pub src: NamedSource<String>,

    /// Error location in source
    #[label("error occurred here")]
    pub span: Option<SourceSpan>,

    #[help]
    pub suggestion: Option<String>,
}

impl TemplateError {
    /// Create a new template error from a MiniJinja error
    pub fn from_minijinja(err: minijinja::Error, template_name: &str, template_source: &str) -> Self {
        let span = err
            .line()
            .and_then(|line| calculate_span(template_source, line));

        let suggestion = match err.kind() {
            minijinja::ErrorKind::SyntaxError => {
                Some("placeholders use the form {{ path.to.value }}".to_string())
            }
            minijinja::ErrorKind::UnknownFilter => {
                Some("available filters: toyaml, tojson, quote, indent, nindent".to_string())
            }
            _ => None,
        };

        Self {
            template: template_name.to_string(),
            message: err
                .detail()
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string()),
            src: NamedSource::new(template_name, template_source.to_string()),
            span,
            suggestion,
        }
    }
}

/// Byte span of a 1-based line
fn calculate_span(source: &str, line: usize) -> Option<SourceSpan> {
    let mut offset = 0;
    for (index, text) in source.split_inclusive('\n').enumerate() {
        if index + 1 == line {
            return Some(SourceSpan::from((offset, text.trim_end().len())));
        }
        offset += text.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_span() {
        let source = "first\nsecond line\nthird";
        let span = calculate_span(source, 2).unwrap();
        assert_eq!(span.offset(), 6);
        assert_eq!(span.len(), 11);
        assert!(calculate_span(source, 9).is_none());
    }
}
