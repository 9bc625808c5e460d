//! Masking of sensitive values for display
//!
//! Keys are matched case-insensitively. A plain pattern matches keys that
//! end with it; a pattern containing any of `* $ ^ +` is used as a regular
//! expression that must match the whole key.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value as JsonValue};

use crate::error::{CoreError, Result};
use crate::yaml;

/// Replacement for redacted values
pub const REDACTION_MARKER: &str = "******";

/// Patterns used when none are configured
pub const DEFAULT_PATTERNS: &[&str] = &[
    "password",
    "secret",
    "key",
    "token",
    ".*credentials.*",
    "vcap_services",
];

static DEFAULT_REDACTOR: Lazy<Redactor> = Lazy::new(|| Redactor {
    patterns: DEFAULT_PATTERNS
        .iter()
        .filter_map(|p| compile(p).ok())
        .collect(),
});

/// Compiled, immutable set of sensitive-key patterns
#[derive(Debug, Clone)]
pub struct Redactor {
    patterns: Vec<Regex>,
}

impl Default for Redactor {
    fn default() -> Self {
        DEFAULT_REDACTOR.clone()
    }
}

impl Redactor {
    /// Compile a pattern list
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| compile(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Whether `key` names a sensitive value
    pub fn is_sensitive(&self, key: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(key))
    }

    /// Return a copy of `value` with sensitive entries masked
    ///
    /// Only mappings are descended into; sequences and scalars are returned
    /// untouched unless they sit under a sensitive key.
    pub fn redact(&self, value: &JsonValue) -> JsonValue {
        match value {
            JsonValue::Object(map) => JsonValue::Object(self.redact_map(map)),
            other => other.clone(),
        }
    }

    fn redact_map(&self, map: &Map<String, JsonValue>) -> Map<String, JsonValue> {
        map.iter()
            .map(|(key, value)| {
                let value = if !value.is_null() && self.is_sensitive(key) {
                    JsonValue::String(REDACTION_MARKER.to_string())
                } else {
                    self.redact(value)
                };
                (key.clone(), value)
            })
            .collect()
    }

    /// Redact every document of a YAML stream and re-serialize it
    pub fn redact_yaml(&self, text: &str) -> Result<String> {
        let mut out = String::new();
        for document in yaml::parse_documents(text)? {
            if document.is_null() {
                continue;
            }
            let redacted = self.redact(&yaml::to_json(document)?);
            out.push_str("---\n");
            out.push_str(&serde_yaml::to_string(&redacted)?);
        }
        Ok(out)
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    let source = if pattern.contains(['*', '$', '^', '+']) {
        pattern.to_string()
    } else {
        format!(".*{}$", regex::escape(pattern))
    };

    RegexBuilder::new(&format!("^(?:{})$", source))
        .case_insensitive(true)
        .build()
        .map_err(|source| CoreError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redacts_nested_mappings() {
        let input = json!({
            "password": "s3cret",
            "nested": {"api_token": "x"},
            "note": "ok"
        });

        let output = Redactor::default().redact(&input);
        assert_eq!(
            output,
            json!({
                "password": "******",
                "nested": {"api_token": "******"},
                "note": "ok"
            })
        );
    }

    #[test]
    fn test_default_patterns() {
        let redactor = Redactor::default();
        assert!(redactor.is_sensitive("PASSWORD"));
        assert!(redactor.is_sensitive("db.password"));
        assert!(redactor.is_sensitive("client-secret"));
        assert!(redactor.is_sensitive("aws.access.key"));
        assert!(redactor.is_sensitive("spring.cloud.credentials.user"));
        assert!(redactor.is_sensitive("VCAP_SERVICES"));
        assert!(!redactor.is_sensitive("password.hint"));
        assert!(!redactor.is_sensitive("username"));
    }

    #[test]
    fn test_custom_regex_pattern() {
        let redactor = Redactor::new(["^internal.*"]).unwrap();
        assert!(redactor.is_sensitive("internal.url"));
        assert!(!redactor.is_sensitive("external.internal"));
        assert!(!redactor.is_sensitive("password"));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = Redactor::new(["(unclosed*"]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPattern { .. }));
    }

    #[test]
    fn test_sequences_and_nulls_pass_through() {
        let input = json!({
            "items": [{"password": "kept"}],
            "token": null
        });
        assert_eq!(Redactor::default().redact(&input), input);
    }

    #[test]
    fn test_redact_yaml_documents() {
        let text = "kind: Application\nspec:\n  applicationProperties:\n    db.password: hunter2\n---\nkind: Application\nspec:\n  secret: abc\n";
        let out = Redactor::default().redact_yaml(text).unwrap();
        assert!(!out.contains("hunter2"));
        assert!(!out.contains("abc"));
        assert_eq!(out.matches("******").count(), 2);
        assert_eq!(out.matches("---").count(), 2);
    }
}
