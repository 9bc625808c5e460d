//! Restricted YAML loading
//!
//! Everything read from packages, overrides and stored manifests goes
//! through these helpers. Only plain nodes (mappings, sequences, scalars)
//! are accepted; explicitly tagged nodes are rejected instead of being
//! handed to a type constructor.

use serde::Deserialize;
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;

use crate::error::{CoreError, Result};

/// Parse a single YAML document
pub fn parse_document(text: &str) -> Result<YamlValue> {
    let value: YamlValue = serde_yaml::from_str(text)?;
    ensure_plain(&value)?;
    Ok(value)
}

/// Parse every document of a (possibly multi-document) YAML stream
///
/// Empty documents are returned as `Null` so callers decide whether
/// to skip them.
pub fn parse_documents(text: &str) -> Result<Vec<YamlValue>> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = YamlValue::deserialize(document)?;
        ensure_plain(&value)?;
        documents.push(value);
    }
    Ok(documents)
}

/// Fail if any node in the tree carries an explicit tag
pub fn ensure_plain(value: &YamlValue) -> Result<()> {
    match value {
        YamlValue::Tagged(tagged) => Err(CoreError::UnsafeYaml {
            tag: tagged.tag.to_string(),
        }),
        YamlValue::Sequence(items) => items.iter().try_for_each(ensure_plain),
        YamlValue::Mapping(map) => map.iter().try_for_each(|(k, v)| {
            ensure_plain(k)?;
            ensure_plain(v)
        }),
        _ => Ok(()),
    }
}

/// Convert a plain YAML tree to JSON
///
/// Scalar keys are stringified; non-finite floats and composite keys are
/// rejected since JSON cannot carry them.
pub fn to_json(value: YamlValue) -> Result<JsonValue> {
    Ok(match value {
        YamlValue::Null => JsonValue::Null,
        YamlValue::Bool(b) => JsonValue::Bool(b),
        YamlValue::Number(n) => number_to_json(&n)?,
        YamlValue::String(s) => JsonValue::String(s),
        YamlValue::Sequence(items) => JsonValue::Array(
            items
                .into_iter()
                .map(to_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        YamlValue::Mapping(map) => {
            let mut object = serde_json::Map::new();
            for (k, v) in map {
                object.insert(key_to_string(&k)?, to_json(v)?);
            }
            JsonValue::Object(object)
        }
        YamlValue::Tagged(tagged) => {
            return Err(CoreError::UnsafeYaml {
                tag: tagged.tag.to_string(),
            });
        }
    })
}

/// Parse a YAML document straight into JSON
pub fn parse_json(text: &str) -> Result<JsonValue> {
    to_json(parse_document(text)?)
}

fn number_to_json(n: &serde_yaml::Number) -> Result<JsonValue> {
    if let Some(i) = n.as_i64() {
        Ok(JsonValue::from(i))
    } else if let Some(u) = n.as_u64() {
        Ok(JsonValue::from(u))
    } else {
        n.as_f64()
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number)
            .ok_or_else(|| CoreError::config_format(format!("unsupported number '{}'", n)))
    }
}

fn key_to_string(key: &YamlValue) -> Result<String> {
    match key {
        YamlValue::String(s) => Ok(s.clone()),
        YamlValue::Number(n) => Ok(n.to_string()),
        YamlValue::Bool(b) => Ok(b.to_string()),
        YamlValue::Null => Ok("null".to_string()),
        _ => Err(CoreError::config_format("mapping keys must be scalars")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_documents_multi() {
        let docs = parse_documents("a: 1\n---\nb: 2\n").unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1]["b"], YamlValue::from(2));
    }

    #[test]
    fn test_rejects_tagged_nodes() {
        let err = parse_document("payload: !exec rm -rf /\n").unwrap_err();
        assert!(matches!(err, CoreError::UnsafeYaml { ref tag } if tag.contains("exec")));

        let err = parse_documents("ok: 1\n---\nnested:\n  - !Thing {a: 1}\n").unwrap_err();
        assert!(matches!(err, CoreError::UnsafeYaml { .. }));
    }

    #[test]
    fn test_to_json_stringifies_scalar_keys() {
        let json = parse_json("1: one\ntrue: yes-value\nname: x\n").unwrap();
        assert_eq!(json["1"], "one");
        assert_eq!(json["true"], "yes-value");
        assert_eq!(json["name"], "x");
    }

    #[test]
    fn test_to_json_rejects_composite_keys() {
        let err = parse_json("? [a, b]\n: value\n").unwrap_err();
        assert!(matches!(err, CoreError::ConfigFormat { .. }));
    }
}
