//! Configuration values and the package-aware merge
//!
//! Merge rules:
//! - Mappings merge recursively
//! - Sequences concatenate: base elements first, then override elements
//!   not already present in the base
//! - Anything else: the override replaces the base
//!
//! A package's dependencies are merged separately: the subtree stored under
//! a dependency's name is only ever merged against that dependency's own
//! defaults.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{CoreError, Result};
use crate::package::{ConfigValues, Package};
use crate::yaml;

/// Values container with deep merge capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

impl Values {
    /// Create empty values
    pub fn new() -> Self {
        Self(JsonValue::Object(Map::new()))
    }

    /// Parse values from YAML string
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(Self(yaml::parse_json(text)?))
    }

    /// Deep merge another Values into this one
    pub fn merge(&mut self, overlay: &Values) {
        merge_value(&mut self.0, &overlay.0);
    }

    /// Get a value by dotted path
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        path.split('.')
            .try_fold(&self.0, |value, key| value.as_object()?.get(key))
    }

    /// Values stored under a dependency's name, or an empty map
    pub fn scope(&self, name: &str) -> Values {
        match self.0.get(name) {
            Some(JsonValue::Object(map)) => Values(JsonValue::Object(map.clone())),
            _ => Values::new(),
        }
    }

    /// Get the inner JSON value
    pub fn inner(&self) -> &JsonValue {
        &self.0
    }

    /// Convert to JSON value
    pub fn into_inner(self) -> JsonValue {
        self.0
    }

    /// Check if values are empty
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Null => true,
            _ => false,
        }
    }

    /// Serialize back to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.0)?)
    }
}

/// Merge caller overrides into a package tree's declared values
///
/// Fails with [`CoreError::ConfigFormat`] when the overrides, or any
/// package's own values, are not a mapping.
pub fn merge_config(package: &Package, overrides: &ConfigValues) -> Result<Values> {
    let overrides = parse_mapping(overrides, "override values")?;
    let merged = merge_package(package, overrides)?;
    Ok(Values(JsonValue::Object(merged)))
}

fn merge_package(package: &Package, overrides: Map<String, JsonValue>) -> Result<Map<String, JsonValue>> {
    let mut merged = parse_mapping(
        &package.config_values,
        &format!("values of package '{}'", package.name()),
    )?;

    // Parent-declared defaults for a dependency are peeled off here and
    // handed to that dependency's own merge.
    let mut dependency_defaults = Map::new();
    for name in package.dependency_names() {
        if let Some(value) = merged.remove(name) {
            dependency_defaults.insert(name.to_string(), value);
        }
    }

    merge_maps(&mut merged, &overrides);

    for dependency in &package.dependencies {
        let name = dependency.name();
        let mut scoped = as_mapping(
            dependency_defaults.remove(name),
            || format!("values for dependency '{}' of '{}'", name, package.name()),
        )?;
        let scoped_overrides = as_mapping(
            overrides.get(name).cloned(),
            || format!("override values for dependency '{}'", name),
        )?;
        merge_maps(&mut scoped, &scoped_overrides);

        let resolved = merge_package(dependency, scoped)?;
        merged.insert(name.to_string(), JsonValue::Object(resolved));
    }

    Ok(merged)
}

fn parse_mapping(values: &ConfigValues, what: &str) -> Result<Map<String, JsonValue>> {
    match values.raw.as_deref() {
        Some(raw) if !values.is_empty() => {
            let parsed = yaml::parse_json(raw).map_err(|e| match e {
                CoreError::YamlParse(inner) => {
                    CoreError::config_format(format!("{} are not valid YAML: {}", what, inner))
                }
                other => other,
            })?;
            as_mapping(Some(parsed), || what.to_string())
        }
        _ => Ok(Map::new()),
    }
}

fn as_mapping(
    value: Option<JsonValue>,
    what: impl FnOnce() -> String,
) -> Result<Map<String, JsonValue>> {
    match value {
        Some(JsonValue::Object(map)) => Ok(map),
        Some(JsonValue::Null) | None => Ok(Map::new()),
        Some(other) => Err(CoreError::config_format(format!(
            "{} must be a mapping, found {}",
            what(),
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a sequence",
        JsonValue::Object(_) => "a mapping",
    }
}

fn merge_maps(base: &mut Map<String, JsonValue>, overlay: &Map<String, JsonValue>) {
    for (key, overlay_value) in overlay {
        match base.get_mut(key) {
            Some(base_value) => merge_value(base_value, overlay_value),
            None => {
                base.insert(key.clone(), overlay_value.clone());
            }
        }
    }
}

fn merge_value(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            merge_maps(base_map, overlay_map);
        }
        (JsonValue::Array(base_items), JsonValue::Array(overlay_items)) => {
            *base_items = merge_lists(base_items, overlay_items);
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

/// `base ++ (overlay - base)` by value equality
pub fn merge_lists(base: &[JsonValue], overlay: &[JsonValue]) -> Vec<JsonValue> {
    let mut merged = base.to_vec();
    merged.extend(overlay.iter().filter(|v| !base.contains(v)).cloned());
    merged
}
