//! Release analysis: diffing two manifests into unit changes
//!
//! A manifest is split into deployable units. Each unit is identified by a
//! name taken from a kind-specific field, so documents can be reordered
//! between versions without producing spurious changes. Names are unique
//! across kinds: deployer data and scale requests address units by name,
//! and a unit whose kind changes is replaced like any other update.

use rudder_core::yaml;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use similar::{ChangeTag, TextDiff};
use std::collections::BTreeMap;

use crate::error::{ReleaseError, Result};

/// Deployment property holding the instance count
pub const COUNT_PROPERTY: &str = "deployer.count";

/// Supported manifest kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitKind {
    /// A single application; identified by `metadata.name`
    Application,

    /// A platform-native manifest; identified by `spec.manifest.name`,
    /// falling back to `metadata.name`
    PlatformManifest,
}

impl UnitKind {
    pub fn parse(kind: &str) -> Result<Self> {
        match kind {
            "Application" => Ok(Self::Application),
            "PlatformManifest" => Ok(Self::PlatformManifest),
            other => Err(ReleaseError::UnsupportedKind(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Application => "Application",
            Self::PlatformManifest => "PlatformManifest",
        }
    }

    fn identity(&self, document: &JsonValue) -> Option<String> {
        let metadata_name = || document.pointer("/metadata/name");
        let name = match self {
            Self::Application => metadata_name(),
            Self::PlatformManifest => document
                .pointer("/spec/manifest/name")
                .filter(|v| !v.is_null())
                .or_else(metadata_name),
        }?;

        match name {
            JsonValue::String(s) if !s.trim().is_empty() => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// One addressable unit of a manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployableUnit {
    pub kind: UnitKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    /// The full document
    pub document: JsonValue,
}

impl DeployableUnit {
    fn spec_str(&self, field: &str) -> Option<&str> {
        self.document.get("spec")?.get(field)?.as_str()
    }

    fn spec_map(&self, field: &str) -> BTreeMap<String, String> {
        self.document
            .get("spec")
            .and_then(|s| s.get(field))
            .and_then(JsonValue::as_object)
            .map(|map| {
                map.iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| (k.clone(), scalar_text(v)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Artifact location (`spec.resource`)
    pub fn resource(&self) -> Option<&str> {
        self.spec_str("resource")
    }

    /// Artifact version (`spec.version`)
    pub fn version(&self) -> Option<&str> {
        self.spec_str("version")
    }

    pub fn application_properties(&self) -> BTreeMap<String, String> {
        self.spec_map("applicationProperties")
    }

    pub fn deployment_properties(&self) -> BTreeMap<String, String> {
        self.spec_map("deploymentProperties")
    }

    /// Requested instance count, 1 unless `deployer.count` says otherwise
    pub fn count(&self) -> u32 {
        self.deployment_properties()
            .get(COUNT_PROPERTY)
            .and_then(|c| c.trim().parse().ok())
            .unwrap_or(1)
    }

    /// Document used for change detection: the instance count is managed
    /// by scaling, not redeployment
    fn comparable(&self) -> JsonValue {
        let mut document = self.document.clone();
        if let Some(props) = document
            .pointer_mut("/spec/deploymentProperties")
            .and_then(JsonValue::as_object_mut)
        {
            props.remove(COUNT_PROPERTY);
        }
        document
    }

    /// The document as YAML, for display
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.document)?)
    }
}

fn scalar_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A unit present in both manifests with different content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitChange {
    pub previous: DeployableUnit,
    pub candidate: DeployableUnit,
}

impl UnitChange {
    pub fn name(&self) -> &str {
        &self.candidate.name
    }

    /// Line diff of the two documents, prefixed `+`, `-` or ` `
    pub fn diff(&self) -> Result<String> {
        let old = self.previous.to_yaml()?;
        let new = self.candidate.to_yaml()?;
        let diff = TextDiff::from_lines(&old, &new);

        let mut output = String::new();
        for change in diff.iter_all_changes() {
            let prefix = match change.tag() {
                ChangeTag::Delete => "-",
                ChangeTag::Insert => "+",
                ChangeTag::Equal => " ",
            };
            output.push_str(prefix);
            output.push_str(change.value().trim_end());
            output.push('\n');
        }
        Ok(output)
    }
}

/// Units to deploy, update and delete to move between two manifests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub to_deploy: Vec<DeployableUnit>,
    pub to_update: Vec<UnitChange>,
    pub to_delete: Vec<DeployableUnit>,
    /// Names of units identical in both manifests
    pub unchanged: Vec<String>,
}

impl AnalysisReport {
    pub fn has_changes(&self) -> bool {
        !(self.to_deploy.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty())
    }

    /// Generate a human-readable summary
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if !self.to_deploy.is_empty() {
            parts.push(format!("{} to deploy", self.to_deploy.len()));
        }
        if !self.to_update.is_empty() {
            parts.push(format!("{} to update", self.to_update.len()));
        }
        if !self.to_delete.is_empty() {
            parts.push(format!("{} to delete", self.to_delete.len()));
        }

        if parts.is_empty() {
            "No changes".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Split a manifest into units keyed by identity
///
/// Documents without a `kind` are skipped; an unsupported kind, a unit
/// without an identity or two units with the same identity are errors.
pub fn parse_units(manifest: &str) -> Result<BTreeMap<String, DeployableUnit>> {
    let mut units = BTreeMap::new();

    for document in yaml::parse_documents(manifest)? {
        if document.is_null() {
            continue;
        }
        let document = yaml::to_json(document)?;
        let Some(kind) = document.get("kind").filter(|k| !k.is_null()) else {
            continue;
        };
        let kind = UnitKind::parse(&scalar_text(kind))?;

        let name = kind.identity(&document).ok_or_else(|| {
            ReleaseError::Package(format!("{} document has no name", kind.as_str()))
        })?;
        let api_version = document
            .get("apiVersion")
            .and_then(JsonValue::as_str)
            .map(String::from);

        let unit = DeployableUnit {
            kind,
            name: name.clone(),
            api_version,
            document,
        };
        if units.insert(name.clone(), unit).is_some() {
            return Err(ReleaseError::Package(format!(
                "manifest declares unit '{}' more than once",
                name
            )));
        }
    }

    Ok(units)
}

/// Diff two manifests
pub fn analyze(previous: &str, candidate: &str) -> Result<AnalysisReport> {
    let mut previous = parse_units(previous)?;
    let candidate = parse_units(candidate)?;

    let mut report = AnalysisReport::default();
    for (name, unit) in candidate {
        match previous.remove(&name) {
            None => report.to_deploy.push(unit),
            Some(old) if old.kind != unit.kind || old.comparable() != unit.comparable() => {
                report.to_update.push(UnitChange {
                    previous: old,
                    candidate: unit,
                });
            }
            Some(_) => report.unchanged.push(name),
        }
    }
    report.to_delete = previous.into_values().collect();

    Ok(report)
}
