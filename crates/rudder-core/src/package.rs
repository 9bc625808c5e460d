//! Package definitions
//!
//! A package is an owned tree: every dependency is held by value inside its
//! parent, so a fully materialized `Package` is immutable and acyclic.

use semver::Version;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

use crate::error::{CoreError, Result};

/// Default API version written into new package descriptors
pub const DEFAULT_API_VERSION: &str = "rudder/v1";

/// Default package kind
pub const DEFAULT_PACKAGE_KIND: &str = "Package";

/// A named, versioned bundle of templates, default values and dependencies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    /// Descriptor read from `package.yml`
    pub metadata: PackageInfo,

    /// Templates in render order
    #[serde(default)]
    pub templates: Vec<Template>,

    /// Default configuration values (`values.yml`)
    #[serde(default)]
    pub config_values: ConfigValues,

    /// Dependency packages, owned by value
    #[serde(default)]
    pub dependencies: Vec<Package>,
}

/// Package descriptor (`package.yml`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageInfo {
    /// Descriptor API version
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Package kind
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Package name
    pub name: String,

    /// Semantic version
    pub version: Version,

    /// Maintainer contact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintainer: Option<String>,

    /// Human readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Search tags (a list, or a comma separated string)
    #[serde(default, deserialize_with = "tags_from_list_or_string")]
    pub tags: Vec<String>,

    /// Where the package sources live
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,

    /// Project homepage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_url: Option<String>,

    /// SHA-256 of the package archive, set when uploaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_kind() -> String {
    DEFAULT_PACKAGE_KIND.to_string()
}

fn tags_from_list_or_string<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Tags {
        List(Vec<String>),
        Joined(String),
    }

    Ok(match Option::<Tags>::deserialize(deserializer)? {
        Some(Tags::List(tags)) => tags,
        Some(Tags::Joined(joined)) => joined
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect(),
        None => Vec::new(),
    })
}

impl PackageInfo {
    /// Create a descriptor with default api version and kind
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            name: name.into(),
            version,
            maintainer: None,
            description: None,
            tags: Vec::new(),
            source_url: None,
            home_url: None,
            sha256: None,
        }
    }

    /// Parse a `package.yml` document
    pub fn from_yaml(text: &str) -> Result<Self> {
        let value = crate::yaml::parse_document(text)?;
        Ok(serde_yaml::from_value(value)?)
    }
}

/// A single template: file name plus raw text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub data: String,
}

impl Template {
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Raw serialized configuration values (YAML)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigValues {
    pub raw: Option<String>,
}

impl ConfigValues {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: Some(raw.into()),
        }
    }

    /// True when no values were supplied or the text is blank
    pub fn is_empty(&self) -> bool {
        self.raw.as_deref().map(|r| r.trim().is_empty()).unwrap_or(true)
    }
}

/// A package repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    /// Unique repository name
    pub name: String,

    /// Location of the repository
    pub url: String,

    /// Whether packages are hosted by this service (uploads allowed)
    #[serde(default)]
    pub local: bool,

    /// Resolution priority; higher wins
    #[serde(default)]
    pub order: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Repository {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            local: false,
            order: 0,
            description: None,
        }
    }

    /// A repository hosted by this service
    pub fn local(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            url: format!("local://{}", name),
            name,
            local: true,
            order: 0,
            description: None,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

/// Catalog index entry: a package without its templates and values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintainer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Catalog-assigned id of the owning repository
    pub repository_id: u64,
    pub repository_name: String,
    /// Priority of the owning repository
    pub repository_order: i32,
}

impl PackageMetadata {
    /// Project a package descriptor into an index entry for `repository`
    pub fn from_info(info: &PackageInfo, repository_id: u64, repository: &Repository) -> Self {
        Self {
            api_version: info.api_version.clone(),
            kind: info.kind.clone(),
            name: info.name.clone(),
            version: info.version.clone(),
            description: info.description.clone(),
            tags: info.tags.clone(),
            maintainer: info.maintainer.clone(),
            sha256: info.sha256.clone(),
            repository_id,
            repository_name: repository.name.clone(),
            repository_order: repository.order,
        }
    }

    /// `name:version` display form
    pub fn coordinates(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }
}

impl Package {
    pub fn new(metadata: PackageInfo) -> Self {
        Self {
            metadata,
            templates: Vec::new(),
            config_values: ConfigValues::default(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_template(mut self, template: Template) -> Self {
        self.templates.push(template);
        self
    }

    pub fn with_values(mut self, raw: impl Into<String>) -> Self {
        self.config_values = ConfigValues::new(raw);
        self
    }

    pub fn with_dependency(mut self, dependency: Package) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn version(&self) -> &Version {
        &self.metadata.version
    }

    /// Names of the direct dependencies
    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(|d| d.name())
    }

    /// Flat name -> node index over the whole tree
    pub fn index(&self) -> Result<PackageIndex<'_>> {
        let mut nodes = HashMap::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if nodes.insert(node.name(), node).is_some() {
                return Err(CoreError::InvalidPackage {
                    message: format!("package name '{}' appears more than once in the tree", node.name()),
                });
            }
            stack.extend(node.dependencies.iter());
        }
        Ok(PackageIndex { nodes })
    }

    /// Check the tree is usable for a release
    pub fn validate(&self) -> Result<()> {
        let index = self.index()?;
        for node in index.nodes.values() {
            if node.name().trim().is_empty() {
                return Err(CoreError::MissingField {
                    field: "name".to_string(),
                });
            }
            if node.templates.iter().any(|t| t.name.trim().is_empty()) {
                return Err(CoreError::InvalidPackage {
                    message: format!("package '{}' has a template without a name", node.name()),
                });
            }
        }
        Ok(())
    }
}

/// Flat lookup over a package tree
#[derive(Debug)]
pub struct PackageIndex<'a> {
    nodes: HashMap<&'a str, &'a Package>,
}

impl<'a> PackageIndex<'a> {
    pub fn get(&self, name: &str) -> Option<&'a Package> {
        self.nodes.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node names in sorted order
    pub fn names(&self) -> Vec<&'a str> {
        let mut names: Vec<&str> = self.nodes.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
