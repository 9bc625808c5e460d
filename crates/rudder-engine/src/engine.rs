//! Manifest rendering based on MiniJinja

use minijinja::{AutoEscape, Environment, UndefinedBehavior};
use rudder_core::{CoreError, Package, Values, yaml};
use serde_json::{Map, Value as JsonValue};

use crate::error::{EngineError, Result, TemplateError};
use crate::filters;
use crate::normalize;

/// Characters that may legitimately follow a backslash in a YAML
/// double-quoted scalar
const ESCAPE_INTRODUCERS: &str = "0123456789abtnvfreNLPxuU_\"'/ \t";

/// One template's normalized output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedBlock {
    /// Name of the template that produced the block
    pub source: String,

    /// Normalized YAML, one `---` separated document per unit
    pub text: String,
}

/// Renders a package tree into a multi-document manifest
#[derive(Debug, Clone, Default)]
pub struct ManifestRenderer;

impl ManifestRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Create a configured MiniJinja environment
    ///
    /// Missing keys render as empty text and nothing is auto-escaped.
    fn create_environment(&self) -> Environment<'static> {
        let mut env = Environment::new();

        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.set_keep_trailing_newline(true);
        env.set_formatter(|out, state, value| {
            if value.is_none() {
                Ok(())
            } else {
                minijinja::escape_formatter(out, state, value)
            }
        });

        env.add_filter("toyaml", filters::toyaml);
        env.add_filter("tojson", filters::tojson);
        env.add_filter("quote", filters::quote);
        env.add_filter("indent", filters::indent);
        env.add_filter("nindent", filters::nindent);

        env
    }

    /// Render the package tree against merged values into manifest text
    pub fn render(&self, package: &Package, values: &Values) -> Result<String> {
        let blocks = self.render_blocks(package, values)?;

        Ok(blocks.into_iter().map(|block| block.text).collect())
    }

    /// Render and normalize every template, root package first, then each
    /// dependency in declaration order
    pub fn render_blocks(&self, package: &Package, values: &Values) -> Result<Vec<RenderedBlock>> {
        let env = self.create_environment();
        let escaped = escape_value(values.inner());

        let mut raw = Vec::new();
        render_package(&env, package, &escaped, &mut raw)?;

        let mut blocks = Vec::with_capacity(raw.len());
        for (source, rendered) in raw {
            if let Some(text) = normalize_block(&source, &rendered)? {
                blocks.push(RenderedBlock { source, text });
            }
        }
        Ok(blocks)
    }
}

fn render_package(
    env: &Environment<'static>,
    package: &Package,
    values: &JsonValue,
    out: &mut Vec<(String, String)>,
) -> Result<()> {
    for template in &package.templates {
        let rendered = env
            .render_named_str(&template.name, &template.data, values)
            .map_err(|e| TemplateError::from_minijinja(e, &template.name, &template.data))?;
        out.push((template.name.clone(), rendered));
    }

    for dependency in &package.dependencies {
        let scoped = match values.get(dependency.name()) {
            Some(JsonValue::Object(map)) => JsonValue::Object(map.clone()),
            _ => JsonValue::Object(Map::new()),
        };
        render_package(env, dependency, &scoped, out)?;
    }

    Ok(())
}

/// Re-parse one rendered block and emit it in canonical form
///
/// Returns `None` when the block holds no documents.
fn normalize_block(source: &str, rendered: &str) -> Result<Option<String>> {
    let documents = yaml::parse_documents(rendered).map_err(|e| match e {
        CoreError::YamlParse(inner) => EngineError::InvalidManifest {
            template: source.to_string(),
            message: inner.to_string(),
        },
        other => EngineError::Core(other),
    })?;

    let mut text = String::new();
    for document in documents.iter().filter(|d| !d.is_null()) {
        text.push_str("---\n");
        if text.len() == 4 {
            text.push_str(&format!("# Source: {}\n", source));
        }
        text.push_str(&normalize::emit_document(document)?);
    }

    Ok((!text.is_empty()).then_some(text))
}

/// Double backslashes that do not start a recognized escape sequence
///
/// An already doubled backslash is left alone.
pub fn escape_backslashes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('\\') => {
                chars.next();
                out.push_str("\\\\");
            }
            Some(next) if ESCAPE_INTRODUCERS.contains(*next) => out.push('\\'),
            _ => out.push_str("\\\\"),
        }
    }

    out
}

fn escape_value(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::String(s) => JsonValue::String(escape_backslashes(s)),
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(escape_value).collect()),
        JsonValue::Object(map) => JsonValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), escape_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// First non-null `kind` across the documents of a manifest
///
/// Unparseable text yields `None`.
pub fn resolve_kind(text: &str) -> Option<String> {
    let documents = yaml::parse_documents(text).ok()?;
    documents.iter().find_map(|document| match document.get("kind")? {
        serde_yaml::Value::Null => None,
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
