//! Block-style YAML emission
//!
//! Strings are emitted plain only when a YAML 1.1 reader would read them
//! back as the same string. Anything that could resolve to a number,
//! boolean, null or timestamp, or that needs escaping, is double-quoted.
//! Lines are never wrapped.

use once_cell::sync::Lazy;
use regex::Regex;
use rudder_core::CoreError;
use serde_yaml::{Mapping, Value};

use crate::error::{EngineError, Result};

const INDENT: usize = 2;

static AMBIGUOUS_SCALAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)^(?:
            ~ | null | Null | NULL
          | (?i:y|yes|n|no|true|false|on|off)
          | [-+]?[0-9][0-9_]*
          | [-+]?0x[0-9a-fA-F_]+
          | [-+]?0o[0-7_]+
          | [-+]?0b[01_]+
          | [-+]?(?:[0-9][0-9_]*)?\.[0-9_]*(?:[eE][-+]?[0-9]+)?
          | [-+]?[0-9][0-9_]*[eE][-+]?[0-9]+
          | [-+]?\.(?:inf|Inf|INF)
          | \.(?:nan|NaN|NAN)
          | [-+]?[0-9][0-9_]*(?::[0-5]?[0-9])+(?:\.[0-9_]*)?
          | [0-9]{4}-[0-9]{1,2}-[0-9]{1,2}(?:(?:[Tt]|[\x20\t]+)[0-9]{1,2}:[0-9]{2}:[0-9]{2}(?:\.[0-9]*)?(?:[\x20\t]*(?:Z|[-+][0-9]{1,2}(?::[0-9]{2})?))?)?
        )$",
    )
    .expect("valid regex")
});

/// Emit one document (without a `---` marker)
pub fn emit_document(value: &Value) -> Result<String> {
    let mut out = String::new();
    match value {
        Value::Mapping(map) if !map.is_empty() => emit_mapping(map, 0, false, &mut out)?,
        Value::Sequence(items) if !items.is_empty() => emit_sequence(items, 0, false, &mut out)?,
        other => {
            out.push_str(&scalar(other)?);
            out.push('\n');
        }
    }
    Ok(out)
}

/// Render a string as a YAML scalar, quoting it when needed
pub fn format_string(s: &str) -> String {
    if needs_quotes(s) {
        double_quoted(s)
    } else {
        s.to_string()
    }
}

fn emit_mapping(map: &Mapping, indent: usize, inline_first: bool, out: &mut String) -> Result<()> {
    for (i, (key, value)) in map.iter().enumerate() {
        if !(inline_first && i == 0) {
            push_indent(out, indent);
        }
        out.push_str(&key_scalar(key)?);
        out.push(':');
        match value {
            Value::Mapping(child) if !child.is_empty() => {
                out.push('\n');
                emit_mapping(child, indent + INDENT, false, out)?;
            }
            Value::Sequence(items) if !items.is_empty() => {
                out.push('\n');
                emit_sequence(items, indent + INDENT, false, out)?;
            }
            other => {
                out.push(' ');
                out.push_str(&scalar(other)?);
                out.push('\n');
            }
        }
    }
    Ok(())
}

fn emit_sequence(items: &[Value], indent: usize, inline_first: bool, out: &mut String) -> Result<()> {
    for (i, item) in items.iter().enumerate() {
        if !(inline_first && i == 0) {
            push_indent(out, indent);
        }
        out.push_str("- ");
        match item {
            Value::Mapping(child) if !child.is_empty() => {
                emit_mapping(child, indent + INDENT, true, out)?;
            }
            Value::Sequence(nested) if !nested.is_empty() => {
                emit_sequence(nested, indent + INDENT, true, out)?;
            }
            other => {
                out.push_str(&scalar(other)?);
                out.push('\n');
            }
        }
    }
    Ok(())
}

fn push_indent(out: &mut String, indent: usize) {
    out.extend(std::iter::repeat_n(' ', indent));
}

fn scalar(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format_string(s),
        Value::Mapping(_) => "{}".to_string(),
        Value::Sequence(_) => "[]".to_string(),
        Value::Tagged(tagged) => {
            return Err(EngineError::Core(CoreError::UnsafeYaml {
                tag: tagged.tag.to_string(),
            }));
        }
    })
}

fn key_scalar(key: &Value) -> Result<String> {
    match key {
        Value::Mapping(_) | Value::Sequence(_) => Err(EngineError::Emit {
            message: "composite mapping keys are not supported".to_string(),
        }),
        other => scalar(other),
    }
}

fn needs_quotes(s: &str) -> bool {
    if s.is_empty() || s == "<<" || AMBIGUOUS_SCALAR.is_match(s) {
        return true;
    }
    let starts_with_indicator = s.starts_with([
        '-', '?', ':', ',', '[', ']', '{', '}', '#', '&', '*', '!', '|', '>', '\'', '"', '%', '@',
        '`', ' ', '\t',
    ]);
    starts_with_indicator
        || s.ends_with([' ', '\t', ':'])
        || s.contains(": ")
        || s.contains(" #")
        || s.chars().any(char::is_control)
}

fn double_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
