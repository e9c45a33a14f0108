//! Artifact serializers

use std::sync::OnceLock;

use recon_tree::{ConfigValue, TreePath};
use regex_lite::Regex;

use super::{ArtifactFormat, RenderError};

/// Serialize a substituted subtree. `at` is its position in the resolved tree.
pub fn serialize(value: &ConfigValue, at: &TreePath, format: ArtifactFormat) -> Result<Vec<u8>, RenderError> {
    let text = match format {
        ArtifactFormat::Json => {
            let mut text = serde_json::to_string_pretty(value).map_err(|e| RenderError::Serialize {
                format,
                message: e.to_string(),
            })?;
            text.push('\n');
            text
        }
        ArtifactFormat::Yaml => serde_yaml::to_string(value).map_err(|e| RenderError::Serialize {
            format,
            message: e.to_string(),
        })?,
        ArtifactFormat::Toml => {
            let table = match to_toml(value, at)? {
                toml::Value::Table(table) => table,
                _ => return Err(unsupported(format, at, format!("top level must be a mapping, found {}", value.kind()))),
            };
            toml::to_string(&table).map_err(|e| RenderError::Serialize {
                format,
                message: e.to_string(),
            })?
        }
        ArtifactFormat::Env => to_env(value, at)?,
        ArtifactFormat::Verbatim => match value {
            ConfigValue::String(text) => text.clone(),
            other => {
                return Err(unsupported(
                    format,
                    at,
                    format!("only a string can be written verbatim, found {}", other.kind()),
                ))
            }
        },
    };
    Ok(text.into_bytes())
}

fn unsupported(format: ArtifactFormat, at: &TreePath, reason: String) -> RenderError {
    RenderError::Unsupported {
        format,
        path: at.clone(),
        reason,
    }
}

/// TOML has no null, so any null leaf is reported with its path
fn to_toml(value: &ConfigValue, at: &TreePath) -> Result<toml::Value, RenderError> {
    Ok(match value {
        ConfigValue::Null => {
            return Err(unsupported(ArtifactFormat::Toml, at, "null has no TOML representation".to_string()))
        }
        ConfigValue::Bool(b) => toml::Value::Boolean(*b),
        ConfigValue::Integer(i) => toml::Value::Integer(*i),
        ConfigValue::Float(f) => toml::Value::Float(*f),
        ConfigValue::String(s) => toml::Value::String(s.clone()),
        ConfigValue::Sequence(items) => toml::Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| to_toml(item, &at.index(i)))
                .collect::<Result<_, _>>()?,
        ),
        ConfigValue::Mapping(map) => {
            let mut table = toml::Table::new();
            for (key, child) in map {
                table.insert(key.clone(), to_toml(child, &at.child(key.as_str()))?);
            }
            toml::Value::Table(table)
        }
    })
}

fn env_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.-]*$").expect("env key pattern compiles"))
}

/// One `KEY=value` line per entry of a flat mapping
fn to_env(value: &ConfigValue, at: &TreePath) -> Result<String, RenderError> {
    let map = value.as_mapping().ok_or_else(|| {
        unsupported(ArtifactFormat::Env, at, format!("expected a mapping of scalars, found {}", value.kind()))
    })?;

    let mut out = String::new();
    for (key, entry) in map {
        if !env_key_re().is_match(key) {
            return Err(unsupported(
                ArtifactFormat::Env,
                &at.child(key.as_str()),
                format!("'{}' is not a valid env variable name", key.escape_debug()),
            ));
        }
        let rendered = match entry {
            ConfigValue::Null => String::new(),
            ConfigValue::Bool(b) => b.to_string(),
            ConfigValue::Integer(i) => i.to_string(),
            ConfigValue::Float(f) => f.to_string(),
            ConfigValue::String(s) => env_quote(s),
            nested => {
                return Err(unsupported(
                    ArtifactFormat::Env,
                    &at.child(key.as_str()),
                    format!("{} values cannot be written to an env file", nested.kind()),
                ))
            }
        };
        out.push_str(key);
        out.push('=');
        out.push_str(&rendered);
        out.push('\n');
    }
    Ok(out)
}

fn env_quote(value: &str) -> String {
    let plain = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "_-.,:/@+%".contains(c));
    if plain {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '\\' | '"' | '$' => {
                quoted.push('\\');
                quoted.push(c);
            }
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}
