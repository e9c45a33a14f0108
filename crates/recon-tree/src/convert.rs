//! Document parsing
//!
//! Reads JSON, YAML and TOML documents into `ConfigValue` trees, keeping
//! the key order of the source document.

use std::path::Path;

use crate::value::{ConfigMap, ConfigValue};

/// Supported source document formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
    Toml,
}

impl DocumentFormat {
    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(DocumentFormat::Json),
            "yaml" | "yml" => Some(DocumentFormat::Yaml),
            "toml" => Some(DocumentFormat::Toml),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Json => "json",
            DocumentFormat::Yaml => "yaml",
            DocumentFormat::Toml => "toml",
        }
    }
}

/// Errors from document parsing
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Parse a document in the given format
pub fn parse_document(format: DocumentFormat, text: &str) -> Result<ConfigValue, TreeError> {
    match format {
        DocumentFormat::Json => Ok(serde_json::from_str(text)?),
        DocumentFormat::Yaml => {
            // An empty YAML document is an empty tree, not null
            if text.trim().is_empty() {
                return Ok(ConfigValue::mapping());
            }
            Ok(serde_yaml::from_str(text)?)
        }
        DocumentFormat::Toml => {
            let table: toml::Table = toml::from_str(text)?;
            Ok(toml_to_tree(toml::Value::Table(table)))
        }
    }
}

/// Convert a TOML value into a tree value
pub fn toml_to_tree(toml: toml::Value) -> ConfigValue {
    match toml {
        toml::Value::String(s) => ConfigValue::String(s),
        toml::Value::Integer(i) => ConfigValue::Integer(i),
        toml::Value::Float(f) => ConfigValue::Float(f),
        toml::Value::Boolean(b) => ConfigValue::Bool(b),
        toml::Value::Datetime(dt) => ConfigValue::String(dt.to_string()),
        toml::Value::Array(arr) => {
            ConfigValue::Sequence(arr.into_iter().map(toml_to_tree).collect())
        }
        toml::Value::Table(table) => {
            let map: ConfigMap = table
                .into_iter()
                .map(|(k, v)| (k, toml_to_tree(v)))
                .collect();
            ConfigValue::Mapping(map)
        }
    }
}
