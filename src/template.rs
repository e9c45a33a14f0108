//! Base template stores
//!
//! Read-only access to the unmodified configuration tree that patches are
//! overlaid on. The tree is reloaded on every run.

use std::fs;
use std::path::{Path, PathBuf};

use recon_tree::{parse_document, ConfigValue, DocumentFormat};

/// Errors for loading base templates
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read base template {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("unsupported base template format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("invalid base template {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("base template {path} must be a mapping, found {found}")]
    NotMapping { path: PathBuf, found: &'static str },
}

/// Source of the base configuration tree
pub trait BaseTemplateStore {
    fn load_base_tree(&self) -> Result<ConfigValue, StoreError>;
}

/// Base template read from a JSON, YAML or TOML file
#[derive(Debug, Clone)]
pub struct FileTemplateStore {
    path: PathBuf,
}

impl FileTemplateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BaseTemplateStore for FileTemplateStore {
    fn load_base_tree(&self) -> Result<ConfigValue, StoreError> {
        let format = DocumentFormat::from_path(&self.path)
            .ok_or_else(|| StoreError::UnsupportedFormat(self.path.clone()))?;
        let text = fs::read_to_string(&self.path).map_err(|e| StoreError::Read {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        let tree = parse_document(format, &text).map_err(|e| StoreError::Parse {
            path: self.path.clone(),
            message: e.to_string(),
        })?;

        match tree {
            ConfigValue::Mapping(_) => Ok(tree),
            ConfigValue::Null => Ok(ConfigValue::mapping()),
            other => Err(StoreError::NotMapping {
                path: self.path.clone(),
                found: other.kind(),
            }),
        }
    }
}

/// Base template held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticTemplateStore {
    tree: ConfigValue,
}

impl StaticTemplateStore {
    pub fn new(tree: ConfigValue) -> Self {
        Self { tree }
    }
}

impl BaseTemplateStore for StaticTemplateStore {
    fn load_base_tree(&self) -> Result<ConfigValue, StoreError> {
        Ok(self.tree.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_yaml_template() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("docker-compose.yml");
        fs::write(&path, "services:\n  web:\n    image: prod:1.0\n").unwrap();

        let tree = FileTemplateStore::new(&path).load_base_tree().unwrap();
        assert_eq!(tree.get("services.web.image").and_then(|v| v.as_str()), Some("prod:1.0"));
    }

    #[test]
    fn test_empty_yaml_is_empty_mapping() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.yaml");
        fs::write(&path, "").unwrap();

        let tree = FileTemplateStore::new(&path).load_base_tree().unwrap();
        assert_eq!(tree, ConfigValue::mapping());
    }

    #[test]
    fn test_non_mapping_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("list.json");
        fs::write(&path, "[1, 2]").unwrap();

        let err = FileTemplateStore::new(&path).load_base_tree().unwrap_err();
        assert!(matches!(err, StoreError::NotMapping { found: "sequence", .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = FileTemplateStore::new("/nonexistent/base.toml").load_base_tree().unwrap_err();
        assert!(matches!(err, StoreError::Read { .. }));
    }

    #[test]
    fn test_static_store_returns_copy() {
        let store = StaticTemplateStore::new(ConfigValue::from(serde_json::json!({"a": 1})));
        assert_eq!(store.load_base_tree().unwrap().get("a"), Some(&ConfigValue::Integer(1)));
    }
}
