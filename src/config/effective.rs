//! Effective configuration with provenance
//!
//! The effective config is the merged tree of all layers, the typed
//! `RunConfig` read from it, and a record of which files contributed.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use recon_tree::{merge_layers, parse_document, ConfigValue, DocumentFormat, TreePath};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::defaults::BuiltinDefaults;
use crate::render::{ArtifactFormat, ArtifactSpec, Variables};

/// Schema version for effective_config
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "recon/effective_config@1";

/// Largest accepted lock timeout
const MAX_LOCK_TIMEOUT_SECONDS: u64 = 600;

/// Origin of a configuration source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    Project,
    Cli,
}

/// A contributing config source with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// A patch-set file to register
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceEntry {
    pub path: PathBuf,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

/// An artifact to render
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactEntry {
    /// Output path relative to `output_dir`
    pub path: PathBuf,
    /// Subtree of the resolved tree; the root when omitted
    #[serde(default)]
    pub tree: Option<TreePath>,
    /// Inferred from the file name when omitted
    #[serde(default)]
    pub format: Option<ArtifactFormat>,
    /// Replacement file copied verbatim instead of rendering a subtree
    #[serde(default)]
    pub source: Option<PathBuf>,
}

/// Typed view of the merged configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Base template file
    pub base: PathBuf,
    pub output_dir: PathBuf,
    pub state_file: String,
    pub lock_timeout_seconds: u64,
    #[serde(default)]
    pub variables: BTreeMap<String, ConfigValue>,
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactEntry>,
}

impl RunConfig {
    /// Variables as strings; scalars are stringified, null is empty
    pub fn variables(&self) -> Result<Variables, ConfigError> {
        self.variables
            .iter()
            .map(|(name, value)| {
                let text = match value {
                    ConfigValue::Null => String::new(),
                    ConfigValue::Bool(b) => b.to_string(),
                    ConfigValue::Integer(i) => i.to_string(),
                    ConfigValue::Float(f) => f.to_string(),
                    ConfigValue::String(s) => s.clone(),
                    other => {
                        return Err(ConfigError::ValidationError(format!(
                            "variable '{}' must be a scalar, found {}",
                            name,
                            other.kind()
                        )))
                    }
                };
                Ok((name.clone(), text))
            })
            .collect()
    }

    /// Artifact specs with formats filled in
    pub fn artifact_specs(&self) -> Result<Vec<ArtifactSpec>, ConfigError> {
        self.artifacts
            .iter()
            .map(|entry| {
                if let Some(source) = &entry.source {
                    return Ok(ArtifactSpec::replacement(entry.path.clone(), source.clone()));
                }
                let format = entry
                    .format
                    .or_else(|| ArtifactFormat::from_path(&entry.path))
                    .ok_or_else(|| {
                        ConfigError::ValidationError(format!(
                            "cannot infer the format of artifact {}; set `format`",
                            entry.path.display()
                        ))
                    })?;
                let tree = entry.tree.clone().unwrap_or_default();
                Ok(ArtifactSpec::new(entry.path.clone(), tree, format))
            })
            .collect()
    }

    /// Paths of the enabled patch sources
    pub fn enabled_sources(&self) -> impl Iterator<Item = &Path> {
        self.sources
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.path.as_path())
    }

    pub fn lock_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lock_timeout_seconds)
    }

    /// Anchor relative paths at `root`
    fn resolve_paths(&mut self, root: &Path) {
        self.base = root.join(&self.base);
        self.output_dir = root.join(&self.output_dir);
        for source in &mut self.sources {
            source.path = root.join(&source.path);
        }
        for artifact in &mut self.artifacts {
            if let Some(source) = artifact.source.as_mut() {
                *source = root.join(&*source);
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.artifacts.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one [[artifacts]] entry is required".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        for artifact in &self.artifacts {
            let relative = artifact
                .path
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
            if !relative || artifact.path.as_os_str().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "artifact path {} must be relative and stay inside output_dir",
                    artifact.path.display()
                )));
            }
            if artifact.source.is_some() && (artifact.tree.is_some() || artifact.format.is_some()) {
                return Err(ConfigError::ValidationError(format!(
                    "artifact {} takes either `source` or `tree`/`format`, not both",
                    artifact.path.display()
                )));
            }
            if !seen.insert(&artifact.path) {
                return Err(ConfigError::ValidationError(format!(
                    "artifact path {} is listed more than once",
                    artifact.path.display()
                )));
            }
        }

        if self.lock_timeout_seconds == 0 || self.lock_timeout_seconds > MAX_LOCK_TIMEOUT_SECONDS {
            return Err(ConfigError::ValidationError(format!(
                "lock_timeout_seconds must be in (0, {}]",
                MAX_LOCK_TIMEOUT_SECONDS
            )));
        }

        if self.state_file.is_empty() || self.state_file.contains(['/', '\\']) {
            return Err(ConfigError::ValidationError(
                "state_file must be a plain file name".to_string(),
            ));
        }

        Ok(())
    }
}

/// Effective configuration with full provenance
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub schema_version: u32,
    pub schema_id: String,

    /// When this config was computed
    pub created_at: DateTime<Utc>,

    /// The merged configuration tree
    pub config: ConfigValue,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,

    #[serde(skip)]
    pub run: RunConfig,
}

impl EffectiveConfig {
    /// Build effective config from layers.
    ///
    /// Relative paths resolve against the project file's directory, or the
    /// current directory when there is no project file.
    pub fn build(project_path: Option<&Path>, cli_overrides: Option<ConfigValue>) -> Result<Self, ConfigError> {
        let mut layers = Vec::new();
        let mut sources = Vec::new();

        // Layer 1: Built-in defaults
        layers.push(BuiltinDefaults::default().to_value());
        sources.push(ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        });

        // Layer 2: Project config
        let mut root = PathBuf::from(".");
        if let Some(path) = project_path {
            let (value, digest) = Self::load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Project,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                root = parent.to_path_buf();
            }
        }

        // Layer 3: CLI overrides
        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let merged = merge_layers(layers);
        let mut run = Self::typed(&merged)?;
        run.validate()?;
        run.resolve_paths(&root);

        Ok(Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            config: merged,
            sources,
            run,
        })
    }

    /// Load and parse a TOML file, returning the tree and digest
    fn load_toml_file(path: &Path) -> Result<(ConfigValue, String), ConfigError> {
        let bytes = fs::read(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = hex::encode(hasher.finalize());

        let contents = String::from_utf8(bytes)
            .map_err(|e| ConfigError::ParseError(format!("{}: invalid UTF-8: {}", path.display(), e)))?;
        let value = parse_document(DocumentFormat::Toml, &contents)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;

        Ok((value, digest))
    }

    fn typed(merged: &ConfigValue) -> Result<RunConfig, ConfigError> {
        let json = serde_json::to_value(merged).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        serde_json::from_value(json).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Get a merged config value by dotted path
    pub fn get(&self, path: &str) -> Option<&ConfigValue> {
        self.config.get(path)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
