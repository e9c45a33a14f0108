//! Patch sources
//!
//! A source is a named contributor of fragments (a module of development
//! patches, a user override file). File-backed sources are patch-set
//! documents in TOML, JSON or YAML:
//!
//! ```toml
//! source = "dev-mounts"
//! priority = 10
//!
//! [[patch]]
//! name = "web-image"
//! path = "services.web.image"
//! op = "set"
//! value = "dev:latest"
//! ```
//!
//! A patch may take its value from another document with `value_file`,
//! resolved against the patch file's directory.

use std::fs;
use std::path::{Path, PathBuf};

use recon_tree::{parse_document, ConfigValue, DocumentFormat, TreePath};
use serde::Deserialize;

use super::fragment::{PatchFragment, PatchOp};

/// Errors for loading patch sources
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to read patch file {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("unsupported patch file format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("invalid patch file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("patch '{name}' in {path}: {op} requires a value")]
    MissingValue { path: PathBuf, name: String, op: PatchOp },

    #[error("patch in {path} has an empty name")]
    EmptyName { path: PathBuf },

    #[error("patch '{name}' in {path}: set either `value` or `value_file`, not both")]
    AmbiguousValue { path: PathBuf, name: String },

    #[error("patch '{name}' in {path}: cannot load value file {file}: {message}")]
    ValueFile {
        path: PathBuf,
        name: String,
        file: PathBuf,
        message: String,
    },
}

/// A named contributor of patch fragments
pub trait PatchSource {
    /// Source name; every fragment it yields carries this name
    fn name(&self) -> &str;

    /// The fragments this source contributes
    fn fragments(&self) -> Result<Vec<PatchFragment>, SourceError>;
}

/// Source backed by fragments already in memory
#[derive(Debug, Clone)]
pub struct StaticPatchSource {
    name: String,
    fragments: Vec<PatchFragment>,
}

impl StaticPatchSource {
    pub fn new(name: impl Into<String>, fragments: Vec<PatchFragment>) -> Self {
        Self {
            name: name.into(),
            fragments,
        }
    }
}

impl PatchSource for StaticPatchSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fragments(&self) -> Result<Vec<PatchFragment>, SourceError> {
        Ok(self.fragments.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PatchSetDocument {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    priority: i64,
    #[serde(default, rename = "patch")]
    patches: Vec<PatchEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PatchEntry {
    name: String,
    path: TreePath,
    op: PatchOp,
    #[serde(default, deserialize_with = "present_value")]
    value: Option<ConfigValue>,
    #[serde(default)]
    value_file: Option<PathBuf>,
    #[serde(default)]
    priority: Option<i64>,
}

/// An explicit `null` still counts as a supplied value
fn present_value<'de, D>(deserializer: D) -> Result<Option<ConfigValue>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    ConfigValue::deserialize(deserializer).map(Some)
}

/// Source backed by a patch-set document on disk
#[derive(Debug, Clone)]
pub struct PatchFile {
    path: PathBuf,
    name: String,
    fragments: Vec<PatchFragment>,
}

impl PatchFile {
    /// Read and parse a patch-set file.
    ///
    /// The source name comes from the document's `source` key, falling back
    /// to the file stem.
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let format = DocumentFormat::from_path(path)
            .ok_or_else(|| SourceError::UnsupportedFormat(path.to_path_buf()))?;
        let text = fs::read_to_string(path).map_err(|e| SourceError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Self::parse(path, format, &text, &stem)
    }

    /// Parse a patch-set document already in memory
    pub fn parse(
        path: &Path,
        format: DocumentFormat,
        text: &str,
        default_source: &str,
    ) -> Result<Self, SourceError> {
        let parse_error = |message: String| SourceError::Parse {
            path: path.to_path_buf(),
            message,
        };

        let document: PatchSetDocument = match format {
            DocumentFormat::Json => serde_json::from_str(text).map_err(|e| parse_error(e.to_string()))?,
            DocumentFormat::Yaml => serde_yaml::from_str(text).map_err(|e| parse_error(e.to_string()))?,
            DocumentFormat::Toml => toml::from_str(text).map_err(|e| parse_error(e.to_string()))?,
        };

        let name = document
            .source
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| default_source.to_string());

        let mut fragments = Vec::with_capacity(document.patches.len());
        for entry in document.patches {
            if entry.name.is_empty() {
                return Err(SourceError::EmptyName {
                    path: path.to_path_buf(),
                });
            }
            let value = match (entry.value, &entry.value_file) {
                (Some(_), Some(_)) => {
                    return Err(SourceError::AmbiguousValue {
                        path: path.to_path_buf(),
                        name: entry.name,
                    })
                }
                (None, Some(file)) => Some(load_value_file(path, &entry.name, file)?),
                (value, None) => value,
            };
            let payload = match (entry.op, value) {
                (PatchOp::Delete, _) => ConfigValue::Null,
                (_, Some(value)) => value,
                (op, None) => {
                    return Err(SourceError::MissingValue {
                        path: path.to_path_buf(),
                        name: entry.name,
                        op,
                    })
                }
            };
            fragments.push(
                PatchFragment::new(&name, entry.name, entry.op, entry.path)
                    .with_payload(payload)
                    .with_priority(entry.priority.unwrap_or(document.priority)),
            );
        }

        Ok(Self {
            path: path.to_path_buf(),
            name,
            fragments,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Load a referenced value document relative to the patch file
fn load_value_file(patch_path: &Path, name: &str, file: &Path) -> Result<ConfigValue, SourceError> {
    let full = patch_path.parent().unwrap_or_else(|| Path::new("")).join(file);
    let value_error = |message: String| SourceError::ValueFile {
        path: patch_path.to_path_buf(),
        name: name.to_string(),
        file: full.clone(),
        message,
    };

    let format = DocumentFormat::from_path(&full)
        .ok_or_else(|| value_error("expected a .json, .yaml, .yml or .toml file".to_string()))?;
    let text = fs::read_to_string(&full).map_err(|e| value_error(e.to_string()))?;
    parse_document(format, &text).map_err(|e| value_error(e.to_string()))
}

impl PatchSource for PatchFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn fragments(&self) -> Result<Vec<PatchFragment>, SourceError> {
        Ok(self.fragments.clone())
    }
}
