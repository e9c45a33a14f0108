//! Artifact rendering
//!
//! Turns a resolved tree into deployment artifacts. Each [`ArtifactSpec`]
//! picks a subtree and a format; string leaves have `${NAME}` placeholders
//! substituted from the run's variables. A spec may instead name a
//! replacement file, which stands in for the whole artifact byte for byte.
//! Every artifact is produced in memory, and rendering fails as a whole if
//! any one of them fails.

mod format;
mod substitute;

pub use substitute::{substitute_str, substitute_tree, PlaceholderError, Variables};

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use recon_tree::{ConfigValue, TreePath};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::overlay::ResolvedTree;

/// Output format of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    Json,
    Yaml,
    Toml,
    /// Flat `KEY=value` lines
    Env,
    /// Raw text, written without any serialization
    Verbatim,
}

impl ArtifactFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactFormat::Json => "json",
            ArtifactFormat::Yaml => "yaml",
            ArtifactFormat::Toml => "toml",
            ArtifactFormat::Env => "env",
            ArtifactFormat::Verbatim => "verbatim",
        }
    }

    /// Guess the format from an output file name.
    ///
    /// `.env` and dotenv-style names (`.env.local`, `app.env`) map to Env.
    pub fn from_path(path: &Path) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?;
        if file_name == ".env" || file_name.starts_with(".env.") {
            return Some(ArtifactFormat::Env);
        }
        match path.extension()?.to_str()? {
            "json" => Some(ArtifactFormat::Json),
            "yaml" | "yml" => Some(ArtifactFormat::Yaml),
            "toml" => Some(ArtifactFormat::Toml),
            "env" => Some(ArtifactFormat::Env),
            _ => None,
        }
    }
}

impl fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors for rendering
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("artifact {artifact}: path {path} does not exist in the resolved tree")]
    InvalidPath { artifact: PathBuf, path: TreePath },

    #[error("unresolved variable '{variable}' at {path}")]
    UnresolvedVariable { path: TreePath, variable: String },

    #[error("malformed placeholder '{text}' at {path}; use ${{NAME}}, or $${{NAME}} for a literal")]
    MalformedPlaceholder { path: TreePath, text: String },

    #[error("cannot render {path} as {format}: {reason}")]
    Unsupported {
        format: ArtifactFormat,
        path: TreePath,
        reason: String,
    },

    #[error("failed to serialize {format}: {message}")]
    Serialize { format: ArtifactFormat, message: String },

    #[error("artifact {artifact}: cannot read replacement file {file}: {message}")]
    ReplacementFile {
        artifact: PathBuf,
        file: PathBuf,
        message: String,
    },
}

/// Where an artifact's content comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    /// A subtree of the resolved tree
    Tree(TreePath),
    /// A user-maintained file replacing the rendered artifact entirely
    File(PathBuf),
}

/// What to render: which content, in which format, to which relative path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSpec {
    pub path: PathBuf,
    pub source: ArtifactSource,
    pub format: ArtifactFormat,
}

impl ArtifactSpec {
    pub fn new(path: impl Into<PathBuf>, tree: TreePath, format: ArtifactFormat) -> Self {
        Self {
            path: path.into(),
            source: ArtifactSource::Tree(tree),
            format,
        }
    }

    /// An artifact copied verbatim from `file`
    pub fn replacement(path: impl Into<PathBuf>, file: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            source: ArtifactSource::File(file.into()),
            format: ArtifactFormat::Verbatim,
        }
    }
}

/// A rendered artifact, not yet persisted
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub path: PathBuf,
    pub format: ArtifactFormat,
    pub content: Vec<u8>,
    /// Hex SHA-256 of `content`
    pub content_hash: String,
    /// Resolved subtree before substitution; null for replacement files
    pub tree: ConfigValue,
}

impl Artifact {
    /// Content as text, lossy for non-UTF-8 replacement files
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }
}

/// Renders resolved trees with a fixed set of variables
#[derive(Debug, Clone, Default)]
pub struct Renderer {
    variables: Variables,
}

impl Renderer {
    pub fn new(variables: Variables) -> Self {
        Self { variables }
    }

    /// Render every artifact, or none if any one fails
    pub fn render(&self, resolved: &ResolvedTree, specs: &[ArtifactSpec]) -> Result<Vec<Artifact>, RenderError> {
        specs.iter().map(|spec| self.render_one(resolved, spec)).collect()
    }

    pub fn render_one(&self, resolved: &ResolvedTree, spec: &ArtifactSpec) -> Result<Artifact, RenderError> {
        let (content, tree) = match &spec.source {
            ArtifactSource::Tree(at) => {
                let subtree = resolved.subtree(at).ok_or_else(|| RenderError::InvalidPath {
                    artifact: spec.path.clone(),
                    path: at.clone(),
                })?;
                let substituted = substitute_tree(subtree, at, &self.variables)?;
                let content = format::serialize(&substituted, at, spec.format)?;
                (content, subtree.clone())
            }
            ArtifactSource::File(file) => {
                let content = fs::read(file).map_err(|e| RenderError::ReplacementFile {
                    artifact: spec.path.clone(),
                    file: file.clone(),
                    message: e.to_string(),
                })?;
                (content, ConfigValue::Null)
            }
        };

        let content_hash = sha256_hex(&content);
        Ok(Artifact {
            path: spec.path.clone(),
            format: spec.format,
            content,
            content_hash,
            tree,
        })
    }
}

/// Convenience wrapper around [`Renderer::render`]
pub fn render(
    resolved: &ResolvedTree,
    specs: &[ArtifactSpec],
    variables: &Variables,
) -> Result<Vec<Artifact>, RenderError> {
    Renderer::new(variables.clone()).render(resolved, specs)
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
