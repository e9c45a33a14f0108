//! Artifact persistence
//!
//! Writes rendered artifacts into an output directory. Each file is written
//! atomically (temp file, then rename) and only when the change detector
//! says its fingerprint moved. Fingerprints of the last written artifacts
//! live in a state file next to them, which is always written last.

mod lock;

pub use lock::{LockError, OutputLock};

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::{should_write, Fingerprint};
use crate::render::{Artifact, ArtifactFormat};

/// Schema version for the state file
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "recon/state@1";

/// Default state file name inside the output directory
pub const DEFAULT_STATE_FILE: &str = ".recon-state.json";

/// Errors from artifact persistence
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid state file {path}: {message}")]
    State { path: PathBuf, message: String },

    #[error("artifact path {0} escapes the output directory")]
    UnsafePath(PathBuf),

    #[error("unsupported state file schema {found} (expected {expected})")]
    Schema { found: u32, expected: u32 },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> PersistError + '_ {
    move |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// What was last written for one artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub fingerprint: Fingerprint,
    pub content_hash: String,
    pub format: ArtifactFormat,
    pub written_at: DateTime<Utc>,
}

/// Fingerprints of the artifacts written by the last run (`.recon-state.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    pub schema_version: u32,
    pub schema_id: String,
    pub updated_at: DateTime<Utc>,
    /// Keyed by artifact path relative to the output directory
    #[serde(default)]
    pub artifacts: BTreeMap<String, ArtifactRecord>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            updated_at: Utc::now(),
            artifacts: BTreeMap::new(),
        }
    }
}

impl StateFile {
    pub fn fingerprint(&self, artifact_path: &Path) -> Option<&Fingerprint> {
        self.artifacts
            .get(&state_key(artifact_path))
            .map(|record| &record.fingerprint)
    }

    pub fn record(&mut self, artifact: &Artifact, fingerprint: &Fingerprint) {
        let now = Utc::now();
        self.artifacts.insert(
            state_key(&artifact.path),
            ArtifactRecord {
                fingerprint: fingerprint.clone(),
                content_hash: artifact.content_hash.clone(),
                format: artifact.format,
                written_at: now,
            },
        );
        self.updated_at = now;
    }
}

fn state_key(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Writes artifacts and the state file under one output directory
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    output_dir: PathBuf,
    state_file: PathBuf,
}

impl ArtifactWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        let state_file = output_dir.join(DEFAULT_STATE_FILE);
        Self {
            output_dir,
            state_file,
        }
    }

    /// Use a different state file name (relative to the output directory)
    pub fn with_state_file(mut self, name: impl AsRef<Path>) -> Self {
        self.state_file = self.output_dir.join(name);
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn state_path(&self) -> &Path {
        &self.state_file
    }

    /// Where `artifact` lands on disk
    pub fn target_path(&self, artifact: &Artifact) -> Result<PathBuf, PersistError> {
        let relative = &artifact.path;
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe || relative.as_os_str().is_empty() {
            return Err(PersistError::UnsafePath(relative.clone()));
        }
        Ok(self.output_dir.join(relative))
    }

    /// Load the state file; a missing file is an empty state
    pub fn load_state(&self) -> Result<StateFile, PersistError> {
        let text = match fs::read_to_string(&self.state_file) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StateFile::default()),
            Err(e) => return Err(io_error(&self.state_file)(e)),
        };

        let state: StateFile = serde_json::from_str(&text).map_err(|e| PersistError::State {
            path: self.state_file.clone(),
            message: e.to_string(),
        })?;
        if state.schema_version != SCHEMA_VERSION {
            return Err(PersistError::Schema {
                found: state.schema_version,
                expected: SCHEMA_VERSION,
            });
        }
        Ok(state)
    }

    /// Previous fingerprint for `artifact`, ignored when its file is gone
    pub fn previous_fingerprint<'s>(
        &self,
        state: &'s StateFile,
        artifact: &Artifact,
    ) -> Result<Option<&'s Fingerprint>, PersistError> {
        let on_disk = self.target_path(artifact)?.is_file();
        Ok(state.fingerprint(&artifact.path).filter(|_| on_disk))
    }

    /// Write `artifact` unless `previous` already matches `fingerprint`.
    ///
    /// Returns whether the file was written.
    pub fn write(
        &self,
        artifact: &Artifact,
        fingerprint: &Fingerprint,
        previous: Option<&Fingerprint>,
    ) -> Result<bool, PersistError> {
        if !should_write(fingerprint, previous) {
            tracing::debug!(artifact = %artifact.path.display(), "fingerprint unchanged, skipping");
            return Ok(false);
        }

        let target = self.target_path(artifact)?;
        write_atomic(&target, &artifact.content)?;
        tracing::info!(
            artifact = %target.display(),
            bytes = artifact.content.len(),
            fingerprint = %fingerprint,
            "wrote artifact"
        );
        Ok(true)
    }

    pub fn save_state(&self, state: &StateFile) -> Result<(), PersistError> {
        let mut json = serde_json::to_string_pretty(state).map_err(|e| PersistError::State {
            path: self.state_file.clone(),
            message: e.to_string(),
        })?;
        json.push('\n');
        write_atomic(&self.state_file, json.as_bytes())
    }
}

/// Write-then-rename within the target's directory
fn write_atomic(path: &Path, content: &[u8]) -> Result<(), PersistError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(io_error(parent))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, std::process::id()));

    fs::write(&temp_path, content).map_err(io_error(&temp_path))?;
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(io_error(path)(e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_tree::ConfigValue;
    use tempfile::TempDir;

    fn artifact(path: &str, content: &str) -> Artifact {
        Artifact {
            path: PathBuf::from(path),
            format: ArtifactFormat::Env,
            content: content.as_bytes().to_vec(),
            content_hash: crate::render::sha256_hex(content.as_bytes()),
            tree: ConfigValue::mapping(),
        }
    }

    #[test]
    fn test_write_then_skip() {
        let temp_dir = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(temp_dir.path());
        let a = artifact("env/.env", "A=1\n");
        let fp = Fingerprint::compute(&a, &[]).unwrap();

        assert!(writer.write(&a, &fp, None).unwrap());
        assert_eq!(fs::read_to_string(temp_dir.path().join("env/.env")).unwrap(), "A=1\n");
        assert!(!writer.write(&a, &fp, Some(&fp)).unwrap());
    }

    #[test]
    fn test_state_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(temp_dir.path());
        assert!(writer.load_state().unwrap().artifacts.is_empty());

        let a = artifact("compose.yaml", "x: 1\n");
        let fp = Fingerprint::compute(&a, &[]).unwrap();
        let mut state = StateFile::default();
        state.record(&a, &fp);
        writer.save_state(&state).unwrap();

        let loaded = writer.load_state().unwrap();
        assert_eq!(loaded.fingerprint(Path::new("compose.yaml")), Some(&fp));
        assert_eq!(loaded.schema_id, SCHEMA_ID);
    }

    #[test]
    fn test_previous_ignored_when_file_missing() {
        let temp_dir = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(temp_dir.path());
        let a = artifact("compose.yaml", "x: 1\n");
        let fp = Fingerprint::compute(&a, &[]).unwrap();
        let mut state = StateFile::default();
        state.record(&a, &fp);

        assert_eq!(writer.previous_fingerprint(&state, &a).unwrap(), None);

        writer.write(&a, &fp, None).unwrap();
        assert_eq!(writer.previous_fingerprint(&state, &a).unwrap(), Some(&fp));
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let temp_dir = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(temp_dir.path());
        let a = artifact("../outside.env", "A=1\n");
        let fp = Fingerprint::compute(&a, &[]).unwrap();

        assert!(matches!(writer.write(&a, &fp, None), Err(PersistError::UnsafePath(_))));
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let temp_dir = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(temp_dir.path());
        let a = artifact("a.env", "A=1\n");
        writer.write(&a, &Fingerprint::compute(&a, &[]).unwrap(), None).unwrap();

        let names: Vec<String> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, ["a.env"]);
    }

    #[test]
    fn test_unknown_schema_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(temp_dir.path());
        fs::write(
            writer.state_path(),
            r#"{"schema_version": 9, "schema_id": "recon/state@9", "updated_at": "2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(matches!(writer.load_state(), Err(PersistError::Schema { found: 9, .. })));
    }
}
