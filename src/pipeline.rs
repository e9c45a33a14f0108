//! Reconfiguration pipeline
//!
//! One run is a single synchronous pass:
//! - Load patch sources into a fresh registry (minus disabled sources)
//! - Load the base template
//! - Resolve the overlay
//! - Render every artifact in memory
//! - Fingerprint and write only what changed, under the output lock
//!
//! Nothing is persisted if any step before writing fails.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::config::{ConfigError, RunConfig};
use crate::fingerprint::{should_write, Fingerprint};
use crate::overlay::{resolve, OverlayError, ResolvedTree};
use crate::patch::{PatchFile, PatchRegistry, PatchSource, RegistryError, SourceError};
use crate::persist::{ArtifactWriter, LockError, OutputLock, PersistError};
use crate::render::{Artifact, ArtifactSpec, RenderError, Renderer, Variables};
use crate::template::{BaseTemplateStore, FileTemplateStore, StoreError};

/// Exit code for configuration problems the user can fix
pub const EXIT_USER_ERROR: i32 = 2;

/// Exit code for unexpected internal failures
pub const EXIT_INTERNAL_ERROR: i32 = 1;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("base template error: {0}")]
    Template(#[from] StoreError),

    #[error("patch source error: {0}")]
    Source(#[from] SourceError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("overlay error: {0}")]
    Overlay(#[from] OverlayError),

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("write error: {0}")]
    Persist(#[from] PersistError),

    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RunError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        let user_fixable = match self {
            RunError::Config(_) => true,
            RunError::Template(e) => !matches!(e, StoreError::Read { .. }),
            RunError::Source(e) => source_is_user_fixable(e),
            RunError::Registry(RegistryError::DuplicateName { .. }) => true,
            RunError::Registry(RegistryError::Source(e)) => source_is_user_fixable(e),
            RunError::Overlay(e) => !matches!(e, OverlayError::Digest { .. }),
            RunError::Render(e) => !matches!(e, RenderError::Serialize { .. }),
            RunError::Persist(_) | RunError::Lock(_) | RunError::Serialization(_) => false,
        };
        if user_fixable {
            EXIT_USER_ERROR
        } else {
            EXIT_INTERNAL_ERROR
        }
    }
}

fn source_is_user_fixable(e: &SourceError) -> bool {
    !matches!(e, SourceError::Read { .. })
}

/// Result type for pipeline operations
pub type RunResult<T> = Result<T, RunError>;

/// What happened to one artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Written,
    Unchanged,
    /// Dry run: the artifact would have been written
    WouldWrite,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactOutcome {
    pub path: String,
    pub format: String,
    pub fingerprint: Fingerprint,
    pub status: ArtifactStatus,
}

/// Summary of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub dry_run: bool,
    /// Registered sources, after disabling
    pub sources: Vec<String>,
    pub fragments_applied: usize,
    pub artifacts: Vec<ArtifactOutcome>,
}

impl RunReport {
    pub fn written(&self) -> usize {
        self.artifacts
            .iter()
            .filter(|a| a.status == ArtifactStatus::Written)
            .count()
    }
}

/// A configured reconfiguration run
pub struct Pipeline {
    store: Box<dyn BaseTemplateStore>,
    sources: Vec<Box<dyn PatchSource>>,
    disabled: BTreeSet<String>,
    specs: Vec<ArtifactSpec>,
    renderer: Renderer,
    writer: ArtifactWriter,
    lock_timeout: Duration,
}

impl Pipeline {
    const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(store: Box<dyn BaseTemplateStore>, writer: ArtifactWriter) -> Self {
        Self {
            store,
            sources: Vec::new(),
            disabled: BTreeSet::new(),
            specs: Vec::new(),
            renderer: Renderer::default(),
            writer,
            lock_timeout: Self::DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Build a pipeline from the effective run configuration.
    ///
    /// Patch files of enabled sources are read here.
    pub fn from_config(run: &RunConfig) -> RunResult<Self> {
        let writer = ArtifactWriter::new(&run.output_dir).with_state_file(&run.state_file);
        let mut pipeline = Self::new(Box::new(FileTemplateStore::new(&run.base)), writer)
            .with_variables(run.variables()?)
            .with_lock_timeout(run.lock_timeout());

        for spec in run.artifact_specs()? {
            pipeline = pipeline.with_artifact(spec);
        }
        for path in run.enabled_sources() {
            let file = PatchFile::open(path)?;
            tracing::debug!(source = file.name(), path = %path.display(), "loaded patch file");
            pipeline = pipeline.with_source(Box::new(file));
        }
        Ok(pipeline)
    }

    pub fn with_source(mut self, source: Box<dyn PatchSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_artifact(mut self, spec: ArtifactSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.renderer = Renderer::new(variables);
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Leave a source's fragments out of the run
    pub fn disable_source(mut self, name: impl Into<String>) -> Self {
        self.disabled.insert(name.into());
        self
    }

    /// Registry of every enabled source's fragments
    pub fn registry(&self) -> RunResult<PatchRegistry> {
        let mut registry = PatchRegistry::new();
        for source in &self.sources {
            let count = registry.register_source(source.as_ref())?;
            tracing::debug!(source = source.name(), fragments = count, "registered patch source");
        }

        for name in &self.disabled {
            let removed = registry.unregister_source(name);
            if removed == 0 {
                tracing::warn!(source = %name, "disabled source contributed no fragments");
            } else {
                tracing::info!(source = %name, fragments = removed, "disabled patch source");
            }
        }
        Ok(registry)
    }

    /// Resolve the overlay for the current sources
    pub fn resolve(&self) -> RunResult<ResolvedTree> {
        let registry = self.registry()?;
        let base = self.store.load_base_tree()?;
        let resolved = resolve(&base, registry.list_fragments())?;
        tracing::info!(
            fragments = resolved.applied().len(),
            claims = resolved.provenance().len(),
            "resolved overlay"
        );
        Ok(resolved)
    }

    /// Resolve, render and write what changed
    pub fn execute(&self, dry_run: bool) -> RunResult<RunReport> {
        let registry = self.registry()?;
        let sources = registry.sources().into_iter().map(String::from).collect();
        let base = self.store.load_base_tree()?;
        let resolved = resolve(&base, registry.list_fragments())?;

        let artifacts = self.renderer.render(&resolved, &self.specs)?;
        let fingerprinted = artifacts
            .into_iter()
            .map(|artifact| -> RunResult<(Artifact, Fingerprint)> {
                let fingerprint = Fingerprint::compute(&artifact, resolved.applied())?;
                Ok((artifact, fingerprint))
            })
            .collect::<RunResult<Vec<_>>>()?;

        let outcomes = if dry_run {
            self.plan_writes(&fingerprinted)?
        } else {
            self.write_all(&fingerprinted)?
        };

        Ok(RunReport {
            dry_run,
            sources,
            fragments_applied: resolved.applied().len(),
            artifacts: outcomes,
        })
    }

    fn plan_writes(&self, fingerprinted: &[(Artifact, Fingerprint)]) -> RunResult<Vec<ArtifactOutcome>> {
        let state = self.writer.load_state()?;
        fingerprinted
            .iter()
            .map(|(artifact, fingerprint)| -> RunResult<ArtifactOutcome> {
                let previous = self.writer.previous_fingerprint(&state, artifact)?;
                let status = if should_write(fingerprint, previous) {
                    ArtifactStatus::WouldWrite
                } else {
                    ArtifactStatus::Unchanged
                };
                Ok(outcome(artifact, fingerprint, status))
            })
            .collect()
    }

    fn write_all(&self, fingerprinted: &[(Artifact, Fingerprint)]) -> RunResult<Vec<ArtifactOutcome>> {
        let _lock = OutputLock::acquire(self.writer.output_dir(), self.lock_timeout)?;
        let mut state = self.writer.load_state()?;
        let mut outcomes = Vec::with_capacity(fingerprinted.len());
        let mut changed = false;

        for (artifact, fingerprint) in fingerprinted {
            let previous = self.writer.previous_fingerprint(&state, artifact)?.cloned();
            let status = if self.writer.write(artifact, fingerprint, previous.as_ref())? {
                state.record(artifact, fingerprint);
                changed = true;
                ArtifactStatus::Written
            } else {
                ArtifactStatus::Unchanged
            };
            outcomes.push(outcome(artifact, fingerprint, status));
        }

        // State goes last so a crash mid-run leaves the previous fingerprints
        if changed {
            self.writer.save_state(&state)?;
        }
        Ok(outcomes)
    }
}

fn outcome(artifact: &Artifact, fingerprint: &Fingerprint, status: ArtifactStatus) -> ArtifactOutcome {
    ArtifactOutcome {
        path: artifact.path.display().to_string(),
        format: artifact.format.to_string(),
        fingerprint: fingerprint.clone(),
        status,
    }
}
