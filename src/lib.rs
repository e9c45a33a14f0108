//! Recon - development-mode overlay engine
//!
//! Reconfigures a templated container deployment for local development
//! without touching the template itself. Named patch fragments from several
//! sources are merged onto the base configuration tree, rendered into
//! deployment artifacts, and written only when their fingerprint changes.

pub mod config;
pub mod fingerprint;
pub mod overlay;
pub mod patch;
pub mod persist;
pub mod pipeline;
pub mod render;
pub mod template;

pub use fingerprint::{should_write, Fingerprint};
pub use overlay::{resolve, Claim, OverlayError, ResolvedTree};
pub use patch::{FragmentId, PatchFragment, PatchOp, PatchRegistry, PatchSource, RegistryError};
pub use pipeline::{Pipeline, RunError, RunReport};
pub use recon_tree::{ConfigValue, TreePath};
pub use render::{render, Artifact, ArtifactFormat, ArtifactSource, ArtifactSpec, RenderError, Renderer, Variables};
pub use template::{BaseTemplateStore, FileTemplateStore, StaticTemplateStore};
