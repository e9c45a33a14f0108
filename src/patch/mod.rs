//! Patch fragments, sources and the per-run registry

mod fragment;
mod registry;
mod source;

pub use fragment::{FragmentDigest, FragmentId, PatchFragment, PatchOp};
pub use registry::{PatchRegistry, RegistryError};
pub use source::{PatchFile, PatchSource, SourceError, StaticPatchSource};
