//! Recon configuration tree model
//!
//! Defines the tagged-union value type shared by base templates, patch
//! payloads and resolved overlays, together with tree paths, recursive
//! merging and conversion from JSON, YAML and TOML documents.

pub mod convert;
pub mod merge;
pub mod path;
pub mod value;

pub use convert::{parse_document, DocumentFormat, TreeError};
pub use merge::{deep_merge, merge_layers};
pub use path::{PathError, TreePath};
pub use value::{ConfigMap, ConfigValue};
