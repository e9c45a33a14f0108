//! Run configuration
//!
//! `recon.toml` is merged in three layers:
//! 1. Built-in defaults
//! 2. Project config (`recon.toml`)
//! 3. CLI flags

mod defaults;
mod effective;

pub use defaults::BuiltinDefaults;
pub use effective::{
    ArtifactEntry, ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig, RunConfig, SourceEntry,
};

/// Project config file looked up when none is given
pub const DEFAULT_CONFIG_FILE: &str = "recon.toml";
