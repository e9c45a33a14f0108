//! Test fixtures for reconfiguration runs
//!
//! `tests/fixtures/project` is a small compose project: a base template,
//! two enabled patch sources and one disabled source that conflicts with
//! the others when switched on. Tests work on a throwaway copy of it.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use recon_overlay::config::EffectiveConfig;
use recon_overlay::pipeline::{Pipeline, RunError};
use recon_overlay::ConfigValue;
use tempfile::TempDir;

/// Path to the pristine project fixture
pub fn project_fixture_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/project")
}

/// A writable copy of the project fixture
pub struct Project {
    dir: TempDir,
}

impl Project {
    pub fn copy() -> Self {
        let dir = TempDir::new().unwrap();
        copy_dir(&project_fixture_path(), dir.path());
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.root().join("recon.toml")
    }

    pub fn output_path(&self, relative: &str) -> PathBuf {
        self.root().join("env").join(relative)
    }

    pub fn read_output(&self, relative: &str) -> String {
        fs::read_to_string(self.output_path(relative)).unwrap()
    }

    pub fn write(&self, relative: &str, contents: &str) {
        let path = self.root().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    /// Rewrite the project config with `from` replaced by `to`
    pub fn edit_config(&self, from: &str, to: &str) {
        let text = fs::read_to_string(self.config_path()).unwrap();
        assert!(text.contains(from), "config has no '{}'", from);
        fs::write(self.config_path(), text.replace(from, to)).unwrap();
    }

    /// Pipeline for the project with optional CLI-layer overrides
    pub fn pipeline(&self, overrides: Option<ConfigValue>) -> Result<Pipeline, RunError> {
        let effective = EffectiveConfig::build(Some(self.config_path().as_path()), overrides)?;
        Pipeline::from_config(&effective.run)
    }
}

/// CLI-style override layer setting variables
pub fn variable_overrides(pairs: &[(&str, &str)]) -> ConfigValue {
    let variables: serde_json::Map<String, serde_json::Value> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
        .collect();
    ConfigValue::from(serde_json::json!({ "variables": variables }))
}

fn copy_dir(from: &Path, to: &Path) {
    fs::create_dir_all(to).unwrap();
    for entry in fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&entry.path(), &target);
        } else {
            fs::copy(entry.path(), target).unwrap();
        }
    }
}
