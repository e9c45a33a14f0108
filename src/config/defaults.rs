//! Built-in defaults (layer 1)

use recon_tree::{ConfigMap, ConfigValue};
use serde::{Deserialize, Serialize};

use crate::persist::DEFAULT_STATE_FILE;

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Output directory, relative to the project config (default: ".")
    pub output_dir: String,

    /// State file name inside the output directory
    pub state_file: String,

    /// How long to wait for the output lock (default: 30)
    pub lock_timeout_seconds: i64,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            output_dir: ".".to_string(),
            state_file: DEFAULT_STATE_FILE.to_string(),
            lock_timeout_seconds: 30,
        }
    }
}

impl BuiltinDefaults {
    /// Convert to a tree for merging
    pub fn to_value(&self) -> ConfigValue {
        let mut map = ConfigMap::new();
        map.insert("output_dir".into(), self.output_dir.clone().into());
        map.insert("state_file".into(), self.state_file.clone().into());
        map.insert("lock_timeout_seconds".into(), self.lock_timeout_seconds.into());
        map.insert("variables".into(), ConfigValue::mapping());
        map.insert("sources".into(), ConfigValue::Sequence(Vec::new()));
        ConfigValue::Mapping(map)
    }
}
