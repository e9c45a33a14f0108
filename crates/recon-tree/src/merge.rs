//! Recursive tree merge
//!
//! Merge semantics:
//! - Mappings: deep-merge by key, existing keys keep their position
//! - Sequences: REPLACE (overlay wins entirely)
//! - Scalars: override (overlay wins)

use crate::value::ConfigValue;

/// Deep merge `overlay` onto `base`.
///
/// Keys present only in `base` are kept; keys supplied by `overlay` are
/// merged recursively when both sides are mappings and replaced otherwise.
/// Null in the overlay overrides any value.
pub fn deep_merge(base: ConfigValue, overlay: ConfigValue) -> ConfigValue {
    match (base, overlay) {
        (ConfigValue::Mapping(mut base_map), ConfigValue::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => {
                        let existing = std::mem::take(slot);
                        *slot = deep_merge(existing, overlay_value);
                    }
                    None => {
                        base_map.insert(key, overlay_value);
                    }
                }
            }
            ConfigValue::Mapping(base_map)
        }

        // Sequences are never concatenated here; APPEND is a separate operation
        (_, overlay) => overlay,
    }
}

/// Merge layers in order (first is base, last has highest precedence)
pub fn merge_layers(layers: Vec<ConfigValue>) -> ConfigValue {
    layers.into_iter().fold(ConfigValue::Null, deep_merge)
}
