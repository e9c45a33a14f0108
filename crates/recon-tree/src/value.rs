//! Configuration values
//!
//! `ConfigValue` is a tagged union of scalars, sequences and mappings.
//! Mappings keep insertion order so that rendered output is stable.

use indexmap::IndexMap;
use serde::de::{self, EnumAccess, MapAccess, SeqAccess, VariantAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::path::TreePath;

/// Insertion-ordered mapping of keys to values
pub type ConfigMap = IndexMap<String, ConfigValue>;

/// A node in a configuration tree
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ConfigValue {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Sequence(Vec<ConfigValue>),
    Mapping(ConfigMap),
}

impl ConfigValue {
    /// An empty mapping
    pub fn mapping() -> Self {
        ConfigValue::Mapping(ConfigMap::new())
    }

    /// Short type name used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigValue::Null => "null",
            ConfigValue::Bool(_) => "bool",
            ConfigValue::Integer(_) => "integer",
            ConfigValue::Float(_) => "float",
            ConfigValue::String(_) => "string",
            ConfigValue::Sequence(_) => "sequence",
            ConfigValue::Mapping(_) => "mapping",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ConfigValue::Null)
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self, ConfigValue::Mapping(_))
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, ConfigValue::Sequence(_))
    }

    /// True for anything that is neither a sequence nor a mapping
    pub fn is_scalar(&self) -> bool {
        !self.is_mapping() && !self.is_sequence()
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&ConfigMap> {
        match self {
            ConfigValue::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&Vec<ConfigValue>> {
        match self {
            ConfigValue::Sequence(s) => Some(s),
            _ => None,
        }
    }

    /// Child node by key (mappings) or index (sequences)
    pub fn child(&self, segment: &str) -> Option<&ConfigValue> {
        match self {
            ConfigValue::Mapping(m) => m.get(segment),
            ConfigValue::Sequence(s) => segment.parse::<usize>().ok().and_then(|i| s.get(i)),
            _ => None,
        }
    }

    /// Node at the given path, if every segment resolves
    pub fn get_path(&self, path: &TreePath) -> Option<&ConfigValue> {
        let mut current = self;
        for segment in path.segments() {
            current = current.child(segment)?;
        }
        Some(current)
    }

    /// Convenience lookup by dotted path
    pub fn get(&self, dotted: &str) -> Option<&ConfigValue> {
        let path = TreePath::parse(dotted).ok()?;
        self.get_path(&path)
    }

    /// All leaves under this node, in tree order.
    ///
    /// Scalars and empty containers are leaves; mappings and sequences are
    /// descended (sequence elements by index).
    pub fn leaves(&self) -> Vec<(TreePath, &ConfigValue)> {
        let mut out = Vec::new();
        collect_leaves(self, TreePath::root(), &mut out);
        out
    }
}

fn collect_leaves<'a>(value: &'a ConfigValue, path: TreePath, out: &mut Vec<(TreePath, &'a ConfigValue)>) {
    match value {
        ConfigValue::Mapping(map) if !map.is_empty() => {
            for (key, child) in map {
                collect_leaves(child, path.child(key.as_str()), out);
            }
        }
        ConfigValue::Sequence(items) if !items.is_empty() => {
            for (i, child) in items.iter().enumerate() {
                collect_leaves(child, path.index(i), out);
            }
        }
        _ => out.push((path, value)),
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        ConfigValue::String(s.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(s: String) -> Self {
        ConfigValue::String(s)
    }
}

impl From<i64> for ConfigValue {
    fn from(i: i64) -> Self {
        ConfigValue::Integer(i)
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> Self {
        ConfigValue::Bool(b)
    }
}

impl From<f64> for ConfigValue {
    fn from(f: f64) -> Self {
        ConfigValue::Float(f)
    }
}

impl From<Vec<ConfigValue>> for ConfigValue {
    fn from(items: Vec<ConfigValue>) -> Self {
        ConfigValue::Sequence(items)
    }
}

impl From<ConfigMap> for ConfigValue {
    fn from(map: ConfigMap) -> Self {
        ConfigValue::Mapping(map)
    }
}

impl From<serde_json::Value> for ConfigValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ConfigValue::Null,
            serde_json::Value::Bool(b) => ConfigValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => ConfigValue::Integer(i),
                None => n.as_f64().map(ConfigValue::Float).unwrap_or(ConfigValue::Null),
            },
            serde_json::Value::String(s) => ConfigValue::String(s),
            serde_json::Value::Array(items) => {
                ConfigValue::Sequence(items.into_iter().map(ConfigValue::from).collect())
            }
            serde_json::Value::Object(map) => ConfigValue::Mapping(
                map.into_iter().map(|(k, v)| (k, ConfigValue::from(v))).collect(),
            ),
        }
    }
}

impl Serialize for ConfigValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ConfigValue::Null => serializer.serialize_unit(),
            ConfigValue::Bool(b) => serializer.serialize_bool(*b),
            ConfigValue::Integer(i) => serializer.serialize_i64(*i),
            ConfigValue::Float(f) => serializer.serialize_f64(*f),
            ConfigValue::String(s) => serializer.serialize_str(s),
            ConfigValue::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            ConfigValue::Mapping(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for ConfigValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = ConfigValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a configuration value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<ConfigValue, E> {
        Ok(ConfigValue::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<ConfigValue, E> {
        Ok(ConfigValue::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<ConfigValue, D::Error> {
        ConfigValue::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<ConfigValue, E> {
        Ok(ConfigValue::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<ConfigValue, E> {
        Ok(ConfigValue::Integer(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<ConfigValue, E> {
        // Values past i64::MAX degrade to floats
        Ok(i64::try_from(v)
            .map(ConfigValue::Integer)
            .unwrap_or(ConfigValue::Float(v as f64)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<ConfigValue, E> {
        Ok(ConfigValue::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<ConfigValue, E> {
        Ok(ConfigValue::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<ConfigValue, E> {
        Ok(ConfigValue::String(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<ConfigValue, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(ConfigValue::Sequence(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<ConfigValue, A::Error> {
        let mut map = ConfigMap::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((MapKey(key), value)) = access.next_entry()? {
            if map.contains_key(&key) {
                return Err(de::Error::custom(format!("duplicate key '{}'", key)));
            }
            map.insert(key, value);
        }
        Ok(ConfigValue::Mapping(map))
    }

    /// YAML tags (`!reset []`) carry no meaning here; keep the tagged value
    fn visit_enum<A: EnumAccess<'de>>(self, data: A) -> Result<ConfigValue, A::Error> {
        let (_tag, variant): (String, _) = data.variant()?;
        variant.newtype_variant()
    }
}

/// Mapping key that accepts non-string scalars (YAML allows `1: x`)
struct MapKey(String);

impl<'de> Deserialize<'de> for MapKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeyVisitor;

        impl<'de> Visitor<'de> for KeyVisitor {
            type Value = MapKey;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a scalar mapping key")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<MapKey, E> {
                Ok(MapKey(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<MapKey, E> {
                Ok(MapKey(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<MapKey, E> {
                Ok(MapKey(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<MapKey, E> {
                Ok(MapKey(v.to_string()))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<MapKey, E> {
                Ok(MapKey(v.to_string()))
            }
        }

        deserializer.deserialize_any(KeyVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_roundtrip_preserves_key_order() {
        let text = r#"{"zeta":1,"alpha":{"b":true,"a":null}}"#;
        let value: ConfigValue = serde_json::from_str(text).unwrap();
        assert_eq!(serde_json::to_string(&value).unwrap(), text);
    }

    #[test]
    fn test_get_by_dotted_path() {
        let value = ConfigValue::from(json!({"services": {"web": {"ports": ["80:80", "443:443"]}}}));
        assert_eq!(value.get("services.web.ports.1").and_then(|v| v.as_str()), Some("443:443"));
        assert!(value.get("services.db").is_none());
        assert!(value.get("services.web.ports.x").is_none());
    }

    #[test]
    fn test_leaves_in_tree_order() {
        let value: ConfigValue =
            serde_json::from_str(r#"{"b":{"y":1,"x":[2,3]},"a":{},"c":[]}"#).unwrap();
        let paths: Vec<String> = value.leaves().iter().map(|(p, _)| p.to_string()).collect();
        assert_eq!(paths, ["b.y", "b.x.0", "b.x.1", "a", "c"]);
    }

    #[test]
    fn test_yaml_integer_keys_become_strings() {
        let value: ConfigValue = serde_yaml::from_str("1: one\ntrue: yes\n").unwrap();
        assert_eq!(value.get("1").and_then(|v| v.as_str()), Some("one"));
        assert!(value.get("true").is_some());
    }

    #[test]
    fn test_yaml_tags_keep_the_tagged_value() {
        let yaml = "ports: !reset []\nimage: !override shop/web:dev\nenv: !merge {DEBUG: \"1\"}\n";
        let value: ConfigValue = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(value.get("ports"), Some(&ConfigValue::Sequence(vec![])));
        assert_eq!(value.get("image"), Some(&ConfigValue::from("shop/web:dev")));
        assert_eq!(value.get("env.DEBUG"), Some(&ConfigValue::from("1")));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ConfigValue::Null.kind(), "null");
        assert_eq!(ConfigValue::from(vec![]).kind(), "sequence");
        assert_eq!(ConfigValue::mapping().kind(), "mapping");
        assert!(ConfigValue::from(1.5).is_scalar());
    }
}
