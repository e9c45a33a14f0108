//! Patch fragments
//!
//! A fragment is one named change (SET, MERGE, DELETE or APPEND) aimed at
//! a single tree path. Fragments are built once by their source and are
//! never mutated after registration.

use recon_tree::{ConfigValue, TreePath};
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// Operation a fragment performs at its target path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    /// Replace the node unconditionally
    Set,
    /// Recursively merge a mapping into the node
    Merge,
    /// Remove the node if present
    Delete,
    /// Append to a sequence node
    Append,
}

impl PatchOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchOp::Set => "SET",
            PatchOp::Merge => "MERGE",
            PatchOp::Delete => "DELETE",
            PatchOp::Append => "APPEND",
        }
    }
}

impl fmt::Display for PatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of a fragment: its source and its name within that source
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentId {
    pub source: String,
    pub name: String,
}

impl FragmentId {
    pub fn new(source: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.name)
    }
}

impl Serialize for FragmentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A fragment identity paired with its content digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FragmentDigest {
    pub id: FragmentId,
    pub digest: String,
}

/// An immutable unit of configuration change
#[derive(Debug, Clone, PartialEq)]
pub struct PatchFragment {
    source: String,
    name: String,
    target_path: TreePath,
    operation: PatchOp,
    payload: ConfigValue,
    priority: i64,
}

impl PatchFragment {
    /// Create a fragment with a null payload and priority 0
    pub fn new(
        source: impl Into<String>,
        name: impl Into<String>,
        operation: PatchOp,
        target_path: TreePath,
    ) -> Self {
        Self {
            source: source.into(),
            name: name.into(),
            target_path,
            operation,
            payload: ConfigValue::Null,
            priority: 0,
        }
    }

    /// Set the payload
    pub fn with_payload(mut self, payload: impl Into<ConfigValue>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_path(&self) -> &TreePath {
        &self.target_path
    }

    pub fn operation(&self) -> PatchOp {
        self.operation
    }

    pub fn payload(&self) -> &ConfigValue {
        &self.payload
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn id(&self) -> FragmentId {
        FragmentId::new(&self.source, &self.name)
    }

    /// Resolution order key: priority ascending, then source, then name
    pub fn order_key(&self) -> (i64, &str, &str) {
        (self.priority, &self.source, &self.name)
    }

    /// SHA-256 over the JCS form of every field.
    ///
    /// Stands in for a fragment version: any edit to the fragment changes it.
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        #[derive(Serialize)]
        struct Canonical<'a> {
            source: &'a str,
            name: &'a str,
            path: &'a [String],
            op: PatchOp,
            payload: &'a ConfigValue,
            priority: i64,
        }

        let jcs_bytes = serde_json_canonicalizer::to_vec(&Canonical {
            source: &self.source,
            name: &self.name,
            path: self.target_path.segments(),
            op: self.operation,
            payload: &self.payload,
            priority: self.priority,
        })?;

        let mut hasher = Sha256::new();
        hasher.update(&jcs_bytes);
        Ok(hex::encode(hasher.finalize()))
    }

    pub fn to_digest(&self) -> Result<FragmentDigest, serde_json::Error> {
        Ok(FragmentDigest {
            id: self.id(),
            digest: self.digest()?,
        })
    }
}
