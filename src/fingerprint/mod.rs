//! Change detection
//!
//! A fingerprint summarises everything an artifact was derived from: its
//! output path and format, the resolved subtree, the rendered content hash
//! and the digests of the fragments applied in the run. Two renders with the
//! same fingerprint would write the same file, so the second write can be
//! skipped.

use std::fmt;
use std::path::Path;

use recon_tree::ConfigValue;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::patch::FragmentDigest;
use crate::render::{Artifact, ArtifactFormat};

/// Hex SHA-256 over the canonical form of an artifact's inputs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

#[derive(Serialize)]
struct FingerprintInput<'a> {
    path: String,
    format: ArtifactFormat,
    tree: &'a ConfigValue,
    content_hash: &'a str,
    fragments: &'a [FragmentDigest],
}

impl Fingerprint {
    /// Fingerprint a rendered artifact against the fragments that produced it
    pub fn compute(artifact: &Artifact, fragments: &[FragmentDigest]) -> Result<Self, serde_json::Error> {
        let input = FingerprintInput {
            path: portable_path(&artifact.path),
            format: artifact.format,
            tree: &artifact.tree,
            content_hash: &artifact.content_hash,
            fragments,
        };

        // JCS keeps the hash independent of field order and whitespace
        let jcs_bytes = serde_json_canonicalizer::to_vec(&input)?;
        let mut hasher = Sha256::new();
        hasher.update(&jcs_bytes);
        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// Wrap a previously stored fingerprint
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// True when the artifact must be (re)written
pub fn should_write(new: &Fingerprint, previous: Option<&Fingerprint>) -> bool {
    previous != Some(new)
}

fn portable_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
