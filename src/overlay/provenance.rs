//! Resolved trees and per-leaf provenance

use std::collections::BTreeMap;

use recon_tree::{ConfigValue, TreePath};
use serde::Serialize;

use crate::patch::{FragmentDigest, FragmentId};

/// The overlay result: the merged tree plus who wrote what
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTree {
    tree: ConfigValue,
    provenance: BTreeMap<TreePath, FragmentId>,
    applied: Vec<FragmentDigest>,
}

/// One leaf of the resolved tree and the fragment that last wrote it
#[derive(Debug, Clone, Serialize)]
pub struct Claim<'a> {
    pub path: TreePath,
    pub value: &'a ConfigValue,
    /// None when the value comes straight from the base template
    pub fragment: Option<&'a FragmentId>,
}

impl ResolvedTree {
    pub(crate) fn new(
        tree: ConfigValue,
        provenance: BTreeMap<TreePath, FragmentId>,
        applied: Vec<FragmentDigest>,
    ) -> Self {
        Self {
            tree,
            provenance,
            applied,
        }
    }

    pub fn tree(&self) -> &ConfigValue {
        &self.tree
    }

    /// Node at `path` in the resolved tree
    pub fn subtree(&self, path: &TreePath) -> Option<&ConfigValue> {
        self.tree.get_path(path)
    }

    /// Fragment that last wrote the leaf at `path`
    pub fn origin(&self, path: &TreePath) -> Option<&FragmentId> {
        self.provenance.get(path)
    }

    pub fn provenance(&self) -> &BTreeMap<TreePath, FragmentId> {
        &self.provenance
    }

    /// Applied fragments with their digests, in application order
    pub fn applied(&self) -> &[FragmentDigest] {
        &self.applied
    }

    /// Every leaf of the tree, in tree order, with its provenance
    pub fn claims(&self) -> Vec<Claim<'_>> {
        self.tree
            .leaves()
            .into_iter()
            .map(|(path, value)| {
                let fragment = self.provenance.get(&path);
                Claim {
                    path,
                    value,
                    fragment,
                }
            })
            .collect()
    }

    /// Claims restricted to the subtree at `prefix`
    pub fn claims_under(&self, prefix: &TreePath) -> Vec<Claim<'_>> {
        self.claims()
            .into_iter()
            .filter(|c| c.path.starts_with(prefix))
            .collect()
    }
}
