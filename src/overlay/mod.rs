//! Overlay resolution
//!
//! Applies patch fragments onto a copy of the base tree in registry order:
//! - SET: replace the node; equal-priority SETs on one path conflict
//! - MERGE: deep-merge a payload into the node, last applied wins per leaf
//! - APPEND: extend a sequence node (created when missing)
//! - DELETE: remove the node, a no-op when it does not exist
//!
//! Every leaf written by a fragment is attributed to it, so the resolved
//! tree can explain where each value came from.

mod provenance;

pub use provenance::{Claim, ResolvedTree};

use std::collections::{BTreeMap, HashMap};

use recon_tree::{deep_merge, ConfigValue, TreePath};

use crate::patch::{FragmentId, PatchFragment, PatchOp};

/// Errors for overlay resolution
#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("invalid path {path} in fragment {fragment}: {reason}")]
    InvalidPath {
        path: TreePath,
        fragment: FragmentId,
        reason: String,
    },

    #[error("type mismatch at {path} in fragment {fragment}: {op} expects a {expected}, found {found}")]
    TypeMismatch {
        path: TreePath,
        fragment: FragmentId,
        op: PatchOp,
        expected: &'static str,
        found: &'static str,
    },

    #[error("conflicting SET on {path} at priority {priority}: {}", join_ids(.contending))]
    Conflict {
        path: TreePath,
        priority: i64,
        contending: Vec<FragmentId>,
    },

    #[error("base template must be a mapping, found {0}")]
    BaseNotMapping(&'static str),

    #[error("failed to digest fragment {fragment}: {message}")]
    Digest { fragment: FragmentId, message: String },
}

fn join_ids(ids: &[FragmentId]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}

/// Merge `fragments` onto a deep copy of `base`.
///
/// Fragments are applied sorted by (priority, source, name) whatever order
/// they are passed in.
pub fn resolve<'a, I>(base: &ConfigValue, fragments: I) -> Result<ResolvedTree, OverlayError>
where
    I: IntoIterator<Item = &'a PatchFragment>,
{
    let tree = match base {
        ConfigValue::Mapping(_) => base.clone(),
        ConfigValue::Null => ConfigValue::mapping(),
        other => return Err(OverlayError::BaseNotMapping(other.kind())),
    };

    let mut ordered: Vec<&PatchFragment> = fragments.into_iter().collect();
    ordered.sort_by(|a, b| a.order_key().cmp(&b.order_key()));

    let mut overlay = Overlay {
        tree,
        provenance: BTreeMap::new(),
        set_claims: HashMap::new(),
    };
    let mut applied = Vec::with_capacity(ordered.len());

    for fragment in ordered {
        overlay.apply(fragment)?;
        applied.push(fragment.to_digest().map_err(|e| OverlayError::Digest {
            fragment: fragment.id(),
            message: e.to_string(),
        })?);
    }

    Ok(ResolvedTree::new(overlay.tree, overlay.provenance, applied))
}

/// Working state for one resolution
struct Overlay {
    tree: ConfigValue,
    provenance: BTreeMap<TreePath, FragmentId>,
    /// Exact paths already SET in this resolution, with the claimant
    set_claims: HashMap<TreePath, (i64, FragmentId)>,
}

impl Overlay {
    fn apply(&mut self, fragment: &PatchFragment) -> Result<(), OverlayError> {
        let path = fragment.target_path();
        let id = fragment.id();

        match fragment.operation() {
            PatchOp::Set => {
                self.claim_set(fragment)?;
                if path.is_root() {
                    require_mapping(fragment, fragment.payload())?;
                }
                let slot = locate(&mut self.tree, path, &id)?;
                *slot = fragment.payload().clone();
                self.forget_under(path);
                self.record(path, fragment.payload(), &id);
            }
            PatchOp::Merge => {
                if path.is_root() {
                    require_mapping(fragment, fragment.payload())?;
                }
                let slot = locate(&mut self.tree, path, &id)?;
                let existing = std::mem::take(slot);
                *slot = deep_merge(existing, fragment.payload().clone());
                self.record(path, fragment.payload(), &id);
            }
            PatchOp::Append => {
                let slot = locate(&mut self.tree, path, &id)?;
                if slot.is_null() {
                    *slot = ConfigValue::Sequence(Vec::new());
                }
                let items = match slot {
                    ConfigValue::Sequence(items) => items,
                    other => {
                        return Err(OverlayError::TypeMismatch {
                            path: path.clone(),
                            fragment: id,
                            op: PatchOp::Append,
                            expected: "sequence",
                            found: other.kind(),
                        })
                    }
                };
                let start = items.len();
                let added: Vec<ConfigValue> = match fragment.payload() {
                    ConfigValue::Sequence(values) => values.clone(),
                    value => vec![value.clone()],
                };
                items.extend(added.iter().cloned());
                for (offset, value) in added.iter().enumerate() {
                    self.record(&path.index(start + offset), value, &id);
                }
            }
            PatchOp::Delete => {
                if path.is_root() {
                    return Err(OverlayError::InvalidPath {
                        path: path.clone(),
                        fragment: id,
                        reason: "the root cannot be deleted".to_string(),
                    });
                }
                if let Some(removed_index) = remove(&mut self.tree, path) {
                    self.forget_under(path);
                    if let Some(index) = removed_index {
                        self.shift_indices(&path.parent(), index);
                    }
                }
            }
        }

        self.prune(path);
        Ok(())
    }

    /// Enforce the SET precedence rule for an exact path
    fn claim_set(&mut self, fragment: &PatchFragment) -> Result<(), OverlayError> {
        let path = fragment.target_path();
        if let Some((prior_priority, prior_id)) = self.set_claims.get(path) {
            if fragment.priority() <= *prior_priority {
                return Err(OverlayError::Conflict {
                    path: path.clone(),
                    priority: fragment.priority(),
                    contending: vec![prior_id.clone(), fragment.id()],
                });
            }
        }
        self.set_claims
            .insert(path.clone(), (fragment.priority(), fragment.id()));
        Ok(())
    }

    /// Attribute every leaf of `value`, placed at `path`, to `id`
    fn record(&mut self, path: &TreePath, value: &ConfigValue, id: &FragmentId) {
        for (relative, _) in value.leaves() {
            self.provenance.insert(path.join(&relative), id.clone());
        }
    }

    /// Drop provenance for `path` and everything beneath it
    fn forget_under(&mut self, path: &TreePath) {
        self.provenance.retain(|p, _| !p.starts_with(path));
    }

    /// Drop entries around `path` that no longer name a leaf
    fn prune(&mut self, path: &TreePath) {
        let tree = &self.tree;
        self.provenance.retain(|p, _| {
            if !p.starts_with(path) && !path.starts_with(p) {
                return true;
            }
            tree.get_path(p).map(is_leaf).unwrap_or(false)
        });
    }

    /// Re-key provenance after element `removed` left the sequence at `seq_path`
    fn shift_indices(&mut self, seq_path: &TreePath, removed: usize) {
        let depth = seq_path.len();
        let affected: Vec<(TreePath, usize)> = self
            .provenance
            .keys()
            .filter(|p| p.starts_with(seq_path) && p.len() > depth)
            .filter_map(|p| {
                let index = p.segments()[depth].parse::<usize>().ok()?;
                (index > removed).then(|| (p.clone(), index))
            })
            .collect();

        let mut moved = Vec::with_capacity(affected.len());
        for (old, index) in affected {
            if let Some(id) = self.provenance.remove(&old) {
                let mut segments = old.segments().to_vec();
                segments[depth] = (index - 1).to_string();
                moved.push((TreePath::from_segments(segments), id));
            }
        }
        self.provenance.extend(moved);
    }
}

fn is_leaf(value: &ConfigValue) -> bool {
    match value {
        ConfigValue::Mapping(map) => map.is_empty(),
        ConfigValue::Sequence(items) => items.is_empty(),
        _ => true,
    }
}

fn require_mapping(fragment: &PatchFragment, payload: &ConfigValue) -> Result<(), OverlayError> {
    if payload.is_mapping() {
        return Ok(());
    }
    Err(OverlayError::TypeMismatch {
        path: TreePath::root(),
        fragment: fragment.id(),
        op: fragment.operation(),
        expected: "mapping",
        found: payload.kind(),
    })
}

/// Walk to the node at `path`, creating missing mappings along the way.
///
/// The final slot is created as null when absent. Null intermediates are
/// replaced by mappings; other scalars cannot be descended into.
fn locate<'t>(
    tree: &'t mut ConfigValue,
    path: &TreePath,
    id: &FragmentId,
) -> Result<&'t mut ConfigValue, OverlayError> {
    let segments = path.segments();
    let mut current = tree;

    for (depth, segment) in segments.iter().enumerate() {
        let is_last = depth + 1 == segments.len();
        current = match current {
            ConfigValue::Mapping(map) => {
                let slot = map.entry(segment.clone()).or_insert(ConfigValue::Null);
                if !is_last && slot.is_null() {
                    *slot = ConfigValue::mapping();
                }
                slot
            }
            ConfigValue::Sequence(items) => {
                let len = items.len();
                match segment.parse::<usize>() {
                    Ok(index) if index < len => &mut items[index],
                    _ => {
                        return Err(OverlayError::InvalidPath {
                            path: path.clone(),
                            fragment: id.clone(),
                            reason: format!(
                                "'{}' is not an index into the sequence at {} (length {})",
                                segment,
                                path.prefix(depth),
                                len
                            ),
                        })
                    }
                }
            }
            other => {
                return Err(OverlayError::InvalidPath {
                    path: path.clone(),
                    fragment: id.clone(),
                    reason: format!("cannot descend into {} at {}", other.kind(), path.prefix(depth)),
                })
            }
        };
    }

    Ok(current)
}

/// Remove the node at a non-root `path`.
///
/// Returns None when nothing was there, `Some(Some(i))` when element `i`
/// left a sequence, and `Some(None)` when a mapping entry was removed.
fn remove(tree: &mut ConfigValue, path: &TreePath) -> Option<Option<usize>> {
    let segments = path.segments();
    let (last, parents) = segments.split_last()?;

    let mut current = tree;
    for segment in parents {
        current = match current {
            ConfigValue::Mapping(map) => map.get_mut(segment)?,
            ConfigValue::Sequence(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    match current {
        ConfigValue::Mapping(map) => map.shift_remove(last).map(|_| None),
        ConfigValue::Sequence(items) => {
            let index = last.parse::<usize>().ok().filter(|i| *i < items.len())?;
            items.remove(index);
            Some(Some(index))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree(value: serde_json::Value) -> ConfigValue {
        ConfigValue::from(value)
    }

    fn frag(source: &str, name: &str, op: PatchOp, path: &str, payload: serde_json::Value, priority: i64) -> PatchFragment {
        PatchFragment::new(source, name, op, TreePath::parse(path).unwrap())
            .with_payload(ConfigValue::from(payload))
            .with_priority(priority)
    }

    #[test]
    fn test_set_and_merge_scenario() {
        let base = tree(json!({"services": {"web": {"image": "prod:1.0"}}}));
        let fragments = vec![
            frag("dev", "image", PatchOp::Set, "services.web.image", json!("dev:latest"), 10),
            frag("dev", "mounts", PatchOp::Merge, "services.web.volumes", json!(["./src:/app/src"]), 5),
        ];

        let resolved = resolve(&base, &fragments).unwrap();
        assert_eq!(
            resolved.tree(),
            &tree(json!({"services": {"web": {"image": "dev:latest", "volumes": ["./src:/app/src"]}}}))
        );
    }

    #[test]
    fn test_equal_priority_set_conflicts() {
        let base = tree(json!({"a": 1}));
        let fragments = vec![
            frag("one", "x", PatchOp::Set, "a", json!(2), 3),
            frag("two", "y", PatchOp::Set, "a", json!(3), 3),
        ];

        let err = resolve(&base, &fragments).unwrap_err();
        match err {
            OverlayError::Conflict { path, priority, contending } => {
                assert_eq!(path.to_string(), "a");
                assert_eq!(priority, 3);
                assert_eq!(contending, vec![FragmentId::new("one", "x"), FragmentId::new("two", "y")]);
            }
            other => panic!("expected conflict, got {other}"),
        }
    }

    #[test]
    fn test_higher_priority_set_wins_regardless_of_order() {
        let base = tree(json!({}));
        let high = frag("a", "high", PatchOp::Set, "k", json!("high"), 9);
        let low = frag("z", "low", PatchOp::Set, "k", json!("low"), 1);

        let forward = resolve(&base, [&high, &low]).unwrap();
        let backward = resolve(&base, [&low, &high]).unwrap();
        assert_eq!(forward.tree().get("k"), Some(&ConfigValue::from("high")));
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_set_creates_intermediates() {
        let resolved = resolve(
            &tree(json!({})),
            &[frag("dev", "x", PatchOp::Set, "a.b.c", json!(true), 0)],
        )
        .unwrap();
        assert_eq!(resolved.tree(), &tree(json!({"a": {"b": {"c": true}}})));
    }

    #[test]
    fn test_descend_into_scalar_is_invalid_path() {
        let err = resolve(
            &tree(json!({"a": "leaf"})),
            &[frag("dev", "x", PatchOp::Set, "a.b", json!(1), 0)],
        )
        .unwrap_err();
        assert!(matches!(err, OverlayError::InvalidPath { ref reason, .. } if reason.contains("string at a")));
    }

    #[test]
    fn test_null_intermediate_becomes_mapping() {
        let resolved = resolve(
            &tree(json!({"services": {"web": {"environment": null}}})),
            &[frag("dev", "debug", PatchOp::Set, "services.web.environment.DEBUG", json!("1"), 0)],
        )
        .unwrap();
        assert_eq!(
            resolved.tree().get("services.web.environment.DEBUG"),
            Some(&ConfigValue::from("1"))
        );
    }

    #[test]
    fn test_set_into_sequence_index() {
        let base = tree(json!({"ports": ["80:80", "443:443"]}));
        let ok = resolve(&base, &[frag("dev", "p", PatchOp::Set, "ports.1", json!("8443:443"), 0)]).unwrap();
        assert_eq!(ok.tree(), &tree(json!({"ports": ["80:80", "8443:443"]})));

        let err = resolve(&base, &[frag("dev", "p", PatchOp::Set, "ports.5", json!("x"), 0)]).unwrap_err();
        assert!(matches!(err, OverlayError::InvalidPath { .. }));
    }

    #[test]
    fn test_merge_disjoint_keys_commute() {
        let a = frag("s", "a", PatchOp::Merge, "", json!({"a": 1}), 0);
        let b = frag("s", "b", PatchOp::Merge, "", json!({"b": 2}), 0);
        let b_first = frag("s", "0b", PatchOp::Merge, "", json!({"b": 2}), 0);

        let one = resolve(&tree(json!({})), [&a, &b]).unwrap();
        let two = resolve(&tree(json!({})), [&b_first, &a]).unwrap();
        assert_eq!(one.tree(), &tree(json!({"a": 1, "b": 2})));
        assert_eq!(one.tree(), two.tree());
    }

    #[test]
    fn test_merge_never_conflicts() {
        let fragments = vec![
            frag("one", "x", PatchOp::Merge, "svc", json!({"debug": true}), 0),
            frag("two", "y", PatchOp::Merge, "svc", json!({"debug": false}), 0),
        ];
        let resolved = resolve(&tree(json!({})), &fragments).unwrap();
        assert_eq!(resolved.tree().get("svc.debug"), Some(&ConfigValue::Bool(false)));
    }

    #[test]
    fn test_append_to_sequence() {
        let base = tree(json!({"volumes": ["data:/data"]}));
        let fragments = vec![
            frag("dev", "src", PatchOp::Append, "volumes", json!(["./src:/app/src", "./lib:/app/lib"]), 0),
            frag("dev", "tmp", PatchOp::Append, "volumes", json!("/tmp:/tmp"), 1),
        ];
        let resolved = resolve(&base, &fragments).unwrap();
        assert_eq!(
            resolved.tree(),
            &tree(json!({"volumes": ["data:/data", "./src:/app/src", "./lib:/app/lib", "/tmp:/tmp"]}))
        );
        assert_eq!(resolved.origin(&TreePath::parse("volumes.3").unwrap()), Some(&FragmentId::new("dev", "tmp")));
        assert_eq!(resolved.origin(&TreePath::parse("volumes.0").unwrap()), None);
    }

    #[test]
    fn test_append_creates_missing_sequence() {
        let resolved = resolve(
            &tree(json!({"web": {}})),
            &[frag("dev", "v", PatchOp::Append, "web.volumes", json!(["./src:/src"]), 0)],
        )
        .unwrap();
        assert_eq!(resolved.tree(), &tree(json!({"web": {"volumes": ["./src:/src"]}})));
    }

    #[test]
    fn test_append_to_non_sequence_is_type_mismatch() {
        let err = resolve(
            &tree(json!({"web": {"volumes": "oops"}})),
            &[frag("dev", "v", PatchOp::Append, "web.volumes", json!("x"), 0)],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            OverlayError::TypeMismatch { expected: "sequence", found: "string", .. }
        ));
    }

    #[test]
    fn test_delete_missing_path_is_noop() {
        let base = tree(json!({"a": {"b": 1}, "s": "scalar"}));
        let fragments = vec![
            frag("dev", "x", PatchOp::Delete, "a.zzz", json!(null), 0),
            frag("dev", "y", PatchOp::Delete, "nope.deeper.still", json!(null), 0),
            frag("dev", "z", PatchOp::Delete, "s.inner", json!(null), 0),
        ];
        let resolved = resolve(&base, &fragments).unwrap();
        assert_eq!(resolved.tree(), &base);
    }

    #[test]
    fn test_delete_removes_and_keeps_order() {
        let base: ConfigValue = serde_json::from_str(r#"{"a":1,"cache":{"x":1},"z":2}"#).unwrap();
        let resolved = resolve(&base, &[frag("dev", "c", PatchOp::Delete, "cache", json!(null), 0)]).unwrap();
        assert_eq!(serde_json::to_string(resolved.tree()).unwrap(), r#"{"a":1,"z":2}"#);
    }

    #[test]
    fn test_delete_root_is_invalid() {
        let err = resolve(&tree(json!({})), &[frag("dev", "all", PatchOp::Delete, "", json!(null), 0)]).unwrap_err();
        assert!(matches!(err, OverlayError::InvalidPath { .. }));
    }

    #[test]
    fn test_set_root_requires_mapping() {
        let err = resolve(&tree(json!({})), &[frag("dev", "r", PatchOp::Set, "", json!([1]), 0)]).unwrap_err();
        assert!(matches!(err, OverlayError::TypeMismatch { expected: "mapping", .. }));
    }

    #[test]
    fn test_base_must_be_mapping() {
        let err = resolve(&tree(json!([1, 2])), std::iter::empty::<&PatchFragment>()).unwrap_err();
        assert!(matches!(err, OverlayError::BaseNotMapping("sequence")));
    }

    #[test]
    fn test_provenance_tracks_last_writer() {
        let base: ConfigValue =
            serde_json::from_str(r#"{"web":{"image":"prod","env":{"A":"1"}}}"#).unwrap();
        let fragments = vec![
            frag("mod", "env", PatchOp::Merge, "web.env", json!({"B": "2"}), 0),
            frag("user", "env", PatchOp::Merge, "web", json!({"env": {"B": "3"}}), 1),
            frag("user", "img", PatchOp::Set, "web.image", json!("dev"), 2),
        ];
        let resolved = resolve(&base, &fragments).unwrap();

        let origin = |p: &str| resolved.origin(&TreePath::parse(p).unwrap()).map(|id| id.to_string());
        assert_eq!(origin("web.env.A"), None);
        assert_eq!(origin("web.env.B").as_deref(), Some("user/env"));
        assert_eq!(origin("web.image").as_deref(), Some("user/img"));

        let claimed: Vec<String> = resolved
            .claims()
            .iter()
            .map(|c| format!("{}={}", c.path, c.fragment.map(|f| f.to_string()).unwrap_or_default()))
            .collect();
        assert_eq!(claimed, ["web.image=user/img", "web.env.A=", "web.env.B=user/env"]);
    }

    #[test]
    fn test_set_over_subtree_replaces_provenance() {
        let fragments = vec![
            frag("a", "deep", PatchOp::Merge, "svc", json!({"x": {"y": 1}}), 0),
            frag("b", "flat", PatchOp::Set, "svc.x", json!("gone"), 1),
        ];
        let resolved = resolve(&tree(json!({})), &fragments).unwrap();
        assert_eq!(resolved.provenance().len(), 1);
        assert_eq!(
            resolved.origin(&TreePath::parse("svc.x").unwrap()),
            Some(&FragmentId::new("b", "flat"))
        );
    }

    #[test]
    fn test_delete_from_sequence_shifts_provenance() {
        let fragments = vec![
            frag("a", "add", PatchOp::Append, "list", json!(["x", "y"]), 0),
            frag("b", "drop", PatchOp::Delete, "list.0", json!(null), 1),
        ];
        let resolved = resolve(&tree(json!({})), &fragments).unwrap();
        assert_eq!(resolved.tree(), &tree(json!({"list": ["y"]})));
        assert_eq!(
            resolved.origin(&TreePath::parse("list.0").unwrap()),
            Some(&FragmentId::new("a", "add"))
        );
        assert!(resolved.origin(&TreePath::parse("list.1").unwrap()).is_none());
    }

    #[test]
    fn test_applied_digests_in_order() {
        let fragments = vec![
            frag("b", "late", PatchOp::Set, "x", json!(1), 5),
            frag("a", "early", PatchOp::Set, "y", json!(1), 1),
        ];
        let resolved = resolve(&tree(json!({})), &fragments).unwrap();
        let ids: Vec<String> = resolved.applied().iter().map(|d| d.id.to_string()).collect();
        assert_eq!(ids, ["a/early", "b/late"]);
    }
}
