//! `${NAME}` variable substitution
//!
//! Placeholders are only recognised inside string scalars. `$${NAME}`
//! escapes a placeholder and renders as the literal `${NAME}`. Substitution
//! is single pass: text coming from a variable is never re-scanned.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use recon_tree::{ConfigValue, TreePath};
use regex_lite::Regex;

use super::RenderError;

/// Per-run variables, keyed by placeholder name
pub type Variables = BTreeMap<String, String>;

const PLACEHOLDER_PATTERN: &str = r"\$(\$)?\{([A-Za-z_][A-Za-z0-9_.-]*)\}";

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(PLACEHOLDER_PATTERN).expect("placeholder pattern compiles"))
}

/// Why a string could not be substituted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceholderError {
    /// `${NAME}` with no value for NAME
    Unresolved(String),
    /// `${` that does not open a well-formed placeholder
    Malformed(String),
}

/// Substitute placeholders in one string.
///
/// Fails on the first variable without a value, and on any `${` left over
/// once escapes and well-formed placeholders are handled.
pub fn substitute_str(text: &str, variables: &Variables) -> Result<String, PlaceholderError> {
    let re = placeholder_re();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in re.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let name = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        check_literal(&text[last..whole.start()])?;
        out.push_str(&text[last..whole.start()]);
        if caps.get(1).is_some() {
            out.push_str(&whole.as_str()[1..]);
        } else {
            match variables.get(name) {
                Some(value) => out.push_str(value),
                None => return Err(PlaceholderError::Unresolved(name.to_string())),
            }
        }
        last = whole.end();
    }

    check_literal(&text[last..])?;
    out.push_str(&text[last..]);
    Ok(out)
}

/// Text between placeholders must not contain another `${`
fn check_literal(segment: &str) -> Result<(), PlaceholderError> {
    let Some(start) = segment.find("${") else {
        return Ok(());
    };
    let rest = &segment[start..];
    let end = rest.find('}').map(|i| i + 1).unwrap_or(rest.len());
    Err(PlaceholderError::Malformed(rest[..end].to_string()))
}

/// Copy of `value` with every string scalar substituted.
///
/// `at` is the position of `value` in the resolved tree, used to name the
/// offending leaf when a variable is missing.
pub fn substitute_tree(
    value: &ConfigValue,
    at: &TreePath,
    variables: &Variables,
) -> Result<ConfigValue, RenderError> {
    match value {
        ConfigValue::String(text) => substitute_str(text, variables)
            .map(ConfigValue::String)
            .map_err(|e| match e {
                PlaceholderError::Unresolved(variable) => RenderError::UnresolvedVariable {
                    path: at.clone(),
                    variable,
                },
                PlaceholderError::Malformed(text) => RenderError::MalformedPlaceholder {
                    path: at.clone(),
                    text,
                },
            }),
        ConfigValue::Sequence(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| substitute_tree(item, &at.index(i), variables))
            .collect::<Result<Vec<_>, _>>()
            .map(ConfigValue::Sequence),
        ConfigValue::Mapping(map) => {
            let mut out = recon_tree::ConfigMap::with_capacity(map.len());
            for (key, child) in map {
                out.insert(key.clone(), substitute_tree(child, &at.child(key.as_str()), variables)?);
            }
            Ok(ConfigValue::Mapping(out))
        }
        scalar => Ok(scalar.clone()),
    }
}
