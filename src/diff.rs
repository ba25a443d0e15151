//! Recursive structural diff engine (C4).
//!
//! Produces a minimal, path-scoped, deterministic list of edits between two attribute maps. Map
//! keys are iterated in sorted order (`AttributeMap` is a `BTreeMap`), which is this
//! implementation's resolution of an ambiguity left open by the source design: it makes the
//! rendered UPDATE statement reproducible across runs, at the cost of diverging from the source's
//! iteration-order behavior (see SPEC_FULL.md §9).

use crate::error::RowVaultError;
use crate::expr::render_value;
use crate::value::{AttributeMap, AttributeValue, PathSegment};

/// One edit produced by [`diff`]. `path` is rooted at the top of the item.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeDiff {
    /// Set the value at `path` to the rendered literal.
    Update { path: Vec<PathSegment>, rendered: String },
    /// Remove the attribute at `path` entirely.
    Remove { path: Vec<PathSegment> },
    /// Append the rendered list literal to the list at `path`.
    ListAppend { path: Vec<PathSegment>, rendered_list: String },
}

/// Compute the minimal edit list turning `existing` into `new`.
pub fn diff(new: &AttributeMap, existing: &AttributeMap) -> Result<Vec<AttributeDiff>, RowVaultError> {
    let mut out = Vec::new();
    diff_maps(new, existing, &[], &mut out)?;
    Ok(out)
}

fn diff_maps(
    new: &AttributeMap,
    existing: &AttributeMap,
    path: &[PathSegment],
    out: &mut Vec<AttributeDiff>,
) -> Result<(), RowVaultError> {
    let mut keys: Vec<&String> = new.keys().chain(existing.keys()).collect();
    keys.sort();
    keys.dedup();

    for key in keys {
        let child_path = extend(path, PathSegment::Key(key.clone()));
        match (new.get(key), existing.get(key)) {
            (Some(n), Some(e)) => diff_values(n, e, &child_path, out)?,
            (Some(n), None) => update_or_remove(n, &child_path, out)?,
            (None, Some(_)) => out.push(AttributeDiff::Remove { path: child_path }),
            (None, None) => unreachable!("key came from at least one of the two maps"),
        }
    }
    Ok(())
}

fn diff_values(
    new: &AttributeValue,
    existing: &AttributeValue,
    path: &[PathSegment],
    out: &mut Vec<AttributeDiff>,
) -> Result<(), RowVaultError> {
    match (new, existing) {
        (AttributeValue::Null, AttributeValue::Null) => Ok(()),
        (AttributeValue::M(n), AttributeValue::M(e)) => diff_maps(n, e, path, out),
        (AttributeValue::L(n), AttributeValue::L(e)) => diff_lists(n, e, path, out),
        (AttributeValue::S(n), AttributeValue::S(e)) if n == e => Ok(()),
        (AttributeValue::N(n), AttributeValue::N(e)) if n == e => Ok(()),
        (AttributeValue::Bool(n), AttributeValue::Bool(e)) if n == e => Ok(()),
        (AttributeValue::S(_), AttributeValue::S(_))
        | (AttributeValue::N(_), AttributeValue::N(_))
        | (AttributeValue::Bool(_), AttributeValue::Bool(_)) => update_or_remove(new, path, out),
        // type changed between new and existing: recompute from scratch
        _ => update_or_remove(new, path, out),
    }
}

fn diff_lists(
    new: &[AttributeValue],
    existing: &[AttributeValue],
    path: &[PathSegment],
    out: &mut Vec<AttributeDiff>,
) -> Result<(), RowVaultError> {
    let n = new.len().max(existing.len());
    let mut appended = false;
    for i in 0..n {
        let child_path = extend(path, PathSegment::Index(i));
        match (new.get(i), existing.get(i)) {
            (Some(nv), Some(ev)) => diff_values(nv, ev, &child_path, out)?,
            (None, Some(_)) => out.push(AttributeDiff::Remove { path: child_path }),
            (Some(_), None) => {
                if !appended {
                    let rendered_list = render_value(&AttributeValue::L(new[i..].to_vec()))?
                        .expect("list literal always renders to Some");
                    out.push(AttributeDiff::ListAppend {
                        path: path.to_vec(),
                        rendered_list,
                    });
                    appended = true;
                }
            }
            (None, None) => unreachable!("index came from at least one of the two lists"),
        }
    }
    Ok(())
}

/// Emit `Update` if `value` renders to a literal, `Remove` if it renders to absent (i.e. `Null`).
fn update_or_remove(
    value: &AttributeValue,
    path: &[PathSegment],
    out: &mut Vec<AttributeDiff>,
) -> Result<(), RowVaultError> {
    match render_value(value)? {
        Some(rendered) => out.push(AttributeDiff::Update {
            path: path.to_vec(),
            rendered,
        }),
        None => out.push(AttributeDiff::Remove { path: path.to_vec() }),
    }
    Ok(())
}

fn extend(path: &[PathSegment], seg: PathSegment) -> Vec<PathSegment> {
    let mut v = path.to_vec();
    v.push(seg);
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::AttributeMap;

    fn s(v: &str) -> AttributeValue {
        AttributeValue::S(v.to_string())
    }

    #[test]
    fn identical_items_produce_no_diff() {
        let mut m = AttributeMap::new();
        m.insert("a".into(), s("x"));
        assert_eq!(diff(&m, &m).unwrap(), vec![]);
    }

    #[test]
    fn scalar_change_emits_update() {
        let mut existing = AttributeMap::new();
        existing.insert("a".into(), s("x"));
        let mut new = AttributeMap::new();
        new.insert("a".into(), s("y"));

        let edits = diff(&new, &existing).unwrap();
        assert_eq!(
            edits,
            vec![AttributeDiff::Update {
                path: vec![PathSegment::Key("a".into())],
                rendered: "'y'".into(),
            }]
        );
    }

    #[test]
    fn removed_key_emits_remove() {
        let mut existing = AttributeMap::new();
        existing.insert("a".into(), s("x"));
        let new = AttributeMap::new();

        let edits = diff(&new, &existing).unwrap();
        assert_eq!(
            edits,
            vec![AttributeDiff::Remove {
                path: vec![PathSegment::Key("a".into())],
            }]
        );
    }

    #[test]
    fn new_key_with_null_value_emits_remove_not_update() {
        let existing = AttributeMap::new();
        let mut new = AttributeMap::new();
        new.insert("a".into(), AttributeValue::Null);

        let edits = diff(&new, &existing).unwrap();
        assert_eq!(
            edits,
            vec![AttributeDiff::Remove {
                path: vec![PathSegment::Key("a".into())],
            }]
        );
    }

    #[test]
    fn list_growth_emits_single_list_append() {
        let mut existing = AttributeMap::new();
        existing.insert("a".into(), AttributeValue::L(vec![s("x")]));
        let mut new = AttributeMap::new();
        new.insert(
            "a".into(),
            AttributeValue::L(vec![s("x"), s("y"), s("z")]),
        );

        let edits = diff(&new, &existing).unwrap();
        assert_eq!(
            edits,
            vec![AttributeDiff::ListAppend {
                path: vec![PathSegment::Key("a".into())],
                rendered_list: "['y', 'z']".into(),
            }]
        );
    }

    #[test]
    fn list_shrink_emits_removes_from_the_tail() {
        let mut existing = AttributeMap::new();
        existing.insert("a".into(), AttributeValue::L(vec![s("x"), s("y")]));
        let mut new = AttributeMap::new();
        new.insert("a".into(), AttributeValue::L(vec![s("x")]));

        let edits = diff(&new, &existing).unwrap();
        assert_eq!(
            edits,
            vec![AttributeDiff::Remove {
                path: vec![PathSegment::Key("a".into()), PathSegment::Index(1)],
            }]
        );
    }

    #[test]
    fn nested_map_diff_uses_dotted_path() {
        let mut inner_existing = AttributeMap::new();
        inner_existing.insert("c".into(), s("1"));
        let mut existing = AttributeMap::new();
        existing.insert("a".into(), AttributeValue::M(inner_existing));

        let mut inner_new = AttributeMap::new();
        inner_new.insert("c".into(), s("2"));
        let mut new = AttributeMap::new();
        new.insert("a".into(), AttributeValue::M(inner_new));

        let edits = diff(&new, &existing).unwrap();
        assert_eq!(
            edits,
            vec![AttributeDiff::Update {
                path: vec![PathSegment::Key("a".into()), PathSegment::Key("c".into())],
                rendered: "'2'".into(),
            }]
        );
    }

    #[test]
    fn unsupported_type_fails() {
        let existing = AttributeMap::new();
        let mut new = AttributeMap::new();
        new.insert("a".into(), AttributeValue::B(vec![1, 2, 3]));

        let err = diff(&new, &existing).unwrap_err();
        assert!(matches!(err, RowVaultError::UnableToUpdate { .. }));
    }

    #[test]
    fn keys_are_visited_in_sorted_order() {
        let mut existing = AttributeMap::new();
        let mut new = AttributeMap::new();
        for k in ["z", "a", "m"] {
            new.insert(k.into(), s("v"));
        }
        let edits = diff(&new, &existing).unwrap();
        let order: Vec<String> = edits
            .iter()
            .map(|e| match e {
                AttributeDiff::Update { path, .. } => render_path_key(path),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(order, vec!["a", "m", "z"]);
    }

    fn render_path_key(path: &[PathSegment]) -> String {
        match &path[0] {
            PathSegment::Key(k) => k.clone(),
            PathSegment::Index(_) => unreachable!(),
        }
    }
}
