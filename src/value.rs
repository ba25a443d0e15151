//! Tagged-union attribute value model (C1).
//!
//! Diff and expression rendering only operate on `S`, `N`, `Bool`, `Null`, `L`, `M`; the remaining
//! variants round-trip through reads but cannot participate in a diff (see [`AttributeDiff`](crate::diff::AttributeDiff)).

use std::collections::BTreeMap;

/// A single stored attribute value.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    /// UTF-8 string.
    S(String),
    /// Decimal numeric literal, stored as its source text (no float round-tripping).
    N(String),
    Bool(bool),
    Null,
    L(Vec<AttributeValue>),
    M(AttributeMap),
    /// Raw bytes. Not supported by the diff engine.
    B(Vec<u8>),
    /// String set. Not supported by the diff engine.
    Ss(Vec<String>),
    /// Number set. Not supported by the diff engine.
    Ns(Vec<String>),
    /// Binary set. Not supported by the diff engine.
    Bs(Vec<Vec<u8>>),
}

/// An item's attribute map. Sorted for deterministic iteration (diff output, statement rendering).
pub type AttributeMap = BTreeMap<String, AttributeValue>;

impl AttributeValue {
    /// True for the five variants the diff/expression engine understands.
    pub fn is_diffable(&self) -> bool {
        matches!(
            self,
            AttributeValue::S(_)
                | AttributeValue::N(_)
                | AttributeValue::Bool(_)
                | AttributeValue::Null
                | AttributeValue::L(_)
                | AttributeValue::M(_)
        )
    }
}

/// One segment of an attribute path: a map key or a list index.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A path rooted at the top of an item, e.g. `a.b[3].c` → `[Key("a"), Key("b"), Index(3), Key("c")]`.
pub type AttributePath = Vec<PathSegment>;

/// Render a path to its dotted/bracketed textual form.
pub fn render_path(path: &[PathSegment]) -> String {
    let mut out = String::new();
    for (i, seg) in path.iter().enumerate() {
        match seg {
            PathSegment::Key(k) => {
                if i > 0 {
                    out.push('.');
                }
                out.push_str(k);
            }
            PathSegment::Index(idx) => {
                out.push('[');
                out.push_str(&idx.to_string());
                out.push(']');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_renders_dotted_and_bracketed() {
        let path = vec![
            PathSegment::Key("a".into()),
            PathSegment::Key("b".into()),
            PathSegment::Index(3),
            PathSegment::Key("c".into()),
        ];
        assert_eq!(render_path(&path), "a.b[3].c");
    }

    #[test]
    fn root_key_has_no_leading_dot() {
        let path = vec![PathSegment::Key("x".into())];
        assert_eq!(render_path(&path), "x");
    }

    #[test]
    fn diffable_variants() {
        assert!(AttributeValue::S("x".into()).is_diffable());
        assert!(AttributeValue::N("1".into()).is_diffable());
        assert!(AttributeValue::Bool(true).is_diffable());
        assert!(AttributeValue::Null.is_diffable());
        assert!(AttributeValue::L(vec![]).is_diffable());
        assert!(AttributeValue::M(AttributeMap::new()).is_diffable());
        assert!(!AttributeValue::B(vec![1, 2]).is_diffable());
        assert!(!AttributeValue::Ss(vec!["x".into()]).is_diffable());
        assert!(!AttributeValue::Ns(vec!["1".into()]).is_diffable());
        assert!(!AttributeValue::Bs(vec![vec![1]]).is_diffable());
    }
}
