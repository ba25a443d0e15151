//! Expression Builder (C3): renders the textual statement grammar and condition expressions
//! consumed by the backend RPC.
//!
//! String literal escaping is deliberately not implemented: a payload containing `'` or `\` in a
//! string-valued attribute will produce a malformed statement. This matches the source design's
//! own unresolved ambiguity rather than inventing an escaping scheme (see SPEC_FULL.md §9); it is
//! a caller-facing constraint on every function in this module.

use crate::diff::AttributeDiff;
use crate::error::RowVaultError;
use crate::row::PrimaryKey;
use crate::value::{render_path, AttributeMap, AttributeValue};

/// Render a single value to its literal form. Returns `Ok(None)` for `Null` (absent from the
/// flattened map). Fails for the attribute types the diff/expression engine does not support.
pub fn render_value(value: &AttributeValue) -> Result<Option<String>, RowVaultError> {
    match value {
        AttributeValue::Null => Ok(None),
        AttributeValue::S(s) => Ok(Some(format!("'{s}'"))),
        AttributeValue::N(n) => Ok(Some(n.clone())),
        AttributeValue::Bool(b) => Ok(Some(b.to_string())),
        AttributeValue::L(items) => {
            let mut rendered = Vec::with_capacity(items.len());
            for item in items {
                // a Null inside a list renders as the literal `null`, since a list cannot have
                // "absent" elements the way a map can have absent keys.
                match render_value(item)? {
                    Some(v) => rendered.push(v),
                    None => rendered.push("null".to_string()),
                }
            }
            Ok(Some(format!("[{}]", rendered.join(", "))))
        }
        AttributeValue::M(map) => Ok(Some(render_map_literal(map)?)),
        AttributeValue::B(_) | AttributeValue::Ss(_) | AttributeValue::Ns(_) | AttributeValue::Bs(_) => {
            Err(RowVaultError::UnableToUpdate {
                reason: format!("attribute type {value:?} is not representable in an expression"),
            })
        }
    }
}

/// Render a map as a `{'k': v, ...}` literal. Keys iterate in sorted order (`AttributeMap` is a
/// `BTreeMap`), making the output deterministic.
fn render_map_literal(map: &AttributeMap) -> Result<String, RowVaultError> {
    let mut parts = Vec::with_capacity(map.len());
    for (k, v) in map {
        if let Some(rendered) = render_value(v)? {
            parts.push(format!("'{k}': {rendered}"));
        }
    }
    Ok(format!("{{{}}}", parts.join(", ")))
}

/// Render a full item as the `value <...>` clause of an `INSERT` statement.
pub fn render_insert_value(item: &AttributeMap) -> Result<String, RowVaultError> {
    render_map_literal(item)
}

/// `INSERT INTO "<table>" value <item>`
pub fn build_insert_statement(table: &str, item: &AttributeMap) -> Result<String, RowVaultError> {
    Ok(format!("INSERT INTO \"{table}\" value {}", render_insert_value(item)?))
}

/// One `SET`/`REMOVE`/`SET ... list_append` clause for an `UPDATE` statement.
fn render_clause(edit: &AttributeDiff) -> String {
    match edit {
        AttributeDiff::Update { path, rendered } => {
            format!("SET \"{}\"={}", render_path(path), rendered)
        }
        AttributeDiff::Remove { path } => format!("REMOVE \"{}\"", render_path(path)),
        AttributeDiff::ListAppend { path, rendered_list } => {
            let p = render_path(path);
            format!("SET \"{p}\"=list_append({p},{rendered_list})")
        }
    }
}

/// `UPDATE "<table>" <clauses> WHERE <pk>='<v>' AND <sk>='<v>' AND rowVersion=<n>`
pub fn build_update_statement(
    table: &str,
    key_attrs: &KeyAttributeNames,
    key: &PrimaryKey,
    row_version: u64,
    edits: &[AttributeDiff],
) -> String {
    let clauses = edits
        .iter()
        .map(render_clause)
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "UPDATE \"{table}\" {clauses} WHERE {}='{}' AND {}='{}' AND rowVersion={row_version}",
        key_attrs.partition_key, key.partition_key, key_attrs.sort_key, key.sort_key
    )
}

/// `DELETE FROM "<table>" WHERE <pk>='<v>' AND <sk>='<v>'`
pub fn build_delete_by_key_statement(table: &str, key_attrs: &KeyAttributeNames, key: &PrimaryKey) -> String {
    format!(
        "DELETE FROM \"{table}\" WHERE {}='{}' AND {}='{}'",
        key_attrs.partition_key, key.partition_key, key_attrs.sort_key, key.sort_key
    )
}

/// `DELETE FROM "<table>" WHERE <pk>='<v>' AND <sk>='<v>' AND rowVersion=<n>`
pub fn build_delete_by_item_statement(
    table: &str,
    key_attrs: &KeyAttributeNames,
    key: &PrimaryKey,
    row_version: u64,
) -> String {
    format!(
        "{} AND rowVersion={row_version}",
        build_delete_by_key_statement(table, key_attrs, key)
    )
}

/// The two key attribute names for a table's schema (e.g. `"PK"` / `"SK"`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyAttributeNames {
    pub partition_key: String,
    pub sort_key: String,
}

impl KeyAttributeNames {
    pub fn new(partition_key: impl Into<String>, sort_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            sort_key: sort_key.into(),
        }
    }

    /// `attribute_not_exists(#pk) AND attribute_not_exists(#sk)` condition for `insert`.
    pub fn insert_condition_expression(&self) -> String {
        format!(
            "attribute_not_exists(#{pk}) AND attribute_not_exists(#{sk})",
            pk = self.partition_key,
            sk = self.sort_key,
        )
    }
}

/// `#rowversion = :versionnumber AND #createdate = :creationdate` condition for `update` and
/// `delete_item`.
pub const VERSION_CONDITION_EXPRESSION: &str = "#rowversion = :versionnumber AND #createdate = :creationdate";
