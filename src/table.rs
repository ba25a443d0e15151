//! Table Facade (C5): the public operations callers use to read and write rows.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::backend::{
    Backend, BatchGetItemRequest, DeleteItemRequest, GetItemRequest, PutItemRequest, QueryRequest,
};
use crate::bulk::{self, WriteEntry};
use crate::diff;
use crate::error::RowVaultError;
use crate::expr::{self, KeyAttributeNames, VERSION_CONDITION_EXPRESSION};
use crate::read::TypeRegistry;
use crate::row::{PrimaryKey, Row, RESERVED_ATTRIBUTE_NAMES};
use crate::value::AttributeMap;

/// A condition on the sort key for `query`.
#[derive(Clone, Debug, PartialEq)]
pub enum SortKeyCondition {
    Equals(String),
    LessThan(String),
    LessThanOrEqual(String),
    GreaterThan(String),
    GreaterThanOrEqual(String),
    /// Strict on both ends: `lo < sort_key < hi` (see SPEC_FULL.md §9).
    Between(String, String),
    BeginsWith(String),
}

impl SortKeyCondition {
    /// Evaluate this condition against a candidate sort key.
    pub fn matches(&self, sort_key: &str) -> bool {
        match self {
            SortKeyCondition::Equals(v) => sort_key == v,
            SortKeyCondition::LessThan(v) => sort_key < v.as_str(),
            SortKeyCondition::LessThanOrEqual(v) => sort_key <= v.as_str(),
            SortKeyCondition::GreaterThan(v) => sort_key > v.as_str(),
            SortKeyCondition::GreaterThanOrEqual(v) => sort_key >= v.as_str(),
            SortKeyCondition::Between(lo, hi) => sort_key > lo.as_str() && sort_key < hi.as_str(),
            SortKeyCondition::BeginsWith(prefix) => sort_key.starts_with(prefix.as_str()),
        }
    }
}

/// The public facade over a single table: delegates expression/diff rendering to C3/C4 and
/// dispatches through a [`Backend`].
pub struct Table<B: Backend> {
    backend: Arc<B>,
    table_name: String,
    key_attrs: KeyAttributeNames,
}

impl<B: Backend> Clone for Table<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            table_name: self.table_name.clone(),
            key_attrs: self.key_attrs.clone(),
        }
    }
}

impl<B: Backend> Table<B> {
    pub fn new(backend: Arc<B>, table_name: impl Into<String>, key_attrs: KeyAttributeNames) -> Self {
        Self {
            backend,
            table_name: table_name.into(),
            key_attrs,
        }
    }

    pub fn key_attrs(&self) -> &KeyAttributeNames {
        &self.key_attrs
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub(crate) fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Insert a new row. Fails with `ConditionalCheckFailed` if the key is already occupied.
    #[instrument(skip(self, row), fields(table = %self.table_name))]
    pub async fn insert<P: Serialize>(&self, row: &Row<P>) -> Result<(), RowVaultError> {
        let item = row_to_item(row, &self.key_attrs)?;
        debug!(key = ?row.key, "inserting row");
        self.backend
            .put_item(PutItemRequest {
                table: self.table_name.clone(),
                key: row.key.clone(),
                item,
                condition_expression: Some(self.key_attrs.insert_condition_expression()),
                expression_attribute_names: key_name_aliases(&self.key_attrs),
                expression_attribute_values: AttributeMap::new(),
            })
            .await
    }

    /// Replace a row unconditionally.
    #[instrument(skip(self, row), fields(table = %self.table_name))]
    pub async fn clobber<P: Serialize>(&self, row: &Row<P>) -> Result<(), RowVaultError> {
        let item = row_to_item(row, &self.key_attrs)?;
        self.backend
            .put_item(PutItemRequest {
                table: self.table_name.clone(),
                key: row.key.clone(),
                item,
                condition_expression: None,
                expression_attribute_names: BTreeMap::new(),
                expression_attribute_values: AttributeMap::new(),
            })
            .await
    }

    /// Replace `existing` with `new`, conditioned on `(row_version, create_date)` matching.
    #[instrument(skip(self, new, existing), fields(table = %self.table_name))]
    pub async fn update<P: Serialize>(&self, new: &Row<P>, existing: &Row<P>) -> Result<(), RowVaultError> {
        let item = row_to_item(new, &self.key_attrs)?;
        self.backend
            .put_item(PutItemRequest {
                table: self.table_name.clone(),
                key: new.key.clone(),
                item,
                condition_expression: Some(VERSION_CONDITION_EXPRESSION.to_string()),
                expression_attribute_names: version_name_aliases(),
                expression_attribute_values: version_value_bindings(existing),
            })
            .await
    }

    /// Fetch a single row, decoding it via `registry`. Returns `None` if absent.
    #[instrument(skip(self, registry), fields(table = %self.table_name))]
    pub async fn get<R>(
        &self,
        key: &PrimaryKey,
        registry: &TypeRegistry<R>,
    ) -> Result<Option<R>, RowVaultError> {
        let response = self
            .backend
            .get_item(GetItemRequest {
                table: self.table_name.clone(),
                key: key.clone(),
                consistent_read: true,
            })
            .await?;
        response
            .map(|item| decode_item(&item, registry))
            .transpose()
    }

    /// Fetch multiple rows by key in a single call. Keys that do not exist are omitted.
    pub async fn batch_get<R>(
        &self,
        keys: &[PrimaryKey],
        registry: &TypeRegistry<R>,
    ) -> Result<HashMap<PrimaryKey, R>, RowVaultError> {
        let items = self
            .backend
            .batch_get_item(BatchGetItemRequest {
                table: self.table_name.clone(),
                keys: keys.to_vec(),
            })
            .await?;
        let mut out = HashMap::with_capacity(items.len());
        for item in &items {
            let key = extract_key(item, &self.key_attrs)?;
            out.insert(key, decode_item(item, registry)?);
        }
        Ok(out)
    }

    /// Delete unconditionally. Idempotent.
    pub async fn delete_at_key(&self, key: &PrimaryKey) -> Result<(), RowVaultError> {
        self.backend
            .delete_item(DeleteItemRequest {
                table: self.table_name.clone(),
                key: key.clone(),
                condition_expression: None,
                expression_attribute_names: BTreeMap::new(),
                expression_attribute_values: AttributeMap::new(),
            })
            .await
    }

    /// Delete conditioned on `(row_version, create_date)` matching `existing`.
    pub async fn delete_item<P: Serialize>(&self, existing: &Row<P>) -> Result<(), RowVaultError> {
        self.backend
            .delete_item(DeleteItemRequest {
                table: self.table_name.clone(),
                key: existing.key.clone(),
                condition_expression: Some(VERSION_CONDITION_EXPRESSION.to_string()),
                expression_attribute_names: version_name_aliases(),
                expression_attribute_values: version_value_bindings(existing),
            })
            .await
    }

    /// Delete unconditionally at each key, via the Bulk-Write Coordinator (C6).
    pub async fn delete_items<P: Serialize + Send + Sync>(&self, keys: &[PrimaryKey]) -> Result<(), RowVaultError> {
        let entries = keys.iter().cloned().map(WriteEntry::DeleteAtKey).collect::<Vec<WriteEntry<P>>>();
        bulk::bulk_write(self, entries).await
    }

    /// Delete each row conditioned on its own `(row_version, create_date)`, via the Bulk-Write
    /// Coordinator (C6).
    pub async fn delete_items_existing<P: Serialize + Send + Sync + Clone>(
        &self,
        rows: &[Row<P>],
    ) -> Result<(), RowVaultError> {
        let entries = rows.iter().cloned().map(WriteEntry::DeleteItem).collect();
        bulk::bulk_write(self, entries).await
    }

    /// Query a partition, optionally filtered by `sort_key_condition`, with pagination.
    #[allow(clippy::too_many_arguments)]
    pub async fn query<R>(
        &self,
        partition_key: &str,
        sort_key_condition: Option<SortKeyCondition>,
        limit: Option<usize>,
        scan_forward: bool,
        start_token: Option<String>,
        consistent_read: bool,
        registry: &TypeRegistry<R>,
    ) -> Result<(Vec<R>, Option<String>), RowVaultError> {
        let response = self
            .backend
            .query(QueryRequest {
                table: self.table_name.clone(),
                partition_key: partition_key.to_string(),
                sort_key_condition,
                limit,
                scan_forward,
                start_token,
                consistent_read,
            })
            .await?;
        let items = response
            .items
            .iter()
            .map(|item| decode_item(item, registry))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((items, response.next_token))
    }

    /// Write a batch of heterogeneous entries (all carrying the same payload type `P`), chunked
    /// and dispatched by the Bulk-Write Coordinator (C6).
    pub async fn bulk_write<P: Serialize + Send + Sync>(
        &self,
        entries: Vec<WriteEntry<P>>,
    ) -> Result<(), RowVaultError> {
        bulk::bulk_write(self, entries).await
    }

    /// Same dispatch as [`Table::bulk_write`], offered as the statically-typed common-case entry
    /// point (no registry lookup is needed on the write path).
    pub async fn bulk_write_monomorphic<P: Serialize + Send + Sync>(
        &self,
        entries: Vec<WriteEntry<P>>,
    ) -> Result<(), RowVaultError> {
        bulk::bulk_write(self, entries).await
    }
}

pub(crate) fn key_name_aliases(key_attrs: &KeyAttributeNames) -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    m.insert(format!("#{}", key_attrs.partition_key), key_attrs.partition_key.clone());
    m.insert(format!("#{}", key_attrs.sort_key), key_attrs.sort_key.clone());
    m
}

fn version_name_aliases() -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    m.insert("#rowversion".to_string(), "rowVersion".to_string());
    m.insert("#createdate".to_string(), "createDate".to_string());
    m
}

fn version_value_bindings<P>(existing: &Row<P>) -> AttributeMap {
    let mut m = AttributeMap::new();
    m.insert(
        ":versionnumber".to_string(),
        crate::value::AttributeValue::N(existing.row_status.row_version.to_string()),
    );
    m.insert(
        ":creationdate".to_string(),
        crate::value::AttributeValue::S(format_timestamp(existing.create_date)),
    );
    m
}

fn key_item(key_attrs: &KeyAttributeNames, key: &PrimaryKey) -> AttributeMap {
    let mut m = AttributeMap::new();
    m.insert(
        key_attrs.partition_key.clone(),
        crate::value::AttributeValue::S(key.partition_key.clone()),
    );
    m.insert(
        key_attrs.sort_key.clone(),
        crate::value::AttributeValue::S(key.sort_key.clone()),
    );
    m
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, RowVaultError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RowVaultError::UnexpectedResponse {
            reason: format!("invalid timestamp {s:?}: {e}"),
        })
}

/// Flatten a row's envelope and payload into a single attribute map ready for the wire.
///
/// Fails if the payload's own fields collide with a reserved envelope name or a key attribute
/// name.
pub fn row_to_item<P: Serialize>(row: &Row<P>, key_attrs: &KeyAttributeNames) -> Result<AttributeMap, RowVaultError> {
    let mut item = key_item(key_attrs, &row.key);
    item.insert(
        "rowVersion".to_string(),
        crate::value::AttributeValue::N(row.row_status.row_version.to_string()),
    );
    item.insert(
        "createDate".to_string(),
        crate::value::AttributeValue::S(format_timestamp(row.create_date)),
    );
    item.insert(
        "lastUpdateDate".to_string(),
        crate::value::AttributeValue::S(format_timestamp(row.row_status.last_update_date)),
    );
    item.insert(
        "rowType".to_string(),
        crate::value::AttributeValue::S(row.row_type_tag.clone()),
    );

    let payload_json = serde_json::to_value(&row.payload).map_err(|e| RowVaultError::UnexpectedResponse {
        reason: format!("payload is not serializable to a JSON object: {e}"),
    })?;
    let serde_json::Value::Object(fields) = payload_json else {
        return Err(RowVaultError::UnexpectedResponse {
            reason: "payload must serialize to a JSON object".to_string(),
        });
    };
    for (k, v) in fields {
        if RESERVED_ATTRIBUTE_NAMES.contains(&k.as_str())
            || k == key_attrs.partition_key
            || k == key_attrs.sort_key
        {
            return Err(RowVaultError::UnexpectedResponse {
                reason: format!("payload field {k:?} collides with a reserved envelope attribute"),
            });
        }
        item.insert(k, json_to_attribute_value(&v)?);
    }
    Ok(item)
}

fn extract_key(item: &AttributeMap, key_attrs: &KeyAttributeNames) -> Result<PrimaryKey, RowVaultError> {
    let pk = expect_string(item, &key_attrs.partition_key)?;
    let sk = expect_string(item, &key_attrs.sort_key)?;
    Ok(PrimaryKey::new(pk, sk))
}

fn expect_string(item: &AttributeMap, attr: &str) -> Result<String, RowVaultError> {
    match item.get(attr) {
        Some(crate::value::AttributeValue::S(s)) => Ok(s.clone()),
        _ => Err(RowVaultError::UnexpectedResponse {
            reason: format!("missing or non-string attribute {attr:?}"),
        }),
    }
}

/// Reconstruct a typed `Row<P>` from a stored item (envelope fields + remaining payload fields).
pub fn item_to_row<P: DeserializeOwned>(
    item: &AttributeMap,
    key_attrs: &KeyAttributeNames,
) -> Result<Row<P>, RowVaultError> {
    let key = extract_key(item, key_attrs)?;
    let row_version = match item.get("rowVersion") {
        Some(crate::value::AttributeValue::N(n)) => n.parse::<u64>().map_err(|e| RowVaultError::UnexpectedResponse {
            reason: format!("invalid rowVersion {n:?}: {e}"),
        })?,
        _ => {
            return Err(RowVaultError::UnexpectedResponse {
                reason: "missing rowVersion".to_string(),
            })
        }
    };
    let create_date = parse_timestamp(&expect_string(item, "createDate")?)?;
    let last_update_date = parse_timestamp(&expect_string(item, "lastUpdateDate")?)?;
    let row_type_tag = expect_string(item, "rowType")?;

    let mut payload_fields = serde_json::Map::new();
    for (k, v) in item {
        if RESERVED_ATTRIBUTE_NAMES.contains(&k.as_str()) || k == &key_attrs.partition_key || k == &key_attrs.sort_key
        {
            continue;
        }
        payload_fields.insert(k.clone(), attribute_value_to_json(v)?);
    }
    let payload: P = serde_json::from_value(serde_json::Value::Object(payload_fields)).map_err(|e| {
        RowVaultError::UnexpectedResponse {
            reason: format!("payload does not match expected shape: {e}"),
        }
    })?;

    Ok(Row {
        key,
        create_date,
        row_status: crate::row::RowStatus {
            row_version,
            last_update_date,
        },
        row_type_tag,
        payload,
    })
}

/// Decode a stored item into `R` via `registry`, using the item's `rowType` tag.
pub fn decode_item<R>(item: &AttributeMap, registry: &TypeRegistry<R>) -> Result<R, RowVaultError> {
    let tag = expect_string(item, "rowType")?;
    registry.decode(&tag, item)
}

pub(crate) fn json_to_attribute_value(v: &serde_json::Value) -> Result<crate::value::AttributeValue, RowVaultError> {
    use crate::value::AttributeValue;
    Ok(match v {
        serde_json::Value::Null => AttributeValue::Null,
        serde_json::Value::Bool(b) => AttributeValue::Bool(*b),
        serde_json::Value::Number(n) => AttributeValue::N(n.to_string()),
        serde_json::Value::String(s) => AttributeValue::S(s.clone()),
        serde_json::Value::Array(items) => {
            AttributeValue::L(items.iter().map(json_to_attribute_value).collect::<Result<_, _>>()?)
        }
        serde_json::Value::Object(fields) => {
            let mut m = AttributeMap::new();
            for (k, v) in fields {
                m.insert(k.clone(), json_to_attribute_value(v)?);
            }
            AttributeValue::M(m)
        }
    })
}

pub(crate) fn attribute_value_to_json(v: &crate::value::AttributeValue) -> Result<serde_json::Value, RowVaultError> {
    use crate::value::AttributeValue;
    Ok(match v {
        AttributeValue::Null => serde_json::Value::Null,
        AttributeValue::Bool(b) => serde_json::Value::Bool(*b),
        AttributeValue::S(s) => serde_json::Value::String(s.clone()),
        AttributeValue::N(n) => serde_json::from_str(n).unwrap_or(serde_json::Value::String(n.clone())),
        AttributeValue::L(items) => {
            serde_json::Value::Array(items.iter().map(attribute_value_to_json).collect::<Result<_, _>>()?)
        }
        AttributeValue::M(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), attribute_value_to_json(v)?);
            }
            serde_json::Value::Object(out)
        }
        AttributeValue::B(bytes) => {
            serde_json::Value::Array(bytes.iter().map(|b| serde_json::Value::from(*b)).collect())
        }
        AttributeValue::Ss(set) => serde_json::Value::Array(set.iter().cloned().map(serde_json::Value::String).collect()),
        AttributeValue::Ns(set) => serde_json::Value::Array(
            set.iter()
                .map(|n| serde_json::from_str(n).unwrap_or(serde_json::Value::String(n.clone())))
                .collect(),
        ),
        AttributeValue::Bs(set) => serde_json::Value::Array(
            set.iter()
                .map(|bytes| serde_json::Value::Array(bytes.iter().map(|b| serde_json::Value::from(*b)).collect()))
                .collect(),
        ),
    })
}

/// Render the INSERT/UPDATE/DELETE statement text for a [`WriteEntry`] (used by C6).
pub(crate) fn render_entry_statement<P: Serialize>(
    table_name: &str,
    key_attrs: &KeyAttributeNames,
    entry: &WriteEntry<P>,
) -> Result<String, RowVaultError> {
    match entry {
        WriteEntry::Insert(row) => {
            let item = row_to_item(row, key_attrs)?;
            expr::build_insert_statement(table_name, &item)
        }
        WriteEntry::Update { new, existing } => {
            let new_item = row_to_item(new, key_attrs)?;
            let existing_item = row_to_item(existing, key_attrs)?;
            let edits = diff::diff(&new_item, &existing_item)?;
            Ok(expr::build_update_statement(
                table_name,
                key_attrs,
                &new.key,
                existing.row_status.row_version,
                &edits,
            ))
        }
        WriteEntry::DeleteAtKey(key) => Ok(expr::build_delete_by_key_statement(table_name, key_attrs, key)),
        WriteEntry::DeleteItem(existing) => Ok(expr::build_delete_by_item_statement(
            table_name,
            key_attrs,
            &existing.key,
            existing.row_status.row_version,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    struct Widget {
        name: String,
        count: i64,
    }

    fn key_attrs() -> KeyAttributeNames {
        KeyAttributeNames::new("PK", "SK")
    }

    #[test]
    fn row_to_item_round_trips_through_item_to_row() {
        let row = Row::new_for_insert(
            PrimaryKey::new("p1", "s1"),
            "widget",
            Widget {
                name: "foo".into(),
                count: 3,
            },
            Utc::now(),
        );
        let item = row_to_item(&row, &key_attrs()).unwrap();
        let restored: Row<Widget> = item_to_row(&item, &key_attrs()).unwrap();
        assert_eq!(restored.payload, row.payload);
        assert_eq!(restored.key, row.key);
        assert_eq!(restored.row_status.row_version, row.row_status.row_version);
    }

    #[test]
    fn reserved_field_collision_fails() {
        #[derive(Serialize)]
        struct Bad {
            #[serde(rename = "rowVersion")]
            row_version: i64,
        }
        let row = Row::new_for_insert(PrimaryKey::new("p1", "s1"), "bad", Bad { row_version: 99 }, Utc::now());
        assert!(row_to_item(&row, &key_attrs()).is_err());
    }

    #[test]
    fn sort_key_condition_between_is_strict() {
        let cond = SortKeyCondition::Between("a".into(), "c".into());
        assert!(!cond.matches("a"));
        assert!(cond.matches("b"));
        assert!(!cond.matches("c"));
    }

    #[test]
    fn sort_key_condition_begins_with() {
        let cond = SortKeyCondition::BeginsWith("ord#".into());
        assert!(cond.matches("ord#1"));
        assert!(!cond.matches("cust#1"));
    }
}
