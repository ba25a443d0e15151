//! In-Memory Reference Store (C8).
//!
//! A single-writer-serialized simulation of the backing store, implementing [`Backend`] directly
//! over process memory. All operations are funneled through one actor task (an `mpsc`-fed
//! command loop) so concurrent callers observe a total order consistent with arrival — the async
//! translation of the teacher's channel-fed worker pattern, generalized from a bucketed pool to a
//! single consumer because the spec requires linearizability, not just reduced contention.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::backend::{
    Backend, BatchGetItemRequest, BatchStatementError, BatchStatementRequest, BatchStatementResponse,
    DeleteItemRequest, GetItemRequest, PutItemRequest, QueryRequest, QueryResponse,
};
use crate::error::RowVaultError;
use crate::expr::VERSION_CONDITION_EXPRESSION;
use crate::row::PrimaryKey;
use crate::value::AttributeMap;

mod stmt;

type Partition = BTreeMap<String, AttributeMap>;

enum Command {
    Put {
        key: PrimaryKey,
        item: AttributeMap,
        require_absent: bool,
        require_version: Option<(String, String)>,
        reply: oneshot::Sender<Result<(), RowVaultError>>,
    },
    Get {
        key: PrimaryKey,
        reply: oneshot::Sender<Option<AttributeMap>>,
    },
    Delete {
        key: PrimaryKey,
        require_version: Option<(String, String)>,
        reply: oneshot::Sender<Result<(), RowVaultError>>,
    },
    BatchExecute {
        statements: Vec<String>,
        reply: oneshot::Sender<Vec<BatchStatementResponse>>,
    },
    Query {
        request: QueryRequest,
        reply: oneshot::Sender<Result<QueryResponse, RowVaultError>>,
    },
}

/// In-memory double for [`Backend`], suitable as a test fixture and as the reference
/// implementation the crate's own integration tests run against.
pub struct InMemoryStore {
    sender: mpsc::UnboundedSender<Command>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_actor(receiver));
        Self { sender }
    }
}

async fn run_actor(mut receiver: mpsc::UnboundedReceiver<Command>) {
    let mut data: HashMap<String, Partition> = HashMap::new();
    while let Some(cmd) = receiver.recv().await {
        match cmd {
            Command::Put {
                key,
                item,
                require_absent,
                require_version,
                reply,
            } => {
                let result = apply_put(&mut data, &key, item, require_absent, require_version);
                let _ = reply.send(result);
            }
            Command::Get { key, reply } => {
                let found = data
                    .get(&key.partition_key)
                    .and_then(|p| p.get(&key.sort_key))
                    .cloned();
                let _ = reply.send(found);
            }
            Command::Delete {
                key,
                require_version,
                reply,
            } => {
                let result = apply_delete(&mut data, &key, require_version);
                let _ = reply.send(result);
            }
            Command::BatchExecute { statements, reply } => {
                let responses = statements
                    .into_iter()
                    .map(|s| apply_statement(&mut data, &s))
                    .collect();
                let _ = reply.send(responses);
            }
            Command::Query { request, reply } => {
                let result = apply_query(&data, &request);
                let _ = reply.send(result);
            }
        }
    }
}

fn apply_put(
    data: &mut HashMap<String, Partition>,
    key: &PrimaryKey,
    item: AttributeMap,
    require_absent: bool,
    require_version: Option<(String, String)>,
) -> Result<(), RowVaultError> {
    let partition = data.entry(key.partition_key.clone()).or_default();
    let existing = partition.get(&key.sort_key);

    if require_absent && existing.is_some() {
        return Err(conditional_check_failed(key, "Row already exists."));
    }
    if let Some((version, create_date)) = require_version {
        match existing {
            None => return Err(conditional_check_failed(key, "Existing item does not exist.")),
            Some(existing_item) => {
                if !version_matches(existing_item, &version, &create_date) {
                    return Err(conditional_check_failed(key, "Trying to overwrite incorrect version."));
                }
            }
        }
    }
    partition.insert(key.sort_key.clone(), item);
    Ok(())
}

fn apply_delete(
    data: &mut HashMap<String, Partition>,
    key: &PrimaryKey,
    require_version: Option<(String, String)>,
) -> Result<(), RowVaultError> {
    if let Some((version, create_date)) = require_version {
        let existing = data.get(&key.partition_key).and_then(|p| p.get(&key.sort_key));
        match existing {
            None => return Err(conditional_check_failed(key, "Existing item does not exist.")),
            Some(existing_item) => {
                if !version_matches(existing_item, &version, &create_date) {
                    return Err(conditional_check_failed(key, "Trying to delete incorrect version."));
                }
            }
        }
    }
    if let Some(partition) = data.get_mut(&key.partition_key) {
        partition.remove(&key.sort_key);
    }
    Ok(())
}

fn version_matches(item: &AttributeMap, version: &str, create_date: &str) -> bool {
    let item_version = match item.get("rowVersion") {
        Some(crate::value::AttributeValue::N(n)) => n.as_str(),
        _ => return false,
    };
    let item_create_date = match item.get("createDate") {
        Some(crate::value::AttributeValue::S(s)) => s.as_str(),
        _ => return false,
    };
    item_version == version && item_create_date == create_date
}

fn conditional_check_failed(key: &PrimaryKey, message: &str) -> RowVaultError {
    RowVaultError::ConditionalCheckFailed {
        partition_key: key.partition_key.clone(),
        sort_key: key.sort_key.clone(),
        message: message.to_string(),
    }
}

fn apply_statement(data: &mut HashMap<String, Partition>, statement: &str) -> BatchStatementResponse {
    let result = stmt::apply(data, statement);
    match result {
        Ok(()) => BatchStatementResponse { error: None },
        Err(RowVaultError::ConditionalCheckFailed { message, .. }) => BatchStatementResponse {
            error: Some(BatchStatementError {
                code: "ConditionalCheckFailed".to_string(),
                message,
            }),
        },
        Err(other) => BatchStatementResponse {
            error: Some(BatchStatementError {
                code: "ExecutionError".to_string(),
                message: other.to_string(),
            }),
        },
    }
}

fn apply_query(data: &HashMap<String, Partition>, request: &QueryRequest) -> Result<QueryResponse, RowVaultError> {
    let Some(partition) = data.get(&request.partition_key) else {
        return Ok(QueryResponse {
            items: Vec::new(),
            next_token: None,
        });
    };

    let mut items: Vec<&AttributeMap> = partition
        .iter()
        .filter(|(sort_key, _)| match &request.sort_key_condition {
            Some(cond) => cond.matches(sort_key),
            None => true,
        })
        .map(|(_, item)| item)
        .collect();

    if !request.scan_forward {
        items.reverse();
    }

    let start_index = match &request.start_token {
        Some(token) => token
            .parse::<usize>()
            .expect("malformed pagination token passed to in-memory store"),
        None => 0,
    };
    let count = items.len();
    let end_index = match request.limit {
        Some(limit) => count.min(start_index.saturating_add(limit)),
        None => count,
    };
    let page: Vec<AttributeMap> = items
        .get(start_index..end_index)
        .unwrap_or(&[])
        .iter()
        .map(|&item| item.clone())
        .collect();
    let next_token = if end_index < count {
        Some(end_index.to_string())
    } else {
        None
    };

    Ok(QueryResponse {
        items: page,
        next_token,
    })
}

#[async_trait]
impl Backend for InMemoryStore {
    async fn put_item(&self, request: PutItemRequest) -> Result<(), RowVaultError> {
        let require_absent = request
            .condition_expression
            .as_deref()
            .is_some_and(|c| c.starts_with("attribute_not_exists("));
        let require_version = version_condition_bindings(&request.condition_expression, &request.expression_attribute_values);
        let (sender, receiver) = oneshot::channel();
        self.sender
            .send(Command::Put {
                key: request.key,
                item: request.item,
                require_absent,
                require_version,
                reply: sender,
            })
            .map_err(|_| RowVaultError::Transport("in-memory store actor is gone".to_string()))?;
        receiver
            .await
            .map_err(|_| RowVaultError::Transport("in-memory store reply dropped".to_string()))?
    }

    async fn get_item(&self, request: GetItemRequest) -> Result<Option<AttributeMap>, RowVaultError> {
        let (sender, receiver) = oneshot::channel();
        self.sender
            .send(Command::Get {
                key: request.key,
                reply: sender,
            })
            .map_err(|_| RowVaultError::Transport("in-memory store actor is gone".to_string()))?;
        receiver
            .await
            .map_err(|_| RowVaultError::Transport("in-memory store reply dropped".to_string()))
    }

    async fn batch_get_item(&self, request: BatchGetItemRequest) -> Result<Vec<AttributeMap>, RowVaultError> {
        let mut out = Vec::with_capacity(request.keys.len());
        for key in request.keys {
            if let Some(item) = self.get_item(GetItemRequest {
                table: request.table.clone(),
                key,
                consistent_read: true,
            })
            .await?
            {
                out.push(item);
            }
        }
        Ok(out)
    }

    async fn delete_item(&self, request: DeleteItemRequest) -> Result<(), RowVaultError> {
        let require_version = version_condition_bindings(&request.condition_expression, &request.expression_attribute_values);
        let (sender, receiver) = oneshot::channel();
        self.sender
            .send(Command::Delete {
                key: request.key,
                require_version,
                reply: sender,
            })
            .map_err(|_| RowVaultError::Transport("in-memory store actor is gone".to_string()))?;
        receiver
            .await
            .map_err(|_| RowVaultError::Transport("in-memory store reply dropped".to_string()))?
    }

    async fn batch_execute_statement(
        &self,
        statements: Vec<BatchStatementRequest>,
    ) -> Result<Vec<BatchStatementResponse>, RowVaultError> {
        let (sender, receiver) = oneshot::channel();
        self.sender
            .send(Command::BatchExecute {
                statements: statements.into_iter().map(|s| s.statement).collect(),
                reply: sender,
            })
            .map_err(|_| RowVaultError::Transport("in-memory store actor is gone".to_string()))?;
        receiver
            .await
            .map_err(|_| RowVaultError::Transport("in-memory store reply dropped".to_string()))
    }

    async fn query(&self, request: QueryRequest) -> Result<QueryResponse, RowVaultError> {
        let (sender, receiver) = oneshot::channel();
        self.sender
            .send(Command::Query {
                request,
                reply: sender,
            })
            .map_err(|_| RowVaultError::Transport("in-memory store actor is gone".to_string()))?;
        receiver
            .await
            .map_err(|_| RowVaultError::Transport("in-memory store reply dropped".to_string()))?
    }
}

fn version_condition_bindings(
    condition_expression: &Option<String>,
    values: &AttributeMap,
) -> Option<(String, String)> {
    if condition_expression.as_deref() != Some(VERSION_CONDITION_EXPRESSION) {
        return None;
    }
    let version = match values.get(":versionnumber") {
        Some(crate::value::AttributeValue::N(n)) => n.clone(),
        _ => return None,
    };
    let create_date = match values.get(":creationdate") {
        Some(crate::value::AttributeValue::S(s)) => s.clone(),
        _ => return None,
    };
    Some((version, create_date))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::KeyAttributeNames;
    use crate::row::Row;
    use crate::table::Table;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    struct Widget {
        name: String,
    }

    fn table() -> Table<InMemoryStore> {
        Table::new(
            Arc::new(InMemoryStore::new()),
            "widgets",
            KeyAttributeNames::new("PK", "SK"),
        )
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let t = table();
        let row = Row::new_for_insert(
            PrimaryKey::new("p1", "s1"),
            "widget",
            Widget { name: "foo".into() },
            Utc::now(),
        );
        t.insert(&row).await.unwrap();

        let registry = crate::read::TypeRegistry::new().register("widget", |item| {
            crate::table::item_to_row::<Widget>(item, &KeyAttributeNames::new("PK", "SK")).map(|r| r.payload)
        });
        let found = t.get(&row.key, &registry).await.unwrap();
        assert_eq!(found, Some(Widget { name: "foo".into() }));
    }

    #[tokio::test]
    async fn duplicate_insert_fails_conditional_check() {
        let t = table();
        let row = Row::new_for_insert(
            PrimaryKey::new("p1", "s1"),
            "widget",
            Widget { name: "foo".into() },
            Utc::now(),
        );
        t.insert(&row).await.unwrap();
        let err = t.insert(&row).await.unwrap_err();
        assert!(matches!(err, RowVaultError::ConditionalCheckFailed { .. }));
    }

    #[tokio::test]
    async fn update_with_stale_version_fails() {
        let t = table();
        let row = Row::new_for_insert(
            PrimaryKey::new("p1", "s1"),
            "widget",
            Widget { name: "foo".into() },
            Utc::now(),
        );
        t.insert(&row).await.unwrap();

        let next = row.with_next_version(Widget { name: "bar".into() }, Utc::now());
        t.update(&next, &row).await.unwrap();

        // retrying update against the now-stale `row` must fail
        let stale_next = row.with_next_version(Widget { name: "baz".into() }, Utc::now());
        let err = t.update(&stale_next, &row).await.unwrap_err();
        assert!(matches!(err, RowVaultError::ConditionalCheckFailed { .. }));
    }

    #[tokio::test]
    async fn delete_at_key_is_idempotent() {
        let t = table();
        let key = PrimaryKey::new("p1", "s1");
        t.delete_at_key(&key).await.unwrap();
        t.delete_at_key(&key).await.unwrap();
    }

    #[tokio::test]
    async fn query_begins_with_filters_and_sorts() {
        let t = table();
        for (sk, name) in [("ord#1", "a"), ("ord#2", "b"), ("cust#1", "c")] {
            let row = Row::new_for_insert(
                PrimaryKey::new("p1", sk),
                "widget",
                Widget { name: name.into() },
                Utc::now(),
            );
            t.insert(&row).await.unwrap();
        }
        let registry = crate::read::TypeRegistry::new().register("widget", |item| {
            crate::table::item_to_row::<Widget>(item, &KeyAttributeNames::new("PK", "SK")).map(|r| r.payload)
        });
        let (items, next) = t
            .query(
                "p1",
                Some(crate::table::SortKeyCondition::BeginsWith("ord#".into())),
                None,
                true,
                None,
                true,
                &registry,
            )
            .await
            .unwrap();
        assert_eq!(items, vec![Widget { name: "a".into() }, Widget { name: "b".into() }]);
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn query_pages_with_limit_and_token() {
        let t = table();
        for i in 0..5 {
            let row = Row::new_for_insert(
                PrimaryKey::new("p1", format!("s{i}")),
                "widget",
                Widget { name: format!("w{i}") },
                Utc::now(),
            );
            t.insert(&row).await.unwrap();
        }
        let registry = crate::read::TypeRegistry::new().register("widget", |item| {
            crate::table::item_to_row::<Widget>(item, &KeyAttributeNames::new("PK", "SK")).map(|r| r.payload)
        });

        let (page1, token1) = t
            .query("p1", None, Some(2), true, None, true, &registry)
            .await
            .unwrap();
        assert_eq!(page1.len(), 2);
        let token1 = token1.expect("more pages remain");

        let (page2, token2) = t
            .query("p1", None, Some(2), true, Some(token1), true, &registry)
            .await
            .unwrap();
        assert_eq!(page2.len(), 2);
        let token2 = token2.expect("one more page remains");

        let (page3, token3) = t
            .query("p1", None, Some(2), true, Some(token2), true, &registry)
            .await
            .unwrap();
        assert_eq!(page3.len(), 1);
        assert!(token3.is_none());
    }
}
