//! The external RPC collaborator's shape (A4), expressed as an async trait so both a real wire
//! client and the in-memory reference store ([`crate::memory`]) satisfy it.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::RowVaultError;
use crate::row::PrimaryKey;
use crate::value::AttributeMap;

#[derive(Clone, Debug)]
pub struct PutItemRequest {
    pub table: String,
    pub key: PrimaryKey,
    pub item: AttributeMap,
    pub condition_expression: Option<String>,
    pub expression_attribute_names: BTreeMap<String, String>,
    pub expression_attribute_values: AttributeMap,
}

#[derive(Clone, Debug)]
pub struct GetItemRequest {
    pub table: String,
    pub key: PrimaryKey,
    pub consistent_read: bool,
}

#[derive(Clone, Debug)]
pub struct BatchGetItemRequest {
    pub table: String,
    pub keys: Vec<PrimaryKey>,
}

#[derive(Clone, Debug)]
pub struct DeleteItemRequest {
    pub table: String,
    pub key: PrimaryKey,
    pub condition_expression: Option<String>,
    pub expression_attribute_names: BTreeMap<String, String>,
    pub expression_attribute_values: AttributeMap,
}

#[derive(Clone, Debug)]
pub struct BatchStatementRequest {
    pub consistent_read: bool,
    pub statement: String,
}

#[derive(Clone, Debug)]
pub struct BatchStatementError {
    pub code: String,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct BatchStatementResponse {
    pub error: Option<BatchStatementError>,
}

#[derive(Clone, Debug)]
pub struct QueryRequest {
    pub table: String,
    pub partition_key: String,
    pub sort_key_condition: Option<crate::table::SortKeyCondition>,
    pub limit: Option<usize>,
    pub scan_forward: bool,
    pub start_token: Option<String>,
    pub consistent_read: bool,
}

#[derive(Clone, Debug)]
pub struct QueryResponse {
    pub items: Vec<AttributeMap>,
    pub next_token: Option<String>,
}

/// The backing store's RPC surface. A real implementation wraps a wire client; the in-memory
/// store in [`crate::memory`] implements this directly over process memory.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn put_item(&self, request: PutItemRequest) -> Result<(), RowVaultError>;

    async fn get_item(&self, request: GetItemRequest) -> Result<Option<AttributeMap>, RowVaultError>;

    async fn batch_get_item(&self, request: BatchGetItemRequest) -> Result<Vec<AttributeMap>, RowVaultError>;

    async fn delete_item(&self, request: DeleteItemRequest) -> Result<(), RowVaultError>;

    async fn batch_execute_statement(
        &self,
        statements: Vec<BatchStatementRequest>,
    ) -> Result<Vec<BatchStatementResponse>, RowVaultError>;

    async fn query(&self, request: QueryRequest) -> Result<QueryResponse, RowVaultError>;
}
