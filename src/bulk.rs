//! Bulk-Write Coordinator (C6): chunks heterogeneous entries to the backend's per-call statement
//! limit, dispatches chunks with bounded concurrency, and aggregates partial errors.

use std::collections::HashMap;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::{Backend, BatchStatementRequest};
use crate::config::BatchLimits;
use crate::error::RowVaultError;
use crate::row::{PrimaryKey, Row};
use crate::table::{render_entry_statement, Table};

/// One write to apply as part of a bulk operation.
pub enum WriteEntry<P> {
    Insert(Row<P>),
    Update { new: Row<P>, existing: Row<P> },
    DeleteAtKey(PrimaryKey),
    DeleteItem(Row<P>),
}

/// Chunk `entries` to [`BatchLimits::MAX_STATEMENTS_PER_BATCH`], dispatch chunks concurrently
/// (capped at [`BatchLimits::DEFAULT_CONCURRENCY`]), and aggregate any partial failures.
///
/// Within a chunk, statement order matches input order; there is no ordering guarantee between
/// chunks. Partial success is not retried at this layer.
pub async fn bulk_write<B: Backend, P: Serialize + Send + Sync>(
    table: &Table<B>,
    entries: Vec<WriteEntry<P>>,
) -> Result<(), RowVaultError> {
    if entries.is_empty() {
        return Ok(());
    }

    let mut statements = Vec::with_capacity(entries.len());
    for entry in &entries {
        statements.push(render_entry_statement(table.table_name(), table.key_attrs(), entry)?);
    }

    let chunks: Vec<Vec<BatchStatementRequest>> = statements
        .chunks(BatchLimits::MAX_STATEMENTS_PER_BATCH)
        .map(|chunk| {
            chunk
                .iter()
                .map(|statement| BatchStatementRequest {
                    consistent_read: true,
                    statement: statement.clone(),
                })
                .collect()
        })
        .collect();

    debug!(
        entry_count = entries.len(),
        chunk_count = chunks.len(),
        "dispatching bulk write"
    );

    let backend = table.backend();
    let responses = stream::iter(chunks.into_iter().map(|chunk| {
        let backend = backend.clone();
        async move { backend.batch_execute_statement(chunk).await }
    }))
    .buffer_unordered(BatchLimits::DEFAULT_CONCURRENCY)
    .collect::<Vec<_>>()
    .await;

    let mut error_count = 0usize;
    let mut message_map: HashMap<String, usize> = HashMap::new();
    for response in responses {
        for statement_response in response? {
            if let Some(err) = statement_response.error {
                error_count += 1;
                let key = [err.code.as_str(), err.message.as_str()]
                    .into_iter()
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join(":");
                *message_map.entry(key).or_insert(0) += 1;
            }
        }
    }

    if error_count > 0 {
        warn!(error_count, "bulk write returned partial errors");
        return Err(RowVaultError::BatchErrorsReturned {
            error_count,
            message_map,
        });
    }
    Ok(())
}
