//! The versioned row envelope (C2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two key attribute values identifying a row within a table.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrimaryKey {
    pub partition_key: String,
    pub sort_key: String,
}

impl PrimaryKey {
    pub fn new(partition_key: impl Into<String>, sort_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            sort_key: sort_key.into(),
        }
    }
}

/// Optimistic-concurrency metadata: bumped by exactly 1 on each successful update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RowStatus {
    pub row_version: u64,
    pub last_update_date: DateTime<Utc>,
}

impl RowStatus {
    /// Status for a freshly inserted row: version 1, `last_update_date == create_date`.
    pub fn initial(create_date: DateTime<Utc>) -> Self {
        Self {
            row_version: 1,
            last_update_date: create_date,
        }
    }

    /// Status for the next version after a successful update at `now`.
    pub fn next(&self, now: DateTime<Utc>) -> Self {
        Self {
            row_version: self.row_version + 1,
            last_update_date: now,
        }
    }
}

/// A typed, versioned row: key + envelope metadata + a caller-defined payload.
///
/// `row_type_tag` is immutable once stored; it is the dispatch key the polymorphic read path
/// (see [`crate::read`]) uses to pick a decoder for a union of payload shapes sharing a partition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Row<P> {
    pub key: PrimaryKey,
    pub create_date: DateTime<Utc>,
    pub row_status: RowStatus,
    pub row_type_tag: String,
    pub payload: P,
}

impl<P> Row<P> {
    /// Construct a new row as it would be on first insert: version 1, both dates equal to `now`.
    pub fn new_for_insert(
        key: PrimaryKey,
        row_type_tag: impl Into<String>,
        payload: P,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            create_date: now,
            row_status: RowStatus::initial(now),
            row_type_tag: row_type_tag.into(),
            payload,
        }
    }

    /// Build the next version of this row (new payload, incremented version, refreshed
    /// `last_update_date`), leaving `create_date` untouched.
    pub fn with_next_version(&self, payload: P, now: DateTime<Utc>) -> Self
    where
        P: Clone,
    {
        Self {
            key: self.key.clone(),
            create_date: self.create_date,
            row_status: self.row_status.next(now),
            row_type_tag: self.row_type_tag.clone(),
            payload,
        }
    }
}

/// Attribute names reserved by the envelope; a caller's flattened payload must not collide with
/// these (checked at flatten time — see [`crate::table`]). The two key attribute names are
/// schema-parameterized and are checked separately by the table facade.
pub const RESERVED_ATTRIBUTE_NAMES: [&str; 4] =
    ["rowVersion", "createDate", "lastUpdateDate", "rowType"];
