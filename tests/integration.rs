//! End-to-end scenarios against the in-memory reference store.

use std::sync::{Arc, Once};

use chrono::Utc;
use pretty_assertions::assert_eq;
use rowvault::diff::diff;
use rowvault::error::RowVaultError;
use rowvault::expr::KeyAttributeNames;
use rowvault::value::{AttributeMap, AttributeValue};
use rowvault::{InMemoryStore, PrimaryKey, Row, SortKeyCondition, Table, TypeRegistry, WriteEntry};
use serde::{Deserialize, Serialize};

static TRACING_INIT: Once = Once::new();

fn key_attrs() -> KeyAttributeNames {
    KeyAttributeNames::new("PK", "SK")
}

fn table() -> Table<InMemoryStore> {
    TRACING_INIT.call_once(|| rowvault::utils::init_tracing(false));
    Table::new(Arc::new(InMemoryStore::new()), "orders", key_attrs())
}

fn order_registry() -> TypeRegistry<Order> {
    TypeRegistry::new().register("order", |item| {
        rowvault::table::item_to_row::<Order>(item, &key_attrs()).map(|r| r.payload)
    })
}

/// S1: insert → get round-trips; update bumps the version; a stale update is rejected.
#[tokio::test]
async fn s1_insert_update_version_gate() {
    let t = table();
    let registry = order_registry();

    let row = Row::new_for_insert(
        PrimaryKey::new("cust#1", "order#1"),
        "order",
        Order {
            customer: "ada".into(),
            total_cents: 1000,
        },
        Utc::now(),
    );
    t.insert(&row).await.unwrap();

    let found = t.get(&row.key, &registry).await.unwrap();
    assert_eq!(
        found,
        Some(Order {
            customer: "ada".into(),
            total_cents: 1000,
        })
    );

    let updated = row.with_next_version(
        Order {
            customer: "ada".into(),
            total_cents: 2000,
        },
        Utc::now(),
    );
    t.update(&updated, &row).await.unwrap();
    assert_eq!(
        t.get(&row.key, &registry).await.unwrap(),
        Some(Order {
            customer: "ada".into(),
            total_cents: 2000,
        })
    );

    // retrying the update against the now-stale `row` must fail the version gate.
    let stale = row.with_next_version(
        Order {
            customer: "ada".into(),
            total_cents: 3000,
        },
        Utc::now(),
    );
    let err = t.update(&stale, &row).await.unwrap_err();
    assert!(matches!(err, RowVaultError::ConditionalCheckFailed { .. }));
}

/// S2: diffing an item against itself is empty; diffing against a changed copy is deterministic
/// across repeated calls (sorted key order).
#[tokio::test]
async fn s2_diff_is_deterministic() {
    let mut existing = AttributeMap::new();
    existing.insert("z".into(), AttributeValue::S("1".into()));
    existing.insert("a".into(), AttributeValue::S("1".into()));

    assert_eq!(diff(&existing, &existing).unwrap(), vec![]);

    let mut new = AttributeMap::new();
    new.insert("z".into(), AttributeValue::S("2".into()));
    new.insert("a".into(), AttributeValue::S("2".into()));

    let first = diff(&new, &existing).unwrap();
    let second = diff(&new, &existing).unwrap();
    assert_eq!(first, second);
    // sorted order: "a" before "z"
    assert_eq!(first.len(), 2);
}

/// S3: a bulk write mixing a duplicate-key insert among otherwise-valid inserts aggregates
/// exactly the failing entries and still applies the rest.
#[tokio::test]
async fn s3_bulk_write_aggregates_partial_errors() {
    let t = table();
    let registry = order_registry();

    let existing = Row::new_for_insert(
        PrimaryKey::new("cust#1", "order#0"),
        "order",
        Order {
            customer: "ada".into(),
            total_cents: 1,
        },
        Utc::now(),
    );
    t.insert(&existing).await.unwrap();

    let mut entries = vec![WriteEntry::Insert(existing)]; // duplicate: will fail
    for i in 1..=4 {
        entries.push(WriteEntry::Insert(Row::new_for_insert(
            PrimaryKey::new("cust#1", format!("order#{i}")),
            "order",
            Order {
                customer: "ada".into(),
                total_cents: i,
            },
            Utc::now(),
        )));
    }

    let err = t.bulk_write(entries).await.unwrap_err();
    match err {
        RowVaultError::BatchErrorsReturned { error_count, .. } => assert_eq!(error_count, 1),
        other => panic!("expected BatchErrorsReturned, got {other:?}"),
    }

    let (items, _) = t
        .query("cust#1", None, None, true, None, true, &registry)
        .await
        .unwrap();
    assert_eq!(items.len(), 5); // the 1 pre-existing + 4 newly inserted
}

/// S4: collecting paged results matches an unpaged query.
#[tokio::test]
async fn s4_query_pagination_matches_unpaged() {
    let t = table();
    let registry = order_registry();

    for i in 0..7 {
        let row = Row::new_for_insert(
            PrimaryKey::new("cust#1", format!("order#{i:02}")),
            "order",
            Order {
                customer: "ada".into(),
                total_cents: i,
            },
            Utc::now(),
        );
        t.insert(&row).await.unwrap();
    }

    let (unpaged, _) = t
        .query("cust#1", None, None, true, None, true, &registry)
        .await
        .unwrap();

    let mut paged = Vec::new();
    let mut token = None;
    loop {
        let (page, next) = t
            .query("cust#1", None, Some(3), true, token, true, &registry)
            .await
            .unwrap();
        paged.extend(page);
        match next {
            Some(t) => token = Some(t),
            None => break,
        }
    }

    assert_eq!(paged, unpaged);
    assert_eq!(paged.len(), 7);
}

/// S5: a stored row whose type tag is not registered fails `UnexpectedType` on read.
#[tokio::test]
async fn s5_polymorphic_read_rejects_unregistered_tag() {
    let t = table();
    let row = Row::new_for_insert(
        PrimaryKey::new("cust#1", "order#1"),
        "invoice", // not registered below
        Order {
            customer: "ada".into(),
            total_cents: 1,
        },
        Utc::now(),
    );
    t.insert(&row).await.unwrap();

    let registry = order_registry(); // only registers "order"
    let err = t.get(&row.key, &registry).await.unwrap_err();
    assert!(matches!(err, RowVaultError::UnexpectedType { provided } if provided == "invoice"));
}

/// S6: attribute types outside {S, N, Bool, Null, L, M} are rejected by the diff engine.
#[test]
fn s6_unsupported_attribute_type_fails_diff() {
    let existing = AttributeMap::new();
    let mut new = AttributeMap::new();
    new.insert("blob".into(), AttributeValue::B(vec![0xde, 0xad, 0xbe, 0xef]));

    let err = diff(&new, &existing).unwrap_err();
    assert!(matches!(err, RowVaultError::UnableToUpdate { .. }));
}

#[tokio::test]
async fn delete_at_key_is_idempotent_and_delete_item_checks_version() {
    let t = table();
    let key = PrimaryKey::new("cust#1", "order#1");
    t.delete_at_key(&key).await.unwrap();
    t.delete_at_key(&key).await.unwrap();

    let row = Row::new_for_insert(
        key.clone(),
        "order",
        Order {
            customer: "ada".into(),
            total_cents: 1,
        },
        Utc::now(),
    );
    t.insert(&row).await.unwrap();
    let updated = row.with_next_version(
        Order {
            customer: "ada".into(),
            total_cents: 2,
        },
        Utc::now(),
    );
    t.update(&updated, &row).await.unwrap();

    // deleting against the stale `row` version must fail
    let err = t.delete_item(&row).await.unwrap_err();
    assert!(matches!(err, RowVaultError::ConditionalCheckFailed { .. }));

    t.delete_item(&updated).await.unwrap();
    let registry = order_registry();
    assert_eq!(t.get(&key, &registry).await.unwrap(), None);
}

#[tokio::test]
async fn begins_with_and_between_sort_key_conditions() {
    let t = table();
    let registry = order_registry();
    for sk in ["a", "b", "c", "d"] {
        let row = Row::new_for_insert(
            PrimaryKey::new("cust#1", sk),
            "order",
            Order {
                customer: "ada".into(),
                total_cents: 1,
            },
            Utc::now(),
        );
        t.insert(&row).await.unwrap();
    }

    let (items, _) = t
        .query(
            "cust#1",
            Some(SortKeyCondition::Between("a".into(), "d".into())),
            None,
            true,
            None,
            true,
            &registry,
        )
        .await
        .unwrap();
    // strict bounds: "a" and "d" themselves are excluded
    assert_eq!(items.len(), 2);
}

#[tokio::test]
async fn delete_items_removes_unconditionally_by_key() {
    let t = table();
    let registry = order_registry();
    let keys: Vec<PrimaryKey> = (0..3)
        .map(|i| PrimaryKey::new("cust#1", format!("order#{i}")))
        .collect();
    for key in &keys {
        let row = Row::new_for_insert(
            key.clone(),
            "order",
            Order {
                customer: "ada".into(),
                total_cents: 1,
            },
            Utc::now(),
        );
        t.insert(&row).await.unwrap();
    }

    t.delete_items::<Order>(&keys).await.unwrap();

    for key in &keys {
        assert_eq!(t.get(key, &registry).await.unwrap(), None);
    }
}

#[tokio::test]
async fn delete_items_existing_checks_each_rows_own_version() {
    let t = table();
    let registry = order_registry();
    let mut rows = Vec::new();
    for i in 0..3 {
        let row = Row::new_for_insert(
            PrimaryKey::new("cust#1", format!("order#{i}")),
            "order",
            Order {
                customer: "ada".into(),
                total_cents: 1,
            },
            Utc::now(),
        );
        t.insert(&row).await.unwrap();
        rows.push(row);
    }

    t.delete_items_existing(&rows).await.unwrap();
    for row in &rows {
        assert_eq!(t.get(&row.key, &registry).await.unwrap(), None);
    }

    // a stale version among the batch surfaces as an aggregated batch error
    let stale = rows[0].clone();
    let fresh = Row::new_for_insert(
        PrimaryKey::new("cust#1", "order#fresh"),
        "order",
        Order {
            customer: "ada".into(),
            total_cents: 1,
        },
        Utc::now(),
    );
    t.insert(&fresh).await.unwrap();
    let err = t.delete_items_existing(&[stale, fresh]).await.unwrap_err();
    assert!(matches!(err, RowVaultError::BatchErrorsReturned { error_count: 1, .. }));
}
