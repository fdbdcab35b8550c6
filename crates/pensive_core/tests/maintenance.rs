use pensive_core::maintenance::{
    migrate_facts, migrate_store_file, normalize_link_ids, undo_batch, MaintenanceError,
    MigrateOptions,
};
use pensive_core::model::{Fact, WriteRequest};
use pensive_core::reducer::ReducerRegistry;
use pensive_core::store::{FactStore, SqliteFactStore, StoreError};
use pensive_core::Client;
use serde_json::json;

const DASHED: &str = "0b7e5c1a-5d2f-4c4e-9a51-7f0d2e3c4b5a";
const UNDASHED: &str = "0b7e5c1a5d2f4c4e9a517f0d2e3c4b5a";

fn legacy_store() -> SqliteFactStore {
    let mut store = SqliteFactStore::open_in_memory().unwrap();
    store
        .write_entities(&[
            Fact::new(1, UNDASHED, "text", json!("target")),
            Fact::new(2, "a", "text", json!("source")),
            Fact::new(3, "a", "outbound", json!(format!("+{DASHED}"))),
            Fact::new(4, "a", "outbound", json!(["+x-y", "+z"])),
            Fact::new(5, "a", "note", json!("keep-the-dashes")),
        ])
        .unwrap();
    store
}

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn stored_rows(store: &SqliteFactStore) -> Vec<(i64, String, String, serde_json::Value)> {
    let mut stmt = store
        .connection()
        .prepare(
            "SELECT timestamp, uuid, key, value FROM entities
             ORDER BY timestamp, uuid, key, value;",
        )
        .unwrap();
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .unwrap()
        .map(|row| row.unwrap())
        .collect::<Vec<_>>();
    rows.into_iter()
        .map(|(timestamp, uuid, key, value)| {
            (timestamp, uuid, key, serde_json::from_str(&value).unwrap())
        })
        .collect()
}

#[test]
fn dry_run_reports_without_changing_reads() {
    let mut store = legacy_store();
    let before = store.read_entities(&ids(&["a", UNDASHED])).unwrap();

    let report = migrate_facts(&mut store, normalize_link_ids, MigrateOptions::dry_run()).unwrap();
    assert!(!report.applied);
    assert_eq!(report.examined, 5);
    assert_eq!(report.updated.len(), 2);
    assert!(report.deleted.is_empty());

    assert_eq!(store.read_entities(&ids(&["a", UNDASHED])).unwrap(), before);
}

#[test]
fn apply_rewrites_link_ids_in_place() {
    let mut store = legacy_store();
    let report = migrate_facts(&mut store, normalize_link_ids, MigrateOptions::apply()).unwrap();
    assert!(report.applied);
    assert_eq!(store.fact_count().unwrap(), 5);

    let client = Client::new(store, Vec::new(), ReducerRegistry::standard());
    let fields = client.read_entity("a").unwrap();
    assert_eq!(fields["outbound"], json!([UNDASHED, "xy", "z"]));
    assert_eq!(fields["note"], json!("keep-the-dashes"));
}

#[test]
fn migration_is_idempotent() {
    let mut store = legacy_store();
    migrate_facts(&mut store, normalize_link_ids, MigrateOptions::apply()).unwrap();
    let second = migrate_facts(&mut store, normalize_link_ids, MigrateOptions::apply()).unwrap();
    assert!(second.is_noop());
}

#[test]
fn transform_returning_none_deletes_only_that_fact() {
    let mut store = legacy_store();
    let report = migrate_facts(
        &mut store,
        |fact: &Fact| (fact.field_key != "note").then(|| fact.clone()),
        MigrateOptions::apply(),
    )
    .unwrap();
    assert_eq!(report.deleted.len(), 1);
    assert_eq!(report.deleted[0].field_key, "note");
    assert_eq!(store.fact_count().unwrap(), 4);
}

#[test]
fn transform_can_rewrite_keys() {
    let mut store = legacy_store();
    migrate_facts(
        &mut store,
        |fact: &Fact| {
            let mut fact = fact.clone();
            if fact.field_key == "note" {
                fact.field_key = "comment".to_string();
            }
            Some(fact)
        },
        MigrateOptions::apply(),
    )
    .unwrap();

    let client = Client::new(store, Vec::new(), ReducerRegistry::standard());
    let fields = client.read_entity("a").unwrap();
    assert!(!fields.contains_key("note"));
    assert_eq!(fields["comment"], json!("keep-the-dashes"));
}

#[test]
fn malformed_rows_are_skipped_and_left_alone() {
    let mut store = legacy_store();
    store
        .connection()
        .execute(
            "INSERT INTO entities (timestamp, uuid, key, value) VALUES (9, 'a', 'inbound', '+no-json');",
            [],
        )
        .unwrap();

    let report = migrate_facts(&mut store, |_: &Fact| None, MigrateOptions::apply()).unwrap();
    assert_eq!(report.skipped_malformed, 1);
    assert_eq!(report.deleted.len(), 5);
    assert_eq!(store.fact_count().unwrap(), 1);
}

#[test]
fn read_only_store_cannot_be_migrated() {
    let mut overlay = legacy_store().into_read_only().unwrap();
    let err =
        migrate_facts(&mut overlay, normalize_link_ids, MigrateOptions::apply()).unwrap_err();
    assert!(matches!(err, MaintenanceError::Store(StoreError::ReadOnly)));
}

#[test]
fn read_only_store_can_be_dry_run() {
    let mut overlay = legacy_store().into_read_only().unwrap();
    let before = stored_rows(&overlay);

    let report = migrate_facts(&mut overlay, normalize_link_ids, MigrateOptions::dry_run()).unwrap();
    assert!(!report.applied);
    assert_eq!(report.examined, 5);
    assert_eq!(report.updated.len(), 2);
    assert_eq!(stored_rows(&overlay), before);
}

#[test]
fn timestamp_rewrite_onto_existing_key_keeps_both_rows() {
    let mut store = SqliteFactStore::open_in_memory().unwrap();
    store
        .write_entities(&[
            Fact::new(1, "a", "text", json!("first")),
            Fact::new(1000, "a", "text", json!("second")),
        ])
        .unwrap();

    let report = migrate_facts(
        &mut store,
        |fact: &Fact| {
            Some(Fact {
                timestamp: fact.timestamp * 1000,
                ..fact.clone()
            })
        },
        MigrateOptions::apply(),
    )
    .unwrap();
    assert_eq!(report.updated.len(), 2);

    let text = |timestamp: i64, value: &str| {
        (timestamp, "a".to_string(), "text".to_string(), json!(value))
    };
    assert_eq!(
        stored_rows(&store),
        vec![text(1000, "first"), text(1_000_000, "second")]
    );
}

#[test]
fn rows_sharing_a_key_are_rewritten_independently() {
    let mut store = SqliteFactStore::open_in_memory().unwrap();
    store
        .write_entities(&[
            Fact::new(5, "a", "outbound", json!("+x-1")),
            Fact::new(5, "a", "outbound", json!("+y-2")),
        ])
        .unwrap();

    let report = migrate_facts(&mut store, normalize_link_ids, MigrateOptions::apply()).unwrap();
    assert_eq!(report.updated.len(), 2);

    let values: Vec<serde_json::Value> =
        stored_rows(&store).into_iter().map(|(_, _, _, value)| value).collect();
    assert_eq!(values, vec![json!("+x1"), json!("+y2")]);

    let client = Client::new(store, Vec::new(), ReducerRegistry::standard());
    assert_eq!(client.read_entity("a").unwrap()["outbound"], json!(["x1", "y2"]));
}

#[test]
fn failed_migration_leaves_every_row_untouched() {
    let mut store = legacy_store();
    store
        .connection()
        .execute_batch(
            "CREATE TRIGGER block_note_update BEFORE UPDATE ON entities
             WHEN OLD.key = 'note'
             BEGIN SELECT RAISE(ABORT, 'blocked'); END;",
        )
        .unwrap();
    let before = stored_rows(&store);

    let err = migrate_facts(
        &mut store,
        |fact: &Fact| match fact.field_key.as_str() {
            "text" => None,
            "note" => Some(Fact {
                field_key: "comment".to_string(),
                ..fact.clone()
            }),
            _ => Some(fact.clone()),
        },
        MigrateOptions::apply(),
    )
    .unwrap_err();
    assert!(matches!(err, MaintenanceError::Store(StoreError::Db(_))));
    assert_eq!(stored_rows(&store), before);
    assert_eq!(store.fact_count().unwrap(), 5);
}

#[test]
fn store_file_migration_requires_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.pensive");
    let err =
        migrate_store_file(&missing, normalize_link_ids, MigrateOptions::dry_run()).unwrap_err();
    assert!(matches!(err, MaintenanceError::StoreNotFound(_)));
    assert!(!missing.exists());

    let path = dir.path().join("root.pensive");
    {
        let mut store = SqliteFactStore::open(&path).unwrap();
        store
            .write_entities(&[Fact::new(1, "a", "inbound", json!(["+b-c"]))])
            .unwrap();
    }
    let report = migrate_store_file(&path, normalize_link_ids, MigrateOptions::apply()).unwrap();
    assert_eq!(report.updated.len(), 1);
    assert_eq!(report.updated[0].after.value, json!("+bc"));
}

#[test]
fn undo_batch_restores_pre_batch_state() {
    let mut client = Client::new(
        SqliteFactStore::open_in_memory().unwrap(),
        Vec::new(),
        ReducerRegistry::standard(),
    );
    client
        .apply(&WriteRequest::new(1).set("a", "text", json!("kept")))
        .unwrap();
    client
        .apply(
            &WriteRequest::new(2)
                .set("a", "text", json!("changed"))
                .set("b", "text", json!("new"))
                .resource("b", vec![7]),
        )
        .unwrap();

    let report = undo_batch(client.root_store_mut(), 2).unwrap();
    assert_eq!((report.facts, report.resources), (2, 1));

    let read = client.read_entities(&ids(&["a", "b"])).unwrap();
    assert_eq!(read["a"]["text"], json!("kept"));
    assert!(!read.contains_key("b"));
    assert!(client.read_resources(&ids(&["b"])).unwrap().is_empty());
}
