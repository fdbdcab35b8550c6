use pensive_core::db::migrations::latest_version;
use pensive_core::db::{open_db, open_db_in_memory, open_db_read_only, DbError};
use rusqlite::Connection;
use std::time::Duration;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "entities");
    assert_table_exists(&conn, "resources");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("root.pensive");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "entities");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.pensive");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unversioned_store_is_adopted_without_losing_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.pensive");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE entities (timestamp INTEGER NOT NULL, uuid TEXT NOT NULL,
                                key TEXT NOT NULL, value TEXT NOT NULL);
         CREATE TABLE resources (timestamp INTEGER NOT NULL, uuid TEXT NOT NULL,
                                 data BLOB NOT NULL);
         INSERT INTO entities VALUES (1, 'a', 'text', '\"legacy\"');",
    )
    .unwrap();
    drop(conn);

    let conn = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn), latest_version());
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM entities;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn read_only_open_requires_fact_tables_and_never_migrates() {
    let dir = tempfile::tempdir().unwrap();
    let empty = dir.path().join("empty.pensive");
    Connection::open(&empty)
        .unwrap()
        .execute_batch("CREATE TABLE notes (body TEXT);")
        .unwrap();

    let err = open_db_read_only(&empty, Duration::from_millis(100)).unwrap_err();
    assert!(matches!(err, DbError::MissingTable("entities")));
    assert_eq!(schema_version(&Connection::open(&empty).unwrap()), 0);

    let missing = dir.path().join("missing.pensive");
    assert!(open_db_read_only(&missing, Duration::from_millis(100)).is_err());
    assert!(!missing.exists());
}

#[test]
fn read_only_connection_rejects_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("overlay.pensive");
    drop(open_db(&path).unwrap());

    let conn = open_db_read_only(&path, Duration::from_millis(100)).unwrap();
    let result = conn.execute(
        "INSERT INTO entities (timestamp, uuid, key, value) VALUES (1, 'a', 'text', '\"x\"');",
        [],
    );
    assert!(result.is_err());
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
