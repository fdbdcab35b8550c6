//! Connection bootstrap utilities for fact stores.
//!
//! # Invariants
//! - Writable connections are returned with migrations fully applied.
//! - Read-only connections are opened with `SQLITE_OPEN_READ_ONLY`, so the
//!   engine itself refuses writes to overlay stores.
//! - Every connection carries a busy timeout.

use super::migrations::{apply_migrations, verify_schema};
use super::DbResult;
use log::{error, info};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::{Duration, Instant};

/// Busy timeout applied when callers do not configure one.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens (creating if needed) a writable store file with the default timeout.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_db_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
}

/// Opens (creating if needed) a writable store file and applies migrations.
///
/// Missing parent directories are created first.
///
/// # Side effects
/// - Emits `db_open` events with duration and status.
pub fn open_db_with_timeout(
    path: impl AsRef<Path>,
    busy_timeout: Duration,
) -> DbResult<Connection> {
    let path = path.as_ref();
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode=file");

    let result = bootstrap_file(path, busy_timeout);
    log_open_outcome("file", started_at, result)
}

/// Opens an in-memory writable store with migrations applied.
pub fn open_db_in_memory() -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode=memory");

    let result = bootstrap_memory();
    log_open_outcome("memory", started_at, result)
}

/// Opens an existing store file for reading only.
///
/// The file is not created and its schema is not migrated; it must already
/// hold the fact tables at a supported version.
pub fn open_db_read_only(path: impl AsRef<Path>, busy_timeout: Duration) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode=read_only");

    let result = bootstrap_read_only(path.as_ref(), busy_timeout);
    log_open_outcome("read_only", started_at, result)
}

fn bootstrap_file(path: &Path, busy_timeout: Duration) -> DbResult<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    apply_migrations(&mut conn)?;
    Ok(conn)
}

fn bootstrap_memory() -> DbResult<Connection> {
    let mut conn = Connection::open_in_memory()?;
    apply_migrations(&mut conn)?;
    Ok(conn)
}

fn bootstrap_read_only(path: &Path, busy_timeout: Duration) -> DbResult<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(busy_timeout)?;
    verify_schema(&conn)?;
    Ok(conn)
}

fn log_open_outcome(
    mode: &str,
    started_at: Instant,
    result: DbResult<Connection>,
) -> DbResult<Connection> {
    let duration_ms = started_at.elapsed().as_millis();
    match &result {
        Ok(_) => info!(
            "event=db_open module=db status=ok mode={} duration_ms={}",
            mode, duration_ms
        ),
        Err(err) => error!(
            "event=db_open module=db status=error mode={} duration_ms={} error={}",
            mode, duration_ms, err
        ),
    }
    result
}
