pub mod migrations;
pub mod queries;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use rusqlite::Connection;

/// One connection shared by the auth provider and the booking store.
pub type SharedDb = Arc<Mutex<Connection>>;

pub fn init_db(path: &str) -> anyhow::Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {path}"))?;

    conn.busy_timeout(Duration::from_secs(5))
        .context("failed to set busy timeout")?;
    // WAL is meaningless for an in-memory database.
    if path != ":memory:" {
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("failed to enable WAL")?;
    }
    conn.execute_batch("PRAGMA foreign_keys=ON;")
        .context("failed to set database pragmas")?;

    migrations::run_migrations(&conn)?;

    Ok(conn)
}

pub fn open_shared(path: &str) -> anyhow::Result<SharedDb> {
    Ok(Arc::new(Mutex::new(init_db(path)?)))
}
