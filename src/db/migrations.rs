use std::collections::HashSet;

use anyhow::Context;
use rusqlite::Connection;

/// Embedded schema, applied in name order and recorded in `_migrations`.
const MIGRATIONS: &[(&str, &str)] = &[("001_init.sql", include_str!("../../migrations/001_init.sql"))];

/// Applies every embedded migration not yet recorded. Each one commits
/// together with its `_migrations` row. Returns how many were applied.
pub fn run_migrations(conn: &Connection) -> anyhow::Result<usize> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .context("failed to create migrations table")?;

    let applied = applied_names(conn)?;
    let pending: Vec<_> = MIGRATIONS
        .iter()
        .filter(|(name, _)| !applied.contains(*name))
        .collect();

    for (name, sql) in &pending {
        let tx = conn
            .unchecked_transaction()
            .with_context(|| format!("failed to begin migration {name}"))?;
        tx.execute_batch(sql)
            .with_context(|| format!("migration {name} failed"))?;
        tx.execute("INSERT INTO _migrations (name) VALUES (?1)", [name])
            .with_context(|| format!("failed to record migration {name}"))?;
        tx.commit()
            .with_context(|| format!("failed to commit migration {name}"))?;
        tracing::info!(migration = %name, "schema migrated");
    }

    Ok(pending.len())
}

fn applied_names(conn: &Connection) -> anyhow::Result<HashSet<String>> {
    let mut stmt = conn
        .prepare("SELECT name FROM _migrations")
        .context("failed to read applied migrations")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(names)
}
