//! Schema migrations, applied in order when a [`Database`] is opened.
//!
//! `PRAGMA user_version` records the last applied step, so each step runs
//! exactly once per database file.
//!
//! [`Database`]: crate::Database

pub mod v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

type Step = fn(&Connection) -> rusqlite::Result<()>;

/// `(version, name, step)`, ascending by version.
const STEPS: &[(u32, &str, Step)] = &[(1, "v001_initial", v001_initial::up)];

/// Schema version of a fully migrated database.
pub const CURRENT_VERSION: u32 = STEPS[STEPS.len() - 1].0;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    tracing::debug!(
        current_version = current,
        target_version = CURRENT_VERSION,
        "checking database migrations"
    );

    for &(version, name, step) in STEPS.iter().filter(|(v, _, _)| *v > current) {
        tracing::info!(version, name, "applying migration");
        step(conn).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        conn.pragma_update(None, "user_version", version)?;
    }

    Ok(())
}
