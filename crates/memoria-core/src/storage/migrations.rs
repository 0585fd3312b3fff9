//! Forward-only schema migrations for the embedded backend.
//!
//! Migrations are applied in order, each in its own transaction, then the
//! new version is recorded. Every migration body must be idempotent (safe
//! to re-run) so a crash between "apply" and "record version" never
//! corrupts state.

use redb::{Database, TableDefinition};

use crate::error::Result;

pub const SCHEMA_VERSION_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("schema_version");
pub const SCHEMA_VERSION_KEY: &str = "version";

/// The highest migration version this binary knows how to produce.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

pub type Migration = fn(&Database) -> Result<()>;

/// Ordered, append-only. Index 0 is migration version 1, etc. There is
/// exactly one migration today (initial table creation is handled directly
/// by `RedbStore::open`, not through this list) — the slot exists so future
/// versions have somewhere to append without touching `open`.
pub const MIGRATIONS: &[Migration] = &[];

pub fn read_version(db: &Database) -> Result<u32> {
    let read_txn = db.begin_read()?;
    let table = match read_txn.open_table(SCHEMA_VERSION_TABLE) {
        Ok(t) => t,
        Err(_) => return Ok(0),
    };
    Ok(table
        .get(SCHEMA_VERSION_KEY)?
        .and_then(|v| {
            let bytes = v.value();
            if bytes.len() == 4 {
                Some(u32::from_le_bytes(bytes.try_into().unwrap()))
            } else {
                None
            }
        })
        .unwrap_or(0))
}

fn write_version(db: &Database, version: u32) -> Result<()> {
    let write_txn = db.begin_write()?;
    {
        let mut table = write_txn.open_table(SCHEMA_VERSION_TABLE)?;
        table.insert(SCHEMA_VERSION_KEY, version.to_le_bytes().as_slice())?;
    }
    write_txn.commit()?;
    Ok(())
}

/// Apply every migration with version greater than the current max.
pub fn run_migrations(db: &Database) -> Result<()> {
    let mut version = read_version(db)?;
    while (version as usize) < MIGRATIONS.len() {
        MIGRATIONS[version as usize](db)?;
        version += 1;
        write_version(db, version)?;
    }
    if version < CURRENT_SCHEMA_VERSION {
        write_version(db, CURRENT_SCHEMA_VERSION)?;
    }
    Ok(())
}
