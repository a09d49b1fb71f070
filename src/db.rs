use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, Row};
use tracing::info;

use crate::errors::{AppError, AppResult};
use crate::ingestion::ProviderRecord;

pub struct DatabaseContext {
    pub connection: Connection,
    pub path: PathBuf,
}

/// Opens (creating if needed) the provider store and applies migrations.
pub fn bootstrap<P: AsRef<Path>>(db_path: P) -> AppResult<DatabaseContext> {
    let db_path = db_path.as_ref();
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    let connection = Connection::open_with_flags(db_path, flags)?;
    configure(&connection)?;
    run_migrations(&connection)?;
    info!(path = %db_path.display(), "provider store ready");

    Ok(DatabaseContext {
        connection,
        path: db_path.to_path_buf(),
    })
}

/// Opens an existing store. A missing file is the one fatal condition in the
/// pipeline and gets a diagnostic pointing at the ingest step.
pub fn open_existing<P: AsRef<Path>>(db_path: P) -> AppResult<DatabaseContext> {
    let db_path = db_path.as_ref();
    if !db_path.exists() {
        return Err(AppError::Path(format!(
            "provider store not found at {}; run `rups ingest` first",
            db_path.display()
        )));
    }

    let connection = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_WRITE)?;
    configure(&connection)?;
    run_migrations(&connection)?;

    Ok(DatabaseContext {
        connection,
        path: db_path.to_path_buf(),
    })
}

fn configure(connection: &Connection) -> AppResult<()> {
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;
        "#,
    )?;
    Ok(())
}

fn run_migrations(connection: &Connection) -> AppResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS providers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_row_hash TEXT NOT NULL,
            nit TEXT,
            name TEXT,
            department TEXT,
            municipality TEXT,
            service TEXT,
            status TEXT,
            ingested_at TEXT NOT NULL DEFAULT (DATETIME('now'))
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_providers_source_hash
            ON providers(source_row_hash);
        CREATE INDEX IF NOT EXISTS idx_providers_location
            ON providers(department, municipality);
        "#,
    )?;
    Ok(())
}

pub fn clear_providers(connection: &Connection) -> AppResult<usize> {
    let removed = connection.execute("DELETE FROM providers", [])?;
    Ok(removed)
}

pub fn count_providers(connection: &Connection) -> AppResult<usize> {
    let count: i64 = connection.query_row("SELECT COUNT(*) FROM providers", [], |row| row.get(0))?;
    Ok(count as usize)
}

/// Every stored provider row, for the coverage reports.
pub fn load_providers(connection: &Connection) -> AppResult<Vec<ProviderRecord>> {
    let mut stmt = connection.prepare(
        "SELECT nit, name, department, municipality, service, status
        FROM providers
        ORDER BY id ASC",
    )?;
    let rows = stmt
        .query_map([], provider_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Geocoding input: rows with at least one of municipality/department set,
/// optionally narrowed to operational providers.
pub fn load_located_providers(
    connection: &Connection,
    only_operational: bool,
) -> AppResult<Vec<ProviderRecord>> {
    let mut sql = String::from(
        "SELECT nit, name, department, municipality, service, status
        FROM providers
        WHERE (TRIM(COALESCE(municipality, '')) <> '' OR TRIM(COALESCE(department, '')) <> '')",
    );
    if only_operational {
        sql.push_str(" AND UPPER(COALESCE(status, '')) LIKE '%OPERATIVA%'");
    }
    sql.push_str(" ORDER BY id ASC");

    let mut stmt = connection.prepare(&sql)?;
    let rows = stmt
        .query_map([], provider_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn provider_from_row(row: &Row<'_>) -> rusqlite::Result<ProviderRecord> {
    Ok(ProviderRecord {
        nit: row.get(0)?,
        name: row.get(1)?,
        department: row.get(2)?,
        municipality: row.get(3)?,
        service: row.get(4)?,
        status: row.get(5)?,
    })
}
