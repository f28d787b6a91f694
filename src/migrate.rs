//! Forward-only schema migrations.
//!
//! Each `*.sql` file in the migrations directory is one unit. Files run in
//! lexical order, so the numeric prefix in the filename is the sequence. A
//! unit's statements and its `schema_migrations` row commit together.
//!
//! The crate's own units are also compiled into the binary ([`EMBEDDED`]) for
//! installs that have no migrations directory next to them.

use std::fs;
use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::timefmt::format_timestamp;

const TRACKING_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    filename TEXT PRIMARY KEY,
    applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
)";

/// The units in `migrations/`, in order, as built into the binary.
pub const EMBEDDED: &[(&str, &str)] = &[
    (
        "001_create_companies_jobs.sql",
        include_str!("../migrations/001_create_companies_jobs.sql"),
    ),
    (
        "002_create_applications.sql",
        include_str!("../migrations/002_create_applications.sql"),
    ),
    (
        "003_add_h1b_sponsorship.sql",
        include_str!("../migrations/003_add_h1b_sponsorship.sql"),
    ),
    (
        "004_add_job_cart.sql",
        include_str!("../migrations/004_add_job_cart.sql"),
    ),
];

/// Apply every pending migration in `dir`. Returns the filenames applied by this call.
pub fn run(conn: &mut Connection, dir: &Path) -> Result<Vec<String>> {
    let files = discover(dir)?;
    apply_pending(conn, files, |file| {
        fs::read_to_string(dir.join(file)).map_err(|e| failed(file, e))
    })
}

/// Apply every pending unit from [`EMBEDDED`].
pub fn run_embedded(conn: &mut Connection) -> Result<Vec<String>> {
    let files = EMBEDDED.iter().map(|(name, _)| name.to_string()).collect();
    apply_pending(conn, files, |file| {
        EMBEDDED
            .iter()
            .find(|(name, _)| *name == file)
            .map(|(_, sql)| sql.to_string())
            .ok_or_else(|| failed(file, "not embedded"))
    })
}

fn apply_pending(
    conn: &mut Connection,
    files: Vec<String>,
    load: impl Fn(&str) -> Result<String>,
) -> Result<Vec<String>> {
    conn.execute_batch(TRACKING_TABLE)
        .map_err(|e| failed("schema_migrations", e))?;

    let mut applied = Vec::new();
    for file in files {
        if is_applied(conn, &file)? {
            debug!(migration = %file, "already applied");
            continue;
        }

        let content = load(&file)?;
        apply_one(conn, &file, &content)?;
        info!(migration = %file, "applied migration");
        applied.push(file);
    }

    Ok(applied)
}

/// Filenames of the `*.sql` units in `dir`, sorted.
pub fn discover(dir: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(dir).map_err(|e| Error::Migration {
        file: dir.display().to_string(),
        message: format!("reading migration directory: {}", e),
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| failed(&dir.display().to_string(), e))?;
        if entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".sql") {
            files.push(name);
        }
    }
    files.sort();
    Ok(files)
}

/// Filenames recorded in `schema_migrations`, in application order.
pub fn applied(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT filename FROM schema_migrations ORDER BY applied_at, filename")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
}

fn is_applied(conn: &Connection, file: &str) -> Result<bool> {
    conn.query_row(
        "SELECT 1 FROM schema_migrations WHERE filename = ?1",
        [file],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(|e| failed(file, e))
}

fn apply_one(conn: &mut Connection, file: &str, content: &str) -> Result<()> {
    // Dropping the transaction on an early return rolls it back.
    let tx = conn.transaction().map_err(|e| failed(file, e))?;
    tx.execute_batch(content).map_err(|e| failed(file, e))?;
    tx.execute(
        "INSERT INTO schema_migrations (filename, applied_at) VALUES (?1, ?2)",
        params![file, format_timestamp(&Utc::now())],
    )
    .map_err(|e| failed(file, e))?;
    tx.commit().map_err(|e| failed(file, e))
}

fn failed(file: &str, err: impl std::fmt::Display) -> Error {
    Error::Migration {
        file: file.to_string(),
        message: err.to_string(),
    }
}
