mod application;
mod cart;
mod company;
mod job;

pub use company::NewCompany;
pub use job::JobFilter;

use rusqlite::Connection;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::migrate;

/// Handle to the tracker's SQLite store.
///
/// Built once at startup and passed by reference to whatever needs it.
pub struct Database {
    conn: Connection,
    path: PathBuf,
}

/// Tables whose rows can be addressed by an id prefix.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Table {
    Companies,
    Jobs,
    Applications,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Table::Companies => "companies",
            Table::Jobs => "jobs",
            Table::Applications => "applications",
        }
    }

    fn kind(self) -> &'static str {
        match self {
            Table::Companies => "company",
            Table::Jobs => "job",
            Table::Applications => "application",
        }
    }
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(())
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Bring the schema up to date. Must succeed before any other call.
    pub fn migrate(&mut self, migrations_dir: &Path) -> Result<Vec<String>> {
        migrate::run(&mut self.conn, migrations_dir)
    }

    /// Same as [`Database::migrate`], using the units built into the binary.
    pub fn migrate_embedded(&mut self) -> Result<Vec<String>> {
        migrate::run_embedded(&mut self.conn)
    }

    /// Resolve a unique id prefix to the full id.
    ///
    /// Zero matches is `NotFound`, more than one is `Ambiguous`; never picks one.
    pub(crate) fn resolve_id(&self, table: Table, prefix: &str) -> Result<String> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Err(Error::NotFound {
                kind: table.kind(),
                reference: String::new(),
            });
        }

        // substr rather than LIKE so '%' and '_' in the prefix are literal
        let sql = format!(
            "SELECT id FROM {} WHERE substr(id, 1, length(?1)) = ?1",
            table.name()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut ids = stmt
            .query_map([prefix], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        match ids.len() {
            0 => Err(Error::NotFound {
                kind: table.kind(),
                reference: prefix.to_string(),
            }),
            1 => Ok(ids.swap_remove(0)),
            count => Err(Error::Ambiguous {
                kind: table.kind(),
                reference: prefix.to_string(),
                count,
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn migrated() -> Database {
        let mut db = Database::open_in_memory().unwrap();
        let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations");
        db.migrate(&dir).unwrap();
        db
    }

    pub(crate) fn acme() -> NewCompany {
        NewCompany {
            name: "Acme".to_string(),
            platform: "Lever".to_string(),
            slug: "acme".to_string(),
            career_url: Some("https://jobs.lever.co/acme".to_string()),
        }
    }

    fn company_with_id(db: &Database, id: &str, slug: &str) {
        db.insert_company(
            id,
            &NewCompany {
                name: format!("Company {}", slug),
                platform: "lever".to_string(),
                slug: slug.to_string(),
                career_url: None,
            },
        )
        .unwrap();
    }

    #[test]
    fn test_prefix_resolution() {
        let db = migrated();
        company_with_id(&db, "abc123-0000", "first");
        company_with_id(&db, "abc456-0000", "second");

        assert!(matches!(
            db.resolve_id(Table::Companies, "abc"),
            Err(Error::Ambiguous { count: 2, .. })
        ));
        assert_eq!(db.resolve_id(Table::Companies, "abc1").unwrap(), "abc123-0000");
        assert_eq!(db.get_company("abc1").unwrap().slug, "first");
        assert!(matches!(
            db.resolve_id(Table::Companies, "zzz"),
            Err(Error::NotFound { kind: "company", .. })
        ));
        assert!(matches!(
            db.resolve_id(Table::Companies, ""),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_like_wildcards_are_literal() {
        let db = migrated();
        company_with_id(&db, "abc123-0000", "first");
        assert!(matches!(
            db.resolve_id(Table::Companies, "%"),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            db.resolve_id(Table::Companies, "ab_"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_migrate_twice_on_open_store() {
        let mut db = migrated();
        let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations");
        assert!(db.migrate(&dir).unwrap().is_empty());
        let files = migrate::discover(&dir).unwrap();
        assert_eq!(migrate::applied(&db.conn).unwrap(), files);
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("hunt.db");
        let db = Database::open(&path).unwrap();
        assert_eq!(db.path(), &path);
        assert!(path.exists());
    }
}
