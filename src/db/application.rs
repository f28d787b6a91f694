use rusqlite::types::Type;
use rusqlite::{params, Row};
use uuid::Uuid;

use super::{Database, Table};
use crate::error::Result;
use crate::models::{Application, ApplicationStatus, StatusCount};
use crate::timefmt::{format_timestamp, RequiredTime};

const APPLICATION_COLUMNS: &str = "id, job_id, notes, status, created_at";

impl Database {
    /// Record that the user applied to a job. Ingestion never calls this.
    pub fn create_application(&self, job_prefix: &str, notes: &str) -> Result<Application> {
        let job_id = self.resolve_id(Table::Jobs, job_prefix)?;
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO applications (id, job_id, notes, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                job_id,
                notes,
                ApplicationStatus::Applied.as_str(),
                format_timestamp(&chrono::Utc::now()),
            ],
        )?;
        self.get_application(&id)
    }

    pub fn get_application(&self, id_prefix: &str) -> Result<Application> {
        let id = self.resolve_id(Table::Applications, id_prefix)?;
        let sql = format!(
            "SELECT {} FROM applications WHERE id = ?1",
            APPLICATION_COLUMNS
        );
        Ok(self.conn.query_row(&sql, [&id], Self::row_to_application)?)
    }

    pub fn list_applications(&self) -> Result<Vec<Application>> {
        let sql = format!(
            "SELECT {} FROM applications ORDER BY created_at DESC, id",
            APPLICATION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::row_to_application)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn update_application_status(
        &self,
        id_prefix: &str,
        status: ApplicationStatus,
    ) -> Result<Application> {
        let id = self.resolve_id(Table::Applications, id_prefix)?;
        self.conn.execute(
            "UPDATE applications SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        self.get_application(&id)
    }

    /// Application counts per pipeline stage.
    pub fn application_summary(&self) -> Result<Vec<StatusCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM applications GROUP BY status ORDER BY status",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(StatusCount {
                status: row.get(0)?,
                count: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn row_to_application(row: &Row) -> rusqlite::Result<Application> {
        let status: String = row.get(3)?;
        let status = status
            .parse::<ApplicationStatus>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

        Ok(Application {
            id: row.get(0)?,
            job_id: row.get(1)?,
            notes: row.get(2)?,
            status,
            created_at: row.get::<_, RequiredTime>(4)?.0,
        })
    }
}
