use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use super::{Database, Table};
use crate::error::Result;
use crate::models::{Job, JobStatus, RawJob};
use crate::reconcile::{ReconcileCounts, ReconcilePlan};
use crate::timefmt::{format_timestamp, NullableTime, RequiredTime};

const JOB_COLUMNS: &str = "id, company_id, external_id, title, description, location, remote,
    department, url, posted_at, status, first_seen_at, last_seen_at";

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub company_id: Option<String>,
    pub status: Option<JobStatus>,
}

impl Database {
    /// Look up a job by id or unique id prefix.
    pub fn get_job(&self, id_prefix: &str) -> Result<Job> {
        let id = self.resolve_id(Table::Jobs, id_prefix)?;
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
        Ok(self.conn.query_row(&sql, [&id], Self::row_to_job)?)
    }

    pub fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut sql = format!("SELECT {} FROM jobs WHERE 1=1", JOB_COLUMNS);
        let mut args: Vec<String> = vec![];

        if let Some(company_id) = &filter.company_id {
            sql.push_str(&format!(" AND company_id = ?{}", args.len() + 1));
            args.push(company_id.clone());
        }
        if let Some(status) = filter.status {
            sql.push_str(&format!(" AND status = ?{}", args.len() + 1));
            args.push(status.as_str().to_string());
        }
        sql.push_str(" ORDER BY company_id, title, id");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), Self::row_to_job)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Every stored job for the company, open or closed.
    pub fn jobs_for_company(&self, company_id: &str) -> Result<Vec<Job>> {
        self.list_jobs(&JobFilter {
            company_id: Some(company_id.to_string()),
            status: None,
        })
    }

    /// Open jobs first seen after `since`; all open jobs when `since` is `None`.
    pub fn open_jobs_first_seen_since(
        &self,
        company_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Job>> {
        let jobs = self.list_jobs(&JobFilter {
            company_id: Some(company_id.to_string()),
            status: Some(JobStatus::Open),
        })?;
        // Compared after normalization; the stored text layouts do not sort reliably.
        Ok(jobs
            .into_iter()
            .filter(|job| since.is_none_or(|t| job.first_seen_at > t))
            .collect())
    }

    /// Apply a reconciliation plan for one company as a single transaction,
    /// stamping the company's last-scraped time with `now`.
    pub fn apply_reconciliation(
        &mut self,
        company_id: &str,
        plan: &ReconcilePlan,
        now: DateTime<Utc>,
    ) -> Result<ReconcileCounts> {
        let now = format_timestamp(&now);
        let tx = self.conn.transaction()?;

        for raw in &plan.to_insert {
            insert_job(&tx, company_id, raw, &now)?;
        }
        for sighting in &plan.to_reactivate {
            record_sighting(&tx, &sighting.job_id, &sighting.raw, &now)?;
        }
        for sighting in &plan.to_refresh {
            record_sighting(&tx, &sighting.job_id, &sighting.raw, &now)?;
        }
        for job_id in &plan.to_expire {
            tx.execute(
                "UPDATE jobs SET status = 'closed' WHERE id = ?1 AND status = 'open'",
                [job_id],
            )?;
        }
        tx.execute(
            "UPDATE companies SET last_scraped_at = ?1 WHERE id = ?2",
            params![now, company_id],
        )?;

        tx.commit()?;
        Ok(plan.counts())
    }

    fn row_to_job(row: &Row) -> rusqlite::Result<Job> {
        let status: String = row.get(10)?;
        let status = status
            .parse::<JobStatus>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?;

        Ok(Job {
            id: row.get(0)?,
            company_id: row.get(1)?,
            external_id: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            location: row.get(5)?,
            remote: row.get(6)?,
            department: row.get(7)?,
            url: row.get(8)?,
            posted_at: row.get::<_, NullableTime>(9)?.0,
            status,
            first_seen_at: row.get::<_, RequiredTime>(11)?.0,
            last_seen_at: row.get::<_, RequiredTime>(12)?.0,
        })
    }
}

fn insert_job(conn: &Connection, company_id: &str, raw: &RawJob, now: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO jobs (id, company_id, external_id, title, description, location, remote,
                           department, url, posted_at, status, first_seen_at, last_seen_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'open', ?11, ?11)",
        params![
            Uuid::new_v4().to_string(),
            company_id,
            raw.external_id,
            raw.title,
            raw.description,
            raw.location,
            raw.remote,
            raw.department,
            raw.url,
            raw.posted_at.as_ref().map(format_timestamp),
            now,
        ],
    )?;
    Ok(())
}

/// Reopen (if needed) and refresh a job that showed up in a fetch. first_seen_at is untouched.
fn record_sighting(conn: &Connection, job_id: &str, raw: &RawJob, now: &str) -> Result<()> {
    conn.execute(
        "UPDATE jobs
         SET title = ?1, description = ?2, location = ?3, remote = ?4, department = ?5,
             url = ?6, posted_at = ?7, status = 'open', last_seen_at = ?8
         WHERE id = ?9",
        params![
            raw.title,
            raw.description,
            raw.location,
            raw.remote,
            raw.department,
            raw.url,
            raw.posted_at.as_ref().map(format_timestamp),
            now,
            job_id,
        ],
    )?;
    Ok(())
}
