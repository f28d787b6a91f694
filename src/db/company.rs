use rusqlite::{params, Row};
use uuid::Uuid;

use super::{Database, Table};
use crate::error::Result;
use crate::models::{Company, Sponsorship};
use crate::timefmt::{format_timestamp, NullableTime, RequiredTime};

/// What onboarding needs to know about a company.
#[derive(Debug, Clone)]
pub struct NewCompany {
    pub name: String,
    pub platform: String,
    pub slug: String,
    pub career_url: Option<String>,
}

const COMPANY_COLUMNS: &str = "id, name, platform, slug, career_url, enabled, last_scraped_at, created_at,
    h1b_sponsor_id, sponsors_h1b, h1b_approval_rate, h1b_total_filed,
    COALESCE(in_cart, 0), cart_added_at, last_notified_at";

impl Database {
    pub fn create_company(&self, new: &NewCompany) -> Result<Company> {
        let id = Uuid::new_v4().to_string();
        self.insert_company(&id, new)?;
        self.get_company(&id)
    }

    pub(crate) fn insert_company(&self, id: &str, new: &NewCompany) -> Result<()> {
        self.conn.execute(
            "INSERT INTO companies (id, name, platform, slug, career_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                new.name.trim(),
                new.platform.trim().to_lowercase(),
                new.slug.trim(),
                new.career_url,
                format_timestamp(&chrono::Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Look up a company by id or unique id prefix.
    pub fn get_company(&self, id_prefix: &str) -> Result<Company> {
        let id = self.resolve_id(Table::Companies, id_prefix)?;
        let sql = format!("SELECT {} FROM companies WHERE id = ?1", COMPANY_COLUMNS);
        Ok(self.conn.query_row(&sql, [&id], Self::row_to_company)?)
    }

    pub fn list_companies(&self) -> Result<Vec<Company>> {
        self.list_companies_where("1=1 ORDER BY name")
    }

    pub fn list_enabled_companies(&self) -> Result<Vec<Company>> {
        self.list_companies_where("enabled = 1 ORDER BY name")
    }

    /// Remove a company and its jobs. Fails with a constraint violation if
    /// any of those jobs has an application on record.
    pub fn delete_company(&self, id_prefix: &str) -> Result<Company> {
        let company = self.get_company(id_prefix)?;
        self.conn
            .execute("DELETE FROM companies WHERE id = ?1", [&company.id])?;
        Ok(company)
    }

    pub fn set_company_enabled(&self, id_prefix: &str, enabled: bool) -> Result<Company> {
        let id = self.resolve_id(Table::Companies, id_prefix)?;
        self.conn.execute(
            "UPDATE companies SET enabled = ?1 WHERE id = ?2",
            params![enabled, id],
        )?;
        self.get_company(&id)
    }

    pub fn update_sponsorship(&self, id_prefix: &str, sponsorship: &Sponsorship) -> Result<Company> {
        let id = self.resolve_id(Table::Companies, id_prefix)?;
        self.conn.execute(
            "UPDATE companies
             SET h1b_sponsor_id = ?1, sponsors_h1b = ?2, h1b_approval_rate = ?3, h1b_total_filed = ?4
             WHERE id = ?5",
            params![
                sponsorship.h1b_sponsor_id,
                sponsorship.sponsors_h1b,
                sponsorship.h1b_approval_rate,
                sponsorship.h1b_total_filed,
                id,
            ],
        )?;
        self.get_company(&id)
    }

    pub(super) fn list_companies_where(&self, clause: &str) -> Result<Vec<Company>> {
        let sql = format!("SELECT {} FROM companies WHERE {}", COMPANY_COLUMNS, clause);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::row_to_company)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn row_to_company(row: &Row) -> rusqlite::Result<Company> {
        Ok(Company {
            id: row.get(0)?,
            name: row.get(1)?,
            platform: row.get(2)?,
            slug: row.get(3)?,
            career_url: row.get(4)?,
            enabled: row.get(5)?,
            last_scraped_at: row.get::<_, NullableTime>(6)?.0,
            created_at: row.get::<_, RequiredTime>(7)?.0,
            sponsorship: Sponsorship {
                h1b_sponsor_id: row.get(8)?,
                sponsors_h1b: row.get(9)?,
                h1b_approval_rate: row.get(10)?,
                h1b_total_filed: row.get(11)?,
            },
            in_cart: row.get(12)?,
            cart_added_at: row.get::<_, NullableTime>(13)?.0,
            last_notified_at: row.get::<_, NullableTime>(14)?.0,
        })
    }
}
