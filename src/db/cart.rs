use chrono::{DateTime, Utc};
use rusqlite::params;

use super::{Database, Table};
use crate::error::Result;
use crate::models::Company;
use crate::timefmt::format_timestamp;

impl Database {
    pub fn add_to_cart(&self, id_prefix: &str) -> Result<Company> {
        let id = self.resolve_id(Table::Companies, id_prefix)?;
        self.conn.execute(
            "UPDATE companies SET in_cart = 1, cart_added_at = ?1 WHERE id = ?2",
            params![format_timestamp(&Utc::now()), id],
        )?;
        self.get_company(&id)
    }

    pub fn remove_from_cart(&self, id_prefix: &str) -> Result<Company> {
        let id = self.resolve_id(Table::Companies, id_prefix)?;
        self.conn.execute(
            "UPDATE companies SET in_cart = 0, cart_added_at = NULL WHERE id = ?1",
            [&id],
        )?;
        self.get_company(&id)
    }

    /// Companies in the cart, most recently added first.
    pub fn list_cart_companies(&self) -> Result<Vec<Company>> {
        let mut companies = self.list_companies_where("COALESCE(in_cart, 0) = 1")?;
        companies.sort_by(|a, b| b.cart_added_at.cmp(&a.cart_added_at));
        Ok(companies)
    }

    pub fn update_last_notified(&self, company_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE companies SET last_notified_at = ?1 WHERE id = ?2",
            params![format_timestamp(&at), company_id],
        )?;
        Ok(())
    }
}
