//! Batch ingestion: fetch every company's postings with bounded concurrency,
//! then reconcile each successful fetch into the store.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{Company, Job, RawJob};
use crate::reconcile::{reconcile, ReconcileCounts};
use crate::scrape::Registry;

/// Outcome of one company in a run.
#[derive(Debug)]
pub struct CompanyReport {
    pub company_id: String,
    pub company_name: String,
    pub counts: ReconcileCounts,
    /// Set when the fetch or the reconciliation failed; counts are then zero
    /// and the company's stored jobs are untouched.
    pub error: Option<Error>,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub companies: Vec<CompanyReport>,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = &CompanyReport> {
        self.companies.iter().filter(|r| r.error.is_some())
    }

    pub fn error_for(&self, company_id: &str) -> Option<&Error> {
        self.companies
            .iter()
            .find(|r| r.company_id == company_id)
            .and_then(|r| r.error.as_ref())
    }

    pub fn totals(&self) -> ReconcileCounts {
        self.companies
            .iter()
            .fold(ReconcileCounts::default(), |mut acc, r| {
                acc.inserted += r.counts.inserted;
                acc.reactivated += r.counts.reactivated;
                acc.refreshed += r.counts.refreshed;
                acc.expired += r.counts.expired;
                acc
            })
    }
}

/// New open postings found for a company in the cart since it was last notified.
#[derive(Debug)]
pub struct CartFinding {
    pub company: Company,
    pub new_jobs: Vec<Job>,
}

pub struct Ingester {
    registry: Registry,
    workers: usize,
    fetch_timeout: Duration,
}

impl Ingester {
    pub fn new(registry: Registry, workers: usize, fetch_timeout: Duration) -> Self {
        Self {
            registry,
            workers: workers.max(1),
            fetch_timeout,
        }
    }

    pub fn from_config(registry: Registry, config: &Config) -> Self {
        Self::new(registry, config.workers, config.fetch_timeout)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Fetch and reconcile a single company.
    pub async fn reconcile_company(
        &self,
        db: &mut Database,
        company_id: &str,
        cancel: &CancellationToken,
    ) -> Result<CompanyReport> {
        let company = db.get_company(company_id)?;
        let mut report = self.run(db, vec![company], cancel).await;
        Ok(report.companies.remove(0))
    }

    /// Fetch every company concurrently (at most `workers` at a time) and
    /// reconcile each one as its fetch completes.
    ///
    /// A failure is recorded against its company and never stops the batch.
    /// Reconciliation happens on this task only, so a company never has two
    /// writers; each company commits in its own transaction.
    pub async fn run(
        &self,
        db: &mut Database,
        companies: Vec<Company>,
        cancel: &CancellationToken,
    ) -> RunReport {
        let mut seen = HashSet::new();
        let companies: Vec<Company> = companies
            .into_iter()
            .filter(|c| seen.insert(c.id.clone()))
            .collect();

        let mut fetches = stream::iter(companies)
            .map(|company| async move {
                let fetched = self.fetch(&company, cancel).await;
                (company, fetched)
            })
            .buffer_unordered(self.workers);

        let mut reports = Vec::new();
        while let Some((company, fetched)) = fetches.next().await {
            // No postings from a failed fetch means "unknown", not "all closed".
            let outcome = fetched.and_then(|fresh| Self::reconcile_fetched(db, &company, fresh));

            let report = match outcome {
                Ok(counts) => {
                    info!(
                        company = %company.name,
                        inserted = counts.inserted,
                        reactivated = counts.reactivated,
                        refreshed = counts.refreshed,
                        expired = counts.expired,
                        "reconciled"
                    );
                    CompanyReport {
                        company_id: company.id,
                        company_name: company.name,
                        counts,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!(company = %company.name, platform = %company.platform, error = %e, "skipped");
                    CompanyReport {
                        company_id: company.id,
                        company_name: company.name,
                        counts: ReconcileCounts::default(),
                        error: Some(e),
                    }
                }
            };
            reports.push(report);
        }

        reports.sort_by(|a, b| a.company_name.cmp(&b.company_name));
        RunReport { companies: reports }
    }

    /// Run every company in the cart, then collect the open jobs each one
    /// gained since it was last notified and advance its notification mark
    /// to the newest job reported. Companies whose fetch failed, or that
    /// gained nothing, keep their old mark.
    pub async fn scan_cart(
        &self,
        db: &mut Database,
        cancel: &CancellationToken,
    ) -> Result<(RunReport, Vec<CartFinding>)> {
        let companies = db.list_cart_companies()?;
        let report = self.run(db, companies.clone(), cancel).await;

        let mut findings = Vec::new();
        for company in companies {
            if report.error_for(&company.id).is_some() {
                continue;
            }
            let new_jobs = db.open_jobs_first_seen_since(&company.id, company.last_notified_at)?;
            let Some(newest) = new_jobs.iter().map(|job| job.first_seen_at).max() else {
                continue;
            };
            db.update_last_notified(&company.id, newest)?;
            findings.push(CartFinding { company, new_jobs });
        }

        Ok((report, findings))
    }

    async fn fetch(&self, company: &Company, cancel: &CancellationToken) -> Result<Vec<RawJob>> {
        let scraper = self.registry.resolve(&company.platform)?;
        let token = cancel.child_token();

        match tokio::time::timeout(self.fetch_timeout, scraper.fetch_jobs(&token, &company.slug))
            .await
        {
            Ok(fetched) => fetched,
            Err(_) => {
                token.cancel();
                Err(Error::Timeout(self.fetch_timeout))
            }
        }
    }

    fn reconcile_fetched(
        db: &mut Database,
        company: &Company,
        fresh: Vec<RawJob>,
    ) -> Result<ReconcileCounts> {
        let existing = db.jobs_for_company(&company.id)?;
        let plan = reconcile(fresh, &existing);
        db.apply_reconciliation(&company.id, &plan, Utc::now())
    }
}
