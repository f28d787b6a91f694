//! Merge a freshly scraped posting set into a company's stored jobs.
//!
//! Planning is pure: [`reconcile`] only decides what should change. The store
//! applies a plan in one transaction (`Database::apply_reconciliation`).

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::models::{Job, JobStatus, RawJob};

/// A fresh posting matched to the stored job it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Sighting {
    pub job_id: String,
    pub raw: RawJob,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Never seen before: becomes a new open job.
    pub to_insert: Vec<RawJob>,
    /// Known but closed: reopened, first-seen kept.
    pub to_reactivate: Vec<Sighting>,
    /// Known and open: only the sighting is recorded.
    pub to_refresh: Vec<Sighting>,
    /// Open but missing from this fetch: closed. Holds job ids.
    pub to_expire: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileCounts {
    pub inserted: usize,
    pub reactivated: usize,
    pub refreshed: usize,
    pub expired: usize,
}

impl ReconcilePlan {
    pub fn counts(&self) -> ReconcileCounts {
        ReconcileCounts {
            inserted: self.to_insert.len(),
            reactivated: self.to_reactivate.len(),
            refreshed: self.to_refresh.len(),
            expired: self.to_expire.len(),
        }
    }

    /// True when applying the plan changes nothing but last-seen timestamps.
    pub fn is_steady_state(&self) -> bool {
        self.to_insert.is_empty() && self.to_reactivate.is_empty() && self.to_expire.is_empty()
    }
}

/// Decide inserts, reactivations, refreshes and expirations for one company.
///
/// `existing` must be every job stored for the company, whatever its status.
/// Output order follows `fresh` (and `existing` for expirations).
pub fn reconcile(fresh: Vec<RawJob>, existing: &[Job]) -> ReconcilePlan {
    let by_external: HashMap<&str, &Job> = existing
        .iter()
        .map(|job| (job.external_id.as_str(), job))
        .collect();

    let mut plan = ReconcilePlan::default();
    let mut seen: HashSet<String> = HashSet::with_capacity(fresh.len());

    for raw in fresh {
        if !seen.insert(raw.external_id.clone()) {
            continue;
        }
        match by_external.get(raw.external_id.as_str()) {
            None => plan.to_insert.push(raw),
            Some(job) => {
                let sighting = Sighting {
                    job_id: job.id.clone(),
                    raw,
                };
                match job.status {
                    JobStatus::Closed => plan.to_reactivate.push(sighting),
                    JobStatus::Open => plan.to_refresh.push(sighting),
                }
            }
        }
    }

    plan.to_expire = existing
        .iter()
        .filter(|job| job.status == JobStatus::Open && !seen.contains(&job.external_id))
        .map(|job| job.id.clone())
        .collect();

    plan
}
