use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{collapse_whitespace, decode, endpoint, finish, html_to_text, mentions_remote, HttpClient, Scraper};
use crate::error::Result;
use crate::models::RawJob;
use crate::timefmt::parse_timestamp;

const PLATFORM: &str = "ashby";
const JOB_BOARD_API: &str = "https://api.ashbyhq.com/posting-api/job-board";

pub struct AshbyScraper {
    http: HttpClient,
    base: String,
}

#[derive(Debug, Deserialize)]
struct JobBoard {
    jobs: Vec<AshbyJob>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AshbyJob {
    id: String,
    title: String,
    #[serde(default)]
    department: Option<String>,
    #[serde(default)]
    team: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    is_remote: Option<bool>,
    #[serde(default)]
    is_listed: Option<bool>,
    #[serde(default)]
    description_plain: Option<String>,
    #[serde(default)]
    description_html: Option<String>,
    #[serde(default)]
    job_url: Option<String>,
    #[serde(default)]
    apply_url: Option<String>,
    #[serde(default)]
    published_at: Option<String>,
}

impl AshbyScraper {
    pub fn new(http: HttpClient) -> Self {
        Self::with_base(http, JOB_BOARD_API)
    }

    /// Scraper against another deployment of the same API.
    pub fn with_base(http: HttpClient, base: &str) -> Self {
        Self {
            http,
            base: base.to_string(),
        }
    }

    pub(crate) fn parse(body: &str) -> Result<Vec<RawJob>> {
        let board: JobBoard = decode(PLATFORM, body)?;
        let jobs = board
            .jobs
            .into_iter()
            .filter(|job| job.is_listed != Some(false))
            .map(into_raw_job)
            .collect();
        finish(PLATFORM, jobs)
    }
}

fn into_raw_job(job: AshbyJob) -> RawJob {
    let location = job
        .location
        .as_deref()
        .map(collapse_whitespace)
        .unwrap_or_default();
    let description = match (job.description_plain, job.description_html) {
        (Some(plain), _) if !plain.trim().is_empty() => collapse_whitespace(&plain),
        (_, Some(html)) => html_to_text(&html),
        _ => String::new(),
    };

    RawJob {
        external_id: job.id,
        title: job.title,
        description,
        remote: job.is_remote.unwrap_or_else(|| mentions_remote(&location)),
        location,
        department: job.department.or(job.team).unwrap_or_default(),
        url: job.job_url.or(job.apply_url).unwrap_or_default(),
        posted_at: job.published_at.and_then(|s| parse_timestamp(&s).ok()),
    }
}

#[async_trait]
impl Scraper for AshbyScraper {
    fn name(&self) -> &str {
        PLATFORM
    }

    async fn fetch_jobs(&self, cancel: &CancellationToken, slug: &str) -> Result<Vec<RawJob>> {
        let url = endpoint(PLATFORM, &self.base, &[slug], "includeCompensation=false")?;
        let body = self.http.get_text(PLATFORM, url.as_str(), cancel).await?;
        Self::parse(&body)
    }
}
