use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{collapse_whitespace, decode, endpoint, finish, html_to_text, mentions_remote, HttpClient, Scraper};
use crate::error::Result;
use crate::models::RawJob;

const PLATFORM: &str = "lever";
const POSTINGS_API: &str = "https://api.lever.co/v0/postings";

pub struct LeverScraper {
    http: HttpClient,
    base: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeverPosting {
    id: String,
    text: String,
    #[serde(default)]
    hosted_url: String,
    #[serde(default)]
    created_at: Option<i64>, // epoch millis
    #[serde(default)]
    categories: Categories,
    #[serde(default)]
    workplace_type: Option<String>,
    #[serde(default)]
    description_plain: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Categories {
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    team: Option<String>,
    #[serde(default)]
    department: Option<String>,
}

impl LeverScraper {
    pub fn new(http: HttpClient) -> Self {
        Self::with_base(http, POSTINGS_API)
    }

    /// Scraper against another deployment of the same API.
    pub fn with_base(http: HttpClient, base: &str) -> Self {
        Self {
            http,
            base: base.to_string(),
        }
    }

    pub(crate) fn parse(body: &str) -> Result<Vec<RawJob>> {
        let postings: Vec<LeverPosting> = decode(PLATFORM, body)?;
        let jobs = postings.into_iter().map(into_raw_job).collect();
        finish(PLATFORM, jobs)
    }
}

fn into_raw_job(posting: LeverPosting) -> RawJob {
    let location = posting
        .categories
        .location
        .as_deref()
        .map(collapse_whitespace)
        .unwrap_or_default();
    let remote = match posting.workplace_type.as_deref() {
        Some(kind) if kind.eq_ignore_ascii_case("remote") => true,
        _ => mentions_remote(&location),
    };
    let description = match (posting.description_plain, posting.description) {
        (Some(plain), _) if !plain.trim().is_empty() => collapse_whitespace(&plain),
        (_, Some(html)) => html_to_text(&html),
        _ => String::new(),
    };

    RawJob {
        external_id: posting.id,
        title: posting.text,
        description,
        location,
        remote,
        department: posting
            .categories
            .department
            .or(posting.categories.team)
            .unwrap_or_default(),
        url: posting.hosted_url,
        posted_at: posting.created_at.and_then(DateTime::from_timestamp_millis),
    }
}

#[async_trait]
impl Scraper for LeverScraper {
    fn name(&self) -> &str {
        PLATFORM
    }

    async fn fetch_jobs(&self, cancel: &CancellationToken, slug: &str) -> Result<Vec<RawJob>> {
        let url = endpoint(PLATFORM, &self.base, &[slug], "mode=json")?;
        let body = self.http.get_text(PLATFORM, url.as_str(), cancel).await?;
        Self::parse(&body)
    }
}
