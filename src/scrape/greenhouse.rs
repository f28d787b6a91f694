use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{collapse_whitespace, decode, endpoint, finish, html_to_text, mentions_remote, HttpClient, Scraper};
use crate::error::Result;
use crate::models::RawJob;
use crate::timefmt::parse_timestamp;

const PLATFORM: &str = "greenhouse";
const BOARDS_API: &str = "https://boards-api.greenhouse.io/v1/boards";

pub struct GreenhouseScraper {
    http: HttpClient,
    base: String,
}

#[derive(Debug, Deserialize)]
struct BoardResponse {
    jobs: Vec<GreenhouseJob>,
}

#[derive(Debug, Deserialize)]
struct GreenhouseJob {
    id: u64,
    title: String,
    #[serde(default)]
    absolute_url: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    location: Option<Named>,
    #[serde(default)]
    departments: Vec<Named>,
    #[serde(default)]
    first_published: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Named {
    #[serde(default)]
    name: String,
}

impl GreenhouseScraper {
    pub fn new(http: HttpClient) -> Self {
        Self::with_base(http, BOARDS_API)
    }

    /// Scraper against another deployment of the same API.
    pub fn with_base(http: HttpClient, base: &str) -> Self {
        Self {
            http,
            base: base.to_string(),
        }
    }

    pub(crate) fn parse(body: &str) -> Result<Vec<RawJob>> {
        let board: BoardResponse = decode(PLATFORM, body)?;
        let jobs = board.jobs.into_iter().map(into_raw_job).collect();
        finish(PLATFORM, jobs)
    }
}

fn into_raw_job(job: GreenhouseJob) -> RawJob {
    let location = job
        .location
        .map(|l| collapse_whitespace(&l.name))
        .unwrap_or_default();
    // content arrives HTML-escaped: one pass unescapes, the second strips tags
    let description = job
        .content
        .map(|c| html_to_text(&html_to_text(&c)))
        .unwrap_or_default();
    let department = job
        .departments
        .into_iter()
        .map(|d| d.name)
        .find(|name| !name.trim().is_empty())
        .unwrap_or_default();
    let posted_at = job
        .first_published
        .or(job.updated_at)
        .and_then(|s| parse_timestamp(&s).ok());

    RawJob {
        external_id: job.id.to_string(),
        remote: mentions_remote(&location) || mentions_remote(&job.title),
        title: job.title,
        description,
        location,
        department,
        url: job.absolute_url,
        posted_at,
    }
}

#[async_trait]
impl Scraper for GreenhouseScraper {
    fn name(&self) -> &str {
        PLATFORM
    }

    async fn fetch_jobs(&self, cancel: &CancellationToken, slug: &str) -> Result<Vec<RawJob>> {
        let url = endpoint(PLATFORM, &self.base, &[slug, "jobs"], "content=true")?;
        let body = self.http.get_text(PLATFORM, url.as_str(), cancel).await?;
        Self::parse(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::scrape::tests::{local_client, serve_once};
    use chrono::{TimeZone, Utc};

    const BOARD: &str = r#"{
      "jobs": [
        {
          "id": 4012345,
          "title": "Senior Backend Engineer",
          "absolute_url": "https://boards.greenhouse.io/acme/jobs/4012345",
          "updated_at": "2024-02-01T10:00:00-05:00",
          "first_published": "2024-01-15T09:00:00-05:00",
          "location": { "name": "Remote - US" },
          "departments": [{ "id": 1, "name": "Engineering" }],
          "content": "&lt;p&gt;We build &lt;strong&gt;payments&lt;/strong&gt;.&lt;/p&gt;"
        },
        {
          "id": 4012346,
          "title": "Office Manager",
          "absolute_url": "https://boards.greenhouse.io/acme/jobs/4012346",
          "location": { "name": "Berlin" },
          "departments": []
        }
      ],
      "meta": { "total": 2 }
    }"#;

    #[test]
    fn test_parse_board() {
        let jobs = GreenhouseScraper::parse(BOARD).unwrap();
        assert_eq!(jobs.len(), 2);

        let first = &jobs[0];
        assert_eq!(first.external_id, "4012345");
        assert_eq!(first.title, "Senior Backend Engineer");
        assert_eq!(first.location, "Remote - US");
        assert!(first.remote);
        assert_eq!(first.department, "Engineering");
        assert_eq!(first.description, "We build payments.");
        assert_eq!(
            first.posted_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap())
        );

        let second = &jobs[1];
        assert!(!second.remote);
        assert_eq!(second.description, "");
        assert_eq!(second.posted_at, None);
    }

    #[test]
    fn test_empty_board_is_not_an_error() {
        assert!(GreenhouseScraper::parse(r#"{"jobs": []}"#).unwrap().is_empty());
    }

    #[test]
    fn test_unexpected_shape_is_parse_error() {
        assert!(matches!(
            GreenhouseScraper::parse(r#"{"error": "not found"}"#),
            Err(Error::Parse { .. })
        ));
        assert!(matches!(
            GreenhouseScraper::parse("<html>maintenance</html>"),
            Err(Error::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_requests_board_and_parses_it() {
        let (base, request) = serve_once("200 OK", BOARD).await;
        let scraper = GreenhouseScraper::with_base(local_client(), &format!("{}/v1/boards", base));
        let jobs = scraper
            .fetch_jobs(&CancellationToken::new(), "acme")
            .await
            .unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(
            request.await.unwrap(),
            "GET /v1/boards/acme/jobs?content=true HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn test_garbage_success_body_is_parse_error() {
        let (base, _) = serve_once("200 OK", "<html>maintenance</html>").await;
        let scraper = GreenhouseScraper::with_base(local_client(), &base);
        let result = scraper.fetch_jobs(&CancellationToken::new(), "acme").await;
        assert!(matches!(result, Err(Error::Parse { ref platform, .. }) if platform == "greenhouse"));
    }

    #[tokio::test]
    async fn test_forbidden_board_is_transport_error() {
        let (base, _) = serve_once("403 Forbidden", "").await;
        let scraper = GreenhouseScraper::with_base(local_client(), &base);
        let result = scraper.fetch_jobs(&CancellationToken::new(), "acme").await;
        assert!(matches!(result, Err(Error::Transport { .. })));
    }
}
