use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::models::Question;
use crate::retry::RetryPolicy;

const API_BASE_URL: &str = "https://api.stackexchange.com/2.3";

// The source caps page size at 100.
const PAGE_SIZE: u32 = 100;

// The source answers application errors (400/403, typically throttling) with
// advice to slow down; those get a longer pause than plain network failures.
const API_ERROR_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct QuestionsResponse {
    #[serde(default)]
    items: Vec<Question>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct SitesResponse {
    #[serde(default)]
    items: Vec<SiteItem>,
}

#[derive(Debug, Deserialize)]
struct SiteItem {
    api_site_parameter: String,
}

pub struct StackExchangeClient {
    client: Client,
    retry: RetryPolicy,
}

impl StackExchangeClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("stack-watcher/1.0")
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            retry: RetryPolicy::default(),
        }
    }

    /// Fetch all unanswered questions for a site created or active since
    /// `from_date` (unix seconds), walking pages in ascending order.
    ///
    /// Each page request gets its own retry budget; once a page exhausts it,
    /// the fetch for this site is abandoned and whatever was collected so far
    /// is returned. The caller dedups by question id, so an incomplete or
    /// overlapping result is safe.
    pub async fn fetch_unanswered(&self, site: &str, from_date: i64) -> Result<Vec<Question>> {
        let mut questions = Vec::new();
        let mut page = 1u32;

        loop {
            let response = self
                .retry
                .run_with(
                    || self.request_questions_page(site, from_date, page),
                    |e| self.retry_delay_for(e),
                )
                .await;

            let body = match response {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(
                        "Abandoning fetch for {} on page {} after retries: {}",
                        site,
                        page,
                        e
                    );
                    break;
                }
            };

            if body.items.is_empty() {
                break;
            }
            questions.extend(body.items);

            if !body.has_more {
                break;
            }
            page += 1;
        }

        Ok(questions)
    }

    async fn request_questions_page(
        &self,
        site: &str,
        from_date: i64,
        page: u32,
    ) -> Result<QuestionsResponse> {
        let response = self
            .client
            .get(format!("{}/questions/unanswered", API_BASE_URL))
            .query(&[("order", "desc"), ("sort", "activity"), ("site", site)])
            .query(&[
                ("fromdate", from_date.to_string()),
                ("pagesize", PAGE_SIZE.to_string()),
                ("page", page.to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            // The source answers 400/403 for throttling as well; both go
            // through the same bounded retry.
            return Err(AppError::StackApi(format!(
                "questions request for {} failed with HTTP {}",
                site,
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    fn retry_delay_for(&self, err: &AppError) -> Duration {
        match err {
            AppError::StackApi(_) => API_ERROR_DELAY,
            _ => self.retry.delay,
        }
    }

    /// The site catalog, as slugs.
    pub async fn fetch_sites(&self) -> Result<Vec<String>> {
        let body = self.retry.run(|| self.request_sites()).await?;
        Ok(body
            .items
            .into_iter()
            .map(|item| item.api_site_parameter)
            .collect())
    }

    async fn request_sites(&self) -> Result<SitesResponse> {
        let response = self
            .client
            .get(format!("{}/sites", API_BASE_URL))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::StackApi(format!(
                "sites request failed with HTTP {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }
}

impl Default for StackExchangeClient {
    fn default() -> Self {
        Self::new()
    }
}
