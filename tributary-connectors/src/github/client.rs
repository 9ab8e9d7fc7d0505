//! Minimal GitHub REST client

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use tributary_core::{ExecutionContext, ScriptError};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// GitHub caps `per_page` at 100
const PER_PAGE: usize = 100;

/// Upper bound on pages fetched for one window
const MAX_PAGES: usize = 100;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Per data-source settings read from the execution context env
#[derive(Debug, Clone, PartialEq)]
pub struct GithubConfig {
    pub token: String,
    pub owner: String,
    pub repositories: Vec<String>,
    pub api_url: String,
}

impl GithubConfig {
    pub fn from_context(ctx: &ExecutionContext) -> Result<Self, ScriptError> {
        let required = |key: &str| {
            ctx.env(key)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| ScriptError::Config(key.to_string()))
        };

        let token = required("GITHUB_TOKEN")?;
        let owner = required("GITHUB_OWNER")?;
        let repositories: Vec<String> = required("GITHUB_REPOSITORIES")?
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect();
        if repositories.is_empty() {
            return Err(ScriptError::Config("GITHUB_REPOSITORIES".to_string()));
        }

        let api_url = ctx
            .env("GITHUB_API_URL")
            .unwrap_or(DEFAULT_API_URL)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            token,
            owner,
            repositories,
            api_url,
        })
    }
}

/// Shared HTTP client; cheap to clone
#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
}

impl GithubClient {
    pub fn new() -> reqwest::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );

        let http = reqwest::Client::builder()
            .user_agent(concat!("tributary/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http })
    }

    /// GET a single JSON document
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        config: &GithubConfig,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ScriptError> {
        let url = format!("{}{}", config.api_url, path);
        let response = self
            .http
            .get(&url)
            .header(AUTHORIZATION, format!("Bearer {}", config.token))
            .query(query)
            .send()
            .await
            .map_err(|e| ScriptError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScriptError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ScriptError::Decode(e.to_string()))
    }

    /// GET every page of a list endpoint.
    ///
    /// Stops at the first short page.
    pub async fn get_paged<T: DeserializeOwned>(
        &self,
        config: &GithubConfig,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, ScriptError> {
        let mut items = Vec::new();

        for page in 1..=MAX_PAGES {
            let mut page_query = query.to_vec();
            page_query.push(("per_page", PER_PAGE.to_string()));
            page_query.push(("page", page.to_string()));

            let batch: Vec<T> = self.get_json(config, path, &page_query).await?;
            let len = batch.len();
            items.extend(batch);
            debug!(path = %path, page, len, "Fetched page");

            if len < PER_PAGE {
                return Ok(items);
            }
        }

        warn!(path = %path, pages = MAX_PAGES, "Page limit reached, window truncated");
        Ok(items)
    }
}

/// ISO-8601 timestamp in the form GitHub expects for `since`/`until`
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
