//! Google Workspace directory client.
//!
//! Talks to the Admin SDK Directory API (`groups.list`, `members.list`) with a
//! bearer token. Pages are followed through `nextPageToken`; HTTP 429 and 5xx
//! responses are retried with exponential backoff, honoring `Retry-After`.

use std::{path::PathBuf, time::Duration};

use async_trait::async_trait;
use reqwest::{StatusCode, header::HeaderMap};
use serde::{Deserialize, de::DeserializeOwned};
use tracing::{debug, warn};
use url::Url;

use super::{DirectoryClient, DirectoryError};
use crate::Result;

/// Default Admin SDK Directory API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://admin.googleapis.com/admin/directory/v1";

/// Default number of entries requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// Source of the OAuth bearer token used for directory requests.
#[derive(Debug, Clone)]
pub enum GoogleAuth {
    /// A fixed access token.
    Token(String),
    /// A file holding the current access token, re-read on every request so
    /// an external refresher can rotate it.
    TokenFile(PathBuf),
}

impl GoogleAuth {
    async fn bearer_token(&self) -> Result<String> {
        match self {
            GoogleAuth::Token(token) => Ok(token.clone()),
            GoogleAuth::TokenFile(path) => {
                let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
                    DirectoryError::FetchFailed {
                        operation: "read token".to_string(),
                        reason: format!("{}: {e}", path.display()),
                    }
                })?;
                Ok(raw.trim().to_string())
            }
        }
    }
}

/// Retry behavior for throttled or failing directory requests.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay, including `Retry-After`.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(32),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupsPage {
    #[serde(default)]
    groups: Vec<GroupEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroupEntry {
    #[serde(default)]
    email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MembersPage {
    #[serde(default)]
    members: Vec<MemberEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MemberEntry {
    email: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// [`DirectoryClient`] for the Google Admin SDK Directory API.
#[derive(Debug, Clone)]
pub struct GoogleDirectory {
    http: reqwest::Client,
    base_url: Url,
    domain: String,
    auth: GoogleAuth,
    page_size: u32,
    retry: RetryPolicy,
}

impl GoogleDirectory {
    /// Create a client for all groups of `domain`.
    pub fn new(domain: impl Into<String>, auth: GoogleAuth) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DirectoryError::FetchFailed {
                operation: "create http client".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            base_url: parse_base_url(DEFAULT_BASE_URL)?,
            domain: domain.into(),
            auth,
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryPolicy::default(),
        })
    }

    /// Point the client at a different API endpoint.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        self.base_url = parse_base_url(base_url)?;
        Ok(self)
    }

    /// Number of entries requested per page.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Override the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // parse_base_url guarantees a hierarchical URL, so segments are available.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Fetch every page starting at `url`, handing each decoded page to
    /// `on_page`, which returns the next page token.
    async fn fetch_all<P, F>(&self, operation: &str, url: Url, mut on_page: F) -> Result<()>
    where
        P: DeserializeOwned,
        F: FnMut(P) -> Option<String>,
    {
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let mut page_url = url.clone();
            {
                let mut query = page_url.query_pairs_mut();
                query.append_pair("maxResults", &self.page_size.to_string());
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }

            let page: P = self.get_json(operation, page_url).await?;
            pages += 1;
            match on_page(page) {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => {
                    debug!(operation, pages, "Fetched all directory pages");
                    return Ok(());
                }
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, operation: &str, url: Url) -> Result<T> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let token = self.auth.bearer_token().await?;
            let response = match self.http.get(url.clone()).bearer_auth(token).send().await {
                Ok(response) => response,
                Err(e) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(operation, attempt, ?delay, "Directory request failed: {e}. Retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(e) => {
                    return Err(DirectoryError::FetchFailed {
                        operation: operation.to_string(),
                        reason: e.to_string(),
                    }
                    .into());
                }
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if attempt >= self.retry.max_attempts {
                    let err = if status == StatusCode::TOO_MANY_REQUESTS {
                        DirectoryError::RateLimited {
                            operation: operation.to_string(),
                            attempts: attempt,
                        }
                    } else {
                        DirectoryError::FetchFailed {
                            operation: operation.to_string(),
                            reason: format!("server returned {status}"),
                        }
                    };
                    return Err(err.into());
                }
                let delay = retry_after(response.headers())
                    .map(|d| d.min(self.retry.max_delay))
                    .unwrap_or_else(|| self.retry.backoff(attempt));
                warn!(operation, %status, attempt, ?delay, "Directory request throttled, retrying");
                tokio::time::sleep(delay).await;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(DirectoryError::FetchFailed {
                    operation: operation.to_string(),
                    reason: format!("server returned {status}: {body}"),
                }
                .into());
            }

            return response.json::<T>().await.map_err(|e| {
                DirectoryError::InvalidResponse {
                    operation: operation.to_string(),
                    reason: e.to_string(),
                }
                .into()
            });
        }
    }
}

#[async_trait]
impl DirectoryClient for GoogleDirectory {
    async fn list_groups(&self) -> Result<Vec<String>> {
        let mut url = self.endpoint(&["groups"]);
        url.query_pairs_mut().append_pair("domain", &self.domain);

        let mut groups = Vec::new();
        self.fetch_all("list groups", url, |page: GroupsPage| {
            groups.extend(page.groups.into_iter().map(|g| g.email));
            page.next_page_token
        })
        .await?;
        Ok(groups)
    }

    async fn list_direct_members(&self, group: &str) -> Result<Vec<String>> {
        let url = self.endpoint(&["groups", group, "members"]);

        let mut members = Vec::new();
        self.fetch_all("list members", url, |page: MembersPage| {
            for member in page.members {
                match member.email {
                    Some(email) if !email.trim().is_empty() => members.push(email),
                    _ => debug!(
                        group,
                        kind = member.kind.as_deref().unwrap_or("unknown"),
                        "Skipping member without email"
                    ),
                }
            }
            page.next_page_token
        })
        .await?;
        Ok(members)
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| DirectoryError::FetchFailed {
        operation: "parse base url".to_string(),
        reason: format!("{raw}: {e}"),
    })?;
    if url.cannot_be_a_base() {
        return Err(DirectoryError::FetchFailed {
            operation: "parse base url".to_string(),
            reason: format!("{raw} cannot be used as a base URL"),
        }
        .into());
    }
    Ok(url)
}

/// Parse a `Retry-After` header given in seconds.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
