//! Grafana organization membership client.
//!
//! Scopes are Grafana organization names and subjects are user emails. Grafana
//! holds a single role per org membership, so applying a grant for a user who
//! is already in the org updates the role in place, and revoking only removes
//! the user when the revoked role is still the one they hold.

use std::{collections::BTreeSet, time::Duration};

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, info};
use url::Url;

use super::{Grant, PermissionClient, PermissionError};
use crate::{Result, membership::normalize_id};

const ORGS_PER_PAGE: usize = 1000;

/// Credentials for the Grafana HTTP API.
#[derive(Debug, Clone)]
pub enum GrafanaAuth {
    /// Server admin basic auth; required to manage users across orgs.
    Basic { user: String, password: String },
    /// Service account or API token.
    Token(String),
}

#[derive(Debug, Deserialize)]
struct Org {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrgUser {
    user_id: u64,
    #[serde(default)]
    email: String,
    #[serde(default)]
    login: String,
    role: String,
}

impl OrgUser {
    fn subject(&self) -> String {
        if self.email.trim().is_empty() {
            normalize_id(&self.login)
        } else {
            normalize_id(&self.email)
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddOrgUser<'a> {
    login_or_email: &'a str,
    role: &'a str,
}

#[derive(Serialize)]
struct UpdateOrgUser<'a> {
    role: &'a str,
}

/// [`PermissionClient`] for Grafana organization roles.
#[derive(Debug, Clone)]
pub struct GrafanaClient {
    http: reqwest::Client,
    base_url: Url,
    auth: GrafanaAuth,
}

impl GrafanaClient {
    /// Create a client for the Grafana instance at `base_url`.
    pub fn new(base_url: &str, auth: GrafanaAuth) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| PermissionError::FetchFailed {
            reason: format!("invalid Grafana URL {base_url}: {e}"),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(PermissionError::FetchFailed {
                reason: format!("{base_url} cannot be used as a base URL"),
            }
            .into());
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PermissionError::FetchFailed {
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            base_url,
            auth,
        })
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        let request = self.http.request(method, url);
        match &self.auth {
            GrafanaAuth::Basic { user, password } => request.basic_auth(user, Some(password)),
            GrafanaAuth::Token(token) => request.bearer_auth(token),
        }
    }

    async fn send(request: RequestBuilder) -> std::result::Result<reqwest::Response, String> {
        let response = request.send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(format!("Grafana returned {status}: {body}"))
    }

    async fn send_json<T: DeserializeOwned>(
        request: RequestBuilder,
    ) -> std::result::Result<T, String> {
        Self::send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| format!("invalid Grafana response: {e}"))
    }

    async fn list_orgs(&self) -> std::result::Result<Vec<Org>, String> {
        let mut orgs = Vec::new();
        for page in 1.. {
            let batch: Vec<Org> = Self::send_json(
                self.request(Method::GET, &["api", "orgs"])
                    .query(&[("perpage", ORGS_PER_PAGE), ("page", page)]),
            )
            .await?;
            let done = batch.len() < ORGS_PER_PAGE;
            orgs.extend(batch);
            if done {
                break;
            }
        }
        Ok(orgs)
    }

    async fn list_org_users(&self, org_id: u64) -> std::result::Result<Vec<OrgUser>, String> {
        let org_id = org_id.to_string();
        Self::send_json(self.request(Method::GET, &["api", "orgs", &org_id, "users"])).await
    }

    async fn find_org(&self, grant: &Grant) -> Result<u64> {
        let response = self
            .request(Method::GET, &["api", "orgs", "name", &grant.scope])
            .send()
            .await
            .map_err(|e| operation_failed(grant, e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(PermissionError::ScopeNotFound {
                scope: grant.scope.clone(),
            }
            .into());
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(operation_failed(grant, format!("Grafana returned {status}: {body}")));
        }
        let org: Org = response
            .json()
            .await
            .map_err(|e| operation_failed(grant, format!("invalid Grafana response: {e}")))?;
        Ok(org.id)
    }

    async fn find_member(&self, org_id: u64, grant: &Grant) -> Result<Option<OrgUser>> {
        let users = self
            .list_org_users(org_id)
            .await
            .map_err(|reason| operation_failed(grant, reason))?;
        let subject = normalize_id(&grant.subject);
        Ok(users.into_iter().find(|u| u.subject() == subject))
    }
}

fn operation_failed(grant: &Grant, reason: String) -> crate::Error {
    PermissionError::GrantOperationFailed {
        grant: grant.clone(),
        reason,
    }
    .into()
}

#[async_trait]
impl PermissionClient for GrafanaClient {
    async fn list_current_grants(&self) -> Result<BTreeSet<Grant>> {
        let fetch_failed = |reason: String| PermissionError::FetchFailed { reason };

        let orgs = self.list_orgs().await.map_err(fetch_failed)?;
        let mut grants = BTreeSet::new();
        for org in &orgs {
            let users = self.list_org_users(org.id).await.map_err(fetch_failed)?;
            grants.extend(
                users
                    .iter()
                    .map(|u| Grant::new(u.subject(), u.role.clone(), org.name.clone())),
            );
        }
        debug!(orgs = orgs.len(), grants = grants.len(), "Fetched Grafana grants");
        Ok(grants)
    }

    async fn apply_grant(&self, grant: &Grant) -> Result<()> {
        let org_id = self.find_org(grant).await?;
        let org = org_id.to_string();

        match self.find_member(org_id, grant).await? {
            Some(member) if member.role == grant.role => {
                debug!(%grant, "Grant already present");
            }
            Some(member) => {
                let user_id = member.user_id.to_string();
                Self::send(
                    self.request(Method::PATCH, &["api", "orgs", &org, "users", &user_id])
                        .json(&UpdateOrgUser { role: &grant.role }),
                )
                .await
                .map_err(|reason| operation_failed(grant, reason))?;
                info!(%grant, previous_role = %member.role, "Updated Grafana org role");
            }
            None => {
                Self::send(
                    self.request(Method::POST, &["api", "orgs", &org, "users"])
                        .json(&AddOrgUser {
                            login_or_email: &grant.subject,
                            role: &grant.role,
                        }),
                )
                .await
                .map_err(|reason| operation_failed(grant, reason))?;
                info!(%grant, "Added user to Grafana org");
            }
        }
        Ok(())
    }

    async fn revoke_grant(&self, grant: &Grant) -> Result<()> {
        let org_id = self.find_org(grant).await?;

        match self.find_member(org_id, grant).await? {
            None => {
                debug!(%grant, "User already absent from org");
            }
            Some(member) if member.role != grant.role => {
                debug!(
                    %grant,
                    current_role = %member.role,
                    "Role already replaced, nothing to revoke"
                );
            }
            Some(member) => {
                let org = org_id.to_string();
                let user_id = member.user_id.to_string();
                Self::send(self.request(Method::DELETE, &["api", "orgs", &org, "users", &user_id]))
                    .await
                    .map_err(|reason| operation_failed(grant, reason))?;
                info!(%grant, "Removed user from Grafana org");
            }
        }
        Ok(())
    }
}
