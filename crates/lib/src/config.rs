//! Service configuration.
//!
//! The configuration is a single JSON document loaded once at startup:
//!
//! ```json
//! {
//!   "directory": {
//!     "type": "google",
//!     "domain": "example.com",
//!     "token_file": "/run/secrets/google-token"
//!   },
//!   "grafana": {
//!     "url": "https://grafana.example.com",
//!     "auth": { "type": "token", "token": "glsa_..." }
//!   },
//!   "rules": [
//!     { "groups": ["eng@example.com"], "role": "Editor", "scopes": ["Main Org."] }
//!   ],
//!   "sync": { "interval_secs": 300, "cycle_timeout_secs": 600 },
//!   "role_ranking": ["Viewer", "Editor", "Admin"],
//!   "ignored_subjects": ["admin@localhost"],
//!   "dry_run": false
//! }
//! ```
//!
//! Invalid configuration is the only fatal error in the service.

use std::{path::PathBuf, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::{
    Error, Result,
    directory::{DirectoryClient, GoogleAuth, GoogleDirectory, StaticDirectory},
    permission::{GrafanaAuth, GrafanaClient, PermissionClient},
    reconcile::{ReconciliationEngine, RoleRanking},
    rules::{Rule, RuleConfig, compile_rules},
    scheduler::{SyncScheduler, SyncSchedulerConfig},
};

/// Errors raised while loading or validating configuration.
#[non_exhaustive]
#[derive(Debug, ThisError)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid JSON or does not match the schema.
    #[error("Failed to parse configuration: {source}")]
    Parse {
        #[source]
        source: serde_json::Error,
    },

    /// The configuration parsed but is semantically invalid.
    #[error("Invalid configuration: {reason}")]
    Invalid { reason: String },

    /// A rule pattern is not a valid glob.
    #[error("Invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

impl ConfigError {
    /// Check if the file could not be read or parsed.
    pub fn is_load_error(&self) -> bool {
        matches!(self, ConfigError::Read { .. } | ConfigError::Parse { .. })
    }

    /// Check if the configuration parsed but failed validation.
    pub fn is_validation_error(&self) -> bool {
        matches!(self, ConfigError::Invalid { .. } | ConfigError::Pattern { .. })
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Where group membership comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DirectoryConfig {
    /// Google Workspace via the Admin SDK Directory API.
    Google {
        domain: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_file: Option<PathBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page_size: Option<u32>,
    },
    /// A JSON snapshot of groups, re-read at the start of every cycle.
    File { path: PathBuf },
}

/// Credentials for the Grafana HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GrafanaAuthConfig {
    Basic { user: String, password: String },
    Token { token: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrafanaConfig {
    pub url: String,
    pub auth: GrafanaAuthConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub interval_secs: u64,
    pub cycle_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            cycle_timeout_secs: 600,
        }
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub directory: DirectoryConfig,
    pub grafana: GrafanaConfig,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub sync: SyncConfig,
    /// Roles from least to most privileged; defaults to Viewer, Editor, Admin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_ranking: Option<Vec<String>>,
    #[serde(default)]
    pub ignored_subjects: Vec<String>,
    #[serde(default)]
    pub dry_run: bool,
}

impl Config {
    /// Read, parse and validate a configuration file.
    pub fn load(path: impl Into<PathBuf>) -> std::result::Result<Self, ConfigError> {
        let path = path.into();
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json(&raw)?;
        tracing::debug!(path = %path.display(), rules = config.rules.len(), "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate a configuration document.
    pub fn from_json(raw: &str) -> std::result::Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|source| ConfigError::Parse { source })?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything that can be checked without network access.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        match &self.directory {
            DirectoryConfig::Google {
                domain,
                token,
                token_file,
                page_size,
                ..
            } => {
                if domain.trim().is_empty() {
                    return invalid("directory.domain must not be empty");
                }
                if token.is_some() == token_file.is_some() {
                    return invalid("directory needs exactly one of token or token_file");
                }
                if matches!(page_size, Some(0)) {
                    return invalid("directory.page_size must be positive");
                }
            }
            DirectoryConfig::File { .. } => {}
        }

        if self.grafana.url.trim().is_empty() {
            return invalid("grafana.url must not be empty");
        }
        if self.sync.interval_secs == 0 {
            return invalid("sync.interval_secs must be positive");
        }
        if self.sync.cycle_timeout_secs == 0 {
            return invalid("sync.cycle_timeout_secs must be positive");
        }
        if self.rules.is_empty() {
            return invalid("at least one rule is required");
        }

        let rules = compile_rules(&self.rules)?;
        if let Some(ranking) = &self.role_ranking {
            let ranking = RoleRanking::new(ranking.iter().map(|r| r.trim()));
            if let Some(rule) = rules.iter().find(|r| ranking.rank(r.role()).is_none()) {
                return Err(ConfigError::Invalid {
                    reason: format!("role {} is missing from role_ranking", rule.role()),
                });
            }
        }
        Ok(())
    }

    /// Compiled rules.
    pub fn rules(&self) -> std::result::Result<Vec<Rule>, ConfigError> {
        compile_rules(&self.rules)
    }

    /// The reconciliation engine described by this configuration.
    pub fn engine(&self) -> std::result::Result<ReconciliationEngine, ConfigError> {
        let mut engine = ReconciliationEngine::new(self.rules()?)
            .with_ignored_subjects(&self.ignored_subjects)
            .with_dry_run(self.dry_run);
        if let Some(ranking) = &self.role_ranking {
            let ranking = RoleRanking::new(ranking.iter().map(|r| r.trim()));
            engine = engine.with_role_ranking(ranking);
        }
        Ok(engine)
    }

    pub fn scheduler_config(&self) -> SyncSchedulerConfig {
        SyncSchedulerConfig {
            interval: Duration::from_secs(self.sync.interval_secs),
            cycle_timeout: Duration::from_secs(self.sync.cycle_timeout_secs),
        }
    }

    /// Create the configured directory client.
    pub async fn directory_client(&self) -> Result<Arc<dyn DirectoryClient>> {
        match &self.directory {
            DirectoryConfig::Google {
                domain,
                token,
                token_file,
                base_url,
                page_size,
            } => {
                let auth = match (token, token_file) {
                    (Some(token), _) => GoogleAuth::Token(token.clone()),
                    (None, Some(path)) => GoogleAuth::TokenFile(path.clone()),
                    (None, None) => {
                        return Err(ConfigError::Invalid {
                            reason: "directory needs exactly one of token or token_file"
                                .to_string(),
                        }
                        .into());
                    }
                };
                let mut client = GoogleDirectory::new(domain.clone(), auth)?;
                if let Some(base_url) = base_url {
                    client = client.with_base_url(base_url)?;
                }
                if let Some(page_size) = page_size {
                    client = client.with_page_size(*page_size);
                }
                Ok(Arc::new(client))
            }
            DirectoryConfig::File { path } => {
                Ok(Arc::new(StaticDirectory::load_from_file(path).await?))
            }
        }
    }

    /// Create the configured permission client.
    pub fn permission_client(&self) -> Result<Arc<dyn PermissionClient>> {
        let auth = match &self.grafana.auth {
            GrafanaAuthConfig::Basic { user, password } => GrafanaAuth::Basic {
                user: user.clone(),
                password: password.clone(),
            },
            GrafanaAuthConfig::Token { token } => GrafanaAuth::Token(token.clone()),
        };
        Ok(Arc::new(GrafanaClient::new(&self.grafana.url, auth)?))
    }

    /// Wire up a scheduler from this configuration.
    pub async fn scheduler(&self) -> Result<SyncScheduler> {
        Ok(SyncScheduler::new(
            self.directory_client().await?,
            self.permission_client()?,
            self.engine()?,
            self.scheduler_config(),
        ))
    }
}

fn invalid<T>(reason: &str) -> std::result::Result<T, ConfigError> {
    Err(ConfigError::Invalid {
        reason: reason.to_string(),
    })
}
