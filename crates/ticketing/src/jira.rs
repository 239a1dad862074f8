//! Jira REST API v2 tracker.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::TicketError;
use crate::{sanitize_label, TicketRef, TicketRequest, TicketTracker};

const ENV_JIRA_URL: &str = "JIRA_URL";
const ENV_JIRA_USERNAME: &str = "JIRA_USERNAME";
const ENV_JIRA_API_TOKEN: &str = "JIRA_API_TOKEN";
const ENV_JIRA_PROJECT: &str = "JIRA_PROJECT";
const ENV_JIRA_ISSUE_TYPE: &str = "JIRA_ISSUE_TYPE";
const ENV_JIRA_ASSIGNEE: &str = "JIRA_ASSIGNEE";
const ENV_JIRA_TIMEOUT_SECS: &str = "JIRA_TIMEOUT_SECS";

/// Jira rejects summaries longer than this.
pub const MAX_SUMMARY_CHARS: usize = 250;

pub const DEFAULT_PROJECT: &str = "DCOPS";
pub const DEFAULT_ISSUE_TYPE: &str = "Task";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection and project settings for [`JiraTracker`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JiraConfig {
    /// Instance base URL, e.g. `https://example.atlassian.net`
    pub url: String,
    /// Account name (the email address on Atlassian Cloud)
    pub username: String,
    /// API token
    pub api_token: String,
    /// Project tickets are filed in
    pub project_key: String,
    /// Issue type name
    pub issue_type: String,
    /// Default assignee, left unassigned when `None`
    pub assignee: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for JiraConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            api_token: String::new(),
            project_key: DEFAULT_PROJECT.to_string(),
            issue_type: DEFAULT_ISSUE_TYPE.to_string(),
            assignee: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl JiraConfig {
    /// Read settings from `JIRA_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Self {
            url: var(ENV_JIRA_URL).unwrap_or_default(),
            username: var(ENV_JIRA_USERNAME).unwrap_or_default(),
            api_token: var(ENV_JIRA_API_TOKEN).unwrap_or_default(),
            project_key: var(ENV_JIRA_PROJECT).unwrap_or(defaults.project_key),
            issue_type: var(ENV_JIRA_ISSUE_TYPE).unwrap_or(defaults.issue_type),
            assignee: var(ENV_JIRA_ASSIGNEE),
            timeout_secs: var(ENV_JIRA_TIMEOUT_SECS)
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_secs),
        }
    }

    /// Name of the first missing required setting, if any.
    #[must_use]
    pub fn missing(&self) -> Option<&'static str> {
        [
            (ENV_JIRA_URL, &self.url),
            (ENV_JIRA_USERNAME, &self.username),
            (ENV_JIRA_API_TOKEN, &self.api_token),
            (ENV_JIRA_PROJECT, &self.project_key),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }
}

/// Creates issues through `POST /rest/api/2/issue` with basic auth.
pub struct JiraTracker {
    config: JiraConfig,
    client: reqwest::Client,
}

impl JiraTracker {
    /// Create a tracker from `JIRA_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let config = JiraConfig::from_env();
        if config.missing().is_none() {
            debug!(project = %config.project_key, "Jira ticketing enabled");
        } else {
            debug!("Jira ticketing disabled (JIRA_URL/JIRA_USERNAME/JIRA_API_TOKEN not set)");
        }
        Self::new(config)
    }

    #[must_use]
    pub fn new(mut config: JiraConfig) -> Self {
        config.url = config.url.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self { config, client }
    }

    #[must_use]
    pub const fn config(&self) -> &JiraConfig {
        &self.config
    }

    /// Browse URL for an issue key.
    #[must_use]
    pub fn browse_url(&self, key: &str) -> String {
        format!("{}/browse/{key}", self.config.url)
    }

    fn payload<'a>(&'a self, request: &'a TicketRequest) -> IssuePayload<'a> {
        IssuePayload {
            fields: IssueFields {
                project: KeyRef {
                    key: request
                        .project_key
                        .as_deref()
                        .unwrap_or(&self.config.project_key),
                },
                summary: truncate_chars(&request.summary, MAX_SUMMARY_CHARS),
                description: &request.description,
                issuetype: NameRef {
                    name: &self.config.issue_type,
                },
                priority: NameRef {
                    name: request.priority.as_str(),
                },
                assignee: self
                    .config
                    .assignee
                    .as_deref()
                    .map(|name| NameRef { name }),
                labels: request
                    .labels
                    .iter()
                    .filter_map(|label| sanitize_label(label))
                    .collect(),
            },
        }
    }
}

#[async_trait]
impl TicketTracker for JiraTracker {
    fn name(&self) -> &'static str {
        "jira"
    }

    fn enabled(&self) -> bool {
        self.config.missing().is_none()
    }

    async fn create_ticket(&self, request: &TicketRequest) -> Result<TicketRef, TicketError> {
        if let Some(missing) = self.config.missing() {
            return Err(TicketError::NotConfigured(format!("{missing} not set")));
        }

        let payload = self.payload(request);
        debug!(
            tracker = "jira",
            project = %payload.fields.project.key,
            summary = %payload.fields.summary,
            labels = ?payload.fields.labels,
            "Creating issue"
        );

        let response = self
            .client
            .post(format!("{}/rest/api/2/issue", self.config.url))
            .basic_auth(&self.config.username, Some(&self.config.api_token))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let created: CreatedIssue = response
                .json()
                .await
                .map_err(|e| TicketError::InvalidResponse(e.to_string()))?;
            let url = self.browse_url(&created.key);
            info!(tracker = "jira", ticket_key = %created.key, "Issue created");
            return Ok(TicketRef {
                key: created.key,
                url,
            });
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body);
        warn!(
            tracker = "jira",
            status = %status,
            error = %message,
            "Jira issue creation failed"
        );

        Err(match status.as_u16() {
            401 => TicketError::Unauthorized(message),
            403 => TicketError::Forbidden(message),
            code => TicketError::Rejected {
                status: code,
                message,
            },
        })
    }
}

/// Cut `s` to at most `max` characters on a char boundary.
fn truncate_chars(s: &str, max: usize) -> &str {
    s.char_indices().nth(max).map_or(s, |(idx, _)| &s[..idx])
}

/// Flatten Jira's `{errorMessages, errors}` body into one line, or fall back to
/// the raw body.
fn error_message(body: &str) -> String {
    let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) else {
        return if body.trim().is_empty() {
            "empty response".to_string()
        } else {
            body.trim().to_string()
        };
    };

    let mut parts = parsed.error_messages;
    let mut fields: Vec<_> = parsed.errors.into_iter().collect();
    fields.sort();
    parts.extend(fields.into_iter().map(|(field, msg)| format!("{field}: {msg}")));

    if parts.is_empty() {
        body.trim().to_string()
    } else {
        parts.join("; ")
    }
}

// =============================================================================
// Jira API types
// =============================================================================

#[derive(Debug, Serialize)]
struct IssuePayload<'a> {
    fields: IssueFields<'a>,
}

#[derive(Debug, Serialize)]
struct IssueFields<'a> {
    project: KeyRef<'a>,
    summary: &'a str,
    description: &'a str,
    issuetype: NameRef<'a>,
    priority: NameRef<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assignee: Option<NameRef<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    labels: Vec<String>,
}

#[derive(Debug, Serialize)]
struct KeyRef<'a> {
    key: &'a str,
}

#[derive(Debug, Serialize)]
struct NameRef<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatedIssue {
    key: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default, rename = "errorMessages")]
    error_messages: Vec<String>,
    #[serde(default)]
    errors: std::collections::HashMap<String, String>,
}
