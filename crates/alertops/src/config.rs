//! Service configuration.
//!
//! Defaults come from the environment. An optional TOML file is laid over
//! them, so a file only needs the keys it wants to change.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ticketing::JiraConfig;

/// Claim emojis used when `CLAIM_EMOJIS` is unset.
pub const DEFAULT_CLAIM_EMOJIS: [&str; 5] = ["eyes", "mag", "hammer_and_wrench", "tools", "gear"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to encode defaults: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jira: JiraConfig,
    pub slack: SlackConfig,
    pub assignment: AssignmentConfig,
    pub dedup: DedupConfig,
}

impl Config {
    /// Configuration from environment variables and built-in defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            jira: JiraConfig::from_env(),
            ..Self::default()
        }
    }

    /// Environment defaults, overlaid by `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = Self::from_env();
        let Some(path) = path else {
            return Ok(base);
        };

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        base.overlay(&text)
    }

    /// Lay a TOML document over `self`. Keys absent from `text` keep their value.
    pub fn overlay(self, text: &str) -> Result<Self, ConfigError> {
        let file: toml::Table = toml::from_str(text)?;
        let mut merged = toml::Table::try_from(&self)?;
        merge_tables(&mut merged, file);
        let config: Self = merged.try_into()?;
        Ok(config)
    }
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_var(name).and_then(|s| s.parse().ok()).unwrap_or(default)
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (`ALERTOPS_ADDR`)
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: env_var("ALERTOPS_ADDR").unwrap_or_else(|| "0.0.0.0:5000".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file (`ALERTOPS_DB`)
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: env_var("ALERTOPS_DB").map_or_else(|| PathBuf::from("alerts.db"), PathBuf::from),
        }
    }
}

/// Slack Web API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    pub bot_token: Option<String>,
    pub channel_id: Option<String>,
    pub api_base: String,
    /// Secret for verifying inbound event signatures
    pub signing_secret: Option<String>,
    pub timeout_secs: u64,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            bot_token: env_var("SLACK_BOT_TOKEN"),
            channel_id: env_var("SLACK_CHANNEL_ID"),
            api_base: env_var("SLACK_API_BASE")
                .unwrap_or_else(|| notify::channels::slack::DEFAULT_API_BASE.to_string()),
            signing_secret: env_var("SLACK_SIGNING_SECRET"),
            timeout_secs: env_parse("SLACK_TIMEOUT_SECS", 10),
        }
    }
}

impl SlackConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Reaction-based assignment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentConfig {
    /// Reaction names (without colons) that claim an alert
    pub claim_emojis: Vec<String>,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        let claim_emojis = env_var("CLAIM_EMOJIS")
            .map(|s| parse_emoji_list(&s))
            .filter(|list| !list.is_empty())
            .unwrap_or_else(|| DEFAULT_CLAIM_EMOJIS.iter().map(|s| (*s).to_string()).collect());
        Self { claim_emojis }
    }
}

impl AssignmentConfig {
    #[must_use]
    pub fn is_claim(&self, reaction: &str) -> bool {
        let reaction = normalize_emoji(reaction);
        self.claim_emojis.iter().any(|e| normalize_emoji(e) == reaction)
    }
}

/// Strip surrounding colons and skin tone modifiers (`eyes::skin-tone-2`).
pub fn normalize_emoji(raw: &str) -> &str {
    let trimmed = raw.trim().trim_matches(':');
    trimmed.split("::").next().unwrap_or(trimmed)
}

fn parse_emoji_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(normalize_emoji)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Deduplication and ticket lease settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// A resolved, ticketed alert still counts as open for this long. 0 disables.
    pub resolved_grace_secs: u64,
    /// A ticket lease older than this is considered abandoned.
    pub ticket_claim_ttl_secs: u64,
    /// How long an ingestion waits for another one's lease before deferring.
    pub claim_wait_secs: u64,
    pub claim_poll_ms: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            resolved_grace_secs: env_parse("DEDUP_GRACE_SECS", 0),
            ticket_claim_ttl_secs: env_parse("TICKET_CLAIM_TTL_SECS", 120),
            claim_wait_secs: env_parse("TICKET_CLAIM_WAIT_SECS", 45),
            claim_poll_ms: 100,
        }
    }
}

impl DedupConfig {
    #[must_use]
    pub const fn resolved_grace(&self) -> Duration {
        Duration::from_secs(self.resolved_grace_secs)
    }

    #[must_use]
    pub const fn claim_ttl(&self) -> Duration {
        Duration::from_secs(self.ticket_claim_ttl_secs)
    }

    #[must_use]
    pub const fn claim_wait(&self) -> Duration {
        Duration::from_secs(self.claim_wait_secs)
    }

    #[must_use]
    pub const fn claim_poll(&self) -> Duration {
        Duration::from_millis(self.claim_poll_ms)
    }
}
