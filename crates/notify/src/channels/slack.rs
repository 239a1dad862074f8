//! Slack Web API channel.
//!
//! Uses a bot token rather than an incoming webhook: webhooks cannot return the
//! message `ts`, and without it a reaction can never be traced back to an alert.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::blocks::{Attachment, Block, ChatMessage};
use crate::error::ChannelError;
use crate::{ChatChannel, MessageRef};

/// Environment variable for the Slack bot token.
const ENV_SLACK_BOT_TOKEN: &str = "SLACK_BOT_TOKEN";

/// Environment variable for the default channel id.
const ENV_SLACK_CHANNEL_ID: &str = "SLACK_CHANNEL_ID";

/// Environment variable overriding the Web API base URL.
const ENV_SLACK_API_BASE: &str = "SLACK_API_BASE";

/// Slack Web API base URL.
pub const DEFAULT_API_BASE: &str = "https://slack.com/api";

/// Default request timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Slack Web API channel.
pub struct SlackChannel {
    bot_token: Option<String>,
    channel_id: Option<String>,
    api_base: String,
    client: reqwest::Client,
}

impl SlackChannel {
    /// Create a new Slack channel from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let bot_token = std::env::var(ENV_SLACK_BOT_TOKEN)
            .ok()
            .filter(|s| !s.is_empty());
        let channel_id = std::env::var(ENV_SLACK_CHANNEL_ID)
            .ok()
            .filter(|s| !s.is_empty());
        let api_base =
            std::env::var(ENV_SLACK_API_BASE).unwrap_or_else(|_| DEFAULT_API_BASE.to_string());

        if bot_token.is_some() {
            debug!("Slack notifications enabled");
        } else {
            debug!("Slack notifications disabled (SLACK_BOT_TOKEN not set)");
        }

        Self::with_options(
            bot_token,
            channel_id,
            api_base,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )
    }

    /// Create a Slack channel with a specific token and default channel.
    #[must_use]
    pub fn new(bot_token: String, channel_id: String) -> Self {
        Self::with_options(
            Some(bot_token),
            Some(channel_id),
            DEFAULT_API_BASE.to_string(),
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )
    }

    /// Create a Slack channel with every knob explicit.
    #[must_use]
    pub fn with_options(
        bot_token: Option<String>,
        channel_id: Option<String>,
        api_base: String,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            bot_token,
            channel_id,
            api_base: api_base.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn token(&self) -> Result<&str, ChannelError> {
        self.bot_token
            .as_deref()
            .ok_or_else(|| ChannelError::NotConfigured(ENV_SLACK_BOT_TOKEN.to_string()))
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base)
    }

    /// Turn an HTTP response into the decoded API envelope, mapping rate limits
    /// and `ok: false` into errors.
    async fn read_response<T>(
        method: &'static str,
        response: reqwest::Response,
    ) -> Result<T, ChannelError>
    where
        T: for<'de> Deserialize<'de> + ApiEnvelope,
    {
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);

            warn!(
                channel = "slack",
                method,
                retry_after_secs = retry_after,
                "Rate limited by Slack"
            );

            return Err(ChannelError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            warn!(
                channel = "slack",
                method,
                status = %status,
                body = %body,
                "Slack API request failed"
            );

            return Err(ChannelError::Other(format!(
                "Slack returned {status}: {body}"
            )));
        }

        let decoded: T = response.json().await?;
        if decoded.ok() {
            Ok(decoded)
        } else {
            let error = decoded
                .error()
                .unwrap_or("unknown_error")
                .to_string();
            warn!(channel = "slack", method, error = %error, "Slack API call refused");
            Err(ChannelError::Api { method, error })
        }
    }
}

#[async_trait]
impl ChatChannel for SlackChannel {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn enabled(&self) -> bool {
        self.bot_token.is_some()
    }

    fn default_channel(&self) -> Option<&str> {
        self.channel_id.as_deref()
    }

    async fn post_message(
        &self,
        channel: &str,
        message: &ChatMessage,
    ) -> Result<MessageRef, ChannelError> {
        let token = self.token()?;

        let payload = PostMessagePayload {
            channel,
            ts: None,
            text: &message.text,
            blocks: &message.blocks,
            attachments: &message.attachments,
        };

        debug!(channel = "slack", slack_channel = channel, "Posting message");

        let response = self
            .client
            .post(self.url("chat.postMessage"))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?;

        let posted: PostMessageResponse =
            Self::read_response("chat.postMessage", response).await?;

        let message_id = posted
            .ts
            .ok_or_else(|| ChannelError::Other("chat.postMessage returned no ts".to_string()))?;

        debug!(channel = "slack", message_id = %message_id, "Message posted");

        Ok(MessageRef {
            channel: posted.channel.unwrap_or_else(|| channel.to_string()),
            message_id,
        })
    }

    async fn update_message(
        &self,
        target: &MessageRef,
        message: &ChatMessage,
    ) -> Result<(), ChannelError> {
        let token = self.token()?;

        let payload = PostMessagePayload {
            channel: &target.channel,
            ts: Some(&target.message_id),
            text: &message.text,
            blocks: &message.blocks,
            attachments: &message.attachments,
        };

        debug!(
            channel = "slack",
            message_id = %target.message_id,
            "Updating message"
        );

        let response = self
            .client
            .post(self.url("chat.update"))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?;

        let _: BasicResponse = Self::read_response("chat.update", response).await?;
        Ok(())
    }

    async fn user_display_name(&self, user_id: &str) -> Result<String, ChannelError> {
        let token = self.token()?;

        let response = self
            .client
            .get(self.url("users.info"))
            .bearer_auth(token)
            .query(&[("user", user_id)])
            .send()
            .await?;

        let info: UserInfoResponse = Self::read_response("users.info", response).await?;

        Ok(info
            .user
            .and_then(SlackUser::display_name)
            .unwrap_or_else(|| user_id.to_string()))
    }
}

// =============================================================================
// Slack API types
// =============================================================================

trait ApiEnvelope {
    fn ok(&self) -> bool;
    fn error(&self) -> Option<&str>;
}

macro_rules! api_envelope {
    ($($ty:ty),*) => {
        $(impl ApiEnvelope for $ty {
            fn ok(&self) -> bool {
                self.ok
            }

            fn error(&self) -> Option<&str> {
                self.error.as_deref()
            }
        })*
    };
}

api_envelope!(BasicResponse, PostMessageResponse, UserInfoResponse);

#[derive(Debug, Serialize)]
struct PostMessagePayload<'a> {
    channel: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ts: Option<&'a str>,
    text: &'a str,
    blocks: &'a [Block],
    #[serde(skip_serializing_if = "no_attachments")]
    attachments: &'a [Attachment],
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn no_attachments(attachments: &&[Attachment]) -> bool {
    attachments.is_empty()
}

#[derive(Debug, Deserialize)]
struct BasicResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    ts: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    user: Option<SlackUser>,
}

#[derive(Debug, Deserialize)]
struct SlackUser {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    profile: Option<SlackProfile>,
}

#[derive(Debug, Deserialize)]
struct SlackProfile {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
}

impl SlackUser {
    /// Real name first, then display name, then handle.
    fn display_name(self) -> Option<String> {
        let profile = self.profile.unwrap_or(SlackProfile {
            display_name: None,
            real_name: None,
        });
        [
            self.real_name,
            profile.real_name,
            profile.display_name,
            self.name,
        ]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
    }
}
