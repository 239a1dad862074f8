//! Chat channel implementations.

pub mod slack;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::blocks::ChatMessage;
use crate::error::ChannelError;

/// Where a posted message lives. The message id is the vendor's opaque token
/// (a Slack `ts`), never interpreted beyond equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    /// Channel the message was posted to
    pub channel: String,
    /// Vendor message identifier
    pub message_id: String,
}

/// Trait for chat services that can post, edit and resolve users.
#[async_trait]
pub trait ChatChannel: Send + Sync {
    /// Get the name of this channel.
    fn name(&self) -> &'static str;

    /// Check if this channel is enabled/configured.
    fn enabled(&self) -> bool;

    /// Channel alerts are posted to when the caller has no preference.
    fn default_channel(&self) -> Option<&str>;

    /// Post a new message and return where it landed.
    async fn post_message(
        &self,
        channel: &str,
        message: &ChatMessage,
    ) -> Result<MessageRef, ChannelError>;

    /// Replace the content of a previously posted message.
    async fn update_message(
        &self,
        target: &MessageRef,
        message: &ChatMessage,
    ) -> Result<(), ChannelError>;

    /// Look up a human readable name for a user id.
    async fn user_display_name(&self, user_id: &str) -> Result<String, ChannelError>;
}
