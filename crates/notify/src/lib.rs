//! Chat channels for alert lifecycle messages.
//!
//! This crate is the chat side of the alert pipeline. Unlike a fire-and-forget
//! webhook, alert messages have to be correlated later (a human reacts to a
//! message to claim the alert), so every channel returns a [`MessageRef`] on
//! send and can rewrite that message in place.
//!
//! # Usage
//!
//! ```no_run
//! use notify::{Block, ChatChannel, ChatMessage, SlackChannel, Text};
//!
//! # async fn example() -> Result<(), notify::ChannelError> {
//! let slack = SlackChannel::from_env();
//! let message = ChatMessage::new("Disk almost full")
//!     .with_block(Block::section(Text::mrkdwn("*db1:9100* is at 93%")));
//!
//! let posted = slack.post_message("C0123", &message).await?;
//! slack.update_message(&posted, &message).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! - `SLACK_BOT_TOKEN`: bot token used for `chat.postMessage`, `chat.update` and `users.info`
//! - `SLACK_CHANNEL_ID`: default channel alerts are posted to
//! - `SLACK_API_BASE`: override for the Web API base URL (tests, proxies)

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod blocks;
pub mod channels;
pub mod error;
pub mod severity;

pub use blocks::{Attachment, Block, ChatMessage, Text};
pub use channels::slack::SlackChannel;
pub use channels::{ChatChannel, MessageRef};
pub use error::ChannelError;
pub use severity::Severity;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_colors() {
        assert_eq!(Severity::Critical.color(), 0x00d7_3502);
        assert_eq!(Severity::Warning.color(), 0x00ff_8c00);
        assert_eq!(Severity::Info.color(), 0x0000_99ff);
        assert_eq!(Severity::Unknown.color(), 0x006c_757d);
    }

    #[test]
    fn test_message_builder() {
        let message = ChatMessage::new("fallback")
            .with_block(Block::divider())
            .with_color(Severity::Critical.color());

        assert_eq!(message.text, "fallback");
        assert_eq!(message.blocks.len(), 1);
        assert_eq!(message.attachments[0].color, "#d73502");
    }
}
