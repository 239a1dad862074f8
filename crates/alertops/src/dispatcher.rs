//! Chat notifications for alerts: render, post, and edit in place.

use std::sync::Arc;

use chrono::Utc;
use notify::severity::RESOLVED_COLOR;
use notify::{Block, ChatChannel, ChatMessage, Text};
use serde_json::json;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::model::{Alert, HistoryAction, NotificationRef};
use crate::store::{alerts, history, AlertStore};

/// Labels shown in the infrastructure section when present.
const INFRA_LABELS: [(&str, &str); 4] = [
    ("device", "Device"),
    ("mountpoint", "Mount Point"),
    ("fstype", "Filesystem"),
    ("usage_percent", "Usage"),
];

/// Render the chat message for the current state of `alert`.
///
/// `claim_emoji` is shown as a hint while the alert is unassigned.
#[must_use]
pub fn render(alert: &Alert, claim_emoji: Option<&str>) -> ChatMessage {
    let resolved = alert.status.is_resolved();
    let (emoji, prefix, color) = if resolved {
        ("🟢", "RESOLVED", RESOLVED_COLOR)
    } else {
        (
            alert.severity.emoji(),
            alert.severity.prefix(),
            alert.severity.color(),
        )
    };

    let mut message = ChatMessage::new(format!("{prefix}: {} on {}", alert.name, alert.instance))
        .with_block(Block::header(format!("{emoji} {prefix}: {}", alert.name)))
        .with_block(Block::fields(vec![
            Text::mrkdwn(format!("*Severity:*\n{}", alert.severity.as_str().to_uppercase())),
            Text::mrkdwn(format!("*Instance:*\n{}", alert.instance)),
            Text::mrkdwn(format!(
                "*Detected:*\n{}",
                alert.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            )),
            Text::mrkdwn(format!("*Status:*\n{}", alert.status)),
        ]));

    if let Some(description) = alert.description() {
        message = message.with_block(Block::section(Text::mrkdwn(format!(
            "*Description:*\n{description}"
        ))));
    }
    if let Some(summary) = alert.summary() {
        message = message.with_block(Block::section(Text::mrkdwn(format!(
            "*Summary:*\n{summary}"
        ))));
    }

    let infra: Vec<Text> = INFRA_LABELS
        .iter()
        .filter_map(|(key, title)| {
            alert
                .labels
                .get(*key)
                .map(|value| Text::mrkdwn(format!("*{title}:*\n{value}")))
        })
        .collect();
    if !infra.is_empty() {
        message = message.with_block(Block::fields(infra));
    }

    if let Some(ticket) = &alert.ticket {
        message = message.with_block(Block::section(Text::mrkdwn(format!(
            "🎫 *Ticket:* <{}|{}>",
            ticket.url, ticket.key
        ))));
    }

    match (&alert.assignment, claim_emoji) {
        (Some(assignment), _) => {
            let via = assignment
                .emoji
                .as_deref()
                .map(|e| format!(" (:{e}:)"))
                .unwrap_or_default();
            message = message.with_block(Block::section(Text::mrkdwn(format!(
                "👨‍💻 *Assigned to:* {}{via}",
                assignment.assignee_name
            ))));
        }
        (None, Some(emoji)) if !resolved => {
            message = message.with_block(Block::context(Text::mrkdwn(format!(
                "React with :{emoji}: to claim this alert"
            ))));
        }
        _ => {}
    }

    message
        .with_block(Block::divider())
        .with_block(Block::context(Text::mrkdwn(format!(
            "Alert ID: `{}`",
            alert.alert_id
        ))))
        .with_color(color)
}

/// Posts and edits alert messages, recording outcomes in history.
pub struct NotificationDispatcher {
    channel: Arc<dyn ChatChannel>,
    target: Option<String>,
    claim_emoji: Option<String>,
}

impl NotificationDispatcher {
    /// `target` overrides the channel's default destination.
    #[must_use]
    pub fn new(
        channel: Arc<dyn ChatChannel>,
        target: Option<String>,
        claim_emoji: Option<String>,
    ) -> Self {
        Self {
            channel,
            target,
            claim_emoji,
        }
    }

    #[must_use]
    pub fn channel(&self) -> &dyn ChatChannel {
        self.channel.as_ref()
    }

    #[must_use]
    pub fn render(&self, alert: &Alert) -> ChatMessage {
        render(alert, self.claim_emoji.as_deref())
    }

    /// Post a message for `alert` and store where it landed.
    ///
    /// Returns `Ok(None)` when the post failed (recorded in history) or chat
    /// is not configured. Only store failures are errors.
    pub async fn notify(
        &self,
        store: &AlertStore,
        alert: &Alert,
    ) -> Result<Option<NotificationRef>, StoreError> {
        if !self.channel.enabled() {
            debug!(alert_id = %alert.alert_id, "Chat not configured, skipping notification");
            return Ok(None);
        }

        let target = self
            .target
            .as_deref()
            .or_else(|| self.channel.default_channel());
        let result = match target {
            Some(target) => self.channel.post_message(target, &self.render(alert)).await,
            None => Err(notify::ChannelError::NotConfigured(
                "no destination channel".to_string(),
            )),
        };
        let now = Utc::now();

        match result {
            Ok(posted) => {
                store.write(|tx| {
                    let resolved = alerts::get(tx, &alert.alert_id)?
                        .is_some_and(|a| a.status.is_resolved());
                    if !resolved {
                        alerts::set_notification(tx, &alert.alert_id, &posted, now)?;
                    }
                    history::append(
                        tx,
                        &alert.alert_id,
                        HistoryAction::Notified,
                        None,
                        &json!({"channel": posted.channel, "message_id": posted.message_id}),
                        now,
                    )?;
                    Ok(())
                })?;
                debug!(alert_id = %alert.alert_id, message_id = %posted.message_id, "Alert notified");
                Ok(Some(posted))
            }
            Err(err) => {
                warn!(
                    alert_id = %alert.alert_id,
                    channel = self.channel.name(),
                    error = %err,
                    "Failed to post alert message"
                );
                store.write(|tx| {
                    history::append(
                        tx,
                        &alert.alert_id,
                        HistoryAction::NotificationFailed,
                        None,
                        &json!({"channel": self.channel.name(), "error": err.to_string()}),
                        now,
                    )
                })?;
                Ok(None)
            }
        }
    }

    /// Re-render `alert`'s message in place. Returns whether the edit landed.
    ///
    /// Alerts that were never posted are skipped. A failed edit is recorded in
    /// history and otherwise ignored.
    pub async fn update(&self, store: &AlertStore, alert: &Alert) -> Result<bool, StoreError> {
        let Some(target) = &alert.notification else {
            return Ok(false);
        };
        if !self.channel.enabled() {
            return Ok(false);
        }

        match self.channel.update_message(target, &self.render(alert)).await {
            Ok(()) => Ok(true),
            Err(err) => {
                warn!(
                    alert_id = %alert.alert_id,
                    message_id = %target.message_id,
                    error = %err,
                    "Failed to update alert message"
                );
                store.write(|tx| {
                    history::append(
                        tx,
                        &alert.alert_id,
                        HistoryAction::MessageUpdateFailed,
                        None,
                        &json!({
                            "message_id": target.message_id,
                            "status": alert.status,
                            "error": err.to_string(),
                        }),
                        Utc::now(),
                    )
                })?;
                Ok(false)
            }
        }
    }
}
