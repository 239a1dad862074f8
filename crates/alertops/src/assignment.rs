//! Reaction-based assignment.
//!
//! A claim reaction on an alert's chat message assigns the alert to the
//! reacting user. The first claim wins; the ownership re-check happens inside
//! the same write transaction as the assignment, so of two simultaneous first
//! claims exactly one becomes the assignee and the other is recorded as
//! "also reacted".

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::{normalize_emoji, AssignmentConfig};
use crate::dispatcher::NotificationDispatcher;
use crate::error::StoreError;
use crate::model::{
    Alert, AlertStatus, Assignment, AssignmentMethod, HistoryAction, ReactionEvent, ReactionKind,
};
use crate::store::{alerts, history, reactions, AlertStore};

/// Why a reaction changed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    NotClaimEmoji,
    UnknownMessage,
    AlertResolved,
    AlreadyAssignee,
    NotAssignee,
    ClaimsRemain,
}

/// What a reaction event did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReactionOutcome {
    Assigned {
        alert_id: String,
        assignee_id: String,
        assignee_name: String,
    },
    AlsoReacted {
        alert_id: String,
        user: String,
        assignee_id: String,
    },
    Unassigned {
        alert_id: String,
        user: String,
    },
    Ignored {
        reason: IgnoreReason,
    },
}

impl ReactionOutcome {
    const fn ignored(reason: IgnoreReason) -> Self {
        Self::Ignored { reason }
    }
}

/// Applies chat reactions to alert assignment state.
pub struct AssignmentHandler {
    config: AssignmentConfig,
    dispatcher: Arc<NotificationDispatcher>,
}

impl AssignmentHandler {
    #[must_use]
    pub fn new(config: AssignmentConfig, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self { config, dispatcher }
    }

    pub async fn handle_reaction(
        &self,
        store: &AlertStore,
        event: &ReactionEvent,
    ) -> Result<ReactionOutcome, StoreError> {
        if !self.config.is_claim(&event.reaction) {
            return Ok(ReactionOutcome::ignored(IgnoreReason::NotClaimEmoji));
        }
        let emoji = normalize_emoji(&event.reaction);

        let Some(alert) = store.read(|conn| alerts::find_by_message(conn, &event.item.message_ts))?
        else {
            debug!(message_ts = %event.item.message_ts, "Reaction on unknown message");
            return Ok(ReactionOutcome::ignored(IgnoreReason::UnknownMessage));
        };
        if !same_channel(&alert, &event.item.channel) {
            debug!(
                alert_id = %alert.alert_id,
                channel = %event.item.channel,
                "Reaction message id matched in another channel"
            );
            return Ok(ReactionOutcome::ignored(IgnoreReason::UnknownMessage));
        }

        match event.kind {
            ReactionKind::ReactionAdded => self.claim(store, &alert, &event.user, emoji).await,
            ReactionKind::ReactionRemoved => self.unclaim(store, &alert, &event.user, emoji).await,
        }
    }

    async fn claim(
        &self,
        store: &AlertStore,
        alert: &Alert,
        user: &str,
        emoji: &str,
    ) -> Result<ReactionOutcome, StoreError> {
        if alert.status.is_resolved() {
            return Ok(ReactionOutcome::ignored(IgnoreReason::AlertResolved));
        }

        let display_name = self.display_name(user).await;
        let now = Utc::now();

        let (outcome, updated) = store.write(|tx| {
            // Re-read under the write lock: another claim may have landed.
            let Some(current) = alerts::get(tx, &alert.alert_id)? else {
                return Ok((ReactionOutcome::ignored(IgnoreReason::UnknownMessage), None));
            };
            if current.status.is_resolved() {
                return Ok((ReactionOutcome::ignored(IgnoreReason::AlertResolved), None));
            }
            reactions::add(tx, &current.alert_id, user, emoji, now)?;

            match &current.assignment {
                None => {
                    let assignment = Assignment {
                        assignee_id: user.to_string(),
                        assignee_name: display_name.clone(),
                        assigned_at: now,
                        method: AssignmentMethod::SlackReaction,
                        emoji: Some(emoji.to_string()),
                    };
                    alerts::set_assignment(
                        tx,
                        &current.alert_id,
                        Some(&assignment),
                        AlertStatus::Assigned,
                        now,
                    )?;
                    history::append(
                        tx,
                        &current.alert_id,
                        HistoryAction::Assigned,
                        Some(user),
                        &json!({
                            "assignee_name": display_name,
                            "emoji": emoji,
                            "method": AssignmentMethod::SlackReaction,
                            "previous_status": current.status,
                        }),
                        now,
                    )?;
                    let outcome = ReactionOutcome::Assigned {
                        alert_id: current.alert_id.clone(),
                        assignee_id: user.to_string(),
                        assignee_name: display_name.clone(),
                    };
                    Ok((outcome, alerts::get(tx, &current.alert_id)?))
                }
                Some(existing) if existing.assignee_id == user => {
                    Ok((ReactionOutcome::ignored(IgnoreReason::AlreadyAssignee), None))
                }
                Some(existing) => {
                    history::append(
                        tx,
                        &current.alert_id,
                        HistoryAction::AlsoReacted,
                        Some(user),
                        &json!({
                            "user_name": display_name,
                            "emoji": emoji,
                            "assignee_id": existing.assignee_id,
                        }),
                        now,
                    )?;
                    let outcome = ReactionOutcome::AlsoReacted {
                        alert_id: current.alert_id.clone(),
                        user: user.to_string(),
                        assignee_id: existing.assignee_id.clone(),
                    };
                    Ok((outcome, None))
                }
            }
        })?;

        match &outcome {
            ReactionOutcome::Assigned { alert_id, .. } => {
                info!(alert_id = %alert_id, user = %user, emoji = %emoji, "Alert claimed");
            }
            ReactionOutcome::AlsoReacted { alert_id, assignee_id, .. } => {
                info!(alert_id = %alert_id, user = %user, assignee = %assignee_id, "Alert already claimed");
            }
            _ => {}
        }

        if let Some(updated) = updated {
            self.dispatcher.update(store, &updated).await?;
        }
        Ok(outcome)
    }

    /// A removal only releases the alert when the assignee takes back their
    /// claim and no claim reaction is left on the message.
    async fn unclaim(
        &self,
        store: &AlertStore,
        alert: &Alert,
        user: &str,
        emoji: &str,
    ) -> Result<ReactionOutcome, StoreError> {
        let now = Utc::now();

        let (outcome, updated) = store.write(|tx| {
            reactions::remove(tx, &alert.alert_id, user, emoji)?;

            let Some(current) = alerts::get(tx, &alert.alert_id)? else {
                return Ok((ReactionOutcome::ignored(IgnoreReason::UnknownMessage), None));
            };
            if current.status.is_resolved() {
                return Ok((ReactionOutcome::ignored(IgnoreReason::AlertResolved), None));
            }
            let is_assignee = current
                .assignment
                .as_ref()
                .is_some_and(|a| a.assignee_id == user);
            if !is_assignee {
                return Ok((ReactionOutcome::ignored(IgnoreReason::NotAssignee), None));
            }
            if reactions::remaining(tx, &current.alert_id)? > 0 {
                return Ok((ReactionOutcome::ignored(IgnoreReason::ClaimsRemain), None));
            }

            alerts::set_assignment(tx, &current.alert_id, None, AlertStatus::Firing, now)?;
            history::append(
                tx,
                &current.alert_id,
                HistoryAction::Unassigned,
                Some(user),
                &json!({"emoji": emoji, "previous_status": current.status}),
                now,
            )?;
            let outcome = ReactionOutcome::Unassigned {
                alert_id: current.alert_id.clone(),
                user: user.to_string(),
            };
            Ok((outcome, alerts::get(tx, &current.alert_id)?))
        })?;

        if let Some(updated) = updated {
            info!(alert_id = %updated.alert_id, user = %user, "Claim withdrawn, alert unassigned");
            self.dispatcher.update(store, &updated).await?;
        }
        Ok(outcome)
    }

    /// Best effort: the raw user id when the lookup fails.
    async fn display_name(&self, user: &str) -> String {
        let channel = self.dispatcher.channel();
        if !channel.enabled() {
            return user.to_string();
        }
        match channel.user_display_name(user).await {
            Ok(name) if !name.trim().is_empty() => name,
            Ok(_) => user.to_string(),
            Err(e) => {
                warn!(user = %user, error = %e, "Display name lookup failed, using user id");
                user.to_string()
            }
        }
    }
}

fn same_channel(alert: &Alert, channel: &str) -> bool {
    match &alert.notification {
        Some(n) if !n.channel.is_empty() && !channel.is_empty() => n.channel == channel,
        _ => true,
    }
}
