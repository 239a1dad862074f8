mod common;

use alertops::model::{AlertStatus, HistoryAction};
use alertops::store::{alerts, history};
use alertops::{IgnoreReason, IngestOutcome, ReactionOutcome};
use common::{alert, batch, count, reaction, resolved, Harness};

const FIRST_TS: &str = "1700000000.000001";

async fn fire(h: &Harness) -> String {
    let report = h
        .engine
        .ingest_batch(&batch(vec![alert("DiskSpaceHigh", "db1:9100", "critical")]))
        .await;
    match &report.processed[0] {
        IngestOutcome::Created { alert_id, .. } => alert_id.clone(),
        other => panic!("expected a new incident, got {other:?}"),
    }
}

fn history_len(h: &Harness, alert_id: &str) -> usize {
    h.store()
        .read(|conn| history::for_alert(conn, alert_id))
        .unwrap()
        .len()
}

#[tokio::test]
async fn test_non_claim_emoji_changes_nothing() {
    let h = Harness::new();
    let alert_id = fire(&h).await;
    let before = history_len(&h, &alert_id);

    let outcome = h
        .engine
        .react(&reaction("reaction_added", "U1", "thumbsup", FIRST_TS))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ReactionOutcome::Ignored {
            reason: IgnoreReason::NotClaimEmoji
        }
    );
    assert_eq!(history_len(&h, &alert_id), before);
    assert_eq!(count(h.store(), "claim_reactions", ""), 0);
}

#[tokio::test]
async fn test_unknown_message_changes_nothing() {
    let h = Harness::new();
    let alert_id = fire(&h).await;
    let before = history_len(&h, &alert_id);

    let outcome = h
        .engine
        .react(&reaction("reaction_added", "U1", "eyes", "1699999999.999999"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ReactionOutcome::Ignored {
            reason: IgnoreReason::UnknownMessage
        }
    );
    assert_eq!(history_len(&h, &alert_id), before);
}

#[tokio::test]
async fn test_reaction_in_other_channel_is_unknown() {
    let h = Harness::new();
    fire(&h).await;

    let mut event = reaction("reaction_added", "U1", "eyes", FIRST_TS);
    event.item.channel = "C-OTHER".to_string();
    let outcome = h.engine.react(&event).await.unwrap();

    assert_eq!(
        outcome,
        ReactionOutcome::Ignored {
            reason: IgnoreReason::UnknownMessage
        }
    );
}

#[tokio::test]
async fn test_skin_tone_variant_claims() {
    let h = Harness::new();
    h.channel.with_user("U1", "Grace Hopper");
    let alert_id = fire(&h).await;

    let outcome = h
        .engine
        .react(&reaction("reaction_added", "U1", "mag::skin-tone-3", FIRST_TS))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ReactionOutcome::Assigned {
            alert_id: alert_id.clone(),
            assignee_id: "U1".to_string(),
            assignee_name: "Grace Hopper".to_string(),
        }
    );
    let stored = h
        .store()
        .read(|conn| alerts::get(conn, &alert_id))
        .unwrap()
        .unwrap();
    assert_eq!(stored.assignment.unwrap().emoji.as_deref(), Some("mag"));
}

#[tokio::test]
async fn test_unknown_user_falls_back_to_id() {
    let h = Harness::new();
    let alert_id = fire(&h).await;

    let outcome = h
        .engine
        .react(&reaction("reaction_added", "U404", "eyes", FIRST_TS))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        ReactionOutcome::Assigned { ref assignee_name, .. } if assignee_name == "U404"
    ));
    let entries = h
        .store()
        .read(|conn| history::for_alert(conn, &alert_id))
        .unwrap();
    assert_eq!(entries[0].action, HistoryAction::Assigned);
    assert_eq!(entries[0].data["assignee_name"], "U404");
    assert_eq!(entries[0].data["previous_status"], "firing");
}

#[tokio::test]
async fn test_assignee_reacting_again_is_noop() {
    let h = Harness::new();
    let alert_id = fire(&h).await;

    h.engine
        .react(&reaction("reaction_added", "U1", "eyes", FIRST_TS))
        .await
        .unwrap();
    let before = history_len(&h, &alert_id);

    let outcome = h
        .engine
        .react(&reaction("reaction_added", "U1", "mag", FIRST_TS))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ReactionOutcome::Ignored {
            reason: IgnoreReason::AlreadyAssignee
        }
    );
    assert_eq!(history_len(&h, &alert_id), before);
}

#[tokio::test]
async fn test_assignee_withdrawing_last_claim_unassigns() {
    let h = Harness::new();
    let alert_id = fire(&h).await;

    h.engine
        .react(&reaction("reaction_added", "U1", "eyes", FIRST_TS))
        .await
        .unwrap();
    let outcome = h
        .engine
        .react(&reaction("reaction_removed", "U1", "eyes", FIRST_TS))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ReactionOutcome::Unassigned {
            alert_id: alert_id.clone(),
            user: "U1".to_string(),
        }
    );
    let stored = h
        .store()
        .read(|conn| alerts::get(conn, &alert_id))
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, AlertStatus::Firing);
    assert!(stored.assignment.is_none());

    let text = h.channel.last_update(FIRST_TS).unwrap().plain_text();
    assert!(text.contains("React with :eyes: to claim this alert"));
    assert!(!text.contains("Assigned to"));
}

#[tokio::test]
async fn test_withdrawal_keeps_assignment_while_claims_remain() {
    let h = Harness::new();
    let alert_id = fire(&h).await;

    h.engine
        .react(&reaction("reaction_added", "U1", "eyes", FIRST_TS))
        .await
        .unwrap();
    h.engine
        .react(&reaction("reaction_added", "U2", "eyes", FIRST_TS))
        .await
        .unwrap();

    let by_other = h
        .engine
        .react(&reaction("reaction_removed", "U2", "eyes", FIRST_TS))
        .await
        .unwrap();
    assert_eq!(
        by_other,
        ReactionOutcome::Ignored {
            reason: IgnoreReason::NotAssignee
        }
    );

    h.engine
        .react(&reaction("reaction_added", "U3", "mag", FIRST_TS))
        .await
        .unwrap();
    let by_assignee = h
        .engine
        .react(&reaction("reaction_removed", "U1", "eyes", FIRST_TS))
        .await
        .unwrap();
    assert_eq!(
        by_assignee,
        ReactionOutcome::Ignored {
            reason: IgnoreReason::ClaimsRemain
        }
    );

    let stored = h
        .store()
        .read(|conn| alerts::get(conn, &alert_id))
        .unwrap()
        .unwrap();
    assert_eq!(stored.assignment.unwrap().assignee_id, "U1");
}

#[tokio::test]
async fn test_resolved_alert_ignores_reactions() {
    let h = Harness::new();
    let alert_id = fire(&h).await;
    h.engine
        .ingest_batch(&batch(vec![resolved("DiskSpaceHigh", "db1:9100")]))
        .await;
    let before = history_len(&h, &alert_id);

    let outcome = h
        .engine
        .react(&reaction("reaction_added", "U1", "eyes", FIRST_TS))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ReactionOutcome::Ignored {
            reason: IgnoreReason::AlertResolved
        }
    );
    assert_eq!(history_len(&h, &alert_id), before);
}

#[tokio::test]
async fn test_failed_message_edit_is_recorded() {
    let h = Harness::new();
    let alert_id = fire(&h).await;
    h.channel.fail_updates(true);

    let outcome = h
        .engine
        .react(&reaction("reaction_added", "U1", "eyes", FIRST_TS))
        .await
        .unwrap();
    assert!(matches!(outcome, ReactionOutcome::Assigned { .. }));

    let entries = h
        .store()
        .read(|conn| history::for_alert(conn, &alert_id))
        .unwrap();
    assert_eq!(entries[0].action, HistoryAction::MessageUpdateFailed);
    assert_eq!(entries[0].data["message_id"], FIRST_TS);
    assert_eq!(entries[1].action, HistoryAction::Assigned);

    // The assignment itself stands.
    let stored = h
        .store()
        .read(|conn| alerts::get(conn, &alert_id))
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, AlertStatus::Assigned);
}

#[tokio::test]
async fn test_original_message_shows_claim_hint() {
    let h = Harness::new();
    fire(&h).await;

    let posted = h.channel.posted.lock().unwrap();
    let (target, message) = &posted[0];
    assert_eq!(target.channel, "C-ALERTS");
    let text = message.plain_text();
    assert!(text.starts_with("🔴 CRITICAL ALERT: DiskSpaceHigh"));
    assert!(text.contains("*Instance:*\ndb1:9100"));
    assert!(text.contains("🎫 *Ticket:* <https://jira.example.com/browse/DCOPS-1|DCOPS-1>"));
    assert!(text.contains("React with :eyes: to claim this alert"));
}
