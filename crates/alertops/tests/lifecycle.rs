mod common;

use alertops::model::{AlertStatus, AssignmentMethod, HistoryAction, TicketStatus};
use alertops::store::{alerts, claims, history, tickets};
use alertops::{EngineError, IngestOutcome, ReactionOutcome, StatusUpdate};
use chrono::{Duration, Utc};
use common::{alert, batch, count, reaction, resolved, test_config, Harness};

fn actions(h: &Harness, alert_id: &str) -> Vec<HistoryAction> {
    h.store()
        .read(|conn| history::for_alert(conn, alert_id))
        .unwrap()
        .into_iter()
        .map(|entry| entry.action)
        .collect()
}

fn created_id(outcome: &IngestOutcome) -> String {
    match outcome {
        IngestOutcome::Created { alert_id, .. } => alert_id.clone(),
        other => panic!("expected a new incident, got {other:?}"),
    }
}

#[tokio::test]
async fn test_repeated_firing_shares_one_ticket() {
    let h = Harness::new();

    for _ in 0..3 {
        let report = h
            .engine
            .ingest_batch(&batch(vec![alert("DiskSpaceHigh", "db1:9100", "critical")]))
            .await;
        assert_eq!(report.processed.len(), 1);
    }

    assert_eq!(h.tracker.calls(), 1);
    assert_eq!(count(h.store(), "ticket_records", ""), 1);
    assert_eq!(count(h.store(), "alerts", ""), 3);
    assert_eq!(count(h.store(), "alerts", "ticket_key = 'DCOPS-1'"), 3);
    // Restatements do not post new chat messages.
    assert_eq!(h.channel.posted_count(), 1);
}

#[tokio::test]
async fn test_disk_alert_scenario() {
    let h = Harness::new();
    h.channel.with_user("U1", "Ada Lovelace");

    let first = h
        .engine
        .ingest_batch(&batch(vec![alert("DiskSpaceHigh", "db1:9100", "critical")]))
        .await;
    let first_id = created_id(&first.processed[0]);

    let second = h
        .engine
        .ingest_batch(&batch(vec![alert("DiskSpaceHigh", "db1:9100", "critical")]))
        .await;
    match &second.processed[0] {
        IngestOutcome::Restated {
            owner_id, ticket, ..
        } => {
            assert_eq!(owner_id, &first_id);
            assert_eq!(ticket.as_ref().unwrap().key, "DCOPS-1");
        }
        other => panic!("expected restatement, got {other:?}"),
    }
    assert_eq!(count(h.store(), "ticket_records", ""), 1);
    assert_eq!(count(h.store(), "alerts", "ticket_key = 'DCOPS-1'"), 2);

    let owner = h
        .store()
        .read(|conn| alerts::get(conn, &first_id))
        .unwrap()
        .unwrap();
    let ts = owner.notification.unwrap().message_id;

    let claimed = h
        .engine
        .react(&reaction("reaction_added", "U1", "eyes", &ts))
        .await
        .unwrap();
    assert!(matches!(claimed, ReactionOutcome::Assigned { .. }));

    let owner = h
        .store()
        .read(|conn| alerts::get(conn, &first_id))
        .unwrap()
        .unwrap();
    assert_eq!(owner.status, AlertStatus::Assigned);
    let assignment = owner.assignment.unwrap();
    assert_eq!(assignment.assignee_id, "U1");
    assert_eq!(assignment.assignee_name, "Ada Lovelace");
    assert_eq!(assignment.method, AssignmentMethod::SlackReaction);

    let updated = h.channel.last_update(&ts).unwrap().plain_text();
    assert!(updated.contains("*Assigned to:* Ada Lovelace (:eyes:)"));
    assert!(updated.contains("DCOPS-1"));

    let later = h
        .engine
        .react(&reaction("reaction_added", "U2", "eyes", &ts))
        .await
        .unwrap();
    assert!(matches!(later, ReactionOutcome::AlsoReacted { .. }));

    let owner = h
        .store()
        .read(|conn| alerts::get(conn, &first_id))
        .unwrap()
        .unwrap();
    assert_eq!(owner.assignment.unwrap().assignee_id, "U1");

    let entries = h
        .store()
        .read(|conn| history::for_alert(conn, &first_id))
        .unwrap();
    let also = entries
        .iter()
        .find(|e| e.action == HistoryAction::AlsoReacted)
        .unwrap();
    assert_eq!(also.actor.as_deref(), Some("U2"));
}

#[tokio::test]
async fn test_ticket_auth_failure_is_retried_by_next_ingestion() {
    let h = Harness::new();
    h.tracker.fail_with_auth(true);

    let report = h
        .engine
        .ingest_batch(&batch(vec![alert("NodeDown", "web1:9100", "critical")]))
        .await;
    assert!(!report.storage_failed());
    let failed_id = created_id(&report.processed[0]);

    let failed = h
        .store()
        .read(|conn| alerts::get(conn, &failed_id))
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, AlertStatus::Firing);
    assert!(failed.ticket.is_none());

    let entries = h
        .store()
        .read(|conn| history::for_alert(conn, &failed_id))
        .unwrap();
    let failure = entries
        .iter()
        .find(|e| e.action == HistoryAction::TicketFailed)
        .unwrap();
    assert_eq!(failure.data["auth"], true);
    assert!(failure.data["error"].as_str().unwrap().contains("bad credentials"));

    h.tracker.fail_with_auth(false);
    let retry = h
        .engine
        .ingest_batch(&batch(vec![alert("NodeDown", "web1:9100", "critical")]))
        .await;
    match &retry.processed[0] {
        IngestOutcome::Created {
            ticket,
            ticket_created,
            ..
        } => {
            assert!(ticket_created);
            assert_eq!(ticket.as_ref().unwrap().key, "DCOPS-1");
        }
        other => panic!("expected a new incident, got {other:?}"),
    }
    assert_eq!(h.tracker.calls(), 2);
    assert_eq!(count(h.store(), "ticket_records", ""), 1);
    assert_eq!(count(h.store(), "ticket_claims", ""), 0);
}

#[tokio::test]
async fn test_ticket_content() {
    let h = Harness::new();
    h.engine
        .ingest_batch(&batch(vec![alert("DiskSpaceHigh", "db1:9100", "critical")]))
        .await;

    let request = h.tracker.requests.lock().unwrap()[0].clone();
    assert_eq!(request.summary, "[CRITICAL] DiskSpaceHigh - db1:9100");
    assert_eq!(request.priority, ticketing::Priority::High);
    assert!(request.labels.contains(&"alert-diskspacehigh".to_string()));
    assert!(request.labels.contains(&"severity-critical".to_string()));
    assert!(request.description.contains("Disk usage above 90%"));
    assert!(request.description.contains("*Remediation Hints:*"));
}

#[tokio::test]
async fn test_resolution_keeps_references_and_is_terminal() {
    let h = Harness::new();
    let report = h
        .engine
        .ingest_batch(&batch(vec![alert("DiskSpaceHigh", "db1:9100", "critical")]))
        .await;
    let alert_id = created_id(&report.processed[0]);
    h.engine
        .ingest_batch(&batch(vec![alert("DiskSpaceHigh", "db1:9100", "critical")]))
        .await;

    let report = h
        .engine
        .ingest_batch(&batch(vec![resolved("DiskSpaceHigh", "db1:9100")]))
        .await;
    match &report.processed[0] {
        IngestOutcome::Resolved { alert_ids, .. } => assert_eq!(alert_ids.len(), 2),
        other => panic!("expected resolution, got {other:?}"),
    }

    let alert = h
        .store()
        .read(|conn| alerts::get(conn, &alert_id))
        .unwrap()
        .unwrap();
    assert_eq!(alert.status, AlertStatus::Resolved);
    assert_eq!(alert.ticket.as_ref().unwrap().key, "DCOPS-1");
    let ts = alert.notification.as_ref().unwrap().message_id.clone();
    assert!(h
        .channel
        .last_update(&ts)
        .unwrap()
        .plain_text()
        .starts_with("🟢 RESOLVED: DiskSpaceHigh"));

    let record = h
        .store()
        .read(|conn| tickets::find_by_key(conn, "DCOPS-1"))
        .unwrap()
        .unwrap();
    assert_eq!(record.status, TicketStatus::Resolved);

    for status in [
        AlertStatus::Firing,
        AlertStatus::Assigned,
        AlertStatus::Acknowledged,
    ] {
        let err = h
            .engine
            .manual_status_update(
                &alert_id,
                StatusUpdate {
                    status,
                    actor: "ops".to_string(),
                    reason: None,
                    assignee: Some("U9".to_string()),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Immutable(_)));
    }

    let before = actions(&h, &alert_id).len();
    let same = h
        .engine
        .manual_status_update(
            &alert_id,
            StatusUpdate {
                status: AlertStatus::Resolved,
                actor: "ops".to_string(),
                reason: Some("closing again".to_string()),
                assignee: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(same.status, AlertStatus::Resolved);
    let entries = h
        .store()
        .read(|conn| history::for_alert(conn, &alert_id))
        .unwrap();
    assert_eq!(entries.len(), before + 1);
    assert_eq!(entries[0].action, HistoryAction::StatusChanged);
    assert_eq!(entries[0].actor.as_deref(), Some("ops"));
    assert_eq!(entries[0].data["reason"], "closing again");
    assert_eq!(entries[0].data["noop"], true);

    // A re-fire after resolution is a new incident with a new ticket.
    let refire = h
        .engine
        .ingest_batch(&batch(vec![common::alert("DiskSpaceHigh", "db1:9100", "critical")]))
        .await;
    assert!(matches!(
        &refire.processed[0],
        IngestOutcome::Created { ticket: Some(t), .. } if t.key == "DCOPS-2"
    ));
}

#[tokio::test]
async fn test_resolution_without_open_alert_is_noop() {
    let h = Harness::new();
    let report = h
        .engine
        .ingest_batch(&batch(vec![resolved("NodeDown", "nowhere")]))
        .await;
    assert_eq!(
        report.processed[0],
        IngestOutcome::Resolved {
            signature: "NodeDown_nowhere".to_string(),
            alert_ids: Vec::new(),
        }
    );
    assert_eq!(count(h.store(), "alerts", ""), 0);
}

#[tokio::test]
async fn test_grace_window_absorbs_flapping() {
    let mut config = test_config();
    config.dedup.resolved_grace_secs = 300;
    let h = Harness::with_config(&config);

    h.engine
        .ingest_batch(&batch(vec![alert("LinkFlap", "sw1", "warning")]))
        .await;
    h.engine
        .ingest_batch(&batch(vec![resolved("LinkFlap", "sw1")]))
        .await;
    let again = h
        .engine
        .ingest_batch(&batch(vec![alert("LinkFlap", "sw1", "warning")]))
        .await;

    assert!(matches!(
        &again.processed[0],
        IngestOutcome::Restated { ticket: Some(t), .. } if t.key == "DCOPS-1"
    ));
    assert_eq!(h.tracker.calls(), 1);
}

#[tokio::test]
async fn test_malformed_alerts_are_rejected_individually() {
    let h = Harness::new();
    let report = h
        .engine
        .ingest_batch(&batch(vec![
            alert("DiskSpaceHigh", "db1:9100", "critical"),
            serde_json::json!({"status": "firing", "labels": {"severity": "critical"}}),
            serde_json::json!("not an alert"),
            alert("HighMemory", "db2:9100", "warning"),
        ]))
        .await;

    assert_eq!(report.received, 4);
    assert_eq!(report.processed.len(), 2);
    let rejected: Vec<usize> = report.rejected.iter().map(|r| r.index).collect();
    assert_eq!(rejected, vec![1, 2]);
    assert_eq!(count(h.store(), "alerts", ""), 2);
}

#[tokio::test]
async fn test_missing_instance_dedupes_on_placeholder() {
    let h = Harness::new();
    let no_instance = serde_json::json!({
        "status": "firing",
        "labels": {"alertname": "ClusterDown", "severity": "critical"}
    });
    h.engine.ingest_batch(&batch(vec![no_instance.clone()])).await;
    let second = h.engine.ingest_batch(&batch(vec![no_instance])).await;

    assert!(matches!(
        &second.processed[0],
        IngestOutcome::Restated { signature, .. } if signature == "ClusterDown_unknown"
    ));
}

#[tokio::test]
async fn test_chat_failure_is_recorded_not_raised() {
    let h = Harness::new();
    h.channel.fail_posts(true);

    let report = h
        .engine
        .ingest_batch(&batch(vec![alert("DiskSpaceHigh", "db1:9100", "critical")]))
        .await;
    let alert_id = match &report.processed[0] {
        IngestOutcome::Created {
            alert_id,
            notified,
            ticket,
            ..
        } => {
            assert!(!notified);
            assert!(ticket.is_some());
            alert_id.clone()
        }
        other => panic!("expected a new incident, got {other:?}"),
    };

    assert!(actions(&h, &alert_id).contains(&HistoryAction::NotificationFailed));
    let health = h.engine.health();
    assert_eq!(health.status, alertops::engine::HealthStatus::Degraded);
    assert_eq!(health.failures_last_hour["notification_failed"], 1);
}

#[tokio::test]
async fn test_history_records_each_step() {
    let h = Harness::new();
    let report = h
        .engine
        .ingest_batch(&batch(vec![alert("DiskSpaceHigh", "db1:9100", "critical")]))
        .await;
    let alert_id = created_id(&report.processed[0]);

    // Newest first.
    assert_eq!(
        actions(&h, &alert_id),
        vec![
            HistoryAction::Notified,
            HistoryAction::TicketCreated,
            HistoryAction::Created
        ]
    );
    assert_eq!(h.engine.health().status, alertops::engine::HealthStatus::Healthy);
}

#[tokio::test]
async fn test_live_lease_defers_ticket() {
    let mut config = test_config();
    config.dedup.claim_wait_secs = 0;
    let h = Harness::with_config(&config);

    h.store()
        .write(|tx| {
            claims::try_acquire(
                tx,
                "DiskSpaceHigh_db1:9100",
                "elsewhere",
                Utc::now(),
                Duration::seconds(120),
            )
        })
        .unwrap();

    let report = h
        .engine
        .ingest_batch(&batch(vec![alert("DiskSpaceHigh", "db1:9100", "critical")]))
        .await;
    let alert_id = match &report.processed[0] {
        IngestOutcome::Deferred { alert_id, .. } => alert_id.clone(),
        other => panic!("expected deferral, got {other:?}"),
    };
    assert_eq!(h.tracker.calls(), 0);
    assert_eq!(actions(&h, &alert_id), vec![HistoryAction::TicketDeferred]);
}

#[tokio::test]
async fn test_stale_lease_is_taken_over() {
    let h = Harness::new();
    h.store()
        .write(|tx| {
            claims::try_acquire(
                tx,
                "DiskSpaceHigh_db1:9100",
                "crashed",
                Utc::now() - Duration::minutes(10),
                Duration::seconds(120),
            )
        })
        .unwrap();

    let report = h
        .engine
        .ingest_batch(&batch(vec![alert("DiskSpaceHigh", "db1:9100", "critical")]))
        .await;
    assert!(matches!(
        &report.processed[0],
        IngestOutcome::Created { ticket_created: true, .. }
    ));
    assert_eq!(count(h.store(), "ticket_claims", ""), 0);
}

#[tokio::test]
async fn test_manual_transitions() {
    let h = Harness::new();
    let report = h
        .engine
        .ingest_batch(&batch(vec![alert("HighCPU", "app1", "warning")]))
        .await;
    let alert_id = created_id(&report.processed[0]);
    let update = |status, assignee: Option<&str>| StatusUpdate {
        status,
        actor: "oncall".to_string(),
        reason: Some("triage".to_string()),
        assignee: assignee.map(str::to_string),
    };

    let err = h
        .engine
        .manual_status_update(&alert_id, update(AlertStatus::Assigned, None))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = h
        .engine
        .manual_status_update(&alert_id, update(AlertStatus::Firing, None))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition {
            from: AlertStatus::Firing,
            to: AlertStatus::Firing
        }
    ));

    let assigned = h
        .engine
        .manual_status_update(&alert_id, update(AlertStatus::Assigned, Some("jdoe")))
        .await
        .unwrap();
    let assignment = assigned.assignment.unwrap();
    assert_eq!(assignment.assignee_id, "jdoe");
    assert_eq!(assignment.method, AssignmentMethod::Manual);

    let acked = h
        .engine
        .manual_status_update(&alert_id, update(AlertStatus::Acknowledged, None))
        .await
        .unwrap();
    assert_eq!(acked.status, AlertStatus::Acknowledged);
    assert!(acked.assignment.is_some());

    let err = h
        .engine
        .manual_status_update(&alert_id, update(AlertStatus::Firing, None))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));

    let resolved = h
        .engine
        .manual_status_update(&alert_id, update(AlertStatus::Resolved, None))
        .await
        .unwrap();
    assert_eq!(resolved.status, AlertStatus::Resolved);

    let entries = h
        .store()
        .read(|conn| history::for_alert(conn, &alert_id))
        .unwrap();
    let changes: Vec<_> = entries
        .iter()
        .filter(|e| e.action == HistoryAction::StatusChanged)
        .collect();
    assert_eq!(changes.len(), 3);
    assert!(changes
        .iter()
        .all(|e| e.actor.as_deref() == Some("oncall") && e.data["reason"] == "triage"));
    assert_eq!(changes[0].data["from"], "acknowledged");
    assert_eq!(changes[0].data["to"], "resolved");

    let err = h
        .engine
        .manual_status_update(
            "missing",
            StatusUpdate {
                status: AlertStatus::Resolved,
                actor: "  ".to_string(),
                reason: None,
                assignee: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_unassign_by_operator_clears_assignment() {
    let h = Harness::new();
    let report = h
        .engine
        .ingest_batch(&batch(vec![alert("HighCPU", "app1", "warning")]))
        .await;
    let alert_id = created_id(&report.processed[0]);

    h.engine
        .manual_status_update(
            &alert_id,
            StatusUpdate {
                status: AlertStatus::Assigned,
                actor: "lead".to_string(),
                reason: None,
                assignee: Some("jdoe".to_string()),
            },
        )
        .await
        .unwrap();
    let firing = h
        .engine
        .manual_status_update(
            &alert_id,
            StatusUpdate {
                status: AlertStatus::Firing,
                actor: "lead".to_string(),
                reason: Some("handing back".to_string()),
                assignee: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(firing.status, AlertStatus::Firing);
    assert!(firing.assignment.is_none());
}

#[tokio::test]
async fn test_create_ticket_now() {
    let h = Harness::new();
    h.tracker.fail_with_auth(true);
    let report = h
        .engine
        .ingest_batch(&batch(vec![alert("DiskSpaceHigh", "db1:9100", "critical")]))
        .await;
    let alert_id = created_id(&report.processed[0]);

    let err = h
        .engine
        .create_ticket_now(&alert_id, "ops")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Ticket(_)));

    h.tracker.fail_with_auth(false);
    let alert = h.engine.create_ticket_now(&alert_id, "ops").await.unwrap();
    assert_eq!(alert.ticket.as_ref().unwrap().key, "DCOPS-1");

    let entries = h
        .store()
        .read(|conn| history::for_alert(conn, &alert_id))
        .unwrap();
    assert_eq!(entries[0].action, HistoryAction::TicketCreated);
    assert_eq!(entries[0].actor.as_deref(), Some("ops"));

    let err = h
        .engine
        .create_ticket_now(&alert_id, "ops")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyTicketed { ref ticket_key, .. } if ticket_key == "DCOPS-1"));

    let err = h.engine.create_ticket_now("nope", "ops").await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn test_create_ticket_now_waits_for_live_lease() {
    let h = Harness::new();
    h.tracker.fail_with_auth(true);
    let report = h
        .engine
        .ingest_batch(&batch(vec![alert("DiskSpaceHigh", "db1:9100", "critical")]))
        .await;
    let alert_id = created_id(&report.processed[0]);
    h.tracker.fail_with_auth(false);

    let signature = h
        .store()
        .read(|conn| alerts::get(conn, &alert_id))
        .unwrap()
        .unwrap()
        .signature;
    h.store()
        .write(|tx| {
            claims::try_acquire(tx, &signature, "other-ingestion", Utc::now(), Duration::seconds(120))
        })
        .unwrap();

    let err = h
        .engine
        .create_ticket_now(&alert_id, "ops")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::TicketPending { ref holder, .. } if holder == "other-ingestion"));
    assert_eq!(h.tracker.calls(), 1);
    assert_eq!(count(h.store(), "ticket_records", ""), 0);

    h.store()
        .write(|tx| claims::release(tx, &signature, "other-ingestion"))
        .unwrap();
    let alert = h.engine.create_ticket_now(&alert_id, "ops").await.unwrap();
    assert_eq!(alert.ticket.unwrap().key, "DCOPS-1");
    assert_eq!(count(h.store(), "ticket_claims", ""), 0);
}

#[tokio::test]
async fn test_query_surface() {
    let h = Harness::new();
    h.engine
        .ingest_batch(&batch(vec![
            alert("DiskSpaceHigh", "db1:9100", "critical"),
            alert("HighMemory", "db2:9100", "warning"),
            alert("BackupLate", "nas1", "info"),
        ]))
        .await;

    let critical = h
        .engine
        .list_alerts(&alertops::store::AlertFilter {
            severity: Some(alertops::model::Severity::Critical),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(critical.len(), 1);
    assert_eq!(critical[0].name, "DiskSpaceHigh");

    let limited = h
        .engine
        .list_alerts(&alertops::store::AlertFilter {
            limit: Some(2),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(limited.len(), 2);

    let stats = h.engine.stats().unwrap();
    assert_eq!(stats.total_alerts, 3);
    assert_eq!(stats.tickets, 3);
    assert_eq!(stats.by_severity["warning"], 1);

    let detail = h.engine.alert_with_history(&critical[0].alert_id).unwrap();
    assert_eq!(detail.history.len(), 3);
    assert!(matches!(
        h.engine.alert_with_history("missing"),
        Err(EngineError::NotFound(_))
    ));
}
