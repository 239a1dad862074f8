//! In-process collaborators and fixtures shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alertops::model::AlertmanagerPayload;
use alertops::{AlertStore, Config, LifecycleEngine};
use async_trait::async_trait;
use notify::{ChannelError, ChatChannel, ChatMessage, MessageRef};
use serde_json::{json, Value};
use ticketing::{TicketError, TicketRef, TicketRequest, TicketTracker};

/// Ticket tracker that hands out sequential keys and remembers every request.
#[derive(Default)]
pub struct RecordingTracker {
    pub requests: Mutex<Vec<TicketRequest>>,
    next: AtomicU64,
    fail_auth: AtomicBool,
    delay_ms: AtomicU64,
}

impl RecordingTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reject every call with an authorization error until reset.
    pub fn fail_with_auth(&self, fail: bool) {
        self.fail_auth.store(fail, Ordering::SeqCst);
    }

    /// Hold every call this long before answering.
    pub fn delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl TicketTracker for RecordingTracker {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn enabled(&self) -> bool {
        true
    }

    async fn create_ticket(&self, request: &TicketRequest) -> Result<TicketRef, TicketError> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.requests.lock().unwrap().push(request.clone());
        if self.fail_auth.load(Ordering::SeqCst) {
            return Err(TicketError::Unauthorized("bad credentials".to_string()));
        }
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TicketRef {
            key: format!("DCOPS-{n}"),
            url: format!("https://jira.example.com/browse/DCOPS-{n}"),
        })
    }
}

/// Chat channel that keeps posted and edited messages in memory.
#[derive(Default)]
pub struct RecordingChannel {
    pub posted: Mutex<Vec<(MessageRef, ChatMessage)>>,
    pub updated: Mutex<Vec<(MessageRef, ChatMessage)>>,
    pub names: Mutex<HashMap<String, String>>,
    next_ts: AtomicU64,
    fail_posts: AtomicBool,
    fail_updates: AtomicBool,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_user(self: &Arc<Self>, id: &str, name: &str) -> Arc<Self> {
        self.names
            .lock()
            .unwrap()
            .insert(id.to_string(), name.to_string());
        Arc::clone(self)
    }

    pub fn fail_posts(&self, fail: bool) {
        self.fail_posts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn posted_count(&self) -> usize {
        self.posted.lock().unwrap().len()
    }

    /// Most recent content of the message with `ts`.
    pub fn last_update(&self, ts: &str) -> Option<ChatMessage> {
        self.updated
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(target, _)| target.message_id == ts)
            .map(|(_, message)| message.clone())
    }
}

#[async_trait]
impl ChatChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn enabled(&self) -> bool {
        true
    }

    fn default_channel(&self) -> Option<&str> {
        Some("C-ALERTS")
    }

    async fn post_message(
        &self,
        channel: &str,
        message: &ChatMessage,
    ) -> Result<MessageRef, ChannelError> {
        if self.fail_posts.load(Ordering::SeqCst) {
            return Err(ChannelError::Api {
                method: "chat.postMessage",
                error: "channel_not_found".to_string(),
            });
        }
        let n = self.next_ts.fetch_add(1, Ordering::SeqCst) + 1;
        let posted = MessageRef {
            channel: channel.to_string(),
            message_id: format!("1700000000.{n:06}"),
        };
        self.posted
            .lock()
            .unwrap()
            .push((posted.clone(), message.clone()));
        Ok(posted)
    }

    async fn update_message(
        &self,
        target: &MessageRef,
        message: &ChatMessage,
    ) -> Result<(), ChannelError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(ChannelError::Api {
                method: "chat.update",
                error: "message_not_found".to_string(),
            });
        }
        self.updated
            .lock()
            .unwrap()
            .push((target.clone(), message.clone()));
        Ok(())
    }

    async fn user_display_name(&self, user_id: &str) -> Result<String, ChannelError> {
        self.names
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .ok_or_else(|| ChannelError::Api {
                method: "users.info",
                error: "user_not_found".to_string(),
            })
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.slack.channel_id = Some("C-ALERTS".to_string());
    config.slack.signing_secret = None;
    config.assignment.claim_emojis = vec!["eyes".to_string(), "mag".to_string()];
    config.dedup.resolved_grace_secs = 0;
    config.dedup.ticket_claim_ttl_secs = 120;
    config.dedup.claim_wait_secs = 10;
    config.dedup.claim_poll_ms = 10;
    config
}

pub struct Harness {
    pub engine: Arc<LifecycleEngine>,
    pub tracker: Arc<RecordingTracker>,
    pub channel: Arc<RecordingChannel>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(&test_config())
    }

    pub fn with_config(config: &Config) -> Self {
        let tracker = RecordingTracker::new();
        let channel = RecordingChannel::new();
        let store = Arc::new(AlertStore::open_in_memory().unwrap());
        let engine = LifecycleEngine::new(store, tracker.clone(), channel.clone(), config);
        Self {
            engine: Arc::new(engine),
            tracker,
            channel,
        }
    }

    pub fn store(&self) -> &AlertStore {
        self.engine.store()
    }
}

pub fn alert(name: &str, instance: &str, severity: &str) -> Value {
    json!({
        "status": "firing",
        "labels": {
            "alertname": name,
            "instance": instance,
            "severity": severity,
            "job": "node"
        },
        "annotations": {
            "summary": format!("{name} on {instance}"),
            "description": "Disk usage above 90%"
        },
        "startsAt": "2024-05-01T10:00:00Z"
    })
}

pub fn resolved(name: &str, instance: &str) -> Value {
    json!({
        "status": "resolved",
        "labels": {"alertname": name, "instance": instance, "severity": "critical"},
        "annotations": {},
        "endsAt": "2024-05-01T11:00:00Z"
    })
}

pub fn batch(alerts: Vec<Value>) -> AlertmanagerPayload {
    serde_json::from_value(json!({
        "version": "4",
        "groupKey": "{}:{alertname=\"DiskSpaceHigh\"}",
        "status": "firing",
        "receiver": "alertops",
        "alerts": alerts
    }))
    .unwrap()
}

pub fn reaction(kind: &str, user: &str, emoji: &str, ts: &str) -> alertops::model::ReactionEvent {
    serde_json::from_value(json!({
        "type": kind,
        "user": user,
        "reaction": emoji,
        "item": {"type": "message", "channel": "C-ALERTS", "ts": ts}
    }))
    .unwrap()
}

/// Count rows in `table`, optionally filtered by a raw SQL condition.
pub fn count(store: &AlertStore, table: &str, condition: &str) -> i64 {
    let sql = if condition.is_empty() {
        format!("SELECT COUNT(*) FROM {table}")
    } else {
        format!("SELECT COUNT(*) FROM {table} WHERE {condition}")
    };
    store
        .read(|conn| Ok(conn.query_row(&sql, [], |row| row.get(0))?))
        .unwrap()
}
