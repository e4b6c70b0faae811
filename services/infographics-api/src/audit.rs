use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::config::AuditConfig;

/// Security-relevant actions worth keeping a trail of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Login,
    ViewInfographic,
    ViewPublicInfographic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub actor: String,
    pub action: AuditAction,
    pub outcome: AuditOutcome,
    pub path: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    /// Seconds since the Unix epoch.
    pub at: u64,
}

impl AuditEvent {
    pub fn success(actor: impl Into<String>, action: AuditAction, path: &'static str) -> Self {
        Self::new(actor.into(), action, AuditOutcome::Success, path)
    }

    pub fn failure(
        actor: impl Into<String>,
        action: AuditAction,
        path: &'static str,
        reason: &'static str,
    ) -> Self {
        let mut event = Self::new(actor.into(), action, AuditOutcome::Failure, path);
        event.reason = Some(reason);
        event
    }

    fn new(actor: String, action: AuditAction, outcome: AuditOutcome, path: &'static str) -> Self {
        let at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        Self {
            actor,
            action,
            outcome,
            path,
            reason: None,
            at,
        }
    }
}

/// Events waiting for the collector. Further events are dropped.
const QUEUE_CAPACITY: usize = 1024;
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Ships audit events to a collector when one is configured and to the
/// structured log otherwise. A single background task posts queued events;
/// `record` never waits on the network.
#[derive(Clone)]
pub struct AuditClient {
    sink: Sink,
}

#[derive(Clone)]
enum Sink {
    Off,
    Log,
    Http { queue: mpsc::Sender<AuditEvent> },
}

impl AuditClient {
    /// Must be called inside a tokio runtime for the collector sink to start;
    /// without one, events fall back to the log.
    pub fn new(config: &AuditConfig) -> Self {
        let sink = match (config.enabled, config.endpoint.trim()) {
            (false, _) => Sink::Off,
            (true, "") => Sink::Log,
            (true, endpoint) => match spawn_delivery(endpoint.to_string()) {
                Some(queue) => Sink::Http { queue },
                None => Sink::Log,
            },
        };
        Self { sink }
    }

    pub fn record(&self, event: AuditEvent) {
        match &self.sink {
            Sink::Off => {
                tracing::trace!(action = ?event.action, "audit disabled; dropping event");
            }
            Sink::Log => log_event(&event),
            Sink::Http { queue } => match queue.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    tracing::warn!(action = ?event.action, "audit queue full; dropping event");
                }
                Err(TrySendError::Closed(event)) => {
                    tracing::warn!(action = ?event.action, "audit delivery stopped; logging event");
                    log_event(&event);
                }
            },
        }
    }
}

fn log_event(event: &AuditEvent) {
    tracing::info!(
        event = "audit",
        actor = %event.actor,
        action = ?event.action,
        outcome = ?event.outcome,
        path = event.path,
        reason = event.reason
    );
}

fn spawn_delivery(endpoint: String) -> Option<mpsc::Sender<AuditEvent>> {
    let Ok(runtime) = Handle::try_current() else {
        tracing::warn!(endpoint, "no async runtime; audit events go to the log");
        return None;
    };
    let client = match reqwest::Client::builder().timeout(DELIVERY_TIMEOUT).build() {
        Ok(client) => client,
        Err(error) => {
            tracing::error!(%error, "failed to build audit client; audit events go to the log");
            return None;
        }
    };

    let (queue, events) = mpsc::channel(QUEUE_CAPACITY);
    runtime.spawn(deliver(client, endpoint, events));
    Some(queue)
}

async fn deliver(client: reqwest::Client, endpoint: String, mut events: mpsc::Receiver<AuditEvent>) {
    while let Some(event) = events.recv().await {
        let delivered = client
            .post(endpoint.as_str())
            .json(&event)
            .send()
            .await
            .and_then(|response| response.error_for_status());
        if let Err(error) = delivered {
            tracing::warn!(%error, endpoint, action = ?event.action, "failed to deliver audit event");
        }
    }
}
