//! Fire-once local alerts keyed by timer id

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{
    process::Command,
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};

use crate::{clock::Clock, error::NotifyError};

/// Deadline drift under which an identical re-schedule keeps the pending task
const DEADLINE_TOLERANCE: Duration = Duration::from_secs(1);

/// Text shown when an alert fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub title: String,
    pub body: String,
}

impl AlertPayload {
    pub fn timer_finished(title: &str) -> Self {
        Self {
            title: title.to_string(),
            body: "Time's up!".to_string(),
        }
    }
}

/// An alert that has been delivered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub key: String,
    pub fire_at: DateTime<Utc>,
    pub payload: AlertPayload,
}

/// Schedules and cancels fire-once alerts.
///
/// Scheduling an existing key replaces the earlier schedule. Cancelling an
/// unknown key does nothing. Re-scheduling the same fire time must re-arm
/// the alert if the wall clock moved while the host slept.
#[async_trait]
pub trait NotificationScheduler: Send + Sync {
    async fn schedule(
        &self,
        key: &str,
        fire_at: DateTime<Utc>,
        payload: AlertPayload,
    ) -> Result<(), NotifyError>;

    async fn cancel(&self, keys: &[String]) -> Result<(), NotifyError>;
}

struct PendingAlert {
    generation: u64,
    fire_at: DateTime<Utc>,
    /// Monotonic instant the task sleeps until
    deadline: Instant,
    payload: AlertPayload,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Pending {
    next_generation: u64,
    alerts: HashMap<String, PendingAlert>,
}

/// In-process scheduler: one sleeping tokio task per pending key
pub struct LocalNotificationScheduler {
    clock: Arc<dyn Clock>,
    pending: Arc<Mutex<Pending>>,
    notify_command: Option<String>,
    fired_tx: broadcast::Sender<Alert>,
}

impl LocalNotificationScheduler {
    pub fn new(clock: Arc<dyn Clock>, notify_command: Option<String>) -> Self {
        let (fired_tx, _) = broadcast::channel(64);
        Self {
            clock,
            pending: Arc::new(Mutex::new(Pending::default())),
            notify_command,
            fired_tx,
        }
    }

    /// Receive every alert as it fires
    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.fired_tx.subscribe()
    }

    /// Keys with an alert still waiting to fire
    pub async fn pending_keys(&self) -> Vec<String> {
        let pending = self.pending.lock().await;
        let mut keys: Vec<String> = pending.alerts.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl NotificationScheduler for LocalNotificationScheduler {
    async fn schedule(
        &self,
        key: &str,
        fire_at: DateTime<Utc>,
        payload: AlertPayload,
    ) -> Result<(), NotifyError> {
        let mut pending = self.pending.lock().await;

        // Tokio sleeps on the monotonic clock, which stops while the host is
        // suspended. Recompute the deadline from the wall clock every time.
        let delay = (fire_at - self.clock.now())
            .to_std()
            .unwrap_or_default();
        let deadline = Instant::now() + delay;

        if let Some(existing) = pending.alerts.get(key) {
            if existing.fire_at == fire_at
                && existing.payload == payload
                && !existing.handle.is_finished()
                && abs_diff(existing.deadline, deadline) < DEADLINE_TOLERANCE
            {
                debug!("Alert {} already pending at {}, keeping it", key, fire_at);
                return Ok(());
            }
        }
        if let Some(previous) = pending.alerts.remove(key) {
            previous.handle.abort();
        }

        let generation = pending.next_generation;
        pending.next_generation = pending.next_generation.wrapping_add(1);

        let alert = Alert {
            key: key.to_string(),
            fire_at,
            payload: payload.clone(),
        };
        let shared = Arc::clone(&self.pending);
        let fired_tx = self.fired_tx.clone();
        let notify_command = self.notify_command.clone();

        let handle = tokio::spawn(async move {
            sleep_until(deadline).await;

            {
                let mut pending = shared.lock().await;
                let current = pending
                    .alerts
                    .get(&alert.key)
                    .map(|entry| entry.generation);
                if current == Some(generation) {
                    pending.alerts.remove(&alert.key);
                }
            }

            deliver(&alert, notify_command.as_deref()).await;
            // Nobody listening is fine.
            let _ = fired_tx.send(alert);
        });

        debug!("Scheduled alert {} for {}", key, fire_at);
        pending.alerts.insert(
            key.to_string(),
            PendingAlert {
                generation,
                fire_at,
                deadline,
                payload,
                handle,
            },
        );
        Ok(())
    }

    async fn cancel(&self, keys: &[String]) -> Result<(), NotifyError> {
        let mut pending = self.pending.lock().await;
        for key in keys {
            if let Some(entry) = pending.alerts.remove(key) {
                entry.handle.abort();
                debug!("Cancelled alert {}", key);
            }
        }
        Ok(())
    }
}

fn abs_diff(a: Instant, b: Instant) -> Duration {
    a.saturating_duration_since(b)
        .max(b.saturating_duration_since(a))
}

async fn deliver(alert: &Alert, notify_command: Option<&str>) {
    info!("Alert fired: {} - {}", alert.payload.title, alert.payload.body);

    let Some(program) = notify_command else {
        return;
    };

    match Command::new(program)
        .arg(&alert.payload.title)
        .arg(&alert.payload.body)
        .output()
        .await
    {
        Ok(output) if output.status.success() => {
            debug!("Notification command delivered alert {}", alert.key);
        }
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("Notification command failed for {}: {}", alert.key, stderr);
        }
        Err(e) => {
            warn!("Failed to execute notification command {}: {}", program, e);
        }
    }
}
