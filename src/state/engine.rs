//! Timer engine: lifecycle operations, the tick pass and startup recovery

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, error, info, warn};

use super::{timer::MAX_DURATION_MS, Timer, TimerId};
use crate::{
    clock::Clock,
    error::{EngineError, EngineResult},
    services::{AlertPayload, CompletionFeedback, NotificationScheduler},
    store::{TimerOrder, TimerStore},
};

/// Full timer list as published to subscribers, newest first
pub type TimerList = Arc<Vec<Timer>>;

/// Outcome of [`TimerEngine::restore_on_startup`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Timers that ran out while the process was gone
    pub completed: Vec<TimerId>,
    /// Timers still running whose alert was re-issued
    pub rescheduled: Vec<TimerId>,
}

/// Owns every timer mutation.
///
/// Caller operations and the tick all pass through one async mutex, held
/// across the store write, the scheduler call and the publish. Readers get
/// the last published list without taking it.
pub struct TimerEngine {
    store: Arc<dyn TimerStore>,
    scheduler: Arc<dyn NotificationScheduler>,
    feedback: Arc<dyn CompletionFeedback>,
    clock: Arc<dyn Clock>,
    serial: Mutex<()>,
    restored: AtomicBool,
    /// Set while the published list lags the store
    snapshot_stale: AtomicBool,
    /// Every publish, heartbeats included
    list_tx: broadcast::Sender<TimerList>,
    /// Latest published list
    snapshot_tx: watch::Sender<TimerList>,
    /// Keep the receiver alive to prevent channel closure
    _snapshot_rx: watch::Receiver<TimerList>,
}

impl TimerEngine {
    pub fn new(
        store: Arc<dyn TimerStore>,
        scheduler: Arc<dyn NotificationScheduler>,
        feedback: Arc<dyn CompletionFeedback>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (list_tx, _) = broadcast::channel(100);
        let (snapshot_tx, snapshot_rx) = watch::channel(TimerList::default());

        Self {
            store,
            scheduler,
            feedback,
            clock,
            serial: Mutex::new(()),
            restored: AtomicBool::new(false),
            snapshot_stale: AtomicBool::new(false),
            list_tx,
            snapshot_tx,
            _snapshot_rx: snapshot_rx,
        }
    }

    /// Current wall-clock reading used by the engine
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn is_restored(&self) -> bool {
        self.restored.load(Ordering::Acquire)
    }

    /// Create a paused timer holding `duration`
    pub async fn create(
        &self,
        title: &str,
        duration: Duration,
        linked_step_id: Option<String>,
    ) -> EngineResult<TimerId> {
        let duration_ms = duration_to_ms(duration);
        if duration_ms == 0 || duration_ms > MAX_DURATION_MS {
            return Err(EngineError::InvalidDuration);
        }

        let _serial = self.serial.lock().await;
        let timer = Timer::new(title, duration_ms, linked_step_id, self.clock.now());
        self.persist(&timer).await?;

        info!(
            "Created timer '{}' ({}) for {}s",
            timer.title,
            timer.id,
            duration.as_secs()
        );
        self.publish_from_store().await;
        Ok(timer.id)
    }

    /// Paused -> running, scheduling the alert. Running timers are left alone.
    pub async fn start(&self, id: &TimerId) -> EngineResult<Option<Timer>> {
        let _serial = self.serial.lock().await;
        let Some(mut timer) = self.store.get(id).await? else {
            debug!("Start ignored, timer {} not found", id);
            return Ok(None);
        };

        if !timer.start(self.clock.now()) {
            debug!("Start ignored, timer {} is {}", id, timer.state.as_str());
            return Ok(Some(timer));
        }

        self.persist(&timer).await?;
        info!(
            "Started timer '{}' ({}), fires at {:?}",
            timer.title,
            timer.id,
            timer.fire_at()
        );
        self.schedule_alert(&timer).await;
        self.publish_from_store().await;
        Ok(Some(timer))
    }

    /// Same transition as [`start`](Self::start)
    pub async fn resume(&self, id: &TimerId) -> EngineResult<Option<Timer>> {
        self.start(id).await
    }

    /// Running -> paused, freezing the remaining time and cancelling the alert
    pub async fn pause(&self, id: &TimerId) -> EngineResult<Option<Timer>> {
        let _serial = self.serial.lock().await;
        let Some(mut timer) = self.store.get(id).await? else {
            debug!("Pause ignored, timer {} not found", id);
            return Ok(None);
        };

        if !timer.pause(self.clock.now()) {
            debug!("Pause ignored, timer {} is {}", id, timer.state.as_str());
            return Ok(Some(timer));
        }

        self.persist(&timer).await?;
        info!(
            "Paused timer '{}' ({}) with {}ms left",
            timer.title, timer.id, timer.remaining_on_pause_ms
        );
        self.cancel_alert(&timer.id).await;
        self.publish_from_store().await;
        Ok(Some(timer))
    }

    /// Add time to a running or paused timer
    pub async fn extend(&self, id: &TimerId, by: Duration) -> EngineResult<Option<Timer>> {
        let by_ms = duration_to_ms(by);
        if by_ms == 0 {
            return Err(EngineError::InvalidDuration);
        }

        let _serial = self.serial.lock().await;
        let Some(mut timer) = self.store.get(id).await? else {
            debug!("Extend ignored, timer {} not found", id);
            return Ok(None);
        };

        if timer.run_length_ms().saturating_add(by_ms) > MAX_DURATION_MS {
            return Err(EngineError::InvalidDuration);
        }

        if !timer.extend(by_ms) {
            debug!("Extend ignored, timer {} is {}", id, timer.state.as_str());
            return Ok(Some(timer));
        }

        self.persist(&timer).await?;
        info!(
            "Extended timer '{}' ({}) by {}s",
            timer.title,
            timer.id,
            by.as_secs()
        );
        if timer.is_running() {
            self.cancel_alert(&timer.id).await;
            self.schedule_alert(&timer).await;
        }
        self.publish_from_store().await;
        Ok(Some(timer))
    }

    /// Delete a timer and its pending alert. Unknown ids are fine.
    pub async fn cancel(&self, id: &TimerId) -> EngineResult<()> {
        let _serial = self.serial.lock().await;
        if let Err(e) = self.store.delete(id).await {
            error!("Failed to delete timer {}: {}", id, e);
            self.publish_from_store().await;
            return Err(e.into());
        }

        info!("Cancelled timer {}", id);
        self.cancel_alert(id).await;
        self.publish_from_store().await;
        Ok(())
    }

    /// One pass of the 1 Hz driver.
    ///
    /// Completes every running timer that has run out, then publishes. A
    /// pass with no completion republishes the same list so countdown
    /// displays refresh. Returns how many timers completed.
    pub async fn tick(&self) -> EngineResult<usize> {
        if !self.is_restored() {
            return Err(EngineError::NotRestored);
        }

        let _serial = self.serial.lock().await;
        let now = self.clock.now();
        let snapshot = self.snapshot_tx.borrow().clone();
        let stale = self.snapshot_stale.load(Ordering::Acquire);

        // A stale list may still show a started timer as paused.
        let expired = if stale {
            match self.store.get_running().await {
                Ok(running) => expired_ids(&running, now),
                Err(e) => {
                    error!("Failed to load running timers for tick: {}", e);
                    expired_ids(&snapshot, now)
                }
            }
        } else {
            expired_ids(&snapshot, now)
        };

        if expired.is_empty() {
            if !stale || !self.publish_from_store().await {
                self.publish(snapshot);
            }
            return Ok(0);
        }

        let mut completed = 0;
        for id in &expired {
            if self.complete_expired(id, now).await {
                completed += 1;
            }
        }

        if !self.publish_from_store().await {
            self.publish(snapshot);
        }
        Ok(completed)
    }

    /// Bring running timers persisted by an earlier process back in line.
    ///
    /// Expired ones become done without feedback; the rest get their alert
    /// re-issued. Publishes the first list and unlocks the tick.
    pub async fn restore_on_startup(&self) -> EngineResult<RestoreReport> {
        let _serial = self.serial.lock().await;
        let running = self.store.get_running().await?;
        let now = self.clock.now();
        let mut report = RestoreReport::default();

        for mut timer in running {
            if timer.is_expired(now) {
                timer.complete();
                self.store.put(&timer).await?;
                info!(
                    "Timer '{}' ({}) ran out while stopped, marked done",
                    timer.title, timer.id
                );
                report.completed.push(timer.id);
            } else {
                self.schedule_alert(&timer).await;
                info!(
                    "Timer '{}' ({}) still running, {}s left",
                    timer.title,
                    timer.id,
                    timer.remaining_secs(now)
                );
                report.rescheduled.push(timer.id);
            }
        }

        let timers = self.store.get_all(TimerOrder::NewestFirst).await?;
        self.publish(Arc::new(timers));
        self.restored.store(true, Ordering::Release);

        info!(
            "Restore complete: {} completed, {} rescheduled",
            report.completed.len(),
            report.rescheduled.len()
        );
        Ok(report)
    }

    /// Re-issue the alert of every running timer, e.g. after a host sleep.
    /// Returns how many alerts were issued.
    pub async fn resync_notifications(&self) -> EngineResult<usize> {
        let _serial = self.serial.lock().await;
        let now = self.clock.now();
        let mut issued = 0;

        for timer in self.store.get_running().await? {
            if timer.is_expired(now) {
                // The tick will complete it.
                continue;
            }
            self.schedule_alert(&timer).await;
            issued += 1;
        }

        debug!("Resynced {} alerts", issued);
        Ok(issued)
    }

    /// Last published list
    pub fn list(&self) -> TimerList {
        self.snapshot_tx.borrow().clone()
    }

    /// Look a timer up in the last published list
    pub fn get(&self, id: &TimerId) -> Option<Timer> {
        self.snapshot_tx
            .borrow()
            .iter()
            .find(|timer| &timer.id == id)
            .cloned()
    }

    /// Every publish from now on, heartbeats included
    pub fn subscribe(&self) -> broadcast::Receiver<TimerList> {
        self.list_tx.subscribe()
    }

    /// Latest published list, for consumers that only care about the newest
    pub fn watch(&self) -> watch::Receiver<TimerList> {
        self.snapshot_tx.subscribe()
    }

    async fn complete_expired(&self, id: &TimerId, now: DateTime<Utc>) -> bool {
        let mut timer = match self.store.get(id).await {
            Ok(Some(timer)) => timer,
            Ok(None) => return false,
            Err(e) => {
                error!("Failed to load expiring timer {}: {}", id, e);
                return false;
            }
        };

        if !timer.is_expired(now) || !timer.complete() {
            return false;
        }

        if let Err(e) = self.store.put(&timer).await {
            error!("Failed to persist completion of timer {}: {}", id, e);
            return false;
        }

        info!("Timer '{}' ({}) completed", timer.title, timer.id);
        self.feedback.timer_finished(&timer);
        self.cancel_alert(&timer.id).await;
        true
    }

    async fn persist(&self, timer: &Timer) -> EngineResult<()> {
        if let Err(e) = self.store.put(timer).await {
            error!("Failed to persist timer {}: {}", timer.id, e);
            // Show what is durable, not the failed mutation.
            self.publish_from_store().await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn schedule_alert(&self, timer: &Timer) {
        let Some(fire_at) = timer.fire_at() else {
            return;
        };
        let payload = AlertPayload::timer_finished(&timer.title);
        if let Err(e) = self
            .scheduler
            .schedule(timer.id.as_str(), fire_at, payload)
            .await
        {
            warn!("Failed to schedule alert for timer {}: {}", timer.id, e);
        }
    }

    async fn cancel_alert(&self, id: &TimerId) {
        if let Err(e) = self.scheduler.cancel(&[id.to_string()]).await {
            warn!("Failed to cancel alert for timer {}: {}", id, e);
        }
    }

    async fn publish_from_store(&self) -> bool {
        match self.store.get_all(TimerOrder::NewestFirst).await {
            Ok(timers) => {
                self.publish(Arc::new(timers));
                self.snapshot_stale.store(false, Ordering::Release);
                true
            }
            Err(e) => {
                error!("Failed to reload timers for publish: {}", e);
                self.snapshot_stale.store(true, Ordering::Release);
                false
            }
        }
    }

    fn publish(&self, timers: TimerList) {
        if let Err(e) = self.snapshot_tx.send(Arc::clone(&timers)) {
            warn!("Failed to update timer snapshot: {}", e);
        }
        // No subscribers is not an error.
        let _ = self.list_tx.send(timers);
    }
}

fn expired_ids(timers: &[Timer], now: DateTime<Utc>) -> Vec<TimerId> {
    timers
        .iter()
        .filter(|timer| timer.is_expired(now))
        .map(|timer| timer.id.clone())
        .collect()
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
