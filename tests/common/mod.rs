// Shared fixtures for the engine and API tests.
//
// - RecordingScheduler keeps the pending alert per key, plus a log of calls.
// - CountingFeedback counts completion signals.
// - FlakyStore wraps a real store and fails writes on demand.
#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kitchen_timers::{
    clock::ManualClock,
    error::{NotifyError, StoreError},
    services::{AlertPayload, CompletionFeedback, NotificationScheduler},
    state::{Timer, TimerEngine, TimerId},
    store::{SqliteTimerStore, TimerOrder, TimerStore},
};

pub fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-05-01T18:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerCall {
    Schedule { key: String, fire_at: DateTime<Utc> },
    Cancel { keys: Vec<String> },
}

#[derive(Default)]
pub struct RecordingScheduler {
    pending: Mutex<HashMap<String, DateTime<Utc>>>,
    calls: Mutex<Vec<SchedulerCall>>,
    fail: AtomicBool,
}

impl RecordingScheduler {
    pub fn pending_at(&self, key: &TimerId) -> Option<DateTime<Utc>> {
        self.pending.lock().unwrap().get(key.as_str()).copied()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<SchedulerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn schedule_calls_for(&self, key: &TimerId) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, SchedulerCall::Schedule { key: k, .. } if k == key.as_str()))
            .count()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationScheduler for RecordingScheduler {
    async fn schedule(
        &self,
        key: &str,
        fire_at: DateTime<Utc>,
        _payload: AlertPayload,
    ) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Unavailable("scheduler offline".into()));
        }
        self.calls.lock().unwrap().push(SchedulerCall::Schedule {
            key: key.to_string(),
            fire_at,
        });
        self.pending.lock().unwrap().insert(key.to_string(), fire_at);
        Ok(())
    }

    async fn cancel(&self, keys: &[String]) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Unavailable("scheduler offline".into()));
        }
        self.calls.lock().unwrap().push(SchedulerCall::Cancel {
            keys: keys.to_vec(),
        });
        let mut pending = self.pending.lock().unwrap();
        for key in keys {
            pending.remove(key);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct CountingFeedback {
    count: AtomicUsize,
    titles: Mutex<Vec<String>>,
}

impl CountingFeedback {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn titles(&self) -> Vec<String> {
        self.titles.lock().unwrap().clone()
    }
}

impl CompletionFeedback for CountingFeedback {
    fn timer_finished(&self, timer: &Timer) {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.titles.lock().unwrap().push(timer.title.clone());
    }
}

/// Real store whose writes, or full listings, can be switched to fail
pub struct FlakyStore {
    inner: SqliteTimerStore,
    fail_writes: AtomicBool,
    fail_listing: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: SqliteTimerStore) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
            fail_listing: AtomicBool::new(false),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `get_all` fail, as an unreadable row would
    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow::anyhow!("disk full")));
        }
        Ok(())
    }
}

#[async_trait]
impl TimerStore for FlakyStore {
    async fn put(&self, timer: &Timer) -> Result<(), StoreError> {
        self.check()?;
        self.inner.put(timer).await
    }

    async fn get(&self, id: &TimerId) -> Result<Option<Timer>, StoreError> {
        self.inner.get(id).await
    }

    async fn get_all(&self, order: TimerOrder) -> Result<Vec<Timer>, StoreError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt("timer x has unknown state 'stale'".into()));
        }
        self.inner.get_all(order).await
    }

    async fn get_running(&self) -> Result<Vec<Timer>, StoreError> {
        self.inner.get_running().await
    }

    async fn delete(&self, id: &TimerId) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete(id).await
    }
}

/// Engine wired to fakes, with every collaborator kept for assertions
pub struct Harness {
    pub engine: Arc<TimerEngine>,
    pub store: Arc<FlakyStore>,
    pub scheduler: Arc<RecordingScheduler>,
    pub feedback: Arc<CountingFeedback>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn with_store(store: SqliteTimerStore, now: DateTime<Utc>) -> Self {
        let store = Arc::new(FlakyStore::new(store));
        let scheduler = Arc::new(RecordingScheduler::default());
        let feedback = Arc::new(CountingFeedback::default());
        let clock = Arc::new(ManualClock::new(now));
        let engine = Arc::new(TimerEngine::new(
            store.clone(),
            scheduler.clone(),
            feedback.clone(),
            clock.clone(),
        ));
        Self {
            engine,
            store,
            scheduler,
            feedback,
            clock,
        }
    }

    /// Fresh in-memory engine, already restored
    pub async fn restored() -> Self {
        let harness = Self::with_store(SqliteTimerStore::open_in_memory().unwrap(), t0());
        harness.engine.restore_on_startup().await.unwrap();
        harness
    }
}
