//! SQLite-backed timer store
//!
//! A single worker thread owns the connection. Every call is shipped to it
//! as a boxed closure and answered through a oneshot channel, which keeps
//! rusqlite off the async runtime and gives one writer per database.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use super::{migrations::run_migrations, TimerOrder, TimerStore};
use crate::{
    error::StoreError,
    state::{Timer, TimerId, TimerStatus},
};

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct StoreInner {
    sender: Mutex<mpsc::Sender<DbCommand>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            let sender = match self.sender.lock() {
                Ok(sender) => sender,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Err(err) = sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to timer store thread: {err}");
            }
            drop(sender);
            if let Err(join_err) = handle.join() {
                error!("Failed to join timer store thread: {join_err:?}");
            }
        }
    }
}

enum Location {
    File(PathBuf),
    Memory,
}

const TIMER_COLUMNS: &str = "id, title, total_duration_ms, remaining_on_pause_ms, start_timestamp, state, linked_step_id, created_at";

/// Timer store persisted in a SQLite database
#[derive(Clone)]
pub struct SqliteTimerStore {
    inner: Arc<StoreInner>,
    location: Arc<Option<PathBuf>>,
}

impl SqliteTimerStore {
    /// Open (or create) the database at `path` and run migrations
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| {
                StoreError::Unavailable(format!(
                    "failed to create database directory {}: {err}",
                    parent.display()
                ))
            })?;
        }
        Self::spawn(Location::File(path))
    }

    /// Open a private in-memory database, mostly for tests
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::spawn(Location::Memory)
    }

    pub fn path(&self) -> Option<&Path> {
        (*self.location).as_deref()
    }

    fn spawn(location: Location) -> Result<Self, StoreError> {
        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let path = match &location {
            Location::File(path) => Some(path.clone()),
            Location::Memory => None,
        };

        let worker = thread::Builder::new()
            .name("timer-store".into())
            .spawn(move || {
                let opened = match &location {
                    Location::File(path) => Connection::open(path),
                    Location::Memory => Connection::open_in_memory(),
                };
                let mut conn = match opened {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(
                            anyhow::Error::new(err).context("failed to open SQLite database")
                        ));
                        return;
                    }
                };

                if let Location::File(_) = location {
                    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                        error!("Failed to enable WAL mode: {err}");
                    }
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run database migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("Timer store opener went away before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => task(&mut conn),
                        DbCommand::Shutdown => break,
                    }
                }

                debug!("Timer store thread shutting down");
            })
            .map_err(|err| {
                StoreError::Unavailable(format!("failed to spawn timer store thread: {err}"))
            })?;

        ready_rx
            .recv()
            .map_err(|_| {
                StoreError::Unavailable("timer store thread exited before signaling readiness".into())
            })?
            .map_err(|err| StoreError::Unavailable(format!("{err:#}")))?;

        match &path {
            Some(path) => info!("Timer store opened at {}", path.display()),
            None => info!("Timer store opened in memory"),
        }

        Ok(Self {
            inner: Arc::new(StoreInner {
                sender: Mutex::new(command_tx),
                worker: Mutex::new(Some(worker)),
            }),
            location: Arc::new(path),
        })
    }

    async fn execute<F, T>(&self, task: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                debug!("Timer store caller dropped before receiving result");
            }
        }));

        {
            let sender = self
                .inner
                .sender
                .lock()
                .map_err(|_| StoreError::Unavailable("timer store sender poisoned".into()))?;
            sender.send(command).map_err(|err| {
                StoreError::Unavailable(format!("failed to send command to timer store: {err}"))
            })?;
        }

        reply_rx
            .await
            .map_err(|_| StoreError::Unavailable("timer store thread terminated unexpectedly".into()))?
    }
}

#[async_trait]
impl TimerStore for SqliteTimerStore {
    async fn put(&self, timer: &Timer) -> Result<(), StoreError> {
        let record = timer.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO timers (id, title, total_duration_ms, remaining_on_pause_ms, start_timestamp, state, linked_step_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                     total_duration_ms = excluded.total_duration_ms,
                     remaining_on_pause_ms = excluded.remaining_on_pause_ms,
                     start_timestamp = excluded.start_timestamp,
                     state = excluded.state",
                params![
                    record.id.as_str(),
                    record.title,
                    to_i64(record.total_duration_ms)?,
                    to_i64(record.remaining_on_pause_ms)?,
                    record.start_timestamp.as_ref().map(format_datetime),
                    record.state.as_str(),
                    record.linked_step_id,
                    format_datetime(&record.created_at),
                ],
            )
            .with_context(|| format!("failed to write timer {}", record.id))?;
            Ok(())
        })
        .await
    }

    async fn get(&self, id: &TimerId) -> Result<Option<Timer>, StoreError> {
        let id = id.clone();
        self.execute(move |conn| {
            let sql = format!("SELECT {TIMER_COLUMNS} FROM timers WHERE id = ?1");
            let raw = conn
                .query_row(&sql, params![id.as_str()], RawTimer::from_row)
                .optional()
                .with_context(|| format!("failed to read timer {id}"))?;
            raw.map(RawTimer::into_timer).transpose()
        })
        .await
    }

    async fn get_all(&self, order: TimerOrder) -> Result<Vec<Timer>, StoreError> {
        let direction = match order {
            TimerOrder::NewestFirst => "DESC",
            TimerOrder::OldestFirst => "ASC",
        };
        let sql = format!(
            "SELECT {TIMER_COLUMNS} FROM timers ORDER BY created_at {direction}, rowid {direction}"
        );
        self.execute(move |conn| query_timers(conn, &sql, params![])).await
    }

    async fn get_running(&self) -> Result<Vec<Timer>, StoreError> {
        let sql = format!(
            "SELECT {TIMER_COLUMNS} FROM timers WHERE state = ?1 ORDER BY created_at DESC"
        );
        self.execute(move |conn| query_timers(conn, &sql, params![TimerStatus::Running.as_str()]))
            .await
    }

    async fn delete(&self, id: &TimerId) -> Result<(), StoreError> {
        let id = id.clone();
        self.execute(move |conn| {
            conn.execute("DELETE FROM timers WHERE id = ?1", params![id.as_str()])
                .with_context(|| format!("failed to delete timer {id}"))?;
            Ok(())
        })
        .await
    }
}

fn query_timers<P: rusqlite::Params>(
    conn: &mut Connection,
    sql: &str,
    params: P,
) -> Result<Vec<Timer>, StoreError> {
    let mut stmt = conn.prepare(sql).context("failed to prepare timer query")?;
    let rows = stmt
        .query_map(params, RawTimer::from_row)
        .context("failed to query timers")?;

    let mut timers = Vec::new();
    for row in rows {
        let raw = row.context("failed to read timer row")?;
        timers.push(raw.into_timer()?);
    }
    Ok(timers)
}

/// Column values as stored, validated by [`RawTimer::into_timer`]
struct RawTimer {
    id: String,
    title: String,
    total_duration_ms: i64,
    remaining_on_pause_ms: i64,
    start_timestamp: Option<String>,
    state: String,
    linked_step_id: Option<String>,
    created_at: String,
}

impl RawTimer {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            title: row.get("title")?,
            total_duration_ms: row.get("total_duration_ms")?,
            remaining_on_pause_ms: row.get("remaining_on_pause_ms")?,
            start_timestamp: row.get("start_timestamp")?,
            state: row.get("state")?,
            linked_step_id: row.get("linked_step_id")?,
            created_at: row.get("created_at")?,
        })
    }

    fn into_timer(self) -> Result<Timer, StoreError> {
        let state = TimerStatus::parse(&self.state).ok_or_else(|| {
            StoreError::Corrupt(format!("timer {} has unknown state '{}'", self.id, self.state))
        })?;
        let start_timestamp = self
            .start_timestamp
            .as_deref()
            .map(|raw| parse_datetime(raw, &self.id))
            .transpose()?;

        match (state, start_timestamp.is_some()) {
            (TimerStatus::Running, false) => {
                return Err(StoreError::Corrupt(format!(
                    "running timer {} has no start timestamp",
                    self.id
                )))
            }
            (TimerStatus::Paused | TimerStatus::Done, true) => {
                return Err(StoreError::Corrupt(format!(
                    "{} timer {} carries a start timestamp",
                    state.as_str(),
                    self.id
                )))
            }
            _ => {}
        }

        Ok(Timer {
            total_duration_ms: to_u64(self.total_duration_ms, "total_duration_ms", &self.id)?,
            remaining_on_pause_ms: to_u64(
                self.remaining_on_pause_ms,
                "remaining_on_pause_ms",
                &self.id,
            )?,
            created_at: parse_datetime(&self.created_at, &self.id)?,
            id: TimerId::from(self.id),
            title: self.title,
            start_timestamp,
            state,
            linked_step_id: self.linked_step_id,
        })
    }
}

fn format_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_datetime(value: &str, id: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StoreError::Corrupt(format!("timer {id} has invalid datetime '{value}': {err}")))
}

fn to_i64(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value)
        .map_err(|_| StoreError::Backend(anyhow!("value {value} exceeds SQLite INTEGER range")))
}

fn to_u64(value: i64, field: &str, id: &str) -> Result<u64, StoreError> {
    u64::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("timer {id} has negative {field} {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + Duration::seconds(secs)
    }

    #[tokio::test]
    async fn put_then_get_round_trips_every_field() {
        let store = SqliteTimerStore::open_in_memory().unwrap();
        let mut timer = Timer::new("Eggs", 600_000, Some("step-7".into()), at(0));
        timer.start(at(5));
        store.put(&timer).await.unwrap();

        let loaded = store.get(&timer.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, timer.id);
        assert_eq!(loaded.title, "Eggs");
        assert_eq!(loaded.state, TimerStatus::Running);
        assert_eq!(loaded.total_duration_ms, 600_000);
        assert_eq!(loaded.start_timestamp, Some(at(5)));
        assert_eq!(loaded.linked_step_id.as_deref(), Some("step-7"));
        assert_eq!(loaded.created_at, at(0));
    }

    #[tokio::test]
    async fn put_overwrites_existing_timer() {
        let store = SqliteTimerStore::open_in_memory().unwrap();
        let mut timer = Timer::new("Rice", 60_000, None, at(0));
        store.put(&timer).await.unwrap();
        timer.start(at(1));
        timer.pause(at(11));
        store.put(&timer).await.unwrap();

        let all = store.get_all(TimerOrder::NewestFirst).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].state, TimerStatus::Paused);
        assert_eq!(all[0].remaining_on_pause_ms, 50_000);
        assert!(all[0].start_timestamp.is_none());
    }

    #[tokio::test]
    async fn get_all_orders_by_creation_time() {
        let store = SqliteTimerStore::open_in_memory().unwrap();
        for (offset, title) in [(0, "first"), (10, "second"), (20, "third")] {
            store
                .put(&Timer::new(title, 1_000, None, at(offset)))
                .await
                .unwrap();
        }

        let newest: Vec<_> = store
            .get_all(TimerOrder::NewestFirst)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(newest, ["third", "second", "first"]);

        let oldest: Vec<_> = store
            .get_all(TimerOrder::OldestFirst)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(oldest, ["first", "second", "third"]);
    }

    #[tokio::test]
    async fn get_running_filters_by_state() {
        let store = SqliteTimerStore::open_in_memory().unwrap();
        let paused = Timer::new("paused", 1_000, None, at(0));
        let mut running = Timer::new("running", 1_000, None, at(1));
        running.start(at(2));
        let mut done = Timer::new("done", 1_000, None, at(3));
        done.start(at(3));
        done.complete();
        for timer in [&paused, &running, &done] {
            store.put(timer).await.unwrap();
        }

        let found = store.get_running().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, running.id);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = SqliteTimerStore::open_in_memory().unwrap();
        let timer = Timer::new("Tea", 1_000, None, at(0));
        store.put(&timer).await.unwrap();

        store.delete(&timer.id).await.unwrap();
        store.delete(&timer.id).await.unwrap();
        assert!(store.get(&timer.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rows_breaking_invariants_are_reported_corrupt() {
        let store = SqliteTimerStore::open_in_memory().unwrap();
        store
            .execute(|conn| {
                conn.execute(
                    "INSERT INTO timers (id, title, total_duration_ms, remaining_on_pause_ms, start_timestamp, state, linked_step_id, created_at)
                     VALUES ('bad', 'Bad', 1000, 1000, NULL, 'running', NULL, '2024-05-01T12:00:00.000000000Z')",
                    [],
                )
                .context("insert")?;
                Ok(())
            })
            .await
            .unwrap();

        let result = store.get(&TimerId::from("bad")).await;
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }

    #[tokio::test]
    async fn reopening_a_file_keeps_timers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("timers.db");
        let timer = Timer::new("Stock", 7_200_000, None, at(0));

        {
            let store = SqliteTimerStore::open(&path).unwrap();
            store.put(&timer).await.unwrap();
            assert_eq!(store.path(), Some(path.as_path()));
        }

        let reopened = SqliteTimerStore::open(&path).unwrap();
        let loaded = reopened.get(&timer.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Stock");
    }
}
