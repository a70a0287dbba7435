//! 1 Hz timer tick background task

use std::{sync::Arc, time::Duration};

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::{error::EngineError, state::TimerEngine};

/// Cadence of the completion check and heartbeat publish
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Background task driving completion detection for the engine's lifetime.
///
/// Must be spawned after [`TimerEngine::restore_on_startup`] has returned.
pub async fn timer_tick_task(engine: Arc<TimerEngine>) {
    info!("Starting timer tick task");

    let mut ticker = interval(TICK_INTERVAL);
    // After a stall, one catch-up pass is enough; remaining time is derived.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        match engine.tick().await {
            Ok(0) => {}
            Ok(completed) => {
                debug!("Tick completed {} timer(s)", completed);
            }
            Err(EngineError::NotRestored) => {
                error!("Tick ran before startup recovery, skipping");
            }
            Err(e) => {
                error!("Timer tick failed: {}", e);
            }
        }
    }
}
