//! Wake-up recovery background task

use std::{sync::Arc, time::Duration};

use tokio::time::{interval, Instant};
use tracing::{info, warn};

use crate::state::TimerEngine;

const CHECK_INTERVAL: Duration = Duration::from_secs(15);

/// Wall-clock drift over the monotonic clock that counts as a host sleep
const SLEEP_THRESHOLD: Duration = Duration::from_secs(5);

/// How long the host was asleep between two checks, if it was.
///
/// The monotonic clock stops while suspended and the wall clock does not,
/// so the difference is the time spent asleep.
pub fn detect_sleep_gap(wall_elapsed: chrono::Duration, mono_elapsed: Duration) -> Option<Duration> {
    let wall = wall_elapsed.to_std().ok()?;
    let gap = wall.checked_sub(mono_elapsed)?;
    (gap >= SLEEP_THRESHOLD).then_some(gap)
}

/// Background task that notices host wake-ups and re-issues pending alerts
pub async fn wake_up_recovery_task(engine: Arc<TimerEngine>) {
    info!("Starting wake-up recovery task");

    let mut ticker = interval(CHECK_INTERVAL);
    let mut last_wall = engine.now();
    let mut last_mono = Instant::now();

    loop {
        ticker.tick().await;

        let wall = engine.now();
        let mono = Instant::now();
        let gap = detect_sleep_gap(wall - last_wall, mono - last_mono);
        last_wall = wall;
        last_mono = mono;

        let Some(gap) = gap else {
            continue;
        };

        warn!(
            "System wake-up detected after ~{}s asleep, resyncing alerts",
            gap.as_secs()
        );
        match engine.resync_notifications().await {
            Ok(issued) => info!("Re-issued {} alert(s) after wake-up", issued),
            Err(e) => warn!("Failed to resync alerts after wake-up: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(15, 15, None)]
    #[case(18, 15, None)]
    #[case(20, 15, Some(5))]
    #[case(3615, 15, Some(3600))]
    #[case(10, 15, None)]
    fn sleep_gap_needs_wall_clock_to_run_ahead(
        #[case] wall_secs: i64,
        #[case] mono_secs: u64,
        #[case] expected: Option<u64>,
    ) {
        let gap = detect_sleep_gap(
            chrono::Duration::seconds(wall_secs),
            Duration::from_secs(mono_secs),
        );
        assert_eq!(gap.map(|g| g.as_secs()), expected);
    }

    #[test]
    fn clock_set_backwards_is_not_a_sleep() {
        let gap = detect_sleep_gap(chrono::Duration::seconds(-60), Duration::from_secs(15));
        assert_eq!(gap, None);
    }
}
