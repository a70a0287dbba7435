//! Kitchen Timers - HTTP front of the timer engine
//!
//! This is the main entry point for the kitchen-timers application.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use kitchen_timers::{
    api::create_router,
    clock::{Clock, SystemClock},
    config::Config,
    services::{CompletionFeedback, LocalNotificationScheduler, LogFeedback, TerminalBell},
    state::TimerEngine,
    store::SqliteTimerStore,
    tasks::{timer_tick_task, wake_up_recovery_task},
    utils::shutdown_signal,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing with appropriate log level
    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "kitchen_timers={},tower_http=info",
            config.log_level()
        ))
        .init();

    info!("Starting kitchen-timers v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration: host={}, port={}, database={}",
        config.host,
        config.port,
        config.database.display()
    );

    // Without a store there is nothing to recover or persist
    let store = SqliteTimerStore::open(&config.database)
        .context("failed to open timer store")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let scheduler = Arc::new(LocalNotificationScheduler::new(
        Arc::clone(&clock),
        config.notify_command.clone(),
    ));
    let feedback: Arc<dyn CompletionFeedback> = if config.no_bell {
        Arc::new(LogFeedback)
    } else {
        Arc::new(TerminalBell)
    };

    let engine = Arc::new(TimerEngine::new(
        Arc::new(store),
        scheduler,
        feedback,
        clock,
    ));

    // Recover timers left running by a previous process before anything ticks
    let report = engine
        .restore_on_startup()
        .await
        .context("startup recovery failed")?;
    info!(
        "Recovered {} expired and {} running timer(s)",
        report.completed.len(),
        report.rescheduled.len()
    );

    let tick_engine = Arc::clone(&engine);
    tokio::spawn(async move {
        timer_tick_task(tick_engine).await;
    });

    let wake_engine = Arc::clone(&engine);
    tokio::spawn(async move {
        wake_up_recovery_task(wake_engine).await;
    });

    // Create HTTP router with all endpoints
    let app = create_router(engine);

    // Bind to the specified address
    let addr = config.address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!("Server running on http://{}", addr);
    info!("Endpoints:");
    info!("  GET    /timers             - List timers");
    info!("  POST   /timers             - Create a timer");
    info!("  POST   /timers/:id/start   - Start a timer");
    info!("  POST   /timers/:id/pause   - Pause a timer");
    info!("  POST   /timers/:id/resume  - Resume a timer");
    info!("  POST   /timers/:id/extend  - Add time to a timer");
    info!("  DELETE /timers/:id         - Cancel a timer");
    info!("  GET    /timers/stream      - Live timer list (SSE)");
    info!("  GET    /health             - Health check");

    // Setup graceful shutdown
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}
