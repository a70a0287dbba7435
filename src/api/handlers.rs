//! HTTP endpoint handlers

use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
};
use futures::stream::{self, Stream};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, warn};

use super::responses::{
    ApiResponse, CreateTimerRequest, ExtendTimerRequest, HealthResponse, TimerListResponse,
    TimerView,
};
use crate::{
    error::EngineError,
    state::{Timer, TimerEngine, TimerId, TimerStatus},
};

type HandlerResult = Result<Json<ApiResponse>, StatusCode>;

fn error_status(action: &str, id: &str, e: EngineError) -> StatusCode {
    match e {
        EngineError::InvalidDuration => StatusCode::BAD_REQUEST,
        EngineError::NotRestored => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Store(store_error) => {
            error!("Failed to {} timer {}: {}", action, id, store_error);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// `target` is the state the operation leaves an affected timer in. A timer
/// found in any other state was left untouched.
fn operation_response(
    engine: &TimerEngine,
    action: &str,
    target: &[TimerStatus],
    id: &TimerId,
    result: Result<Option<Timer>, EngineError>,
) -> HandlerResult {
    match result {
        Ok(Some(timer)) if target.contains(&timer.state) => Ok(Json(ApiResponse::ok(
            format!("Timer {} {}", timer.title, action),
            TimerView::at(&timer, engine.now()),
        ))),
        Ok(Some(timer)) => Ok(Json(ApiResponse::unchanged(
            format!(
                "Timer {} is {}, not {}",
                timer.title,
                timer.state.as_str(),
                action
            ),
            TimerView::at(&timer, engine.now()),
        ))),
        Ok(None) => Ok(Json(ApiResponse::noop(format!("Timer {} not found", id)))),
        Err(e) => Err(error_status(action, id.as_str(), e)),
    }
}

/// Handle GET /timers - List every timer, newest first
pub async fn list_handler(State(engine): State<Arc<TimerEngine>>) -> Json<TimerListResponse> {
    let now = engine.now();
    let timers = engine.list();
    Json(TimerListResponse {
        timers: TimerView::list_at(&timers, now),
        timestamp: now,
    })
}

/// Handle POST /timers - Create a paused timer
pub async fn create_handler(
    State(engine): State<Arc<TimerEngine>>,
    Json(request): Json<CreateTimerRequest>,
) -> HandlerResult {
    let id = engine
        .create(
            &request.title,
            Duration::from_secs(request.duration_secs),
            request.linked_step_id,
        )
        .await
        .map_err(|e| error_status("create", &request.title, e))?;

    match engine.get(&id) {
        Some(timer) => Ok(Json(ApiResponse::ok(
            format!("Timer {} created", timer.title),
            TimerView::at(&timer, engine.now()),
        ))),
        None => {
            // Persisted, but the reload for the publish failed.
            warn!("Created timer {} missing from published list", id);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Handle POST /timers/:id/start
pub async fn start_handler(
    State(engine): State<Arc<TimerEngine>>,
    Path(id): Path<String>,
) -> HandlerResult {
    let id = TimerId::from(id);
    let result = engine.start(&id).await;
    operation_response(&engine, "started", &[TimerStatus::Running], &id, result)
}

/// Handle POST /timers/:id/resume
pub async fn resume_handler(
    State(engine): State<Arc<TimerEngine>>,
    Path(id): Path<String>,
) -> HandlerResult {
    let id = TimerId::from(id);
    let result = engine.resume(&id).await;
    operation_response(&engine, "resumed", &[TimerStatus::Running], &id, result)
}

/// Handle POST /timers/:id/pause
pub async fn pause_handler(
    State(engine): State<Arc<TimerEngine>>,
    Path(id): Path<String>,
) -> HandlerResult {
    let id = TimerId::from(id);
    let result = engine.pause(&id).await;
    operation_response(&engine, "paused", &[TimerStatus::Paused], &id, result)
}

/// Handle POST /timers/:id/extend
pub async fn extend_handler(
    State(engine): State<Arc<TimerEngine>>,
    Path(id): Path<String>,
    Json(request): Json<ExtendTimerRequest>,
) -> HandlerResult {
    let id = TimerId::from(id);
    let result = engine
        .extend(&id, Duration::from_secs(request.seconds))
        .await;
    operation_response(
        &engine,
        "extended",
        &[TimerStatus::Running, TimerStatus::Paused],
        &id,
        result,
    )
}

/// Handle DELETE /timers/:id
pub async fn cancel_handler(
    State(engine): State<Arc<TimerEngine>>,
    Path(id): Path<String>,
) -> HandlerResult {
    let id = TimerId::from(id);
    match engine.cancel(&id).await {
        Ok(()) => Ok(Json(ApiResponse::new(
            "ok",
            format!("Timer {} cancelled", id),
            None,
        ))),
        Err(e) => Err(error_status("cancel", id.as_str(), e)),
    }
}

/// Handle GET /timers/stream - Server-sent events, one per publish
pub async fn stream_handler(
    State(engine): State<Arc<TimerEngine>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let updates = engine.subscribe();
    let initial = engine.list();

    let events = stream::unfold(
        (engine, updates, Some(initial)),
        |(engine, mut updates, pending)| async move {
            let timers = match pending {
                Some(timers) => timers,
                None => loop {
                    match updates.recv().await {
                        Ok(timers) => break timers,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Timer stream lagged, skipped {} updates", skipped);
                        }
                        Err(RecvError::Closed) => return None,
                    }
                },
            };

            let views = TimerView::list_at(&timers, engine.now());
            let event = match serde_json::to_string(&views) {
                Ok(data) => Event::default().event("timers").data(data),
                Err(e) => {
                    error!("Failed to encode timer list: {}", e);
                    Event::default().event("error")
                }
            };
            Some((Ok(event), (engine, updates, None)))
        },
    );

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Handle GET /health - Health check endpoint
pub async fn health_handler(State(engine): State<Arc<TimerEngine>>) -> Json<HealthResponse> {
    Json(HealthResponse::ok(engine.is_restored()))
}
