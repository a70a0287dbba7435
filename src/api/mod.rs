//! HTTP API module
//!
//! This module contains all HTTP endpoint handlers and response structures.

pub mod handlers;
pub mod responses;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::TimerEngine;
use handlers::*;

/// Create the HTTP router with all endpoints
pub fn create_router(engine: Arc<TimerEngine>) -> Router {
    Router::new()
        .route("/timers", get(list_handler).post(create_handler))
        .route("/timers/stream", get(stream_handler))
        .route("/timers/:id", axum::routing::delete(cancel_handler))
        .route("/timers/:id/start", post(start_handler))
        .route("/timers/:id/resume", post(resume_handler))
        .route("/timers/:id/pause", post(pause_handler))
        .route("/timers/:id/extend", post(extend_handler))
        .route("/health", get(health_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(engine)
}
