//! HTTP ingress for receipt events.
//!
//! The mail receiver stages the raw message, then POSTs its receipt event
//! here. A 500 response tells the caller to retry the whole unit of work.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tracing::info;

use crate::error::PipelineError;
use crate::pipeline::types::ReceiptEvent;
use crate::pipeline::{InboundProcessor, ReplyProcessor};

/// Shared state for the ingress routes.
#[derive(Clone)]
pub struct RelayState {
    pub inbound: Arc<InboundProcessor>,
    pub reply: Arc<ReplyProcessor>,
}

/// Build the Axum router for the relay ingress.
pub fn relay_routes(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/inbound", post(inbound))
        .route("/reply", post(reply))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "contact-relay"
    }))
}

async fn inbound(State(state): State<RelayState>, Json(event): Json<ReceiptEvent>) -> Response {
    info!(message_id = %event.message_id, source = %event.source, "Inbound receipt");
    respond(state.inbound.process(&event).await)
}

async fn reply(State(state): State<RelayState>, Json(event): Json<ReceiptEvent>) -> Response {
    info!(message_id = %event.message_id, source = %event.source, "Reply receipt");
    respond(state.reply.process(&event).await)
}

fn respond<T: Serialize>(result: Result<T, PipelineError>) -> Response {
    match result {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
