//! Read-only saga inspection endpoint.
//!
//! The orchestrator is driven entirely by events; this route exists for
//! operators and dashboards, it never mutates a saga.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use common::OrderId;
use saga_store::SagaStore;
use serde::Serialize;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: SagaStore> {
    pub store: S,
}

#[derive(Serialize)]
pub struct SagaStatusResponse {
    pub saga_id: String,
    pub order_id: String,
    pub state: String,
    pub completed_steps: Vec<String>,
    pub reservation_id: Option<String>,
    pub payment_id: Option<String>,
    pub last_error: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// GET /sagas/{order_id} — current status of the saga for an order.
#[tracing::instrument(skip(state))]
pub async fn get<S: SagaStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_id): Path<String>,
) -> Result<Json<SagaStatusResponse>, ApiError> {
    let uuid = uuid::Uuid::parse_str(&order_id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid order_id: {e}")))?;

    let saga = state
        .store
        .load_by_order(OrderId::from_uuid(uuid))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No saga for order {order_id}")))?;

    Ok(Json(SagaStatusResponse {
        saga_id: saga.saga_id().to_string(),
        order_id: saga.order_id().to_string(),
        state: saga.state().to_string(),
        completed_steps: saga
            .completed_steps()
            .iter()
            .map(|s| s.to_string())
            .collect(),
        reservation_id: saga.reservation_id().map(str::to_string),
        payment_id: saga.payment_id().map(str::to_string),
        last_error: saga.last_error().map(str::to_string),
        version: saga.version().as_i64(),
        created_at: saga.created_at(),
        updated_at: saga.updated_at(),
    }))
}
