//! Handler for `GET /healthz` — liveness plus a store round-trip.

use axum::{Json, extract::State};
use herald_core::store::EngagementStore;
use serde_json::{Value, json};

use crate::{ApiState, error::ApiError};

/// `GET /healthz`
///
/// Returns 200 only after a successful store query, so a wedged database
/// shows up here rather than on the first real request.
pub async fn handler<S>(State(state): State<ApiState<S>>) -> Result<Json<Value>, ApiError>
where
  S: EngagementStore,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  state
    .store
    .store_counts()
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;

  Ok(Json(json!({ "ok": true })))
}
