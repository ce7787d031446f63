//! Handler for `GET /unsubscribe` — the one-click opt-out link.
//!
//! Appends a revoked promotions event for the customer owning the identity.
//! The ledger stays append-only: nothing is updated or deleted, and a later
//! re-grant simply outranks this event.

use axum::{
  Json,
  extract::{Query, State},
};
use herald_core::{
  consent::{ConsentProof, ConsentPurpose, ConsentStatus, NewConsentEvent},
  customer::{Channel, normalize_address},
  store::EngagementStore,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::{ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct UnsubscribeParams {
  pub channel: Channel,
  pub value:   String,
}

/// `GET /unsubscribe?channel=email&value=<address>`
pub async fn handler<S>(
  State(state): State<ApiState<S>>,
  Query(params): Query<UnsubscribeParams>,
) -> Result<Json<Value>, ApiError>
where
  S: EngagementStore,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  let value = normalize_address(params.channel, &params.value);

  let identity = state
    .store
    .find_identity(params.channel, &value)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or_else(|| ApiError::NotFound("identity not found".into()))?;

  state
    .store
    .append_consent(NewConsentEvent {
      customer_id: identity.customer_id,
      channel:     params.channel,
      purpose:     ConsentPurpose::Promotions,
      status:      ConsentStatus::Revoked,
      proof:       ConsentProof::method("unsubscribe_link"),
    })
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;

  info!(customer = %identity.customer_id, channel = params.channel.discriminant(), "unsubscribed");

  Ok(Json(json!({ "ok": true, "message": "You have been unsubscribed." })))
}
