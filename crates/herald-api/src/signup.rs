//! Handler for `POST /signup` — the public intake form.
//!
//! Creates (or re-resolves) the customer behind (channel, value), appends a
//! granted promotions consent when the form box was ticked, and records the
//! optional declared interest as a customer attribute.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use herald_core::{
  consent::{ConsentProof, ConsentPurpose, ConsentStatus, NewConsentEvent},
  customer::Channel,
  directory,
  store::EngagementStore,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ApiState, error::ApiError};

fn default_consent() -> bool { true }

#[derive(Debug, Deserialize)]
pub struct SignupBody {
  pub first_name:         String,
  pub channel:            Channel,
  pub value:              String,
  /// Declared interest, kept as a customer attribute and frozen into
  /// future payload snapshots.
  pub interest:           Option<String>,
  #[serde(default = "default_consent")]
  pub consent_promotions: bool,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
  pub ok:          bool,
  pub customer_id: Uuid,
  pub identity_id: Uuid,
  pub created:     bool,
}

/// `POST /signup`
pub async fn handler<S>(
  State(state): State<ApiState<S>>,
  Json(body): Json<SignupBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: EngagementStore,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  let first_name = body.first_name.trim();
  if first_name.is_empty() {
    return Err(ApiError::BadRequest("first_name must not be empty".into()));
  }
  if body.value.trim().is_empty() {
    return Err(ApiError::BadRequest("value must not be empty".into()));
  }

  let resolution = directory::resolve_or_create(
    state.store.as_ref(),
    body.channel,
    &body.value,
    first_name,
    "qr",
  )
  .await
  .map_err(|e| ApiError::Store(Box::new(e)))?;

  if body.consent_promotions {
    state
      .store
      .append_consent(NewConsentEvent {
        customer_id: resolution.customer_id,
        channel:     body.channel,
        purpose:     ConsentPurpose::Promotions,
        status:      ConsentStatus::Granted,
        proof:       ConsentProof {
          method:  "qr_form".into(),
          version: Some("v1".into()),
          detail:  None,
        },
      })
      .await
      .map_err(|e| ApiError::Store(Box::new(e)))?;
  }

  if let Some(interest) = body.interest.as_deref().filter(|i| !i.is_empty()) {
    state
      .store
      .upsert_attribute(
        resolution.customer_id,
        "interest".into(),
        serde_json::Value::String(interest.into()),
      )
      .await
      .map_err(|e| ApiError::Store(Box::new(e)))?;
  }

  Ok((
    StatusCode::CREATED,
    Json(SignupResponse {
      ok:          true,
      customer_id: resolution.customer_id,
      identity_id: resolution.identity_id,
      created:     resolution.created,
    }),
  ))
}
