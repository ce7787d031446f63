//! Handlers for the Meta messaging webhook.
//!
//! `GET` is the subscription handshake: echo `hub.challenge` when the
//! verify token matches. `POST` receives message events, verified against
//! `X-Hub-Signature-256` over the raw body before any JSON parsing.
//!
//! An inbound DM creates (or resolves) the sender's identity either way;
//! consent is appended only when the message text is an explicit opt-in
//! keyword. Receiving a message is not consent.

use axum::{
  Json,
  body::Bytes,
  extract::{Query, State},
  http::HeaderMap,
};
use herald_core::{
  consent::{ConsentProof, ConsentPurpose, ConsentStatus, NewConsentEvent},
  customer::Channel,
  directory,
  store::EngagementStore,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{ApiState, error::ApiError, sig};

/// Message texts that count as an explicit promotions opt-in,
/// compared case-insensitively after trimming.
const OPT_IN_KEYWORDS: [&str; 4] = ["alta", "si", "si promos", "acepto"];

const SIGNATURE_HEADER: &str = "x-hub-signature-256";

// ─── Subscription handshake ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct HandshakeParams {
  #[serde(rename = "hub.mode")]
  pub mode:         Option<String>,
  #[serde(rename = "hub.verify_token")]
  pub verify_token: Option<String>,
  #[serde(rename = "hub.challenge")]
  pub challenge:    Option<String>,
}

/// `GET /webhooks/meta` — echo the challenge iff the token matches.
pub async fn verify<S>(
  State(state): State<ApiState<S>>,
  Query(params): Query<HandshakeParams>,
) -> Result<String, ApiError>
where
  S: EngagementStore,
{
  let expected = state
    .config
    .webhook_verify_token
    .as_deref()
    .ok_or(ApiError::Misconfigured("webhook verify token not configured"))?;

  let token_ok = params
    .verify_token
    .as_deref()
    .is_some_and(|t| sig::secrets_match(t.as_bytes(), expected.as_bytes()));

  if params.mode.as_deref() == Some("subscribe") && token_ok {
    Ok(params.challenge.unwrap_or_default())
  } else {
    Err(ApiError::Forbidden("verification failed"))
  }
}

// ─── Event delivery ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct WebhookPayload {
  #[serde(default)]
  entry: Vec<Entry>,
}

#[derive(Debug, Default, Deserialize)]
struct Entry {
  #[serde(default)]
  messaging: Vec<MessagingEvent>,
}

#[derive(Debug, Default, Deserialize)]
struct MessagingEvent {
  sender:  Option<Sender>,
  message: Option<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
struct Sender {
  /// Meta sends numeric ids for some surfaces and strings for others.
  id: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct IncomingMessage {
  text: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CapturedEvent {
  pub channel:     Channel,
  pub sender_id:   String,
  pub text:        String,
  pub customer_id: Uuid,
  pub identity_id: Uuid,
  pub opted_in:    bool,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
  pub ok:       bool,
  pub captured: Vec<CapturedEvent>,
}

fn sender_id(event: &MessagingEvent) -> Option<String> {
  match event.sender.as_ref()?.id.as_ref()? {
    Value::String(s) if !s.is_empty() => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

/// `POST /webhooks/meta` — signature first, JSON second.
pub async fn receive<S>(
  State(state): State<ApiState<S>>,
  headers: HeaderMap,
  body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError>
where
  S: EngagementStore,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  let header = headers
    .get(SIGNATURE_HEADER)
    .and_then(|v| v.to_str().ok());

  if !sig::verify_webhook_signature(
    state.config.verify_signatures,
    state.config.webhook_secret.as_deref(),
    header,
    &body,
  ) {
    warn!(header_present = header.is_some(), "webhook signature rejected");
    return Err(ApiError::Forbidden("invalid signature"));
  }

  let payload: WebhookPayload = serde_json::from_slice(&body)
    .map_err(|e| ApiError::BadRequest(format!("malformed payload: {e}")))?;

  let mut captured = Vec::new();

  for entry in payload.entry {
    for event in entry.messaging {
      let Some(sender) = sender_id(&event) else {
        debug!("skipping messaging event without sender id");
        continue;
      };
      let text = event
        .message
        .and_then(|m| m.text)
        .unwrap_or_default()
        .trim()
        .to_owned();

      // Only instagram DMs flow through this webhook today.
      let channel = Channel::Instagram;

      let resolution = directory::resolve_or_create(
        state.store.as_ref(),
        channel,
        &sender,
        "IG Lead",
        "ig_dm",
      )
      .await
      .map_err(|e| ApiError::Store(Box::new(e)))?;

      let opted_in = OPT_IN_KEYWORDS.contains(&text.to_lowercase().as_str());
      if opted_in {
        state
          .store
          .append_consent(NewConsentEvent {
            customer_id: resolution.customer_id,
            channel,
            purpose: ConsentPurpose::Promotions,
            status: ConsentStatus::Granted,
            proof: ConsentProof {
              method:  "ig_dm".into(),
              version: None,
              detail:  Some(text.clone()),
            },
          })
          .await
          .map_err(|e| ApiError::Store(Box::new(e)))?;
        info!(customer = %resolution.customer_id, "promotions opt-in via dm keyword");
      }

      captured.push(CapturedEvent {
        channel,
        sender_id: sender,
        text,
        customer_id: resolution.customer_id,
        identity_id: resolution.identity_id,
        opted_in,
      });
    }
  }

  Ok(Json(WebhookResponse { ok: true, captured }))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn keyword_set_is_exact() {
    for kw in ["alta", "SI", "Si Promos", "acepto"] {
      assert!(OPT_IN_KEYWORDS.contains(&kw.trim().to_lowercase().as_str()));
    }
    for not_kw in ["hola", "si!", "baja", ""] {
      assert!(!OPT_IN_KEYWORDS.contains(&not_kw.trim().to_lowercase().as_str()));
    }
  }

  #[test]
  fn sender_ids_accept_numbers_and_strings() {
    let event: MessagingEvent =
      serde_json::from_value(serde_json::json!({ "sender": { "id": 123456 } })).unwrap();
    assert_eq!(sender_id(&event).as_deref(), Some("123456"));

    let event: MessagingEvent =
      serde_json::from_value(serde_json::json!({ "sender": { "id": "ig-789" } })).unwrap();
    assert_eq!(sender_id(&event).as_deref(), Some("ig-789"));

    let event: MessagingEvent = serde_json::from_value(serde_json::json!({})).unwrap();
    assert!(sender_id(&event).is_none());
  }
}
