//! Handlers for the `/admin` surface.
//!
//! Every endpoint requires the `X-Admin-Key` header to match the configured
//! shared secret (compared constant-time). A deployment without a configured
//! key gets a server error on every admin request, never an open door.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/admin/summary` | table counts, outbox + consent by status |
//! | `GET`  | `/admin/outbox` | `?status=queued&limit=50` |
//! | `GET`  | `/admin/customers/recent` | `?limit=20`, with identities |
//! | `GET`  | `/admin/debug/identity` | `?channel=&value=` drill-down |
//! | `POST` | `/admin/queue-weekly` | trigger the weekly enqueue |
//! | `POST` | `/admin/campaigns` | create an active campaign |

use axum::{
  Json,
  extract::{Query, State},
  http::{HeaderMap, StatusCode},
  response::IntoResponse,
};
use chrono::{DateTime, Utc};
use herald_core::{
  campaign::{Campaign, CampaignKind, NewCampaign},
  consent::ConsentPurpose,
  customer::{Channel, normalize_address},
  enqueue::{self, EnqueueOutcome, EnqueueRequest},
  outbox::OutboxStatus,
  store::EngagementStore,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{ApiConfig, ApiState, error::ApiError, sig};

const ADMIN_KEY_HEADER: &str = "x-admin-key";
const MAX_LISTING_LIMIT: usize = 500;

fn require_admin_key(config: &ApiConfig, headers: &HeaderMap) -> Result<(), ApiError> {
  let expected = config
    .admin_key
    .as_deref()
    .filter(|k| !k.is_empty())
    .ok_or(ApiError::Misconfigured("admin key not configured"))?;

  let presented = headers
    .get(ADMIN_KEY_HEADER)
    .and_then(|v| v.to_str().ok())
    .ok_or(ApiError::Unauthorized)?;

  if sig::secrets_match(presented.as_bytes(), expected.as_bytes()) {
    Ok(())
  } else {
    Err(ApiError::Unauthorized)
  }
}

fn store_err<E: std::error::Error + Send + Sync + 'static>(e: E) -> ApiError {
  ApiError::Store(Box::new(e))
}

// ─── Summary ──────────────────────────────────────────────────────────────────

/// `GET /admin/summary`
pub async fn summary<S>(
  State(state): State<ApiState<S>>,
  headers: HeaderMap,
) -> Result<Json<Value>, ApiError>
where
  S: EngagementStore,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  require_admin_key(&state.config, &headers)?;

  let counts = state.store.store_counts().await.map_err(store_err)?;
  let outbox = state.store.outbox_status_counts().await.map_err(store_err)?;
  let consent = state
    .store
    .consent_status_counts(Channel::Email, ConsentPurpose::Promotions)
    .await
    .map_err(store_err)?;

  Ok(Json(json!({
    "counts": {
      "customers": counts.customers,
      "identities": counts.identities,
      "consent_events": counts.consent_events,
      "outbox": counts.outbox_messages,
    },
    "outbox_by_status": outbox
      .iter()
      .map(|(status, n)| json!({ "status": status, "count": n }))
      .collect::<Vec<_>>(),
    "current_promotions_consent_by_status": consent
      .iter()
      .map(|(status, n)| json!({ "status": status, "count": n }))
      .collect::<Vec<_>>(),
  })))
}

// ─── Outbox listing ───────────────────────────────────────────────────────────

fn default_status() -> OutboxStatus { OutboxStatus::Queued }
fn default_limit() -> usize { 50 }

#[derive(Debug, Deserialize)]
pub struct OutboxParams {
  #[serde(default = "default_status")]
  pub status: OutboxStatus,
  #[serde(default = "default_limit")]
  pub limit:  usize,
}

/// `GET /admin/outbox?status=<status>&limit=<n>`
pub async fn outbox<S>(
  State(state): State<ApiState<S>>,
  headers: HeaderMap,
  Query(params): Query<OutboxParams>,
) -> Result<Json<Value>, ApiError>
where
  S: EngagementStore,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  require_admin_key(&state.config, &headers)?;

  let limit = params.limit.clamp(1, MAX_LISTING_LIMIT);
  let items = state
    .store
    .recent_outbox(params.status, limit)
    .await
    .map_err(store_err)?;

  Ok(Json(json!({ "status": params.status, "items": items })))
}

// ─── Recent customers ─────────────────────────────────────────────────────────

fn default_customer_limit() -> usize { 20 }

#[derive(Debug, Deserialize)]
pub struct RecentCustomersParams {
  #[serde(default = "default_customer_limit")]
  pub limit: usize,
}

/// `GET /admin/customers/recent?limit=<n>`
pub async fn recent_customers<S>(
  State(state): State<ApiState<S>>,
  headers: HeaderMap,
  Query(params): Query<RecentCustomersParams>,
) -> Result<Json<Value>, ApiError>
where
  S: EngagementStore,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  require_admin_key(&state.config, &headers)?;

  let limit = params.limit.clamp(1, MAX_LISTING_LIMIT);
  let items = state
    .store
    .recent_customers(limit)
    .await
    .map_err(store_err)?;

  Ok(Json(json!({ "items": items })))
}

// ─── Identity drill-down ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DebugIdentityParams {
  pub channel: Channel,
  pub value:   String,
}

/// `GET /admin/debug/identity?channel=<channel>&value=<value>`
///
/// One-stop view for support: the customer behind an address, their current
/// promotions consent, and their recent outbox rows on that channel.
pub async fn debug_identity<S>(
  State(state): State<ApiState<S>>,
  headers: HeaderMap,
  Query(params): Query<DebugIdentityParams>,
) -> Result<Json<Value>, ApiError>
where
  S: EngagementStore,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  require_admin_key(&state.config, &headers)?;

  let value = normalize_address(params.channel, &params.value);

  let identity = state
    .store
    .find_identity(params.channel, &value)
    .await
    .map_err(store_err)?
    .ok_or_else(|| ApiError::NotFound("identity not found".into()))?;

  let customer = state
    .store
    .get_customer(identity.customer_id)
    .await
    .map_err(store_err)?
    .ok_or_else(|| ApiError::NotFound("customer not found".into()))?;

  let consent = state
    .store
    .latest_consent(identity.customer_id, params.channel, ConsentPurpose::Promotions)
    .await
    .map_err(store_err)?;

  let recent = state
    .store
    .outbox_for_customer(identity.customer_id, params.channel, 25)
    .await
    .map_err(store_err)?;

  Ok(Json(json!({
    "customer": customer,
    "identity": identity,
    "current_promotions_consent": consent,
    "recent_outbox": recent,
  })))
}

// ─── Enqueue trigger ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct QueueWeeklyBody {
  pub template_key:  Option<String>,
  pub scheduled_for: Option<DateTime<Utc>>,
}

/// `POST /admin/queue-weekly` — run the weekly enqueue now.
///
/// Idempotent per (template, schedule) slot; a repeat call reports
/// `queued: 0`.
pub async fn queue_weekly<S>(
  State(state): State<ApiState<S>>,
  headers: HeaderMap,
  body: Option<Json<QueueWeeklyBody>>,
) -> Result<Json<EnqueueOutcome>, ApiError>
where
  S: EngagementStore,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  require_admin_key(&state.config, &headers)?;

  let body = body.map(|Json(b)| b).unwrap_or_default();
  let outcome = enqueue::run(state.store.as_ref(), EnqueueRequest {
    template_key: body.template_key,
    scheduled_for: body.scheduled_for,
    ..EnqueueRequest::weekly_email()
  })
  .await
  .map_err(store_err)?;

  Ok(Json(outcome))
}

// ─── Campaigns ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateCampaignBody {
  pub name:         String,
  pub kind:         CampaignKind,
  pub channel:      Channel,
  pub template_key: String,
}

/// `POST /admin/campaigns` — create an active campaign.
pub async fn create_campaign<S>(
  State(state): State<ApiState<S>>,
  headers: HeaderMap,
  Json(body): Json<CreateCampaignBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: EngagementStore,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  require_admin_key(&state.config, &headers)?;

  if body.name.trim().is_empty() {
    return Err(ApiError::BadRequest("name must not be empty".into()));
  }
  let campaign: Campaign = state
    .store
    .create_campaign(NewCampaign {
      name:         body.name,
      kind:         body.kind,
      channel:      body.channel,
      template_key: body.template_key,
    })
    .await
    .map_err(store_err)?;

  Ok((StatusCode::CREATED, Json(campaign)))
}
