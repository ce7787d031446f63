//! JSON REST API for Herald.
//!
//! Exposes an axum [`Router`] backed by any
//! [`herald_core::store::EngagementStore`]. TLS and transport concerns are
//! the caller's responsibility; authentication for the admin surface and
//! the webhook is handled here.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .merge(herald_api::api_router(state.clone()))
//! ```

pub mod admin;
pub mod error;
pub mod health;
pub mod sig;
pub mod signup;
pub mod unsubscribe;
pub mod webhook;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use herald_core::store::EngagementStore;

pub use error::ApiError;

/// Secrets and toggles the API surface needs at request time.
#[derive(Debug, Clone)]
pub struct ApiConfig {
  /// Shared secret for the `X-Admin-Key` header. `None` makes every admin
  /// request a server error rather than an open door.
  pub admin_key:            Option<String>,
  /// HMAC secret for webhook body signatures.
  pub webhook_secret:       Option<String>,
  /// Token echoed back during the webhook subscription handshake.
  pub webhook_verify_token: Option<String>,
  /// Disable to test webhooks locally without computing signatures.
  pub verify_signatures:    bool,
}

/// Shared handler state: the store plus the API configuration.
pub struct ApiState<S> {
  pub store:  Arc<S>,
  pub config: Arc<ApiConfig>,
}

// Manual impl: `Arc` clones regardless of whether `S` does.
impl<S> Clone for ApiState<S> {
  fn clone(&self) -> Self {
    Self { store: self.store.clone(), config: self.config.clone() }
  }
}

/// Build a fully-materialised API router.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(state: ApiState<S>) -> Router<()>
where
  S: EngagementStore + Send + Sync + 'static,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  Router::new()
    .route("/healthz", get(health::handler::<S>))
    // Public intake
    .route("/signup", post(signup::handler::<S>))
    .route("/unsubscribe", get(unsubscribe::handler::<S>))
    // Messaging webhook
    .route(
      "/webhooks/meta",
      get(webhook::verify::<S>).post(webhook::receive::<S>),
    )
    // Admin
    .route("/admin/summary", get(admin::summary::<S>))
    .route("/admin/outbox", get(admin::outbox::<S>))
    .route("/admin/customers/recent", get(admin::recent_customers::<S>))
    .route("/admin/debug/identity", get(admin::debug_identity::<S>))
    .route("/admin/queue-weekly", post(admin::queue_weekly::<S>))
    .route("/admin/campaigns", post(admin::create_campaign::<S>))
    .with_state(state)
}

// ─── Integration tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;
  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use herald_core::{
    consent::{ConsentPurpose, ConsentStatus},
    customer::Channel,
  };
  use herald_store_sqlite::SqliteStore;
  use tower::ServiceExt as _;

  const ADMIN_KEY: &str = "admin-secret";
  const WEBHOOK_SECRET: &str = "webhook-secret";
  const VERIFY_TOKEN: &str = "token-123";

  async fn make_state() -> (ApiState<SqliteStore>, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let state = ApiState {
      store:  store.clone(),
      config: Arc::new(ApiConfig {
        admin_key:            Some(ADMIN_KEY.into()),
        webhook_secret:       Some(WEBHOOK_SECRET.into()),
        webhook_verify_token: Some(VERIFY_TOKEN.into()),
        verify_signatures:    true,
      }),
    };
    (state, store)
  }

  async fn oneshot(
    state: ApiState<SqliteStore>,
    method: &str,
    uri: &str,
    headers: Vec<(header::HeaderName, &str)>,
    body: &str,
  ) -> axum::response::Response {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
      builder = builder.header(name, value);
    }
    let req = builder.body(Body::from(body.to_string())).unwrap();
    api_router(state).oneshot(req).await.unwrap()
  }

  async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
  }

  #[tokio::test]
  async fn healthz_pings_the_store() {
    let (state, _) = make_state().await;
    let resp = oneshot(state, "GET", "/healthz", vec![], "").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["ok"], serde_json::json!(true));
  }

  // ── Signup / unsubscribe ─────────────────────────────────────────────────────

  #[tokio::test]
  async fn signup_creates_customer_with_consent_and_interest() {
    let (state, store) = make_state().await;
    let resp = oneshot(
      state,
      "POST",
      "/signup",
      vec![(header::CONTENT_TYPE, "application/json")],
      r#"{"first_name":"Alice","channel":"email","value":"alice@example.com","interest":"newborn"}"#,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = body_json(resp).await;
    assert_eq!(body["ok"], serde_json::json!(true));
    assert_eq!(body["created"], serde_json::json!(true));

    let identity = store
      .find_identity(Channel::Email, "alice@example.com")
      .await
      .unwrap()
      .unwrap();
    let consent = store
      .latest_consent(identity.customer_id, Channel::Email, ConsentPurpose::Promotions)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(consent.status, ConsentStatus::Granted);
  }

  #[tokio::test]
  async fn signup_rejects_blank_name() {
    let (state, _) = make_state().await;
    let resp = oneshot(
      state,
      "POST",
      "/signup",
      vec![(header::CONTENT_TYPE, "application/json")],
      r#"{"first_name":"  ","channel":"email","value":"a@example.com"}"#,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn unsubscribe_appends_revocation() {
    let (state, store) = make_state().await;
    oneshot(
      state.clone(),
      "POST",
      "/signup",
      vec![(header::CONTENT_TYPE, "application/json")],
      r#"{"first_name":"Alice","channel":"email","value":"alice@example.com"}"#,
    )
    .await;

    let resp = oneshot(
      state,
      "GET",
      "/unsubscribe?channel=email&value=alice@example.com",
      vec![],
      "",
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let identity = store
      .find_identity(Channel::Email, "alice@example.com")
      .await
      .unwrap()
      .unwrap();
    let consent = store
      .latest_consent(identity.customer_id, Channel::Email, ConsentPurpose::Promotions)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(consent.status, ConsentStatus::Revoked);
  }

  #[tokio::test]
  async fn unsubscribe_unknown_identity_is_404() {
    let (state, _) = make_state().await;
    let resp = oneshot(
      state,
      "GET",
      "/unsubscribe?channel=email&value=ghost@example.com",
      vec![],
      "",
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
  }

  // ── Webhook ──────────────────────────────────────────────────────────────────

  fn signed(body: &str) -> String {
    format!(
      "sha256={}",
      hex::encode(sig::hmac_sha256(WEBHOOK_SECRET.as_bytes(), body.as_bytes()))
    )
  }

  #[tokio::test]
  async fn webhook_handshake_echoes_challenge() {
    let (state, _) = make_state().await;
    let resp = oneshot(
      state,
      "GET",
      "/webhooks/meta?hub.mode=subscribe&hub.verify_token=token-123&hub.challenge=42",
      vec![],
      "",
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"42");
  }

  #[tokio::test]
  async fn webhook_handshake_rejects_wrong_token() {
    let (state, _) = make_state().await;
    let resp = oneshot(
      state,
      "GET",
      "/webhooks/meta?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=42",
      vec![],
      "",
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
  }

  #[tokio::test]
  async fn webhook_optin_keyword_grants_consent() {
    let (state, store) = make_state().await;
    let body = r#"{"entry":[{"messaging":[{"sender":{"id":"ig-42"},"message":{"text":"Alta"}}]}]}"#;
    let signature = signed(body);
    let resp = oneshot(
      state,
      "POST",
      "/webhooks/meta",
      vec![
        (header::CONTENT_TYPE, "application/json"),
        (header::HeaderName::from_static("x-hub-signature-256"), signature.as_str()),
      ],
      body,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["captured"][0]["opted_in"], serde_json::json!(true));

    let identity = store
      .find_identity(Channel::Instagram, "ig-42")
      .await
      .unwrap()
      .unwrap();
    let consent = store
      .latest_consent(
        identity.customer_id,
        Channel::Instagram,
        ConsentPurpose::Promotions,
      )
      .await
      .unwrap()
      .unwrap();
    assert_eq!(consent.status, ConsentStatus::Granted);
  }

  #[tokio::test]
  async fn webhook_plain_message_creates_identity_without_consent() {
    let (state, store) = make_state().await;
    let body = r#"{"entry":[{"messaging":[{"sender":{"id":"ig-7"},"message":{"text":"hola"}}]}]}"#;
    let signature = signed(body);
    let resp = oneshot(
      state,
      "POST",
      "/webhooks/meta",
      vec![
        (header::CONTENT_TYPE, "application/json"),
        (header::HeaderName::from_static("x-hub-signature-256"), signature.as_str()),
      ],
      body,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let identity = store
      .find_identity(Channel::Instagram, "ig-7")
      .await
      .unwrap()
      .unwrap();
    let consent = store
      .latest_consent(
        identity.customer_id,
        Channel::Instagram,
        ConsentPurpose::Promotions,
      )
      .await
      .unwrap();
    assert!(consent.is_none());
  }

  #[tokio::test]
  async fn webhook_rejects_bad_signature() {
    let (state, _) = make_state().await;
    let resp = oneshot(
      state,
      "POST",
      "/webhooks/meta",
      vec![
        (header::CONTENT_TYPE, "application/json"),
        (
          header::HeaderName::from_static("x-hub-signature-256"),
          "sha256=0000000000000000000000000000000000000000000000000000000000000000",
        ),
      ],
      r#"{"entry":[]}"#,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
  }

  // ── Admin ────────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn admin_requires_key() {
    let (state, _) = make_state().await;
    let resp = oneshot(state.clone(), "GET", "/admin/summary", vec![], "").await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = oneshot(
      state,
      "GET",
      "/admin/summary",
      vec![(header::HeaderName::from_static("x-admin-key"), "wrong")],
      "",
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn admin_without_configured_key_is_server_error() {
    let (mut state, _) = make_state().await;
    state.config = Arc::new(ApiConfig {
      admin_key: None,
      ..(*state.config).clone()
    });
    let resp = oneshot(
      state,
      "GET",
      "/admin/summary",
      vec![(header::HeaderName::from_static("x-admin-key"), ADMIN_KEY)],
      "",
    )
    .await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
  }

  #[tokio::test]
  async fn admin_summary_reports_counts() {
    let (state, _) = make_state().await;
    oneshot(
      state.clone(),
      "POST",
      "/signup",
      vec![(header::CONTENT_TYPE, "application/json")],
      r#"{"first_name":"Alice","channel":"email","value":"alice@example.com"}"#,
    )
    .await;

    let resp = oneshot(
      state,
      "GET",
      "/admin/summary",
      vec![(header::HeaderName::from_static("x-admin-key"), ADMIN_KEY)],
      "",
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["counts"]["customers"], serde_json::json!(1));
    assert_eq!(
      json["current_promotions_consent_by_status"][0]["status"],
      serde_json::json!("granted")
    );
  }

  #[tokio::test]
  async fn admin_queue_weekly_without_campaign_reports_reason() {
    let (state, _) = make_state().await;
    let resp = oneshot(
      state,
      "POST",
      "/admin/queue-weekly",
      vec![(header::HeaderName::from_static("x-admin-key"), ADMIN_KEY)],
      "",
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["queued"], serde_json::json!(0));
    assert!(json["reason"].as_str().unwrap().contains("no active"));
  }

  #[tokio::test]
  async fn admin_creates_campaign_then_enqueues_signups() {
    let (state, _) = make_state().await;
    oneshot(
      state.clone(),
      "POST",
      "/signup",
      vec![(header::CONTENT_TYPE, "application/json")],
      r#"{"first_name":"Alice","channel":"email","value":"alice@example.com"}"#,
    )
    .await;

    let resp = oneshot(
      state.clone(),
      "POST",
      "/admin/campaigns",
      vec![
        (header::CONTENT_TYPE, "application/json"),
        (header::HeaderName::from_static("x-admin-key"), ADMIN_KEY),
      ],
      r#"{"name":"Weekly promo","kind":"weekly_promo","channel":"email","template_key":"weekly_promo_v1"}"#,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = oneshot(
      state.clone(),
      "POST",
      "/admin/queue-weekly",
      vec![(header::HeaderName::from_static("x-admin-key"), ADMIN_KEY)],
      "",
    )
    .await;
    let json = body_json(resp).await;
    assert_eq!(json["queued"], serde_json::json!(1));

    let resp = oneshot(
      state,
      "GET",
      "/admin/outbox?status=queued",
      vec![(header::HeaderName::from_static("x-admin-key"), ADMIN_KEY)],
      "",
    )
    .await;
    let json = body_json(resp).await;
    assert_eq!(json["items"][0]["recipient"], serde_json::json!("alice@example.com"));
  }

  #[tokio::test]
  async fn admin_debug_identity_resolves_handles() {
    let (state, _) = make_state().await;
    oneshot(
      state.clone(),
      "POST",
      "/signup",
      vec![(header::CONTENT_TYPE, "application/json")],
      r#"{"first_name":"Bea","channel":"instagram","value":"@bea"}"#,
    )
    .await;

    let resp = oneshot(
      state,
      "GET",
      "/admin/debug/identity?channel=instagram&value=%40bea",
      vec![(header::HeaderName::from_static("x-admin-key"), ADMIN_KEY)],
      "",
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["identity"]["value"], serde_json::json!("bea"));
    assert_eq!(
      json["current_promotions_consent"]["status"],
      serde_json::json!("granted")
    );
  }
}
