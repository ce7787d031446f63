//! The consent ledger — append-only permission events.
//!
//! Consent is never stored as a mutable flag. Every grant and revocation is
//! an immutable event; the current status for a (customer, channel, purpose)
//! tuple is resolved at read time as the latest event, with the monotonic
//! `event_seq` breaking created-at ties deterministically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::customer::Channel;

/// What the customer consented to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentPurpose {
  Promotions,
  Transactional,
  Loyalty,
}

impl ConsentPurpose {
  pub fn discriminant(self) -> &'static str {
    match self {
      Self::Promotions => "promotions",
      Self::Transactional => "transactional",
      Self::Loyalty => "loyalty",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentStatus {
  Granted,
  Revoked,
}

impl ConsentStatus {
  pub fn discriminant(self) -> &'static str {
    match self {
      Self::Granted => "granted",
      Self::Revoked => "revoked",
    }
  }
}

/// How a consent event was obtained; stored as JSON alongside the event so
/// the ledger can serve as an audit trail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentProof {
  /// e.g. "signup_form", "webhook_reply", "unsubscribe_link".
  pub method:  String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
  /// Free-text context, e.g. the opt-in keyword the customer sent.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub detail:  Option<String>,
}

impl ConsentProof {
  pub fn method(method: impl Into<String>) -> Self {
    Self { method: method.into(), version: None, detail: None }
  }
}

/// One immutable row of the ledger. Never updated, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentEvent {
  /// Monotonic insertion sequence; the deterministic tie-break for events
  /// sharing a `created_at`.
  pub event_seq:   i64,
  pub customer_id: Uuid,
  pub channel:     Channel,
  pub purpose:     ConsentPurpose,
  pub status:      ConsentStatus,
  pub granted_at:  Option<DateTime<Utc>>,
  pub revoked_at:  Option<DateTime<Utc>>,
  pub proof:       ConsentProof,
  pub created_at:  DateTime<Utc>,
}

/// Input to [`crate::store::EngagementStore::append_consent`].
/// `created_at`, the sequence number, and the status-appropriate effective
/// timestamp are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewConsentEvent {
  pub customer_id: Uuid,
  pub channel:     Channel,
  pub purpose:     ConsentPurpose,
  pub status:      ConsentStatus,
  pub proof:       ConsentProof,
}

/// The resolved "current" consent for a (customer, channel, purpose) tuple.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CurrentConsent {
  pub status:     ConsentStatus,
  /// `created_at` of the winning event.
  pub decided_at: DateTime<Utc>,
}
