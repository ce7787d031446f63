//! The transactional outbox — durable delivery intents.
//!
//! Rows are created only by the enqueuer and transitioned out of `queued`
//! only by the dispatch worker. `queued` is the sole non-terminal status;
//! nothing moves a row back to `queued` automatically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::customer::Channel;

/// Delivery state of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
  Queued,
  Sent,
  Failed,
  Cancelled,
  BlockedByConsent,
}

impl OutboxStatus {
  /// The discriminant string stored in the `status` column.
  pub fn discriminant(self) -> &'static str {
    match self {
      Self::Queued => "queued",
      Self::Sent => "sent",
      Self::Failed => "failed",
      Self::Cancelled => "cancelled",
      Self::BlockedByConsent => "blocked_by_consent",
    }
  }

  pub fn is_terminal(self) -> bool { !matches!(self, Self::Queued) }
}

/// The per-customer snapshot frozen into a row at enqueue time.
///
/// This is a copy, not a reference: attribute or identity changes after
/// enqueueing never alter an already-queued message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
  pub name:       String,
  /// The recipient address captured from the chosen identity.
  pub address:    String,
  /// Auxiliary customer attributes (e.g. declared interests) at enqueue time.
  #[serde(default)]
  pub attributes: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
  pub outbox_id:      i64,
  pub campaign_id:    Uuid,
  pub customer_id:    Uuid,
  pub channel:        Channel,
  pub identity_id:    Uuid,
  pub template_key:   String,
  pub payload:        MessagePayload,
  pub scheduled_for:  DateTime<Utc>,
  pub status:         OutboxStatus,
  pub failure_reason: Option<String>,
  /// Number of send attempts that have failed so far.
  pub attempts:       i64,
  pub claimed_by:     Option<String>,
  pub claimed_at:     Option<DateTime<Utc>>,
  pub created_at:     DateTime<Utc>,
  pub sent_at:        Option<DateTime<Utc>>,
}

/// A denormalised outbox row for administrative listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxListing {
  pub outbox_id:      i64,
  pub status:         OutboxStatus,
  pub template_key:   String,
  pub channel:        Channel,
  pub recipient:      String,
  pub customer_name:  String,
  pub failure_reason: Option<String>,
  pub scheduled_for:  DateTime<Utc>,
  pub sent_at:        Option<DateTime<Utc>>,
  pub created_at:     DateTime<Utc>,
}
