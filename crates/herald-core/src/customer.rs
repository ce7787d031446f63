//! Customers and their channel identities.
//!
//! A customer is a thin envelope created on first contact through any
//! channel. The (channel, address) pair is owned by exactly one identity row;
//! that uniqueness is what prevents duplicate customers per channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Channels ────────────────────────────────────────────────────────────────

/// A delivery channel an identity can live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
  Email,
  Sms,
  Whatsapp,
  Instagram,
}

impl Channel {
  /// The discriminant string stored in the `channel` columns.
  /// Must match the `rename_all = "lowercase"` serde tags above.
  pub fn discriminant(self) -> &'static str {
    match self {
      Self::Email => "email",
      Self::Sms => "sms",
      Self::Whatsapp => "whatsapp",
      Self::Instagram => "instagram",
    }
  }

  /// Handle-style channels address people by `@handle` rather than by a
  /// routable address; a leading `@` is stripped during normalisation.
  pub fn is_handle(self) -> bool { matches!(self, Self::Instagram) }
}

/// Canonicalise a raw address for lookup and storage: trim whitespace, and
/// for handle-style channels strip one leading `@`.
pub fn normalize_address(channel: Channel, raw: &str) -> String {
  let trimmed = raw.trim();
  if channel.is_handle() {
    trimmed.strip_prefix('@').unwrap_or(trimmed).to_owned()
  } else {
    trimmed.to_owned()
  }
}

// ─── Customer ────────────────────────────────────────────────────────────────

/// Lifecycle state of a customer record. Customers are never hard-deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerStatus {
  #[default]
  Active,
  Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
  pub customer_id:  Uuid,
  pub display_name: String,
  pub country:      String,
  /// Where this customer entered the system, e.g. "signup" or "webhook".
  pub source:       String,
  pub status:       CustomerStatus,
  pub created_at:   DateTime<Utc>,
  pub updated_at:   DateTime<Utc>,
}

/// Input to [`crate::store::EngagementStore::create_customer`].
/// Timestamps and the id are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewCustomer {
  pub display_name: String,
  pub country:      String,
  pub source:       String,
}

impl NewCustomer {
  pub fn new(display_name: impl Into<String>, source: impl Into<String>) -> Self {
    Self {
      display_name: display_name.into(),
      country:      "AR".to_owned(),
      source:       source.into(),
    }
  }
}

// ─── Identity ────────────────────────────────────────────────────────────────

/// A (channel, address) pair bound to a customer.
/// Unique on (channel, value); this is the natural key of the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
  pub identity_id: Uuid,
  pub customer_id: Uuid,
  pub channel:     Channel,
  /// Normalised address value (email address, phone number, bare handle).
  pub value:       String,
  pub is_primary:  bool,
  pub is_verified: bool,
  pub created_at:  DateTime<Utc>,
}

/// Input to [`crate::store::EngagementStore::try_insert_identity`].
#[derive(Debug, Clone)]
pub struct NewIdentity {
  pub customer_id: Uuid,
  pub channel:     Channel,
  /// Must already be normalised via [`normalize_address`].
  pub value:       String,
  pub is_primary:  bool,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn normalize_trims_whitespace() {
    assert_eq!(normalize_address(Channel::Email, "  a@b.example \n"), "a@b.example");
  }

  #[test]
  fn normalize_strips_handle_prefix() {
    assert_eq!(normalize_address(Channel::Instagram, " @somebody "), "somebody");
    // Only one leading `@` is stripped.
    assert_eq!(normalize_address(Channel::Instagram, "@@odd"), "@odd");
  }

  #[test]
  fn normalize_keeps_at_sign_for_email() {
    assert_eq!(normalize_address(Channel::Email, "@b.example"), "@b.example");
  }
}
