//! Race-safe identity resolution — get-or-create for the directory.
//!
//! The algorithm is two-phase: look up first, and only if nothing exists
//! create a customer and attempt an insert-if-absent on the identity's
//! natural key. A conflict on that insert means a concurrent caller won the
//! race; the loser re-reads once and adopts the winner's customer. The
//! freshly created customer on the losing side is abandoned rather than
//! reassigned — it has no identity and no consent, so it can never become
//! eligible for a send.
//!
//! Deliberately not a retry loop: a second lookup failure after a conflict
//! means the unique constraint is broken or the store is faulty, and the
//! operation fails instead of spinning.

use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::{
  customer::{normalize_address, Channel, NewCustomer, NewIdentity},
  store::EngagementStore,
};

/// Outcome of [`resolve_or_create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
  pub customer_id: Uuid,
  pub identity_id: Uuid,
  /// `true` when this call created the customer; `false` when the identity
  /// already existed (including the lost-race path).
  pub created:     bool,
}

#[derive(Debug, Error)]
pub enum DirectoryError<E: std::error::Error> {
  #[error("store error: {0}")]
  Store(#[source] E),

  /// The identity insert conflicted but the follow-up lookup found nothing.
  /// Signals a broken unique constraint or an infrastructure fault.
  #[error("identity ({channel:?}, {value:?}) unresolvable after insert conflict")]
  Unresolvable { channel: Channel, value: String },
}

/// Resolve the customer owning (`channel`, `raw_value`), creating one if the
/// pair has never been seen. Safe under concurrent callers: all racers for
/// the same new pair observe the same customer id.
pub async fn resolve_or_create<S: EngagementStore>(
  store: &S,
  channel: Channel,
  raw_value: &str,
  display_name: &str,
  source: &str,
) -> Result<Resolution, DirectoryError<S::Error>> {
  let value = normalize_address(channel, raw_value);

  // Phase 1: the common case — the identity already exists.
  if let Some(existing) = store
    .find_identity(channel, &value)
    .await
    .map_err(DirectoryError::Store)?
  {
    return Ok(Resolution {
      customer_id: existing.customer_id,
      identity_id: existing.identity_id,
      created:     false,
    });
  }

  // Phase 2: create a customer, then try to take the natural key.
  let customer = store
    .create_customer(NewCustomer::new(display_name, source))
    .await
    .map_err(DirectoryError::Store)?;

  let inserted = store
    .try_insert_identity(NewIdentity {
      customer_id: customer.customer_id,
      channel,
      value: value.clone(),
      is_primary: true,
    })
    .await
    .map_err(DirectoryError::Store)?;

  if let Some(identity) = inserted {
    return Ok(Resolution {
      customer_id: customer.customer_id,
      identity_id: identity.identity_id,
      created:     true,
    });
  }

  // Conflict: another caller won between our lookup and our insert. The
  // customer we just created is now an orphan; drop its id and adopt the
  // winner's row. Exactly one re-read — if the constraint that produced the
  // conflict cannot produce the row, something is structurally wrong.
  warn!(
    channel = channel.discriminant(),
    orphan_customer = %customer.customer_id,
    "identity insert conflict; re-resolving"
  );

  match store
    .find_identity(channel, &value)
    .await
    .map_err(DirectoryError::Store)?
  {
    Some(existing) => Ok(Resolution {
      customer_id: existing.customer_id,
      identity_id: existing.identity_id,
      created:     false,
    }),
    None => Err(DirectoryError::Unresolvable { channel, value }),
  }
}
