//! The `EngagementStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `herald-store-sqlite`).
//! Higher layers (`herald-api`, `herald-dispatch`) depend on this
//! abstraction, not on any concrete backend. Each operation of the pipeline
//! is a named method with typed parameters, so the dedupe and race-safety
//! logic is implemented once and tested once.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
  campaign::{Campaign, CampaignKind, NewCampaign},
  consent::{
    ConsentEvent, ConsentPurpose, ConsentStatus, CurrentConsent, NewConsentEvent,
  },
  customer::{Channel, Customer, Identity, NewCustomer, NewIdentity},
  outbox::{OutboxListing, OutboxMessage, OutboxStatus},
};

// ─── Supporting types ────────────────────────────────────────────────────────

/// A customer bundled with all of their identities, for admin listings.
#[derive(Debug, Clone, Serialize)]
pub struct CustomerWithIdentities {
  pub customer:   Customer,
  pub identities: Vec<Identity>,
}

/// Parameters for the set-oriented eligibility insert.
///
/// Eligible customers are those with at least one identity on `channel` and
/// a latest consent status of `granted` for (`channel`, `purpose`). One row
/// per eligible customer is inserted; rows already covered by the dedupe key
/// (customer, channel, template key, scheduled_for) are silently skipped.
#[derive(Debug, Clone)]
pub struct EnqueueSpec {
  pub campaign_id:   Uuid,
  pub channel:       Channel,
  pub purpose:       ConsentPurpose,
  pub template_key:  String,
  pub scheduled_for: DateTime<Utc>,
}

/// Parameters for [`EngagementStore::claim_due`].
#[derive(Debug, Clone)]
pub struct ClaimRequest {
  /// Identifies this worker instance; claims are guarded by it so a stale
  /// claimant cannot resolve a row it no longer owns.
  pub worker_id:  String,
  pub now:        DateTime<Utc>,
  /// Claims older than this many seconds are treated as abandoned and may
  /// be re-claimed. Preserves at-least-once delivery across worker crashes.
  pub lease_secs: i64,
  pub batch_size: usize,
}

/// Row counts across the primary tables, for the admin summary.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StoreCounts {
  pub customers:        u64,
  pub identities:       u64,
  pub consent_events:   u64,
  pub outbox_messages:  u64,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a Herald storage backend.
///
/// Consent writes are append-only. Outbox rows are inserted only through
/// [`enqueue_campaign`](Self::enqueue_campaign) and transitioned out of
/// `queued` only through the claim/resolve methods.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait EngagementStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Customers ─────────────────────────────────────────────────────────

  /// Create and persist a new customer.
  fn create_customer(
    &self,
    input: NewCustomer,
  ) -> impl Future<Output = Result<Customer, Self::Error>> + Send + '_;

  /// Retrieve a customer by id. Returns `None` if not found.
  fn get_customer(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Customer>, Self::Error>> + Send + '_;

  /// The most recently created customers, newest first, each with their
  /// identities attached.
  fn recent_customers(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<CustomerWithIdentities>, Self::Error>> + Send + '_;

  /// Set or replace a single auxiliary attribute for a customer.
  fn upsert_attribute(
    &self,
    customer_id: Uuid,
    key: String,
    value: serde_json::Value,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Identity directory ────────────────────────────────────────────────

  /// Look up an identity by its natural key. `value` must be normalised.
  fn find_identity<'a>(
    &'a self,
    channel: Channel,
    value: &'a str,
  ) -> impl Future<Output = Result<Option<Identity>, Self::Error>> + Send + 'a;

  /// Insert-if-absent keyed on (channel, value). Returns the new identity,
  /// or `None` when a concurrent writer already owns the key.
  fn try_insert_identity(
    &self,
    input: NewIdentity,
  ) -> impl Future<Output = Result<Option<Identity>, Self::Error>> + Send + '_;

  // ── Consent ledger — append-only writes, derived reads ────────────────

  /// Append one event to the ledger. Never updates prior events.
  fn append_consent(
    &self,
    input: NewConsentEvent,
  ) -> impl Future<Output = Result<ConsentEvent, Self::Error>> + Send + '_;

  /// Resolve the current status for one (customer, channel, purpose) tuple
  /// from the full event history. `None` means no consent on record.
  fn latest_consent(
    &self,
    customer_id: Uuid,
    channel: Channel,
    purpose: ConsentPurpose,
  ) -> impl Future<Output = Result<Option<CurrentConsent>, Self::Error>> + Send + '_;

  /// Batch form: for every customer with events on (channel, purpose),
  /// their latest status. One set-oriented query; never per-customer
  /// lookups.
  fn current_consent_by_customer(
    &self,
    channel: Channel,
    purpose: ConsentPurpose,
  ) -> impl Future<Output = Result<Vec<(Uuid, ConsentStatus)>, Self::Error>> + Send + '_;

  /// Aggregate of the batch form: how many customers currently sit at each
  /// status for (channel, purpose).
  fn consent_status_counts(
    &self,
    channel: Channel,
    purpose: ConsentPurpose,
  ) -> impl Future<Output = Result<Vec<(ConsentStatus, u64)>, Self::Error>> + Send + '_;

  // ── Campaigns ─────────────────────────────────────────────────────────

  /// Create a new active campaign.
  fn create_campaign(
    &self,
    input: NewCampaign,
  ) -> impl Future<Output = Result<Campaign, Self::Error>> + Send + '_;

  /// The active campaign for (kind, channel), if any.
  fn active_campaign(
    &self,
    kind: CampaignKind,
    channel: Channel,
  ) -> impl Future<Output = Result<Option<Campaign>, Self::Error>> + Send + '_;

  // ── Outbox — enqueue ──────────────────────────────────────────────────

  /// Insert one deduplicated outbox row per eligible customer, freezing the
  /// payload snapshot at insert time. Returns the number of rows actually
  /// inserted; dedupe conflicts are skipped, not errors.
  fn enqueue_campaign(
    &self,
    spec: EnqueueSpec,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  // ── Outbox — dispatch ─────────────────────────────────────────────────

  /// Atomically claim a batch of due `queued` rows, oldest first, skipping
  /// rows held by another live claimant. Returned rows are ordered by
  /// `created_at`.
  fn claim_due(
    &self,
    req: ClaimRequest,
  ) -> impl Future<Output = Result<Vec<OutboxMessage>, Self::Error>> + Send + '_;

  /// Release a claim without resolving the row (simulate mode, shutdown).
  /// Returns `false` if the claim was no longer held.
  fn release_claim<'a>(
    &'a self,
    outbox_id: i64,
    worker_id: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Transition a claimed row to `sent`. Returns `false` if the claim was
  /// no longer held (the row is left untouched).
  fn mark_sent<'a>(
    &'a self,
    outbox_id: i64,
    worker_id: &'a str,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Record a failed send attempt. The row becomes `failed` once its
  /// attempt count exceeds `retry_limit`; below that it returns to the
  /// claimable pool. Returns the resulting status, or `None` if the claim
  /// was no longer held.
  fn record_failure<'a>(
    &'a self,
    outbox_id: i64,
    worker_id: &'a str,
    reason: &'a str,
    retry_limit: i64,
  ) -> impl Future<Output = Result<Option<OutboxStatus>, Self::Error>> + Send + 'a;

  // ── Outbox — reads ────────────────────────────────────────────────────

  /// Retrieve one outbox row by id.
  fn get_message(
    &self,
    outbox_id: i64,
  ) -> impl Future<Output = Result<Option<OutboxMessage>, Self::Error>> + Send + '_;

  /// Recent rows at `status`, newest first, joined with customer and
  /// recipient for display.
  fn recent_outbox(
    &self,
    status: OutboxStatus,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<OutboxListing>, Self::Error>> + Send + '_;

  /// Recent rows for one customer on one channel, newest first.
  fn outbox_for_customer(
    &self,
    customer_id: Uuid,
    channel: Channel,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<OutboxMessage>, Self::Error>> + Send + '_;

  /// Row counts per outbox status.
  fn outbox_status_counts(
    &self,
  ) -> impl Future<Output = Result<Vec<(OutboxStatus, u64)>, Self::Error>> + Send + '_;

  /// Row counts across all primary tables.
  fn store_counts(
    &self,
  ) -> impl Future<Output = Result<StoreCounts, Self::Error>> + Send + '_;
}
