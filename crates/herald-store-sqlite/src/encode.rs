//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as fixed-width RFC 3339 strings (microsecond
//! precision, `+00:00` offset) so lexicographic ordering in SQL matches
//! chronological ordering. Structured fields (proof, payload) are stored as
//! compact JSON. UUIDs are stored as hyphenated lowercase strings.

use chrono::{DateTime, SecondsFormat, Utc};
use herald_core::{
  campaign::{Campaign, CampaignKind},
  consent::{ConsentEvent, ConsentProof, ConsentPurpose, ConsentStatus},
  customer::{Channel, Customer, CustomerStatus, Identity},
  outbox::{MessagePayload, OutboxListing, OutboxMessage, OutboxStatus},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, false)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Enum discriminants ──────────────────────────────────────────────────────

pub fn decode_channel(s: &str) -> Result<Channel> {
  match s {
    "email" => Ok(Channel::Email),
    "sms" => Ok(Channel::Sms),
    "whatsapp" => Ok(Channel::Whatsapp),
    "instagram" => Ok(Channel::Instagram),
    other => Err(herald_core::Error::unknown("channel", other).into()),
  }
}

pub fn decode_purpose(s: &str) -> Result<ConsentPurpose> {
  match s {
    "promotions" => Ok(ConsentPurpose::Promotions),
    "transactional" => Ok(ConsentPurpose::Transactional),
    "loyalty" => Ok(ConsentPurpose::Loyalty),
    other => Err(herald_core::Error::unknown("consent purpose", other).into()),
  }
}

pub fn decode_consent_status(s: &str) -> Result<ConsentStatus> {
  match s {
    "granted" => Ok(ConsentStatus::Granted),
    "revoked" => Ok(ConsentStatus::Revoked),
    other => Err(herald_core::Error::unknown("consent status", other).into()),
  }
}

pub fn decode_customer_status(s: &str) -> Result<CustomerStatus> {
  match s {
    "active" => Ok(CustomerStatus::Active),
    "archived" => Ok(CustomerStatus::Archived),
    other => Err(herald_core::Error::unknown("customer status", other).into()),
  }
}

pub fn encode_customer_status(s: CustomerStatus) -> &'static str {
  match s {
    CustomerStatus::Active => "active",
    CustomerStatus::Archived => "archived",
  }
}

pub fn decode_campaign_kind(s: &str) -> Result<CampaignKind> {
  match s {
    "weekly_promo" => Ok(CampaignKind::WeeklyPromo),
    other => Err(herald_core::Error::unknown("campaign kind", other).into()),
  }
}

pub fn decode_outbox_status(s: &str) -> Result<OutboxStatus> {
  match s {
    "queued" => Ok(OutboxStatus::Queued),
    "sent" => Ok(OutboxStatus::Sent),
    "failed" => Ok(OutboxStatus::Failed),
    "cancelled" => Ok(OutboxStatus::Cancelled),
    "blocked_by_consent" => Ok(OutboxStatus::BlockedByConsent),
    other => Err(herald_core::Error::unknown("outbox status", other).into()),
  }
}

// ─── JSON columns ────────────────────────────────────────────────────────────

pub fn encode_proof(p: &ConsentProof) -> Result<String> {
  Ok(serde_json::to_string(p)?)
}

pub fn decode_proof(s: &str) -> Result<ConsentProof> {
  Ok(serde_json::from_str(s)?)
}

pub fn decode_payload(s: &str) -> Result<MessagePayload> {
  Ok(serde_json::from_str(s)?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `customers` row.
pub struct RawCustomer {
  pub customer_id:  String,
  pub display_name: String,
  pub country:      String,
  pub source:       String,
  pub status:       String,
  pub created_at:   String,
  pub updated_at:   String,
}

impl RawCustomer {
  pub fn into_customer(self) -> Result<Customer> {
    Ok(Customer {
      customer_id:  decode_uuid(&self.customer_id)?,
      display_name: self.display_name,
      country:      self.country,
      source:       self.source,
      status:       decode_customer_status(&self.status)?,
      created_at:   decode_dt(&self.created_at)?,
      updated_at:   decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw strings read directly from a `customer_identities` row.
pub struct RawIdentity {
  pub identity_id: String,
  pub customer_id: String,
  pub channel:     String,
  pub value:       String,
  pub is_primary:  bool,
  pub is_verified: bool,
  pub created_at:  String,
}

impl RawIdentity {
  pub fn into_identity(self) -> Result<Identity> {
    Ok(Identity {
      identity_id: decode_uuid(&self.identity_id)?,
      customer_id: decode_uuid(&self.customer_id)?,
      channel:     decode_channel(&self.channel)?,
      value:       self.value,
      is_primary:  self.is_primary,
      is_verified: self.is_verified,
      created_at:  decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from a `consent_events` row.
pub struct RawConsentEvent {
  pub event_seq:   i64,
  pub customer_id: String,
  pub channel:     String,
  pub purpose:     String,
  pub status:      String,
  pub granted_at:  Option<String>,
  pub revoked_at:  Option<String>,
  pub proof:       String,
  pub created_at:  String,
}

impl RawConsentEvent {
  pub fn into_event(self) -> Result<ConsentEvent> {
    Ok(ConsentEvent {
      event_seq:   self.event_seq,
      customer_id: decode_uuid(&self.customer_id)?,
      channel:     decode_channel(&self.channel)?,
      purpose:     decode_purpose(&self.purpose)?,
      status:      decode_consent_status(&self.status)?,
      granted_at:  self.granted_at.as_deref().map(decode_dt).transpose()?,
      revoked_at:  self.revoked_at.as_deref().map(decode_dt).transpose()?,
      proof:       decode_proof(&self.proof)?,
      created_at:  decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from a `campaigns` row.
pub struct RawCampaign {
  pub campaign_id:  String,
  pub name:         String,
  pub kind:         String,
  pub channel:      String,
  pub template_key: String,
  pub is_active:    bool,
  pub created_at:   String,
}

impl RawCampaign {
  pub fn into_campaign(self) -> Result<Campaign> {
    Ok(Campaign {
      campaign_id:  decode_uuid(&self.campaign_id)?,
      name:         self.name,
      kind:         decode_campaign_kind(&self.kind)?,
      channel:      decode_channel(&self.channel)?,
      template_key: self.template_key,
      is_active:    self.is_active,
      created_at:   decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from a `message_outbox` row.
pub struct RawOutboxMessage {
  pub outbox_id:      i64,
  pub campaign_id:    String,
  pub customer_id:    String,
  pub channel:        String,
  pub identity_id:    String,
  pub template_key:   String,
  pub payload:        String,
  pub scheduled_for:  String,
  pub status:         String,
  pub failure_reason: Option<String>,
  pub attempts:       i64,
  pub claimed_by:     Option<String>,
  pub claimed_at:     Option<String>,
  pub created_at:     String,
  pub sent_at:        Option<String>,
}

impl RawOutboxMessage {
  pub fn into_message(self) -> Result<OutboxMessage> {
    Ok(OutboxMessage {
      outbox_id:      self.outbox_id,
      campaign_id:    decode_uuid(&self.campaign_id)?,
      customer_id:    decode_uuid(&self.customer_id)?,
      channel:        decode_channel(&self.channel)?,
      identity_id:    decode_uuid(&self.identity_id)?,
      template_key:   self.template_key,
      payload:        decode_payload(&self.payload)?,
      scheduled_for:  decode_dt(&self.scheduled_for)?,
      status:         decode_outbox_status(&self.status)?,
      failure_reason: self.failure_reason,
      attempts:       self.attempts,
      claimed_by:     self.claimed_by,
      claimed_at:     self.claimed_at.as_deref().map(decode_dt).transpose()?,
      created_at:     decode_dt(&self.created_at)?,
      sent_at:        self.sent_at.as_deref().map(decode_dt).transpose()?,
    })
  }
}

/// Raw strings from the joined admin listing query.
pub struct RawOutboxListing {
  pub outbox_id:      i64,
  pub status:         String,
  pub template_key:   String,
  pub channel:        String,
  pub recipient:      String,
  pub customer_name:  String,
  pub failure_reason: Option<String>,
  pub scheduled_for:  String,
  pub sent_at:        Option<String>,
  pub created_at:     String,
}

impl RawOutboxListing {
  pub fn into_listing(self) -> Result<OutboxListing> {
    Ok(OutboxListing {
      outbox_id:      self.outbox_id,
      status:         decode_outbox_status(&self.status)?,
      template_key:   self.template_key,
      channel:        decode_channel(&self.channel)?,
      recipient:      self.recipient,
      customer_name:  self.customer_name,
      failure_reason: self.failure_reason,
      scheduled_for:  decode_dt(&self.scheduled_for)?,
      sent_at:        self.sent_at.as_deref().map(decode_dt).transpose()?,
      created_at:     decode_dt(&self.created_at)?,
    })
  }
}
