//! [`SqliteStore`] — the SQLite implementation of [`EngagementStore`].

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use herald_core::{
  campaign::{Campaign, CampaignKind, NewCampaign},
  consent::{
    ConsentEvent, ConsentPurpose, ConsentStatus, CurrentConsent, NewConsentEvent,
  },
  customer::{Channel, Customer, CustomerStatus, Identity, NewCustomer, NewIdentity},
  outbox::{OutboxListing, OutboxMessage, OutboxStatus},
  store::{
    ClaimRequest, CustomerWithIdentities, EngagementStore, EnqueueSpec, StoreCounts,
  },
};

use crate::{
  encode::{
    decode_consent_status, decode_outbox_status, decode_uuid, encode_customer_status,
    encode_dt, encode_proof, encode_uuid, RawCampaign, RawConsentEvent, RawCustomer,
    RawIdentity, RawOutboxListing, RawOutboxMessage,
  },
  schema::SCHEMA,
  Error, Result,
};

const OUTBOX_COLUMNS: &str = "outbox_id, campaign_id, customer_id, channel, \
   identity_id, template_key, payload, scheduled_for, status, failure_reason, \
   attempts, claimed_by, claimed_at, created_at, sent_at";

fn outbox_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawOutboxMessage> {
  Ok(RawOutboxMessage {
    outbox_id:      row.get(0)?,
    campaign_id:    row.get(1)?,
    customer_id:    row.get(2)?,
    channel:        row.get(3)?,
    identity_id:    row.get(4)?,
    template_key:   row.get(5)?,
    payload:        row.get(6)?,
    scheduled_for:  row.get(7)?,
    status:         row.get(8)?,
    failure_reason: row.get(9)?,
    attempts:       row.get(10)?,
    claimed_by:     row.get(11)?,
    claimed_at:     row.get(12)?,
    created_at:     row.get(13)?,
    sent_at:        row.get(14)?,
  })
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Herald engagement store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── EngagementStore impl ────────────────────────────────────────────────────

impl EngagementStore for SqliteStore {
  type Error = Error;

  // ── Customers ─────────────────────────────────────────────────────────────

  async fn create_customer(&self, input: NewCustomer) -> Result<Customer> {
    let customer = Customer {
      customer_id:  Uuid::new_v4(),
      display_name: input.display_name,
      country:      input.country,
      source:       input.source,
      status:       CustomerStatus::Active,
      created_at:   Utc::now(),
      updated_at:   Utc::now(),
    };

    let id_str     = encode_uuid(customer.customer_id);
    let name       = customer.display_name.clone();
    let country    = customer.country.clone();
    let source     = customer.source.clone();
    let status_str = encode_customer_status(customer.status).to_owned();
    let created    = encode_dt(customer.created_at);
    let updated    = encode_dt(customer.updated_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO customers
             (customer_id, display_name, country, source, status, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![id_str, name, country, source, status_str, created, updated],
        )?;
        Ok(())
      })
      .await?;

    Ok(customer)
  }

  async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawCustomer> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT customer_id, display_name, country, source, status,
                    created_at, updated_at
             FROM customers WHERE customer_id = ?1",
            rusqlite::params![id_str],
            |row| {
              Ok(RawCustomer {
                customer_id:  row.get(0)?,
                display_name: row.get(1)?,
                country:      row.get(2)?,
                source:       row.get(3)?,
                status:       row.get(4)?,
                created_at:   row.get(5)?,
                updated_at:   row.get(6)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawCustomer::into_customer).transpose()
  }

  async fn recent_customers(&self, limit: usize) -> Result<Vec<CustomerWithIdentities>> {
    let limit_val = limit as i64;

    let rows: Vec<(RawCustomer, Option<RawIdentity>)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT c.customer_id, c.display_name, c.country, c.source, c.status,
                  c.created_at, c.updated_at,
                  i.identity_id, i.customer_id, i.channel, i.value,
                  i.is_primary, i.is_verified, i.created_at
           FROM (SELECT * FROM customers
                 ORDER BY created_at DESC, customer_id LIMIT ?1) c
           LEFT JOIN customer_identities i ON i.customer_id = c.customer_id
           ORDER BY c.created_at DESC, c.customer_id, i.created_at",
        )?;

        let rows = stmt
          .query_map(rusqlite::params![limit_val], |row| {
            let customer = RawCustomer {
              customer_id:  row.get(0)?,
              display_name: row.get(1)?,
              country:      row.get(2)?,
              source:       row.get(3)?,
              status:       row.get(4)?,
              created_at:   row.get(5)?,
              updated_at:   row.get(6)?,
            };
            let identity_id: Option<String> = row.get(7)?;
            let identity = match identity_id {
              Some(identity_id) => Some(RawIdentity {
                identity_id,
                customer_id: row.get(8)?,
                channel:     row.get(9)?,
                value:       row.get(10)?,
                is_primary:  row.get(11)?,
                is_verified: row.get(12)?,
                created_at:  row.get(13)?,
              }),
              None => None,
            };
            Ok((customer, identity))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
      })
      .await?;

    // Group the joined rows back into one entry per customer, preserving the
    // newest-first ordering from the query.
    let mut out: Vec<CustomerWithIdentities> = Vec::new();
    for (raw_customer, raw_identity) in rows {
      let customer_id = decode_uuid(&raw_customer.customer_id)?;
      if out.last().map(|c| c.customer.customer_id) != Some(customer_id) {
        out.push(CustomerWithIdentities {
          customer:   raw_customer.into_customer()?,
          identities: Vec::new(),
        });
      }
      if let (Some(raw), Some(entry)) = (raw_identity, out.last_mut()) {
        entry.identities.push(raw.into_identity()?);
      }
    }
    Ok(out)
  }

  async fn upsert_attribute(
    &self,
    customer_id: Uuid,
    key: String,
    value: serde_json::Value,
  ) -> Result<()> {
    let id_str    = encode_uuid(customer_id);
    let value_str = value.to_string();
    let now_str   = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO customer_attributes (customer_id, key, value, updated_at)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (customer_id, key) DO UPDATE
             SET value = excluded.value, updated_at = excluded.updated_at",
          rusqlite::params![id_str, key, value_str, now_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Identity directory ────────────────────────────────────────────────────

  async fn find_identity(&self, channel: Channel, value: &str) -> Result<Option<Identity>> {
    let channel_str = channel.discriminant().to_owned();
    let value_owned = value.to_owned();

    let raw: Option<RawIdentity> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT identity_id, customer_id, channel, value,
                    is_primary, is_verified, created_at
             FROM customer_identities
             WHERE channel = ?1 AND value = ?2",
            rusqlite::params![channel_str, value_owned],
            |row| {
              Ok(RawIdentity {
                identity_id: row.get(0)?,
                customer_id: row.get(1)?,
                channel:     row.get(2)?,
                value:       row.get(3)?,
                is_primary:  row.get(4)?,
                is_verified: row.get(5)?,
                created_at:  row.get(6)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawIdentity::into_identity).transpose()
  }

  async fn try_insert_identity(&self, input: NewIdentity) -> Result<Option<Identity>> {
    let identity = Identity {
      identity_id: Uuid::new_v4(),
      customer_id: input.customer_id,
      channel:     input.channel,
      value:       input.value,
      is_primary:  input.is_primary,
      is_verified: false,
      created_at:  Utc::now(),
    };

    let id_str       = encode_uuid(identity.identity_id);
    let customer_str = encode_uuid(identity.customer_id);
    let channel_str  = identity.channel.discriminant().to_owned();
    let value        = identity.value.clone();
    let is_primary   = identity.is_primary;
    let created      = encode_dt(identity.created_at);

    let inserted: bool = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "INSERT INTO customer_identities
             (identity_id, customer_id, channel, value, is_primary, is_verified, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
           ON CONFLICT (channel, value) DO NOTHING",
          rusqlite::params![id_str, customer_str, channel_str, value, is_primary, created],
        )?;
        Ok(changed == 1)
      })
      .await?;

    Ok(inserted.then_some(identity))
  }

  // ── Consent ledger ────────────────────────────────────────────────────────

  async fn append_consent(&self, input: NewConsentEvent) -> Result<ConsentEvent> {
    let now = Utc::now();
    let (granted_at, revoked_at) = match input.status {
      ConsentStatus::Granted => (Some(now), None),
      ConsentStatus::Revoked => (None, Some(now)),
    };

    let customer_str = encode_uuid(input.customer_id);
    let channel_str  = input.channel.discriminant().to_owned();
    let purpose_str  = input.purpose.discriminant().to_owned();
    let status_str   = input.status.discriminant().to_owned();
    let granted_str  = granted_at.map(encode_dt);
    let revoked_str  = revoked_at.map(encode_dt);
    let proof_str    = encode_proof(&input.proof)?;
    let created_str  = encode_dt(now);

    let event_seq: i64 = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO consent_events
             (customer_id, channel, purpose, status, granted_at, revoked_at, proof, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            customer_str,
            channel_str,
            purpose_str,
            status_str,
            granted_str,
            revoked_str,
            proof_str,
            created_str,
          ],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(ConsentEvent {
      event_seq,
      customer_id: input.customer_id,
      channel: input.channel,
      purpose: input.purpose,
      status: input.status,
      granted_at,
      revoked_at,
      proof: input.proof,
      created_at: now,
    })
  }

  async fn latest_consent(
    &self,
    customer_id: Uuid,
    channel: Channel,
    purpose: ConsentPurpose,
  ) -> Result<Option<CurrentConsent>> {
    let customer_str = encode_uuid(customer_id);
    let channel_str  = channel.discriminant().to_owned();
    let purpose_str  = purpose.discriminant().to_owned();

    let raw: Option<RawConsentEvent> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT event_seq, customer_id, channel, purpose, status,
                    granted_at, revoked_at, proof, created_at
             FROM consent_events
             WHERE customer_id = ?1 AND channel = ?2 AND purpose = ?3
             ORDER BY created_at DESC, event_seq DESC
             LIMIT 1",
            rusqlite::params![customer_str, channel_str, purpose_str],
            |row| {
              Ok(RawConsentEvent {
                event_seq:   row.get(0)?,
                customer_id: row.get(1)?,
                channel:     row.get(2)?,
                purpose:     row.get(3)?,
                status:      row.get(4)?,
                granted_at:  row.get(5)?,
                revoked_at:  row.get(6)?,
                proof:       row.get(7)?,
                created_at:  row.get(8)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    Ok(match raw {
      Some(raw) => {
        let event = raw.into_event()?;
        Some(CurrentConsent { status: event.status, decided_at: event.created_at })
      }
      None => None,
    })
  }

  async fn current_consent_by_customer(
    &self,
    channel: Channel,
    purpose: ConsentPurpose,
  ) -> Result<Vec<(Uuid, ConsentStatus)>> {
    let channel_str = channel.discriminant().to_owned();
    let purpose_str = purpose.discriminant().to_owned();

    let rows: Vec<(String, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT customer_id, status FROM (
             SELECT customer_id, status,
                    ROW_NUMBER() OVER (
                      PARTITION BY customer_id
                      ORDER BY created_at DESC, event_seq DESC
                    ) AS rn
             FROM consent_events
             WHERE channel = ?1 AND purpose = ?2
           ) WHERE rn = 1",
        )?;

        let rows = stmt
          .query_map(rusqlite::params![channel_str, purpose_str], |row| {
            Ok((row.get(0)?, row.get(1)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(id, status)| Ok((decode_uuid(&id)?, decode_consent_status(&status)?)))
      .collect()
  }

  async fn consent_status_counts(
    &self,
    channel: Channel,
    purpose: ConsentPurpose,
  ) -> Result<Vec<(ConsentStatus, u64)>> {
    let channel_str = channel.discriminant().to_owned();
    let purpose_str = purpose.discriminant().to_owned();

    let rows: Vec<(String, i64)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT status, COUNT(*) FROM (
             SELECT customer_id, status,
                    ROW_NUMBER() OVER (
                      PARTITION BY customer_id
                      ORDER BY created_at DESC, event_seq DESC
                    ) AS rn
             FROM consent_events
             WHERE channel = ?1 AND purpose = ?2
           ) WHERE rn = 1
           GROUP BY status
           ORDER BY COUNT(*) DESC",
        )?;

        let rows = stmt
          .query_map(rusqlite::params![channel_str, purpose_str], |row| {
            Ok((row.get(0)?, row.get(1)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(status, n)| Ok((decode_consent_status(&status)?, n as u64)))
      .collect()
  }

  // ── Campaigns ─────────────────────────────────────────────────────────────

  async fn create_campaign(&self, input: NewCampaign) -> Result<Campaign> {
    let campaign = Campaign {
      campaign_id:  Uuid::new_v4(),
      name:         input.name,
      kind:         input.kind,
      channel:      input.channel,
      template_key: input.template_key,
      is_active:    true,
      created_at:   Utc::now(),
    };

    let id_str      = encode_uuid(campaign.campaign_id);
    let name        = campaign.name.clone();
    let kind_str    = campaign.kind.discriminant().to_owned();
    let channel_str = campaign.channel.discriminant().to_owned();
    let template    = campaign.template_key.clone();
    let created     = encode_dt(campaign.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO campaigns
             (campaign_id, name, kind, channel, template_key, is_active, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
          rusqlite::params![id_str, name, kind_str, channel_str, template, created],
        )?;
        Ok(())
      })
      .await?;

    Ok(campaign)
  }

  async fn active_campaign(
    &self,
    kind: CampaignKind,
    channel: Channel,
  ) -> Result<Option<Campaign>> {
    let kind_str    = kind.discriminant().to_owned();
    let channel_str = channel.discriminant().to_owned();

    let raw: Option<RawCampaign> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT campaign_id, name, kind, channel, template_key, is_active, created_at
             FROM campaigns
             WHERE is_active = 1 AND kind = ?1 AND channel = ?2
             ORDER BY created_at
             LIMIT 1",
            rusqlite::params![kind_str, channel_str],
            |row| {
              Ok(RawCampaign {
                campaign_id:  row.get(0)?,
                name:         row.get(1)?,
                kind:         row.get(2)?,
                channel:      row.get(3)?,
                template_key: row.get(4)?,
                is_active:    row.get(5)?,
                created_at:   row.get(6)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawCampaign::into_campaign).transpose()
  }

  // ── Outbox — enqueue ──────────────────────────────────────────────────────

  async fn enqueue_campaign(&self, spec: EnqueueSpec) -> Result<u64> {
    let campaign_str  = encode_uuid(spec.campaign_id);
    let channel_str   = spec.channel.discriminant().to_owned();
    let purpose_str   = spec.purpose.discriminant().to_owned();
    let template      = spec.template_key;
    let scheduled_str = encode_dt(spec.scheduled_for);
    let created_str   = encode_dt(Utc::now());

    // One set-oriented statement: resolve latest consent per customer, pick
    // exactly one recipient identity per customer (primary first, then
    // earliest created), freeze the payload snapshot, and insert with the
    // dedupe index absorbing conflicts. The returned count is rows actually
    // inserted; conflicts are skipped silently.
    let inserted: usize = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "WITH latest_consent AS (
             SELECT customer_id, status FROM (
               SELECT customer_id, status,
                      ROW_NUMBER() OVER (
                        PARTITION BY customer_id
                        ORDER BY created_at DESC, event_seq DESC
                      ) AS rn
               FROM consent_events
               WHERE channel = ?2 AND purpose = ?3
             ) WHERE rn = 1
           ),
           recipient AS (
             SELECT customer_id, identity_id, value FROM (
               SELECT customer_id, identity_id, value,
                      ROW_NUMBER() OVER (
                        PARTITION BY customer_id
                        ORDER BY is_primary DESC, created_at ASC, identity_id ASC
                      ) AS rn
               FROM customer_identities
               WHERE channel = ?2
             ) WHERE rn = 1
           )
           INSERT INTO message_outbox
             (campaign_id, customer_id, channel, identity_id, template_key,
              payload, scheduled_for, status, created_at)
           SELECT
             ?1,
             c.customer_id,
             ?2,
             r.identity_id,
             ?4,
             json_object(
               'name', c.display_name,
               'address', r.value,
               'attributes', coalesce(
                 (SELECT json_group_object(a.key, json(a.value))
                  FROM customer_attributes a
                  WHERE a.customer_id = c.customer_id),
                 json_object())),
             ?5,
             'queued',
             ?6
           FROM customers c
           JOIN recipient r       ON r.customer_id = c.customer_id
           JOIN latest_consent lc ON lc.customer_id = c.customer_id
           WHERE lc.status = 'granted'
           ON CONFLICT (customer_id, channel, template_key, scheduled_for)
             DO NOTHING",
          rusqlite::params![
            campaign_str,
            channel_str,
            purpose_str,
            template,
            scheduled_str,
            created_str,
          ],
        )?;
        Ok(changed)
      })
      .await?;

    Ok(inserted as u64)
  }

  // ── Outbox — dispatch ─────────────────────────────────────────────────────

  async fn claim_due(&self, req: ClaimRequest) -> Result<Vec<OutboxMessage>> {
    let worker_id   = req.worker_id;
    let now_str     = encode_dt(req.now);
    let cutoff_str  = encode_dt(req.now - Duration::seconds(req.lease_secs));
    let batch       = req.batch_size as i64;

    // Single atomic UPDATE: rows already claimed within the lease window are
    // skipped rather than waited for, so concurrent claimants receive
    // disjoint batches.
    let raws: Vec<RawOutboxMessage> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "UPDATE message_outbox
           SET claimed_by = ?1, claimed_at = ?2
           WHERE outbox_id IN (
             SELECT outbox_id FROM message_outbox
             WHERE status = 'queued'
               AND scheduled_for <= ?2
               AND (claimed_by IS NULL OR claimed_at <= ?3)
             ORDER BY created_at ASC, outbox_id ASC
             LIMIT ?4
           )
           RETURNING {OUTBOX_COLUMNS}"
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(
            rusqlite::params![worker_id, now_str, cutoff_str, batch],
            outbox_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
      })
      .await?;

    let mut messages: Vec<OutboxMessage> = raws
      .into_iter()
      .map(RawOutboxMessage::into_message)
      .collect::<Result<_>>()?;

    // RETURNING does not promise the subquery's ordering.
    messages.sort_by(|a, b| {
      a.created_at
        .cmp(&b.created_at)
        .then(a.outbox_id.cmp(&b.outbox_id))
    });

    Ok(messages)
  }

  async fn release_claim(&self, outbox_id: i64, worker_id: &str) -> Result<bool> {
    let worker = worker_id.to_owned();

    let released: bool = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE message_outbox
           SET claimed_by = NULL, claimed_at = NULL
           WHERE outbox_id = ?1 AND claimed_by = ?2 AND status = 'queued'",
          rusqlite::params![outbox_id, worker],
        )?;
        Ok(changed == 1)
      })
      .await?;

    Ok(released)
  }

  async fn mark_sent(
    &self,
    outbox_id: i64,
    worker_id: &str,
    at: DateTime<Utc>,
  ) -> Result<bool> {
    let worker = worker_id.to_owned();
    let at_str = encode_dt(at);

    let marked: bool = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE message_outbox
           SET status = 'sent', sent_at = ?3, claimed_by = NULL, claimed_at = NULL
           WHERE outbox_id = ?1 AND claimed_by = ?2 AND status = 'queued'",
          rusqlite::params![outbox_id, worker, at_str],
        )?;
        Ok(changed == 1)
      })
      .await?;

    Ok(marked)
  }

  async fn record_failure(
    &self,
    outbox_id: i64,
    worker_id: &str,
    reason: &str,
    retry_limit: i64,
  ) -> Result<Option<OutboxStatus>> {
    let worker     = worker_id.to_owned();
    let reason_str = reason.to_owned();

    let status: Option<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "UPDATE message_outbox
           SET attempts = attempts + 1,
               failure_reason = ?3,
               status = CASE WHEN attempts + 1 > ?4 THEN 'failed' ELSE 'queued' END,
               claimed_by = NULL,
               claimed_at = NULL
           WHERE outbox_id = ?1 AND claimed_by = ?2 AND status = 'queued'
           RETURNING status",
        )?;

        Ok(
          stmt
            .query_row(
              rusqlite::params![outbox_id, worker, reason_str, retry_limit],
              |row| row.get(0),
            )
            .optional()?,
        )
      })
      .await?;

    status.as_deref().map(decode_outbox_status).transpose()
  }

  // ── Outbox — reads ────────────────────────────────────────────────────────

  async fn get_message(&self, outbox_id: i64) -> Result<Option<OutboxMessage>> {
    let raw: Option<RawOutboxMessage> = self
      .conn
      .call(move |conn| {
        let sql =
          format!("SELECT {OUTBOX_COLUMNS} FROM message_outbox WHERE outbox_id = ?1");
        Ok(
          conn
            .query_row(&sql, rusqlite::params![outbox_id], outbox_row)
            .optional()?,
        )
      })
      .await?;

    raw.map(RawOutboxMessage::into_message).transpose()
  }

  async fn recent_outbox(
    &self,
    status: OutboxStatus,
    limit: usize,
  ) -> Result<Vec<OutboxListing>> {
    let status_str = status.discriminant().to_owned();
    let limit_val  = limit as i64;

    let raws: Vec<RawOutboxListing> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT o.outbox_id, o.status, o.template_key, o.channel,
                  i.value, c.display_name, o.failure_reason,
                  o.scheduled_for, o.sent_at, o.created_at
           FROM message_outbox o
           JOIN customers c           ON c.customer_id = o.customer_id
           JOIN customer_identities i ON i.identity_id = o.identity_id
           WHERE o.status = ?1
           ORDER BY o.created_at DESC, o.outbox_id DESC
           LIMIT ?2",
        )?;

        let rows = stmt
          .query_map(rusqlite::params![status_str, limit_val], |row| {
            Ok(RawOutboxListing {
              outbox_id:      row.get(0)?,
              status:         row.get(1)?,
              template_key:   row.get(2)?,
              channel:        row.get(3)?,
              recipient:      row.get(4)?,
              customer_name:  row.get(5)?,
              failure_reason: row.get(6)?,
              scheduled_for:  row.get(7)?,
              sent_at:        row.get(8)?,
              created_at:     row.get(9)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawOutboxListing::into_listing).collect()
  }

  async fn outbox_for_customer(
    &self,
    customer_id: Uuid,
    channel: Channel,
    limit: usize,
  ) -> Result<Vec<OutboxMessage>> {
    let customer_str = encode_uuid(customer_id);
    let channel_str  = channel.discriminant().to_owned();
    let limit_val    = limit as i64;

    let raws: Vec<RawOutboxMessage> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {OUTBOX_COLUMNS} FROM message_outbox
           WHERE customer_id = ?1 AND channel = ?2
           ORDER BY created_at DESC, outbox_id DESC
           LIMIT ?3"
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(
            rusqlite::params![customer_str, channel_str, limit_val],
            outbox_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawOutboxMessage::into_message).collect()
  }

  async fn outbox_status_counts(&self) -> Result<Vec<(OutboxStatus, u64)>> {
    let rows: Vec<(String, i64)> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT status, COUNT(*) FROM message_outbox
           GROUP BY status
           ORDER BY COUNT(*) DESC",
        )?;

        let rows = stmt
          .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(status, n)| Ok((decode_outbox_status(&status)?, n as u64)))
      .collect()
  }

  async fn store_counts(&self) -> Result<StoreCounts> {
    let (customers, identities, consent_events, outbox_messages): (i64, i64, i64, i64) =
      self
        .conn
        .call(|conn| {
          Ok(conn.query_row(
            "SELECT
               (SELECT COUNT(*) FROM customers),
               (SELECT COUNT(*) FROM customer_identities),
               (SELECT COUNT(*) FROM consent_events),
               (SELECT COUNT(*) FROM message_outbox)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
          )?)
        })
        .await?;

    Ok(StoreCounts {
      customers:       customers as u64,
      identities:      identities as u64,
      consent_events:  consent_events as u64,
      outbox_messages: outbox_messages as u64,
    })
  }
}

#[cfg(test)]
impl SqliteStore {
  /// Rewrite a consent event's `created_at` so tests can simulate events
  /// arriving out of chronological order.
  pub(crate) async fn backdate_consent_for_test(
    &self,
    event_seq: i64,
    created_at: &str,
  ) -> Result<()> {
    let created_at = created_at.to_owned();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE consent_events SET created_at = ?1 WHERE event_seq = ?2",
          rusqlite::params![created_at, event_seq],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
