//! SQL schema for the Herald SQLite store.
//!
//! Executed at every connection startup; the DDL is idempotent. Future
//! migrations will be gated on `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS customers (
    customer_id  TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    country      TEXT NOT NULL DEFAULT 'AR',
    source       TEXT NOT NULL DEFAULT 'signup',
    status       TEXT NOT NULL DEFAULT 'active',   -- 'active' | 'archived'
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

-- The natural key (channel, value) is what makes get-or-create race-safe:
-- concurrent creators collide here, not in application logic.
CREATE TABLE IF NOT EXISTS customer_identities (
    identity_id TEXT PRIMARY KEY,
    customer_id TEXT NOT NULL REFERENCES customers(customer_id),
    channel     TEXT NOT NULL,   -- 'email' | 'sms' | 'whatsapp' | 'instagram'
    value       TEXT NOT NULL,   -- normalised address
    is_primary  INTEGER NOT NULL DEFAULT 0,
    is_verified INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL,
    UNIQUE (channel, value)
);

CREATE TABLE IF NOT EXISTS customer_attributes (
    customer_id TEXT NOT NULL REFERENCES customers(customer_id),
    key         TEXT NOT NULL,
    value       TEXT NOT NULL,   -- JSON
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (customer_id, key)
);

-- The consent ledger is strictly append-only.
-- No UPDATE or DELETE is ever issued against this table. Current status is
-- always resolved from the history; event_seq breaks created_at ties.
CREATE TABLE IF NOT EXISTS consent_events (
    event_seq   INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id TEXT NOT NULL REFERENCES customers(customer_id),
    channel     TEXT NOT NULL,
    purpose     TEXT NOT NULL,   -- 'promotions' | 'transactional' | 'loyalty'
    status      TEXT NOT NULL,   -- 'granted' | 'revoked'
    granted_at  TEXT,
    revoked_at  TEXT,
    proof       TEXT NOT NULL DEFAULT '{}',   -- JSON audit metadata
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS campaigns (
    campaign_id  TEXT PRIMARY KEY,
    name         TEXT NOT NULL,
    kind         TEXT NOT NULL,   -- 'weekly_promo'
    channel      TEXT NOT NULL,
    template_key TEXT NOT NULL,
    is_active    INTEGER NOT NULL DEFAULT 1,
    created_at   TEXT NOT NULL
);

-- Outbox rows are inserted only by the enqueuer and resolved only by the
-- dispatch worker. claimed_by/claimed_at implement the claim lease.
CREATE TABLE IF NOT EXISTS message_outbox (
    outbox_id      INTEGER PRIMARY KEY AUTOINCREMENT,
    campaign_id    TEXT NOT NULL REFERENCES campaigns(campaign_id),
    customer_id    TEXT NOT NULL REFERENCES customers(customer_id),
    channel        TEXT NOT NULL,
    identity_id    TEXT NOT NULL REFERENCES customer_identities(identity_id),
    template_key   TEXT NOT NULL,
    payload        TEXT NOT NULL,   -- JSON snapshot frozen at enqueue time
    scheduled_for  TEXT NOT NULL,
    status         TEXT NOT NULL DEFAULT 'queued',
    failure_reason TEXT,
    attempts       INTEGER NOT NULL DEFAULT 0,
    claimed_by     TEXT,
    claimed_at     TEXT,
    created_at     TEXT NOT NULL,
    sent_at        TEXT
);

-- The dedupe invariant: at most one row per schedulable message instance,
-- enforced by the store rather than by application logic.
CREATE UNIQUE INDEX IF NOT EXISTS uq_outbox_dedupe
    ON message_outbox (customer_id, channel, template_key, scheduled_for);

CREATE INDEX IF NOT EXISTS consent_tuple_idx
    ON consent_events (channel, purpose, customer_id, created_at);
CREATE INDEX IF NOT EXISTS identities_customer_idx
    ON customer_identities (customer_id);
CREATE INDEX IF NOT EXISTS outbox_claim_idx
    ON message_outbox (status, scheduled_for);
CREATE INDEX IF NOT EXISTS outbox_customer_idx
    ON message_outbox (customer_id, channel);

PRAGMA user_version = 1;
";
