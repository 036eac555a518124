//! SQL schema for the Cadence SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Owned by the host application; read here to resolve actors.
CREATE TABLE IF NOT EXISTS accounts (
    user_id TEXT PRIMARY KEY,
    email   TEXT NOT NULL,
    name    TEXT,
    role    TEXT
);

CREATE TABLE IF NOT EXISTS contacts (
    contact_id TEXT PRIMARY KEY,
    email      TEXT NOT NULL UNIQUE,   -- lowercased
    user_id    TEXT UNIQUE,
    name       TEXT,
    role       TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Strictly append-only.
CREATE TABLE IF NOT EXISTS events (
    event_id         TEXT PRIMARY KEY,
    seq              INTEGER NOT NULL UNIQUE,  -- insertion order
    event_type       TEXT NOT NULL,
    actor_user_id    TEXT,
    subject_audio_id TEXT,
    contact_id       TEXT,
    metadata         TEXT NOT NULL DEFAULT '{}',
    created_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS templates (
    template_id TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    subject     TEXT NOT NULL,
    body        TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS automations (
    automation_id TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    trigger_type  TEXT NOT NULL,
    delay_minutes INTEGER NOT NULL CHECK (delay_minutes >= 0),
    subject       TEXT NOT NULL,
    body          TEXT NOT NULL,
    template_id   TEXT REFERENCES templates(template_id) ON DELETE RESTRICT,
    active        INTEGER NOT NULL DEFAULT 1,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sequences (
    sequence_id  TEXT PRIMARY KEY,
    name         TEXT NOT NULL,
    trigger_type TEXT NOT NULL,
    active       INTEGER NOT NULL DEFAULT 1,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

-- Always replaced as a whole, inside one transaction.
CREATE TABLE IF NOT EXISTS sequence_steps (
    sequence_id TEXT NOT NULL REFERENCES sequences(sequence_id) ON DELETE CASCADE,
    step_order  INTEGER NOT NULL CHECK (step_order >= 0),
    delay_days  INTEGER NOT NULL CHECK (delay_days >= 0),
    delay_hours INTEGER NOT NULL CHECK (delay_hours >= 0),
    subject     TEXT NOT NULL,
    body        TEXT NOT NULL,
    PRIMARY KEY (sequence_id, step_order)
);

CREATE TABLE IF NOT EXISTS enrollments (
    enrollment_id TEXT PRIMARY KEY,
    sequence_id   TEXT NOT NULL REFERENCES sequences(sequence_id) ON DELETE CASCADE,
    contact_id    TEXT NOT NULL,
    enrolled_at   TEXT NOT NULL,
    UNIQUE (sequence_id, contact_id)
);

-- Rows are never deleted; sent_at is terminal.
CREATE TABLE IF NOT EXISTS scheduled_sends (
    send_id       TEXT PRIMARY KEY,
    automation_id TEXT,
    enrollment_id TEXT,
    sequence_id   TEXT,
    step_order    INTEGER,
    contact_id    TEXT NOT NULL,
    to_email      TEXT NOT NULL,
    subject       TEXT NOT NULL,
    body          TEXT NOT NULL,
    due_at        TEXT NOT NULL,
    sent_at       TEXT,
    claimed_at    TEXT,
    claim_token   TEXT,
    attempts      INTEGER NOT NULL DEFAULT 0,
    last_error    TEXT,
    created_at    TEXT NOT NULL,
    CHECK ((automation_id IS NULL) != (enrollment_id IS NULL))
);

CREATE INDEX IF NOT EXISTS events_type_idx      ON events(event_type);
CREATE INDEX IF NOT EXISTS events_contact_idx   ON events(contact_id);
CREATE INDEX IF NOT EXISTS automations_trig_idx ON automations(trigger_type, active);
CREATE INDEX IF NOT EXISTS sequences_trig_idx   ON sequences(trigger_type, active);
CREATE INDEX IF NOT EXISTS sends_pending_idx    ON scheduled_sends(sent_at, due_at);

PRAGMA user_version = 1;
";
