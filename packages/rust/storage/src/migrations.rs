//! SQL migration definitions for the LeadForge database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.
//!
//! Timestamps are RFC 3339 UTC strings with fixed microsecond precision so
//! that lexicographic order matches chronological order.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: orgs, funnels, leads, stage_history, automation_events, lead_sequences",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Tenants
CREATE TABLE IF NOT EXISTS orgs (
    id                  TEXT PRIMARY KEY,
    name                TEXT NOT NULL,
    industry_slug       TEXT,
    industry_name       TEXT,
    avg_deal_value      REAL,
    close_rate_percent  REAL,
    scoring_config_json TEXT,
    created_at          TEXT NOT NULL
);

-- Lead-capture forms and their automation settings
CREATE TABLE IF NOT EXISTS funnels (
    id                       TEXT PRIMARY KEY,
    org_id                   TEXT NOT NULL REFERENCES orgs(id) ON DELETE CASCADE,
    slug                     TEXT NOT NULL UNIQUE,
    name                     TEXT NOT NULL,
    is_active                INTEGER NOT NULL DEFAULT 1,
    languages_json           TEXT NOT NULL DEFAULT '[]',
    schema_json              TEXT NOT NULL,
    routing_rules_json       TEXT NOT NULL DEFAULT '{"rules":[]}',
    auto_email_enabled       INTEGER NOT NULL DEFAULT 0,
    auto_sms_enabled         INTEGER NOT NULL DEFAULT 0,
    auto_call_enabled        INTEGER NOT NULL DEFAULT 0,
    notification_emails_json TEXT NOT NULL DEFAULT '[]',
    rep_phone_number         TEXT,
    sending_number           TEXT,
    working_hours_start      INTEGER NOT NULL DEFAULT 9,
    working_hours_end        INTEGER NOT NULL DEFAULT 19,
    sequence_enabled         INTEGER NOT NULL DEFAULT 0,
    sequence_json            TEXT NOT NULL DEFAULT '{"steps":[]}',
    created_at               TEXT NOT NULL,
    updated_at               TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_funnels_org_id ON funnels(org_id);

-- Captured submissions
CREATE TABLE IF NOT EXISTS leads (
    id                    TEXT PRIMARY KEY,
    org_id                TEXT NOT NULL REFERENCES orgs(id) ON DELETE CASCADE,
    funnel_id             TEXT NOT NULL REFERENCES funnels(id) ON DELETE CASCADE,
    language              TEXT NOT NULL,
    answers_json          TEXT NOT NULL,
    source_json           TEXT NOT NULL DEFAULT '{}',
    is_spam               INTEGER NOT NULL DEFAULT 0,
    tags_json             TEXT NOT NULL DEFAULT '[]',
    priority              TEXT,
    ai_score              INTEGER,
    ai_summary            TEXT,
    email_status          TEXT,
    sms_status            TEXT,
    call_status           TEXT,
    textback_status       TEXT,
    call_attempts         INTEGER NOT NULL DEFAULT 0,
    contact_status        TEXT,
    last_contacted_at     TEXT,
    stage                 TEXT NOT NULL DEFAULT 'new',
    stage_updated_at      TEXT,
    deal_amount           REAL,
    outcome_reason        TEXT,
    outcome_note          TEXT,
    closed_at             TEXT,
    automation_started_at TEXT,
    created_at            TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_leads_org_id ON leads(org_id);
CREATE INDEX IF NOT EXISTS idx_leads_funnel_id ON leads(funnel_id);

-- Append-only stage changes
CREATE TABLE IF NOT EXISTS stage_history (
    id         TEXT PRIMARY KEY,
    lead_id    TEXT NOT NULL REFERENCES leads(id) ON DELETE CASCADE,
    from_stage TEXT,
    to_stage   TEXT NOT NULL,
    actor      TEXT,
    reason     TEXT,
    note       TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_stage_history_lead ON stage_history(lead_id);

-- Append-only automation audit trail
CREATE TABLE IF NOT EXISTS automation_events (
    id          TEXT PRIMARY KEY,
    org_id      TEXT NOT NULL,
    lead_id     TEXT NOT NULL,
    event_type  TEXT NOT NULL,
    status      TEXT NOT NULL,
    detail_json TEXT,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_automation_events_lead ON automation_events(lead_id);

-- Scheduled follow-up messages
CREATE TABLE IF NOT EXISTS lead_sequences (
    id           TEXT PRIMARY KEY,
    lead_id      TEXT NOT NULL REFERENCES leads(id) ON DELETE CASCADE,
    step         INTEGER NOT NULL,
    scheduled_at TEXT NOT NULL,
    sent_at      TEXT,
    status       TEXT NOT NULL DEFAULT 'pending',
    message      TEXT NOT NULL,
    detail       TEXT,
    UNIQUE(lead_id, step)
);

CREATE INDEX IF NOT EXISTS idx_lead_sequences_due ON lead_sequences(status, scheduled_at);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
