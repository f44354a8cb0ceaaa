//! Turso Embedded / libSQL storage layer.
//!
//! The [`Storage`] struct wraps a libSQL database holding orgs, funnels,
//! leads, stage history, automation events, and scheduled sequence steps.
//!
//! **Access rules:**
//! - Share one [`Storage`] behind an `Arc`; every operation opens its own
//!   connection and drops it before returning, so no connection is held
//!   across a provider round-trip.
//! - Claims (`claim_automation`, `claim_sequence_step`,
//!   `increment_call_attempt`) are single conditional updates; the caller
//!   owns the record only if the update touched a row.

mod migrations;

use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use leadforge_shared::{
    Answers, AutomationEvent, AutomationEventType, CallStatus, DeliveryStatus, Funnel, FunnelId,
    Lead, LeadForgeError, LeadId, Org, OrgId, Priority, Result, SequenceStatus,
    SequenceStepRecord, Stage, StageHistoryEvent, WorkingHours, answer_text,
};
use libsql::{Connection, Database, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    db: Database,
}

/// A requested stage change, validated by the caller.
#[derive(Debug, Clone)]
pub struct StageChange {
    pub lead_id: LeadId,
    /// Stage the caller validated against; the update fails if it moved since.
    pub from_stage: Stage,
    pub to_stage: Stage,
    pub deal_amount: Option<f64>,
    pub reason: Option<String>,
    pub note: Option<String>,
    pub actor: Option<String>,
    pub at: DateTime<Utc>,
}

/// A pending sequence step joined with what the worker needs to send it.
#[derive(Debug, Clone)]
pub struct DueSequenceStep {
    pub record: SequenceStepRecord,
    pub org_id: OrgId,
    /// The lead's phone answer, unnormalized.
    pub phone: Option<String>,
    /// Set when the lead's stored answers could not be decoded; `phone` is
    /// then `None`.
    pub answers_error: Option<String>,
    /// The funnel's provider number.
    pub sending_number: Option<String>,
}

impl Storage {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| LeadForgeError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let storage = Self { db };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a fresh connection with a busy timeout.
    fn conn(&self) -> Result<Connection> {
        let conn = self.db.connect().map_err(db_err)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(db_err)?;
        Ok(conn)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;
        let conn = self.conn()?;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                conn.execute_batch(migration.sql).await.map_err(|e| {
                    LeadForgeError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let Ok(conn) = self.conn() else {
            return 0;
        };
        match conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await
        {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Org operations
    // -----------------------------------------------------------------------

    /// Insert or replace an organization.
    pub async fn upsert_org(&self, org: &Org) -> Result<()> {
        let scoring = org.scoring_config.as_ref().map(to_json).transpose()?;
        self.conn()?
            .execute(
                "INSERT INTO orgs (id, name, industry_slug, industry_name, avg_deal_value,
                                   close_rate_percent, scoring_config_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                   name = excluded.name,
                   industry_slug = excluded.industry_slug,
                   industry_name = excluded.industry_name,
                   avg_deal_value = excluded.avg_deal_value,
                   close_rate_percent = excluded.close_rate_percent,
                   scoring_config_json = excluded.scoring_config_json",
                params![
                    org.id.to_string(),
                    org.name.as_str(),
                    org.industry_slug.as_deref(),
                    org.industry_name.as_deref(),
                    org.avg_deal_value,
                    org.close_rate_percent,
                    scoring,
                    ts(&Utc::now()),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Get an organization by ID.
    pub async fn get_org(&self, id: &OrgId) -> Result<Option<Org>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, name, industry_slug, industry_name, avg_deal_value,
                        close_rate_percent, scoring_config_json
                 FROM orgs WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(Org {
                id: parse_id(&row.get::<String>(0).map_err(db_err)?)?,
                name: row.get::<String>(1).map_err(db_err)?,
                industry_slug: row.get::<String>(2).ok(),
                industry_name: row.get::<String>(3).ok(),
                avg_deal_value: row.get::<f64>(4).ok(),
                close_rate_percent: row.get::<f64>(5).ok(),
                scoring_config: row
                    .get::<String>(6)
                    .ok()
                    .map(|s| from_json(&s, "org scoring config"))
                    .transpose()?,
            })),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Funnel operations
    // -----------------------------------------------------------------------

    /// Insert a funnel, or update the existing funnel with the same slug.
    pub async fn upsert_funnel(&self, funnel: &Funnel) -> Result<()> {
        let now = ts(&Utc::now());
        self.conn()?
            .execute(
                "INSERT INTO funnels (id, org_id, slug, name, is_active, languages_json, schema_json,
                                      routing_rules_json, auto_email_enabled, auto_sms_enabled,
                                      auto_call_enabled, notification_emails_json, rep_phone_number,
                                      sending_number, working_hours_start, working_hours_end,
                                      sequence_enabled, sequence_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?19)
                 ON CONFLICT(slug) DO UPDATE SET
                   name = excluded.name,
                   is_active = excluded.is_active,
                   languages_json = excluded.languages_json,
                   schema_json = excluded.schema_json,
                   routing_rules_json = excluded.routing_rules_json,
                   auto_email_enabled = excluded.auto_email_enabled,
                   auto_sms_enabled = excluded.auto_sms_enabled,
                   auto_call_enabled = excluded.auto_call_enabled,
                   notification_emails_json = excluded.notification_emails_json,
                   rep_phone_number = excluded.rep_phone_number,
                   sending_number = excluded.sending_number,
                   working_hours_start = excluded.working_hours_start,
                   working_hours_end = excluded.working_hours_end,
                   sequence_enabled = excluded.sequence_enabled,
                   sequence_json = excluded.sequence_json,
                   updated_at = excluded.updated_at",
                params![
                    funnel.id.to_string(),
                    funnel.org_id.to_string(),
                    funnel.slug.as_str(),
                    funnel.name.as_str(),
                    flag(funnel.is_active),
                    to_json(&funnel.languages)?,
                    to_json(&funnel.schema)?,
                    to_json(&funnel.routing_rules)?,
                    flag(funnel.auto_email_enabled),
                    flag(funnel.auto_sms_enabled),
                    flag(funnel.auto_call_enabled),
                    to_json(&funnel.notification_emails)?,
                    funnel.rep_phone_number.as_deref(),
                    funnel.sending_number.as_deref(),
                    i64::from(funnel.working_hours.start),
                    i64::from(funnel.working_hours.end),
                    flag(funnel.sequence_enabled),
                    to_json(&funnel.sequence)?,
                    now.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Get a funnel by ID.
    pub async fn get_funnel(&self, id: &FunnelId) -> Result<Option<Funnel>> {
        self.query_funnel("id = ?1", id.to_string()).await
    }

    /// Get an active funnel by slug.
    pub async fn get_active_funnel_by_slug(&self, slug: &str) -> Result<Option<Funnel>> {
        self.query_funnel("slug = ?1 AND is_active = 1", slug.to_string())
            .await
    }

    /// Get a funnel by slug regardless of its active flag.
    pub async fn get_funnel_by_slug(&self, slug: &str) -> Result<Option<Funnel>> {
        self.query_funnel("slug = ?1", slug.to_string()).await
    }

    async fn query_funnel(&self, predicate: &str, key: String) -> Result<Option<Funnel>> {
        let sql = format!("SELECT {FUNNEL_COLUMNS} FROM funnels WHERE {predicate}");
        let conn = self.conn()?;
        let mut rows = conn
            .query(&sql, params![key])
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_funnel(&row)?)),
            None => Ok(None),
        }
    }

    /// List all funnels, ordered by slug.
    pub async fn list_funnels(&self) -> Result<Vec<Funnel>> {
        let sql = format!("SELECT {FUNNEL_COLUMNS} FROM funnels ORDER BY slug");
        let conn = self.conn()?;
        let mut rows = conn.query(&sql, params![]).await.map_err(db_err)?;

        let mut funnels = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            funnels.push(row_to_funnel(&row)?);
        }
        Ok(funnels)
    }

    // -----------------------------------------------------------------------
    // Lead operations
    // -----------------------------------------------------------------------

    /// Insert a new lead.
    pub async fn insert_lead(&self, lead: &Lead) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO leads (id, org_id, funnel_id, language, answers_json, source_json,
                                    is_spam, tags_json, priority, stage, call_attempts, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    lead.id.to_string(),
                    lead.org_id.to_string(),
                    lead.funnel_id.to_string(),
                    lead.language.as_str(),
                    to_json(&lead.answers)?,
                    to_json(&lead.source)?,
                    flag(lead.is_spam),
                    to_json(&lead.tags)?,
                    lead.priority.map(|p| p.as_str()),
                    lead.stage.as_str(),
                    i64::from(lead.call_attempts),
                    ts(&lead.created_at),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Get a lead by ID.
    pub async fn get_lead(&self, id: &LeadId) -> Result<Option<Lead>> {
        let sql = format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?1");
        let conn = self.conn()?;
        let mut rows = conn
            .query(&sql, params![id.to_string()])
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_lead(&row)?)),
            None => Ok(None),
        }
    }

    /// List the most recent leads, newest first.
    pub async fn list_leads(&self, limit: u32) -> Result<Vec<Lead>> {
        let sql = format!("SELECT {LEAD_COLUMNS} FROM leads ORDER BY created_at DESC LIMIT ?1");
        let conn = self.conn()?;
        let mut rows = conn
            .query(&sql, params![i64::from(limit)])
            .await
            .map_err(db_err)?;

        let mut leads = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            leads.push(row_to_lead(&row)?);
        }
        Ok(leads)
    }

    /// Non-spam leads whose automation never started, oldest first.
    pub async fn list_unprocessed_leads(&self, limit: u32) -> Result<Vec<LeadId>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT id FROM leads
                 WHERE automation_started_at IS NULL AND is_spam = 0
                 ORDER BY created_at LIMIT ?1",
                params![i64::from(limit)],
            )
            .await
            .map_err(db_err)?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            ids.push(parse_id(&row.get::<String>(0).map_err(db_err)?)?);
        }
        Ok(ids)
    }

    /// Mark automation as started. Returns `false` if another run already claimed it.
    pub async fn claim_automation(&self, id: &LeadId, at: DateTime<Utc>) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE leads SET automation_started_at = ?1
                 WHERE id = ?2 AND automation_started_at IS NULL",
                params![ts(&at), id.to_string()],
            )
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    /// Persist routing output.
    pub async fn set_routing(
        &self,
        id: &LeadId,
        tags: &[String],
        priority: Option<Priority>,
    ) -> Result<()> {
        self.update_lead(
            id,
            "UPDATE leads SET tags_json = ?1, priority = ?2 WHERE id = ?3",
            params![to_json(&tags)?, priority.map(|p| p.as_str()), id.to_string()],
        )
        .await
    }

    /// Persist AI scoring output.
    pub async fn set_ai_score(&self, id: &LeadId, score: u8, summary: &str) -> Result<()> {
        self.update_lead(
            id,
            "UPDATE leads SET ai_score = ?1, ai_summary = ?2 WHERE id = ?3",
            params![i64::from(score), summary, id.to_string()],
        )
        .await
    }

    pub async fn set_email_status(&self, id: &LeadId, status: DeliveryStatus) -> Result<()> {
        self.update_lead(
            id,
            "UPDATE leads SET email_status = ?1 WHERE id = ?2",
            params![status.as_str(), id.to_string()],
        )
        .await
    }

    pub async fn set_sms_status(&self, id: &LeadId, status: DeliveryStatus) -> Result<()> {
        self.update_lead(
            id,
            "UPDATE leads SET sms_status = ?1 WHERE id = ?2",
            params![status.as_str(), id.to_string()],
        )
        .await
    }

    pub async fn set_textback_status(&self, id: &LeadId, status: DeliveryStatus) -> Result<()> {
        self.update_lead(
            id,
            "UPDATE leads SET textback_status = ?1 WHERE id = ?2",
            params![status.as_str(), id.to_string()],
        )
        .await
    }

    pub async fn set_call_status(&self, id: &LeadId, status: CallStatus) -> Result<()> {
        self.update_lead(
            id,
            "UPDATE leads SET call_status = ?1 WHERE id = ?2",
            params![status.as_str(), id.to_string()],
        )
        .await
    }

    /// Claim the one-shot missed-call text-back. Returns `false` when a
    /// text-back was already claimed or sent for this lead.
    pub async fn claim_textback(&self, id: &LeadId) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE leads SET textback_status = ?1
                 WHERE id = ?2 AND textback_status IS NULL",
                params![DeliveryStatus::Sending.as_str(), id.to_string()],
            )
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    /// Store a terminal call outcome reported by the provider. Returns
    /// `false` without writing when the lead already holds `status` or a
    /// retry is pending, so a redelivered callback acts only once.
    pub async fn record_call_outcome(&self, id: &LeadId, status: CallStatus) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE leads SET call_status = ?1
                 WHERE id = ?2 AND (call_status IS NULL OR call_status NOT IN (?1, ?3))",
                params![
                    status.as_str(),
                    id.to_string(),
                    CallStatus::Retrying.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    /// Move a lead from the retryable outcome `from` to `retrying` while
    /// attempts remain. Returns `true` for exactly one caller per outcome.
    pub async fn claim_call_retry(
        &self,
        id: &LeadId,
        from: CallStatus,
        max_attempts: u32,
    ) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE leads SET call_status = ?1
                 WHERE id = ?2 AND call_status = ?3 AND call_attempts < ?4",
                params![
                    CallStatus::Retrying.as_str(),
                    id.to_string(),
                    from.as_str(),
                    i64::from(max_attempts),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    /// Record that the rep was bridged to the lead.
    pub async fn mark_connected(&self, id: &LeadId, at: DateTime<Utc>) -> Result<()> {
        self.update_lead(
            id,
            "UPDATE leads SET contact_status = 'connected', last_contacted_at = ?1 WHERE id = ?2",
            params![ts(&at), id.to_string()],
        )
        .await
    }

    /// Consume one retry: bump the attempt counter and mark the call as
    /// retrying, only while the counter is below `max_attempts`.
    /// Returns `false` once the cap has been reached.
    pub async fn increment_call_attempt(&self, id: &LeadId, max_attempts: u32) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE leads SET call_attempts = call_attempts + 1, call_status = ?1
                 WHERE id = ?2 AND call_attempts < ?3",
                params![
                    CallStatus::Retrying.as_str(),
                    id.to_string(),
                    i64::from(max_attempts),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    /// Single-row lead update that reports a missing lead as not found.
    async fn update_lead(
        &self,
        id: &LeadId,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<()> {
        let changed = self.conn()?.execute(sql, params).await.map_err(db_err)?;
        if changed == 0 {
            return Err(LeadForgeError::not_found("lead", id));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Stage history
    // -----------------------------------------------------------------------

    /// Apply a validated stage change atomically.
    ///
    /// A real transition updates the lead and appends exactly one history
    /// event; a same-stage update only touches deal fields and appends
    /// nothing. `closed_at` is written the first time a terminal stage is
    /// entered and never cleared. Fails if the lead is no longer in
    /// `from_stage`.
    pub async fn apply_stage_change(
        &self,
        change: &StageChange,
    ) -> Result<Option<StageHistoryEvent>> {
        let conn = self.conn()?;
        let tx = conn.transaction().await.map_err(db_err)?;
        let at = ts(&change.at);
        let lead_id = change.lead_id.to_string();
        let terminal = change.to_stage.is_terminal();
        let outcome_reason = if terminal { change.reason.as_deref() } else { None };
        let outcome_note = if terminal { change.note.as_deref() } else { None };

        if change.from_stage == change.to_stage {
            let changed = tx
                .execute(
                    "UPDATE leads SET
                       deal_amount = COALESCE(?1, deal_amount),
                       outcome_reason = COALESCE(?2, outcome_reason),
                       outcome_note = COALESCE(?3, outcome_note)
                     WHERE id = ?4 AND stage = ?5",
                    params![
                        change.deal_amount,
                        outcome_reason,
                        outcome_note,
                        lead_id.as_str(),
                        change.from_stage.as_str(),
                    ],
                )
                .await
                .map_err(db_err)?;
            if changed == 0 {
                return Err(stage_conflict(change));
            }
            tx.commit().await.map_err(db_err)?;
            return Ok(None);
        }

        let closed_at = terminal.then(|| at.clone());
        let changed = tx
            .execute(
                "UPDATE leads SET
                   stage = ?1,
                   stage_updated_at = ?2,
                   deal_amount = COALESCE(?3, deal_amount),
                   outcome_reason = COALESCE(?4, outcome_reason),
                   outcome_note = COALESCE(?5, outcome_note),
                   closed_at = COALESCE(closed_at, ?6)
                 WHERE id = ?7 AND stage = ?8",
                params![
                    change.to_stage.as_str(),
                    at.as_str(),
                    change.deal_amount,
                    outcome_reason,
                    outcome_note,
                    closed_at,
                    lead_id.as_str(),
                    change.from_stage.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
        if changed == 0 {
            return Err(stage_conflict(change));
        }

        let event = StageHistoryEvent {
            id: Uuid::now_v7(),
            lead_id: change.lead_id,
            from_stage: Some(change.from_stage),
            to_stage: change.to_stage,
            actor: change.actor.clone(),
            reason: change.reason.clone(),
            note: change.note.clone(),
            created_at: change.at,
        };
        tx.execute(
            "INSERT INTO stage_history (id, lead_id, from_stage, to_stage, actor, reason, note, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.id.to_string(),
                lead_id.as_str(),
                change.from_stage.as_str(),
                change.to_stage.as_str(),
                event.actor.as_deref(),
                event.reason.as_deref(),
                event.note.as_deref(),
                at.as_str(),
            ],
        )
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(Some(event))
    }

    /// Stage history for a lead, oldest first.
    pub async fn list_stage_history(&self, lead_id: &LeadId) -> Result<Vec<StageHistoryEvent>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, lead_id, from_stage, to_stage, actor, reason, note, created_at
                 FROM stage_history WHERE lead_id = ?1 ORDER BY created_at, id",
                params![lead_id.to_string()],
            )
            .await
            .map_err(db_err)?;

        let mut events = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            events.push(StageHistoryEvent {
                id: parse_id(&row.get::<String>(0).map_err(db_err)?)?,
                lead_id: parse_id(&row.get::<String>(1).map_err(db_err)?)?,
                from_stage: opt_enum(row.get::<String>(2).ok())?,
                to_stage: row.get::<String>(3).map_err(db_err)?.parse()?,
                actor: row.get::<String>(4).ok(),
                reason: row.get::<String>(5).ok(),
                note: row.get::<String>(6).ok(),
                created_at: parse_ts(&row.get::<String>(7).map_err(db_err)?)?,
            });
        }
        Ok(events)
    }

    // -----------------------------------------------------------------------
    // Automation events
    // -----------------------------------------------------------------------

    /// Append an automation event.
    pub async fn insert_event(&self, event: &AutomationEvent) -> Result<()> {
        let detail = event.detail.as_ref().map(to_json).transpose()?;
        self.conn()?
            .execute(
                "INSERT INTO automation_events (id, org_id, lead_id, event_type, status, detail_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.id.to_string(),
                    event.org_id.to_string(),
                    event.lead_id.to_string(),
                    event.event_type.as_str(),
                    event.status.as_str(),
                    detail,
                    ts(&event.created_at),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Automation events for a lead, oldest first.
    pub async fn list_events(&self, lead_id: &LeadId) -> Result<Vec<AutomationEvent>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, org_id, lead_id, event_type, status, detail_json, created_at
                 FROM automation_events WHERE lead_id = ?1 ORDER BY created_at, id",
                params![lead_id.to_string()],
            )
            .await
            .map_err(db_err)?;

        let mut events = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            events.push(AutomationEvent {
                id: parse_id(&row.get::<String>(0).map_err(db_err)?)?,
                org_id: parse_id(&row.get::<String>(1).map_err(db_err)?)?,
                lead_id: parse_id(&row.get::<String>(2).map_err(db_err)?)?,
                event_type: row
                    .get::<String>(3)
                    .map_err(db_err)?
                    .parse::<AutomationEventType>()?,
                status: row.get::<String>(4).map_err(db_err)?,
                detail: row
                    .get::<String>(5)
                    .ok()
                    .map(|s| from_json(&s, "event detail"))
                    .transpose()?,
                created_at: parse_ts(&row.get::<String>(6).map_err(db_err)?)?,
            });
        }
        Ok(events)
    }

    // -----------------------------------------------------------------------
    // Sequence steps
    // -----------------------------------------------------------------------

    /// Insert scheduled steps in one transaction; all or nothing.
    pub async fn insert_sequence_steps(&self, steps: &[SequenceStepRecord]) -> Result<()> {
        let conn = self.conn()?;
        let tx = conn.transaction().await.map_err(db_err)?;
        for step in steps {
            tx.execute(
                "INSERT INTO lead_sequences (id, lead_id, step, scheduled_at, sent_at, status, message, detail)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    step.id.to_string(),
                    step.lead_id.to_string(),
                    i64::from(step.step),
                    ts(&step.scheduled_at),
                    step.sent_at.as_ref().map(ts),
                    step.status.as_str(),
                    step.message.as_str(),
                    step.detail.as_deref(),
                ],
            )
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    /// All sequence steps for a lead, in step order.
    pub async fn list_sequence_steps(&self, lead_id: &LeadId) -> Result<Vec<SequenceStepRecord>> {
        let sql = format!(
            "SELECT {SEQUENCE_COLUMNS} FROM lead_sequences s WHERE s.lead_id = ?1 ORDER BY s.step"
        );
        let conn = self.conn()?;
        let mut rows = conn
            .query(&sql, params![lead_id.to_string()])
            .await
            .map_err(db_err)?;

        let mut steps = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            steps.push(row_to_sequence_step(&row)?);
        }
        Ok(steps)
    }

    /// Pending steps scheduled at or before `now`, earliest first.
    pub async fn due_sequence_steps(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<DueSequenceStep>> {
        let sql = format!(
            "SELECT {SEQUENCE_COLUMNS}, l.org_id, l.answers_json, f.sending_number
             FROM lead_sequences s
             JOIN leads l ON l.id = s.lead_id
             JOIN funnels f ON f.id = l.funnel_id
             WHERE s.status = 'pending' AND s.scheduled_at <= ?1
             ORDER BY s.scheduled_at, s.id
             LIMIT ?2"
        );
        let conn = self.conn()?;
        let mut rows = conn
            .query(&sql, params![ts(&now), i64::from(limit)])
            .await
            .map_err(db_err)?;

        let mut due = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let record = row_to_sequence_step(&row)?;
            // One lead with corrupt answers must not hold up the batch.
            let (phone, answers_error) =
                match from_json::<Answers>(&row.get::<String>(9).map_err(db_err)?, "lead answers") {
                    Ok(answers) => (answer_text(&answers, "phone"), None),
                    Err(e) => {
                        tracing::warn!(lead_id = %record.lead_id, error = %e, "undecodable lead answers");
                        (None, Some(e.to_string()))
                    }
                };
            due.push(DueSequenceStep {
                record,
                org_id: parse_id(&row.get::<String>(8).map_err(db_err)?)?,
                phone,
                answers_error,
                sending_number: row.get::<String>(10).ok(),
            });
        }
        Ok(due)
    }

    /// Move a step from `pending` to `sending`. Returns `false` if another
    /// worker got there first or the step is no longer pending.
    pub async fn claim_sequence_step(&self, id: &Uuid) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE lead_sequences SET status = 'sending'
                 WHERE id = ?1 AND status = 'pending'",
                params![id.to_string()],
            )
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    /// Record the final outcome of a claimed step.
    pub async fn finish_sequence_step(
        &self,
        id: &Uuid,
        status: SequenceStatus,
        sent_at: DateTime<Utc>,
        detail: Option<&str>,
    ) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE lead_sequences SET status = ?1, sent_at = ?2, detail = ?3
                 WHERE id = ?4 AND status = 'sending'",
                params![status.as_str(), ts(&sent_at), detail, id.to_string()],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

const FUNNEL_COLUMNS: &str = "id, org_id, slug, name, is_active, languages_json, schema_json, \
     routing_rules_json, auto_email_enabled, auto_sms_enabled, auto_call_enabled, \
     notification_emails_json, rep_phone_number, sending_number, working_hours_start, \
     working_hours_end, sequence_enabled, sequence_json";

const LEAD_COLUMNS: &str = "id, org_id, funnel_id, language, answers_json, source_json, is_spam, \
     tags_json, priority, ai_score, ai_summary, email_status, sms_status, call_status, \
     textback_status, call_attempts, contact_status, last_contacted_at, stage, stage_updated_at, \
     deal_amount, outcome_reason, outcome_note, closed_at, automation_started_at, created_at";

const SEQUENCE_COLUMNS: &str =
    "s.id, s.lead_id, s.step, s.scheduled_at, s.sent_at, s.status, s.message, s.detail";

fn row_to_funnel(row: &libsql::Row) -> Result<Funnel> {
    Ok(Funnel {
        id: parse_id(&row.get::<String>(0).map_err(db_err)?)?,
        org_id: parse_id(&row.get::<String>(1).map_err(db_err)?)?,
        slug: row.get::<String>(2).map_err(db_err)?,
        name: row.get::<String>(3).map_err(db_err)?,
        is_active: row.get::<i64>(4).map_err(db_err)? != 0,
        languages: from_json(&row.get::<String>(5).map_err(db_err)?, "funnel languages")?,
        schema: from_json(&row.get::<String>(6).map_err(db_err)?, "funnel schema")?,
        routing_rules: from_json(&row.get::<String>(7).map_err(db_err)?, "routing rules")?,
        auto_email_enabled: row.get::<i64>(8).map_err(db_err)? != 0,
        auto_sms_enabled: row.get::<i64>(9).map_err(db_err)? != 0,
        auto_call_enabled: row.get::<i64>(10).map_err(db_err)? != 0,
        notification_emails: from_json(
            &row.get::<String>(11).map_err(db_err)?,
            "notification emails",
        )?,
        rep_phone_number: row.get::<String>(12).ok(),
        sending_number: row.get::<String>(13).ok(),
        working_hours: WorkingHours {
            start: row.get::<u32>(14).map_err(db_err)?,
            end: row.get::<u32>(15).map_err(db_err)?,
        },
        sequence_enabled: row.get::<i64>(16).map_err(db_err)? != 0,
        sequence: from_json(&row.get::<String>(17).map_err(db_err)?, "sequence config")?,
    })
}

fn row_to_lead(row: &libsql::Row) -> Result<Lead> {
    Ok(Lead {
        id: parse_id(&row.get::<String>(0).map_err(db_err)?)?,
        org_id: parse_id(&row.get::<String>(1).map_err(db_err)?)?,
        funnel_id: parse_id(&row.get::<String>(2).map_err(db_err)?)?,
        language: row.get::<String>(3).map_err(db_err)?,
        answers: from_json(&row.get::<String>(4).map_err(db_err)?, "lead answers")?,
        source: from_json(&row.get::<String>(5).map_err(db_err)?, "lead source")?,
        is_spam: row.get::<i64>(6).map_err(db_err)? != 0,
        tags: from_json(&row.get::<String>(7).map_err(db_err)?, "lead tags")?,
        priority: opt_enum(row.get::<String>(8).ok())?,
        ai_score: row
            .get::<i64>(9)
            .ok()
            .map(|v| u8::try_from(v.clamp(0, 100)).unwrap_or(0)),
        ai_summary: row.get::<String>(10).ok(),
        email_status: opt_enum(row.get::<String>(11).ok())?,
        sms_status: opt_enum(row.get::<String>(12).ok())?,
        call_status: opt_enum(row.get::<String>(13).ok())?,
        textback_status: opt_enum(row.get::<String>(14).ok())?,
        call_attempts: row.get::<u32>(15).unwrap_or(0),
        contact_status: row.get::<String>(16).ok(),
        last_contacted_at: opt_ts(row.get::<String>(17).ok())?,
        stage: row.get::<String>(18).map_err(db_err)?.parse::<Stage>()?,
        stage_updated_at: opt_ts(row.get::<String>(19).ok())?,
        deal_amount: row.get::<f64>(20).ok(),
        outcome_reason: row.get::<String>(21).ok(),
        outcome_note: row.get::<String>(22).ok(),
        closed_at: opt_ts(row.get::<String>(23).ok())?,
        automation_started_at: opt_ts(row.get::<String>(24).ok())?,
        created_at: parse_ts(&row.get::<String>(25).map_err(db_err)?)?,
    })
}

fn row_to_sequence_step(row: &libsql::Row) -> Result<SequenceStepRecord> {
    Ok(SequenceStepRecord {
        id: parse_id(&row.get::<String>(0).map_err(db_err)?)?,
        lead_id: parse_id(&row.get::<String>(1).map_err(db_err)?)?,
        step: row.get::<u32>(2).map_err(db_err)?,
        scheduled_at: parse_ts(&row.get::<String>(3).map_err(db_err)?)?,
        sent_at: opt_ts(row.get::<String>(4).ok())?,
        status: row.get::<String>(5).map_err(db_err)?.parse()?,
        message: row.get::<String>(6).map_err(db_err)?,
        detail: row.get::<String>(7).ok(),
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn db_err(e: libsql::Error) -> LeadForgeError {
    LeadForgeError::Storage(e.to_string())
}

fn stage_conflict(change: &StageChange) -> LeadForgeError {
    LeadForgeError::validation(format!(
        "lead {} is no longer in stage '{}'",
        change.lead_id, change.from_stage
    ))
}

/// Fixed-width UTC timestamp; sorts lexicographically.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LeadForgeError::Storage(format!("bad timestamp '{s}': {e}")))
}

fn opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

fn opt_enum<T: FromStr<Err = LeadForgeError>>(s: Option<String>) -> Result<Option<T>> {
    s.as_deref().map(str::parse).transpose()
}

fn parse_id<T>(s: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    s.parse()
        .map_err(|e| LeadForgeError::Storage(format!("bad id '{s}': {e}")))
}

fn flag(value: bool) -> i64 {
    i64::from(value)
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| LeadForgeError::Storage(e.to_string()))
}

/// Decode a JSON column. A malformed column is a data-integrity error.
fn from_json<T: DeserializeOwned>(s: &str, what: &str) -> Result<T> {
    serde_json::from_str(s).map_err(|e| LeadForgeError::Storage(format!("invalid {what}: {e}")))
}
