//! Follow-up sequences: scheduling at intake time and the polling worker
//! that sends due steps.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use leadforge_channels::SmsSender;
use leadforge_shared::{
    Answers, Funnel, Lead, Result, SequenceConfig, SequenceStatus, SequenceStepRecord,
    answer_text,
};
use leadforge_storage::{DueSequenceStep, Storage};
use regex::Regex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("valid regex")
});

/// Replace `{{key}}` placeholders with the matching answer. Unknown keys
/// render as an empty string.
pub fn render_template(template: &str, answers: &Answers) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &regex::Captures<'_>| {
            answer_text(answers, &caps[1]).unwrap_or_default()
        })
        .into_owned()
}

/// One pending record per configured step, `delay_minutes` after `now`.
pub fn plan_sequence(lead: &Lead, config: &SequenceConfig, now: DateTime<Utc>) -> Vec<SequenceStepRecord> {
    config
        .steps
        .iter()
        .enumerate()
        .map(|(i, step)| SequenceStepRecord {
            id: Uuid::now_v7(),
            lead_id: lead.id,
            step: i as u32 + 1,
            scheduled_at: now + chrono::Duration::minutes(i64::from(step.delay_minutes)),
            sent_at: None,
            status: SequenceStatus::Pending,
            message: render_template(&step.message, &lead.answers),
            detail: None,
        })
        .collect()
}

/// Schedule the funnel's sequence for `lead`. Returns the number of steps
/// written; zero when sequencing is off or has no steps.
pub async fn schedule_sequence(
    storage: &Storage,
    lead: &Lead,
    funnel: &Funnel,
    now: DateTime<Utc>,
) -> Result<usize> {
    if !funnel.sequence_enabled || funnel.sequence.steps.is_empty() {
        return Ok(0);
    }
    let records = plan_sequence(lead, &funnel.sequence, now);
    storage.insert_sequence_steps(&records).await?;
    info!(lead_id = %lead.id, steps = records.len(), "sequence scheduled");
    Ok(records.len())
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Counts from one worker pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    /// Due records selected.
    pub due: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Records another worker claimed first.
    pub contended: usize,
}

#[derive(Clone)]
pub struct SequenceWorker {
    storage: Arc<Storage>,
    sms: SmsSender,
    batch_size: u32,
}

impl SequenceWorker {
    pub fn new(storage: Arc<Storage>, sms: SmsSender, batch_size: u32) -> Self {
        Self {
            storage,
            sms,
            batch_size: batch_size.max(1),
        }
    }

    /// Process up to one batch of steps due by `now`.
    #[instrument(skip_all)]
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<WorkerReport> {
        let due = self.storage.due_sequence_steps(now, self.batch_size).await?;
        let mut report = WorkerReport {
            due: due.len(),
            ..WorkerReport::default()
        };

        for step in due {
            let id = step.record.id;
            match self.process(step).await {
                Ok(Some(SequenceStatus::Sent)) => report.sent += 1,
                Ok(Some(SequenceStatus::Skipped)) => report.skipped += 1,
                Ok(Some(_)) => report.failed += 1,
                Ok(None) => report.contended += 1,
                Err(e) => {
                    error!(step_id = %id, error = %e, "sequence step errored");
                    report.failed += 1;
                }
            }
        }

        if report.due > 0 {
            info!(
                due = report.due,
                sent = report.sent,
                skipped = report.skipped,
                failed = report.failed,
                contended = report.contended,
                "sequence pass finished"
            );
        }
        Ok(report)
    }

    /// Claim, send, and finalize one step. `None` means someone else owns it.
    async fn process(&self, step: DueSequenceStep) -> Result<Option<SequenceStatus>> {
        let record = &step.record;
        if !self.storage.claim_sequence_step(&record.id).await? {
            debug!(step_id = %record.id, "step already claimed");
            return Ok(None);
        }

        let (status, detail) = match step.phone.as_deref() {
            None => {
                let reason = step
                    .answers_error
                    .clone()
                    .unwrap_or_else(|| "no phone number".to_string());
                (SequenceStatus::Skipped, Some(reason))
            }
            Some(phone) => {
                match self
                    .sms
                    .try_send_text(step.sending_number.as_deref(), Some(phone), &record.message)
                    .await
                {
                    Ok(receipt) => (SequenceStatus::Sent, receipt.provider_id),
                    Err(e) if e.is_missing_config() => (SequenceStatus::Skipped, Some(e.to_string())),
                    Err(e) => {
                        warn!(lead_id = %record.lead_id, step = record.step, error = %e, "sequence sms failed");
                        (SequenceStatus::Failed, Some(e.to_string()))
                    }
                }
            }
        };

        self.storage
            .finish_sequence_step(&record.id, status, Utc::now(), detail.as_deref())
            .await?;
        Ok(Some(status))
    }

    /// Poll every `interval` until `shutdown` flips to `true`.
    pub async fn run_forever(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "sequence worker started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once(Utc::now()).await {
                        error!(error = %e, "sequence pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("sequence worker stopped");
    }
}
