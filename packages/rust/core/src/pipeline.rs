//! Per-lead automation: load → claim → route → score → email → SMS →
//! voice → sequence, then one sequence worker pass.
//!
//! Every stage is isolated: a failure is logged, persisted as a status where
//! the stage has one, and written to the automation log. Nothing escapes
//! [`AutomationPipeline::run`].

use std::sync::Arc;

use chrono::Utc;
use leadforge_ai::{LeadScorer, ScoringMode};
use leadforge_channels::{
    CallOutcome, EmailSender, SmsSender, VoiceBridge, call_status, delivery_status,
};
use leadforge_shared::{
    AutomationEventType, CallStatus, DeliveryStatus, Funnel, Lead, LeadId, Org, Priority, Result,
};
use leadforge_storage::Storage;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::events::record_event;
use crate::routing::apply_routing_rules;
use crate::sequence::{SequenceWorker, WorkerReport, schedule_sequence};

/// How far a run got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    LeadNotFound,
    FunnelNotFound,
    /// Spam leads are never automated.
    Spam,
    /// Another run already claimed this lead.
    AlreadyClaimed,
    /// Loading or claiming hit a storage error.
    Aborted,
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub lead_id: LeadId,
    pub outcome: RunOutcome,
    pub tags: Vec<String>,
    pub priority: Option<Priority>,
    pub score: Option<u8>,
    pub scoring_mode: Option<ScoringMode>,
    pub email: Option<DeliveryStatus>,
    pub sms: Option<DeliveryStatus>,
    pub call: Option<CallStatus>,
    /// Steps written; `None` when sequencing is off or scheduling failed.
    pub sequence_steps: Option<usize>,
    pub worker: Option<WorkerReport>,
}

impl PipelineReport {
    fn new(lead_id: LeadId, outcome: RunOutcome) -> Self {
        Self {
            lead_id,
            outcome,
            tags: Vec::new(),
            priority: None,
            score: None,
            scoring_mode: None,
            email: None,
            sms: None,
            call: None,
            sequence_steps: None,
            worker: None,
        }
    }
}

/// The automation orchestrator. Cheap to share behind an `Arc`.
pub struct AutomationPipeline {
    storage: Arc<Storage>,
    scorer: LeadScorer,
    email: EmailSender,
    sms: SmsSender,
    voice: VoiceBridge,
    worker: SequenceWorker,
}

impl AutomationPipeline {
    pub fn new(
        storage: Arc<Storage>,
        scorer: LeadScorer,
        email: EmailSender,
        sms: SmsSender,
        voice: VoiceBridge,
        worker: SequenceWorker,
    ) -> Self {
        Self {
            storage,
            scorer,
            email,
            sms,
            voice,
            worker,
        }
    }

    /// Run the whole pipeline for one lead.
    #[instrument(skip_all, fields(lead_id = %lead_id))]
    pub async fn run(&self, lead_id: LeadId) -> PipelineReport {
        // --- Phase 1: Load and claim ---
        let (mut lead, funnel, org) = match self.load_and_claim(&lead_id).await {
            Ok(Ok(loaded)) => loaded,
            Ok(Err(outcome)) => {
                info!(?outcome, "automation not run");
                return PipelineReport::new(lead_id, outcome);
            }
            Err(e) => {
                error!(error = %e, "automation aborted while loading lead");
                return PipelineReport::new(lead_id, RunOutcome::Aborted);
            }
        };
        let mut report = PipelineReport::new(lead_id, RunOutcome::Completed);
        info!(funnel = %funnel.slug, "automation started");

        // --- Phase 2: Routing ---
        self.route(&mut lead, &funnel, &mut report).await;

        // --- Phase 3: AI scoring ---
        self.score(&mut lead, org.as_ref(), &mut report).await;

        // --- Phase 4: Email ---
        if funnel.auto_email_enabled {
            report.email = Some(self.notify_email(&lead, &funnel).await);
        }

        // --- Phase 5: SMS ---
        if funnel.auto_sms_enabled {
            report.sms = Some(self.notify_sms(&lead, &funnel).await);
        }

        // --- Phase 6: Voice bridge ---
        if funnel.auto_call_enabled {
            report.call = Some(self.call_rep(&lead, &funnel).await);
        }

        // --- Phase 7: Sequence scheduling ---
        if funnel.sequence_enabled {
            report.sequence_steps = self.schedule(&lead, &funnel).await;
        }

        // --- Phase 8: Flush due sequence steps ---
        match self.worker.run_once(Utc::now()).await {
            Ok(worker) => report.worker = Some(worker),
            Err(e) => error!(error = %e, "sequence flush failed"),
        }

        info!(
            score = ?report.score,
            email = ?report.email,
            sms = ?report.sms,
            call = ?report.call,
            "automation finished"
        );
        report
    }

    async fn load_and_claim(
        &self,
        lead_id: &LeadId,
    ) -> Result<std::result::Result<(Lead, Funnel, Option<Org>), RunOutcome>> {
        let Some(lead) = self.storage.get_lead(lead_id).await? else {
            error!("lead not found");
            return Ok(Err(RunOutcome::LeadNotFound));
        };
        if lead.is_spam {
            return Ok(Err(RunOutcome::Spam));
        }
        let Some(funnel) = self.storage.get_funnel(&lead.funnel_id).await? else {
            error!(funnel_id = %lead.funnel_id, "funnel not found");
            return Ok(Err(RunOutcome::FunnelNotFound));
        };
        let org = match self.storage.get_org(&lead.org_id).await {
            Ok(org) => org,
            Err(e) => {
                warn!(error = %e, "org lookup failed, scoring without rubric");
                None
            }
        };
        if !self.storage.claim_automation(lead_id, Utc::now()).await? {
            return Ok(Err(RunOutcome::AlreadyClaimed));
        }
        Ok(Ok((lead, funnel, org)))
    }

    async fn route(&self, lead: &mut Lead, funnel: &Funnel, report: &mut PipelineReport) {
        let (tags, priority) = apply_routing_rules(&funnel.routing_rules, &lead.answers);
        let detail = json!({"tags": tags, "priority": priority});
        let status = match self.storage.set_routing(&lead.id, &tags, priority).await {
            Ok(()) => "success",
            Err(e) => {
                error!(error = %e, "failed to persist routing");
                "failed"
            }
        };
        record_event(&self.storage, lead, AutomationEventType::Routed, status, Some(detail)).await;

        lead.tags = tags.clone();
        lead.priority = priority;
        report.tags = tags;
        report.priority = priority;
    }

    async fn score(&self, lead: &mut Lead, org: Option<&Org>, report: &mut PipelineReport) {
        let rubric = org.and_then(|o| o.scoring_config.as_ref());
        let outcome = self.scorer.score(&lead.answers, rubric).await;
        if outcome.mode == ScoringMode::Deterministic {
            info!("using deterministic scoring");
        }
        let status = match self
            .storage
            .set_ai_score(&lead.id, outcome.score, &outcome.summary)
            .await
        {
            Ok(()) => "success",
            Err(e) => {
                error!(error = %e, "failed to persist AI score");
                "failed"
            }
        };
        record_event(
            &self.storage,
            lead,
            AutomationEventType::AiScored,
            status,
            Some(json!({"score": outcome.score, "mode": outcome.mode.as_str()})),
        )
        .await;

        lead.ai_score = Some(outcome.score);
        lead.ai_summary = Some(outcome.summary);
        report.score = Some(outcome.score);
        report.scoring_mode = Some(outcome.mode);
    }

    async fn notify_email(&self, lead: &Lead, funnel: &Funnel) -> DeliveryStatus {
        let result = self.email.try_send_new_lead(lead, funnel).await;
        let status = delivery_status(&result);
        let detail = match &result {
            Err(e) => Some(json!({"error": e.to_string()})),
            Ok(_) => None,
        };
        if let Err(e) = self.storage.set_email_status(&lead.id, status).await {
            error!(error = %e, "failed to persist email status");
        }
        record_event(&self.storage, lead, AutomationEventType::EmailSent, status.as_str(), detail).await;
        status
    }

    async fn notify_sms(&self, lead: &Lead, funnel: &Funnel) -> DeliveryStatus {
        let result = self.sms.try_send_lead_ack(lead, funnel).await;
        let status = delivery_status(&result);
        let detail = match &result {
            Ok(receipt) => receipt.provider_id.as_ref().map(|sid| json!({"sid": sid})),
            Err(e) => Some(json!({"error": e.to_string()})),
        };
        if let Err(e) = self.storage.set_sms_status(&lead.id, status).await {
            error!(error = %e, "failed to persist sms status");
        }
        record_event(&self.storage, lead, AutomationEventType::SmsSent, status.as_str(), detail).await;
        status
    }

    async fn call_rep(&self, lead: &Lead, funnel: &Funnel) -> CallStatus {
        let result = self.voice.try_start_rep_call(lead, funnel).await;
        let status = call_status(&result);
        let detail = match &result {
            Ok(CallOutcome::Initiated { sid }) => Some(json!({"sid": sid})),
            Ok(CallOutcome::OutsideHours) => None,
            Err(e) if e.is_missing_config() => Some(json!({"reason": e.to_string()})),
            Err(e) => {
                warn!(error = %e, "rep call failed");
                Some(json!({"error": e.to_string()}))
            }
        };
        if let Err(e) = self.storage.set_call_status(&lead.id, status).await {
            error!(error = %e, "failed to persist call status");
        }
        record_event(&self.storage, lead, AutomationEventType::CallStarted, status.as_str(), detail).await;
        status
    }

    async fn schedule(&self, lead: &Lead, funnel: &Funnel) -> Option<usize> {
        match schedule_sequence(&self.storage, lead, funnel, Utc::now()).await {
            Ok(steps) => {
                record_event(
                    &self.storage,
                    lead,
                    AutomationEventType::SequenceScheduled,
                    "success",
                    Some(json!({"steps": steps})),
                )
                .await;
                Some(steps)
            }
            Err(e) => {
                error!(error = %e, "sequence scheduling failed");
                record_event(
                    &self.storage,
                    lead,
                    AutomationEventType::SequenceScheduled,
                    "failed",
                    Some(json!({"error": e.to_string()})),
                )
                .await;
                None
            }
        }
    }
}
