//! Core lead automation for LeadForge.
//!
//! This crate ties storage, AI scoring, and the notification channels into
//! end-to-end workflows: form intake, the per-lead automation pipeline and
//! its dispatcher, follow-up sequences, the rep call bridge with retries,
//! stage transitions, and lead intelligence.

pub mod calls;
pub mod dispatch;
pub mod events;
pub mod intake;
pub mod intelligence;
pub mod pipeline;
pub mod routing;
pub mod sequence;
pub mod services;
pub mod stage;
pub mod telephony;

#[cfg(test)]
mod testutil;

pub use calls::CallRetryController;
pub use dispatch::AutomationDispatcher;
pub use intake::{LeadSubmission, SubmitOutcome, submit_lead, validate_answers};
pub use intelligence::{IntelligenceInput, LeadIntelligence, compute_lead_intelligence};
pub use pipeline::{AutomationPipeline, PipelineReport, RunOutcome};
pub use routing::apply_routing_rules;
pub use sequence::{SequenceWorker, WorkerReport, plan_sequence, render_template, schedule_sequence};
pub use services::Services;
pub use stage::{StageUpdate, StageUpdateResult, update_stage, validate_stage_update};
pub use telephony::{GatherForm, StatusForm, TelephonyHandler, WebhookQuery};
