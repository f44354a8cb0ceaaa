//! Pipeline stage transitions with outcome validation.

use chrono::{DateTime, Utc};
use leadforge_shared::{Lead, LeadForgeError, LeadId, Result, Stage, StageHistoryEvent};
use leadforge_storage::{StageChange, Storage};
use tracing::{info, instrument};

/// A requested stage change for one lead.
#[derive(Debug, Clone, Default)]
pub struct StageUpdate {
    pub to_stage: Stage,
    pub deal_amount: Option<f64>,
    pub reason: Option<String>,
    pub note: Option<String>,
    pub actor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StageUpdateResult {
    pub lead: Lead,
    /// `None` when the lead was already in the requested stage.
    pub event: Option<StageHistoryEvent>,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Check `update` against the lead's current state.
pub fn validate_stage_update(lead: &Lead, update: &StageUpdate) -> Result<()> {
    if let Some(amount) = update.deal_amount {
        if !amount.is_finite() || amount < 0.0 {
            return Err(LeadForgeError::validation("deal amount must be a non-negative number"));
        }
        if matches!(update.to_stage, Stage::New | Stage::Contacted) {
            return Err(LeadForgeError::validation(format!(
                "deal amount cannot be set on a '{}' lead",
                update.to_stage
            )));
        }
    }

    // Re-saving a closed lead does not need the outcome again.
    if lead.stage == update.to_stage {
        return Ok(());
    }

    if update.to_stage.is_terminal() && non_blank(&update.reason).is_none() {
        return Err(LeadForgeError::validation(format!(
            "an outcome reason is required to mark a lead {}",
            update.to_stage
        )));
    }
    if update.to_stage == Stage::Won {
        let amount = update.deal_amount.or(lead.deal_amount);
        if !amount.is_some_and(|a| a > 0.0) {
            return Err(LeadForgeError::validation("a deal amount is required to mark a lead won"));
        }
    }
    Ok(())
}

/// Validate and apply a stage change, appending one history event per
/// actual transition.
#[instrument(skip_all, fields(lead_id = %lead_id, to = %update.to_stage))]
pub async fn update_stage(
    storage: &Storage,
    lead_id: &LeadId,
    update: StageUpdate,
    now: DateTime<Utc>,
) -> Result<StageUpdateResult> {
    let lead = storage
        .get_lead(lead_id)
        .await?
        .ok_or_else(|| LeadForgeError::not_found("lead", lead_id))?;

    validate_stage_update(&lead, &update)?;

    let change = StageChange {
        lead_id: *lead_id,
        from_stage: lead.stage,
        to_stage: update.to_stage,
        deal_amount: update.deal_amount,
        reason: non_blank(&update.reason),
        note: non_blank(&update.note),
        actor: non_blank(&update.actor),
        at: now,
    };
    let event = storage.apply_stage_change(&change).await?;
    if event.is_some() {
        info!(from = %lead.stage, "stage changed");
    }

    let lead = storage
        .get_lead(lead_id)
        .await?
        .ok_or_else(|| LeadForgeError::not_found("lead", lead_id))?;
    Ok(StageUpdateResult { lead, event })
}
