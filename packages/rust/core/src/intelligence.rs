//! Close-probability and stage-leak signals computed on read.

use chrono::{DateTime, Utc};
use leadforge_shared::{Lead, Stage};
use serde::Serialize;

const SECONDS_PER_DAY: f64 = 86_400.0;
const MAX_STALE_PENALTY: i32 = 25;
const NO_CONTACT_PENALTY: i32 = 10;
const CONTACT_STALE_DAYS: f64 = 7.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeadIntelligence {
    pub close_probability: u8,
    /// `None` for terminal stages.
    pub days_in_stage: Option<f64>,
    pub is_stale: bool,
    pub stage_leak_warning: bool,
    pub stage_leak_message: Option<String>,
}

/// Inputs to [`compute_lead_intelligence`].
#[derive(Debug, Clone, Copy)]
pub struct IntelligenceInput<'a> {
    pub stage: Stage,
    pub ai_score: Option<u8>,
    pub deal_amount: Option<f64>,
    pub stage_updated_at: Option<&'a DateTime<Utc>>,
    pub last_contacted_at: Option<&'a DateTime<Utc>>,
    pub created_at: Option<&'a DateTime<Utc>>,
}

impl<'a> From<&'a Lead> for IntelligenceInput<'a> {
    fn from(lead: &'a Lead) -> Self {
        Self {
            stage: lead.stage,
            ai_score: lead.ai_score,
            deal_amount: lead.deal_amount,
            stage_updated_at: lead.stage_updated_at.as_ref(),
            last_contacted_at: lead.last_contacted_at.as_ref(),
            created_at: Some(&lead.created_at),
        }
    }
}

fn base_probability(stage: Stage) -> i32 {
    match stage {
        Stage::New => 10,
        Stage::Contacted => 25,
        Stage::Qualified => 50,
        Stage::Proposal => 70,
        Stage::Won => 100,
        Stage::Lost => 0,
    }
}

/// Median days a lead sits in each active stage.
fn stale_threshold_days(stage: Stage) -> Option<f64> {
    match stage {
        Stage::New => Some(2.0),
        Stage::Contacted => Some(5.0),
        Stage::Qualified => Some(7.0),
        Stage::Proposal => Some(10.0),
        Stage::Won | Stage::Lost => None,
    }
}

fn days_between(from: &DateTime<Utc>, now: &DateTime<Utc>) -> f64 {
    (*now - *from).num_milliseconds() as f64 / 1000.0 / SECONDS_PER_DAY
}

fn ai_adjustment(score: Option<u8>) -> i32 {
    match score {
        Some(s) if s >= 70 => 15,
        Some(s) if s >= 50 => 5,
        Some(s) if s < 30 => -10,
        _ => 0,
    }
}

/// Compute the live signals for one lead as of `now`.
pub fn compute_lead_intelligence(input: IntelligenceInput<'_>, now: DateTime<Utc>) -> LeadIntelligence {
    let stage = input.stage;
    let base = base_probability(stage);

    if stage.is_terminal() {
        return LeadIntelligence {
            close_probability: base as u8,
            days_in_stage: None,
            is_stale: false,
            stage_leak_warning: false,
            stage_leak_message: None,
        };
    }

    let days_in_stage = input
        .stage_updated_at
        .or(input.created_at)
        .map(|reference| (days_between(reference, &now) * 10.0).round() / 10.0);

    let deal_adj = if input.deal_amount.is_some_and(|a| a > 0.0) { 5 } else { 0 };

    let threshold = stale_threshold_days(stage);
    let mut is_stale = false;
    let mut stale_penalty = 0;
    if let (Some(threshold), Some(days)) = (threshold, days_in_stage) {
        if days > threshold {
            is_stale = true;
            stale_penalty = (((days - threshold) * 3.0) as i32).min(MAX_STALE_PENALTY);
        }
    }

    let contact_penalty = match input.last_contacted_at {
        None if stage != Stage::New => NO_CONTACT_PENALTY,
        Some(last) if days_between(last, &now) > CONTACT_STALE_DAYS => NO_CONTACT_PENALTY,
        _ => 0,
    };

    let mut stage_leak_message = None;
    if let (true, Some(days), Some(threshold)) = (is_stale, days_in_stage, threshold) {
        let ratio = days / threshold;
        if ratio >= 3.0 {
            stage_leak_message = Some(format!(
                "Lead stuck in '{stage}' for {days:.0} days — high risk of loss"
            ));
        } else if ratio >= 2.0 {
            stage_leak_message = Some(format!(
                "Lead in '{stage}' for {days:.0} days — needs attention"
            ));
        }
    }

    let probability =
        (base + ai_adjustment(input.ai_score) + deal_adj - stale_penalty - contact_penalty)
            .clamp(0, 100);

    LeadIntelligence {
        close_probability: probability as u8,
        days_in_stage,
        is_stale,
        stage_leak_warning: stage_leak_message.is_some(),
        stage_leak_message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn input(stage: Stage) -> IntelligenceInput<'static> {
        IntelligenceInput {
            stage,
            ai_score: None,
            deal_amount: None,
            stage_updated_at: None,
            last_contacted_at: None,
            created_at: None,
        }
    }

    #[test]
    fn terminal_stages_short_circuit() {
        let won = compute_lead_intelligence(input(Stage::Won), now());
        assert_eq!(won.close_probability, 100);
        assert_eq!(won.days_in_stage, None);
        assert!(!won.is_stale);

        let lost = compute_lead_intelligence(
            IntelligenceInput { ai_score: Some(95), ..input(Stage::Lost) },
            now(),
        );
        assert_eq!(lost.close_probability, 0);
    }

    #[test]
    fn fresh_new_lead_with_high_score() {
        let created = now() - Duration::hours(12);
        let intel = compute_lead_intelligence(
            IntelligenceInput {
                ai_score: Some(80),
                created_at: Some(&created),
                ..input(Stage::New)
            },
            now(),
        );
        // 10 + 15, no contact penalty in `new`
        assert_eq!(intel.close_probability, 25);
        assert_eq!(intel.days_in_stage, Some(0.5));
        assert!(!intel.is_stale);
        assert!(!intel.stage_leak_warning);
    }

    #[test]
    fn stale_contacted_lead_needs_attention() {
        let updated = now() - Duration::days(11);
        let contacted = now() - Duration::days(1);
        let intel = compute_lead_intelligence(
            IntelligenceInput {
                ai_score: Some(55),
                deal_amount: Some(12_000.0),
                stage_updated_at: Some(&updated),
                last_contacted_at: Some(&contacted),
                ..input(Stage::Contacted)
            },
            now(),
        );
        // 25 + 5 + 5 - min(3*6, 25)
        assert_eq!(intel.close_probability, 17);
        assert!(intel.is_stale);
        assert_eq!(
            intel.stage_leak_message.as_deref(),
            Some("Lead in 'contacted' for 11 days — needs attention")
        );
    }

    #[test]
    fn ten_days_contacted_never_called_bottoms_out() {
        let updated = now() - Duration::days(10);
        let intel = compute_lead_intelligence(
            IntelligenceInput {
                stage_updated_at: Some(&updated),
                ..input(Stage::Contacted)
            },
            now(),
        );
        // 25 - min(3*5, 25) - 10
        assert_eq!(intel.close_probability, 0);
        assert_eq!(intel.days_in_stage, Some(10.0));
        assert!(intel.is_stale);
        assert!(intel.stage_leak_warning);
        assert_eq!(
            intel.stage_leak_message.as_deref(),
            Some("Lead in 'contacted' for 10 days — needs attention")
        );
    }

    #[test]
    fn very_stale_lead_is_high_risk_and_clamped() {
        let updated = now() - Duration::days(30);
        let intel = compute_lead_intelligence(
            IntelligenceInput {
                ai_score: Some(10),
                stage_updated_at: Some(&updated),
                ..input(Stage::Qualified)
            },
            now(),
        );
        // 50 - 10 - 25 - 10
        assert_eq!(intel.close_probability, 5);
        assert!(intel.stage_leak_warning);
        assert!(intel.stage_leak_message.unwrap().ends_with("high risk of loss"));

        let updated = now() - Duration::days(40);
        let intel = compute_lead_intelligence(
            IntelligenceInput {
                ai_score: Some(10),
                stage_updated_at: Some(&updated),
                ..input(Stage::Contacted)
            },
            now(),
        );
        assert_eq!(intel.close_probability, 0);
    }

    #[test]
    fn stale_penalty_truncates() {
        // 2.5 days in `new`: excess 0.5 -> trunc(1.5) = 1
        let created = now() - Duration::hours(60);
        let intel = compute_lead_intelligence(
            IntelligenceInput { created_at: Some(&created), ..input(Stage::New) },
            now(),
        );
        assert!(intel.is_stale);
        assert_eq!(intel.close_probability, 9);
        assert!(!intel.stage_leak_warning);
    }

    #[test]
    fn old_contact_is_penalized_even_in_new() {
        let created = now() - Duration::hours(1);
        let contacted = now() - Duration::days(8);
        let intel = compute_lead_intelligence(
            IntelligenceInput {
                created_at: Some(&created),
                last_contacted_at: Some(&contacted),
                ..input(Stage::New)
            },
            now(),
        );
        assert_eq!(intel.close_probability, 0);
    }

    #[test]
    fn stage_updated_at_takes_precedence() {
        let created = now() - Duration::days(20);
        let updated = now() - Duration::days(1);
        let contacted = now();
        let intel = compute_lead_intelligence(
            IntelligenceInput {
                created_at: Some(&created),
                stage_updated_at: Some(&updated),
                last_contacted_at: Some(&contacted),
                ..input(Stage::Proposal)
            },
            now(),
        );
        assert_eq!(intel.days_in_stage, Some(1.0));
        assert_eq!(intel.close_probability, 70);
    }

    #[test]
    fn from_lead_uses_created_at() {
        let mut lead = Lead::new(
            leadforge_shared::OrgId::new(),
            leadforge_shared::FunnelId::new(),
            "en",
            Default::default(),
        );
        lead.created_at = now() - Duration::days(3);
        let intel = compute_lead_intelligence(IntelligenceInput::from(&lead), now());
        assert_eq!(intel.days_in_stage, Some(3.0));
        assert!(intel.is_stale);
    }
}
