//! Per-lead follow-up drafts for the rep working the lead.

use leadforge_shared::{ChannelError, Lead, Stage};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::GenerationMode;
use crate::client::ClaudeClient;

const ASSIST_MAX_TOKENS: u32 = 768;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionAssist {
    pub next_action: String,
    pub sms_draft: String,
    pub email_subject: String,
    pub email_body: String,
    pub call_talking_points: Vec<String>,
    pub mode: GenerationMode,
}

#[derive(Deserialize)]
struct AssistPayload {
    next_action: String,
    sms_draft: String,
    email_subject: String,
    email_body: String,
    call_talking_points: Vec<String>,
}

/// Draft the next touch for `lead`. Falls back to a stage template on any
/// model failure.
pub async fn generate_conversion_assist(
    client: Option<&ClaudeClient>,
    lead: &Lead,
    industry: Option<&str>,
) -> ConversionAssist {
    if let Some(client) = client {
        match client
            .complete_json::<AssistPayload>(&build_prompt(lead, industry), ASSIST_MAX_TOKENS)
            .await
            .and_then(|p| {
                if p.next_action.trim().is_empty() || p.sms_draft.trim().is_empty() {
                    Err(ChannelError::InvalidResponse("empty assist fields".into()))
                } else {
                    Ok(p)
                }
            }) {
            Ok(p) => {
                return ConversionAssist {
                    next_action: p.next_action,
                    sms_draft: p.sms_draft,
                    email_subject: p.email_subject,
                    email_body: p.email_body,
                    call_talking_points: p.call_talking_points,
                    mode: GenerationMode::Claude,
                };
            }
            Err(e) => warn!(lead_id = %lead.id, error = %e, "conversion assist failed, using template"),
        }
    }
    stub_assist(lead, industry)
}

fn build_prompt(lead: &Lead, industry: Option<&str>) -> String {
    let context = json!({
        "industry": industry.unwrap_or("generic"),
        "stage": lead.stage.as_str(),
        "answers": Value::Object(lead.answers.clone()),
        "ai_summary": lead.ai_summary,
        "priority": lead.priority.map(|p| p.as_str()),
        "last_contacted_at": lead.last_contacted_at,
    });
    format!(
        "You are a sales coach. For the lead below, return a JSON object with keys \
         \"next_action\", \"sms_draft\" (under 160 characters), \"email_subject\", \
         \"email_body\", and \"call_talking_points\" (array of strings).\n\n\
         Lead: {context}\n\nRespond with ONLY valid JSON, no other text."
    )
}

fn stub_assist(lead: &Lead, industry: Option<&str>) -> ConversionAssist {
    let name = lead.name().unwrap_or_else(|| "there".into());
    let product = match industry {
        Some("marine_dealer") => "boat",
        Some("equipment_dealer") => "equipment",
        _ => lead.service().map_or("project", |_| "request"),
    };
    let service = lead.service().unwrap_or_else(|| product.to_string());

    let (next_action, sms_draft, points): (&str, String, Vec<String>) = match lead.stage {
        Stage::New => (
            "Call within 5 minutes; if no answer, send the SMS draft.",
            format!("Hi {name}, thanks for your {product} inquiry! When is a good time for a quick call?"),
            vec![
                format!("Confirm what they need: {service}"),
                "Ask about timeframe and budget".into(),
                "Book a consultation before hanging up".into(),
            ],
        ),
        Stage::Contacted => (
            "Follow up to qualify budget and timeframe.",
            format!("Hi {name}, following up on your {product} request. Do you have a few minutes today?"),
            vec![
                "Recap the first conversation".into(),
                "Qualify decision maker, budget, and timing".into(),
            ],
        ),
        Stage::Qualified => (
            "Send a tailored proposal and schedule a review call.",
            format!("Hi {name}, I'm putting together options for your {product}. Can we review them tomorrow?"),
            vec![
                "Present two or three options".into(),
                "Address financing questions".into(),
                "Agree on a decision date".into(),
            ],
        ),
        Stage::Proposal => (
            "Check in on the proposal and handle objections.",
            format!("Hi {name}, any questions on the {product} proposal? Happy to adjust anything."),
            vec![
                "Ask what is holding the decision".into(),
                "Offer a time-limited incentive if appropriate".into(),
            ],
        ),
        Stage::Won => (
            "Thank the customer and ask for a referral.",
            format!("Thanks again {name}! If you know anyone else looking for a {product}, we'd love an intro."),
            vec!["Confirm delivery/installation details".into(), "Ask for a review".into()],
        ),
        Stage::Lost => (
            "Add to a 90-day re-engagement list.",
            format!("Hi {name}, just checking in. If your {product} plans change, we're here to help."),
            vec!["Ask what would have changed the outcome".into()],
        ),
    };

    ConversionAssist {
        next_action: next_action.to_string(),
        email_subject: format!("Your {product} inquiry"),
        email_body: format!(
            "Hi {name},\n\n{sms_draft}\n\nYou can reply to this email or call us any time.\n"
        ),
        sms_draft,
        call_talking_points: points,
        mode: GenerationMode::Stub,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadforge_shared::{FunnelId, OrgId};
    use serde_json::json;

    fn lead(stage: Stage) -> Lead {
        let answers = serde_json::from_value(json!({"name": "Sam", "service": "solar"})).unwrap();
        let mut lead = Lead::new(OrgId::new(), FunnelId::new(), "en", answers);
        lead.stage = stage;
        lead
    }

    #[tokio::test]
    async fn stub_varies_by_stage() {
        let new = generate_conversion_assist(None, &lead(Stage::New), None).await;
        let proposal = generate_conversion_assist(None, &lead(Stage::Proposal), None).await;
        assert_eq!(new.mode, GenerationMode::Stub);
        assert_ne!(new.next_action, proposal.next_action);
        assert!(new.sms_draft.starts_with("Hi Sam"));
    }

    #[test]
    fn stub_varies_by_industry() {
        let marine = stub_assist(&lead(Stage::Contacted), Some("marine_dealer"));
        let equipment = stub_assist(&lead(Stage::Contacted), Some("equipment_dealer"));
        assert!(marine.sms_draft.contains("boat"));
        assert!(equipment.sms_draft.contains("equipment"));
        assert_eq!(marine.email_subject, "Your boat inquiry");
    }

    #[test]
    fn every_stage_has_talking_points() {
        for stage in Stage::ALL {
            let assist = stub_assist(&lead(*stage), None);
            assert!(!assist.call_talking_points.is_empty(), "stage {stage}");
            assert!(!assist.next_action.is_empty());
        }
    }
}
