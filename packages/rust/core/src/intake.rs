//! Public form submission: validate answers against the funnel schema and
//! create the lead.

use leadforge_channels::is_valid_phone;
use leadforge_shared::{Answers, Funnel, Lead, LeadForgeError, LeadId, Result, answer_text};
use leadforge_storage::Storage;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, instrument};

/// Body of `POST /public/leads/submit`.
#[derive(Debug, Clone, Deserialize)]
pub struct LeadSubmission {
    pub funnel_slug: String,
    pub answers: Answers,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub source: Map<String, Value>,
    /// Hidden form field; bots fill it, people don't.
    #[serde(default)]
    pub honeypot: Option<String>,
}

fn default_language() -> String {
    "en".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub lead_id: LeadId,
    /// Spam leads are stored but never automated.
    pub is_spam: bool,
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

/// Check `answers` against the funnel's field schema.
pub fn validate_answers(funnel: &Funnel, answers: &Answers) -> Result<()> {
    let missing: Vec<&str> = funnel
        .schema
        .fields()
        .filter(|f| f.required && is_blank(answers.get(&f.key)))
        .map(|f| f.key.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(LeadForgeError::validation(format!(
            "missing required fields: {}",
            missing.join(", ")
        )));
    }

    for field in funnel.schema.fields() {
        if field.options.is_empty() {
            continue;
        }
        if let Some(Value::String(chosen)) = answers.get(&field.key) {
            if !chosen.is_empty() && !field.options.iter().any(|o| &o.value == chosen) {
                return Err(LeadForgeError::validation(format!(
                    "'{chosen}' is not a valid option for {}",
                    field.key
                )));
            }
        }
    }

    let phone_keys = funnel
        .schema
        .fields()
        .filter(|f| f.is_phone())
        .map(|f| f.key.as_str())
        .chain(std::iter::once("phone"));
    for key in phone_keys {
        if let Some(phone) = answer_text(answers, key) {
            if !is_valid_phone(&phone) {
                return Err(LeadForgeError::validation("invalid phone number"));
            }
        }
    }
    Ok(())
}

/// Validate a submission and store it as a new lead.
#[instrument(skip_all, fields(funnel = %submission.funnel_slug))]
pub async fn submit_lead(storage: &Storage, submission: LeadSubmission) -> Result<SubmitOutcome> {
    let funnel = storage
        .get_active_funnel_by_slug(&submission.funnel_slug)
        .await?
        .ok_or_else(|| LeadForgeError::not_found("funnel", &submission.funnel_slug))?;

    let is_spam = submission
        .honeypot
        .as_deref()
        .is_some_and(|h| !h.trim().is_empty());
    if !is_spam {
        validate_answers(&funnel, &submission.answers)?;
    }

    let mut lead = Lead::new(
        funnel.org_id,
        funnel.id,
        &submission.language,
        submission.answers,
    );
    lead.source = submission.source;
    lead.is_spam = is_spam;
    storage.insert_lead(&lead).await?;

    info!(lead_id = %lead.id, is_spam, "lead submitted");
    Ok(SubmitOutcome {
        lead_id: lead.id,
        is_spam,
    })
}
