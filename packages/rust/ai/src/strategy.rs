//! One-shot ad campaign strategy for an organization.

use std::fmt;
use std::str::FromStr;

use leadforge_shared::{ChannelError, LeadForgeError, Org};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::GenerationMode;
use crate::client::ClaudeClient;

const STRATEGY_MAX_TOKENS: u32 = 1024;
const DEFAULT_DEAL_VALUE: f64 = 5000.0;
const DEFAULT_CLOSE_RATE: f64 = 10.0;

/// Campaign objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdGoal {
    Sales,
    Traffic,
    Financing,
}

impl AdGoal {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdGoal::Sales => "sales",
            AdGoal::Traffic => "traffic",
            AdGoal::Financing => "financing",
        }
    }
}

impl fmt::Display for AdGoal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdGoal {
    type Err = LeadForgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sales" => Ok(AdGoal::Sales),
            "traffic" => Ok(AdGoal::Traffic),
            "financing" => Ok(AdGoal::Financing),
            other => Err(LeadForgeError::validation(format!(
                "unknown ad goal '{other}' (expected sales, traffic, or financing)"
            ))),
        }
    }
}

/// Inputs for [`generate_ad_strategy`].
#[derive(Debug, Clone)]
pub struct StrategyRequest<'a> {
    pub org: &'a Org,
    pub goal: AdGoal,
    pub monthly_budget: f64,
    pub notes: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdCopy {
    pub primary_text: String,
    pub headline: String,
    pub cta: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdStrategy {
    pub angles: Vec<String>,
    pub hooks: Vec<String>,
    pub offers: Vec<String>,
    pub targeting: Vec<String>,
    pub ads: Vec<AdCopy>,
    pub mode: GenerationMode,
}

#[derive(Deserialize)]
struct StrategyPayload {
    angles: Vec<String>,
    hooks: Vec<String>,
    offers: Vec<String>,
    targeting: Vec<String>,
    ads: Vec<AdCopy>,
}

/// Generate a strategy with the model, or the industry template on any failure.
pub async fn generate_ad_strategy(
    client: Option<&ClaudeClient>,
    request: &StrategyRequest<'_>,
) -> AdStrategy {
    if let Some(client) = client {
        let prompt = build_prompt(request);
        match client
            .complete_json::<StrategyPayload>(&prompt, STRATEGY_MAX_TOKENS)
            .await
            .and_then(validate_payload)
        {
            Ok(p) => {
                return AdStrategy {
                    angles: p.angles,
                    hooks: p.hooks,
                    offers: p.offers,
                    targeting: p.targeting,
                    ads: p.ads,
                    mode: GenerationMode::Claude,
                };
            }
            Err(e) => warn!(error = %e, "ad strategy generation failed, using template"),
        }
    }
    stub_strategy(request)
}

fn validate_payload(p: StrategyPayload) -> Result<StrategyPayload, ChannelError> {
    if p.ads.is_empty() || p.angles.is_empty() {
        return Err(ChannelError::InvalidResponse(
            "strategy must include at least one angle and one ad".into(),
        ));
    }
    Ok(p)
}

fn build_prompt(request: &StrategyRequest<'_>) -> String {
    let org = request.org;
    let context = json!({
        "industry": org.industry_name.as_deref().unwrap_or("General Business"),
        "avg_deal_value": org.avg_deal_value.unwrap_or(DEFAULT_DEAL_VALUE),
        "close_rate_percent": org.close_rate_percent.unwrap_or(DEFAULT_CLOSE_RATE),
        "scoring_config": org.scoring_config,
        "goal": request.goal.as_str(),
        "monthly_budget": request.monthly_budget,
        "notes": request.notes,
    });
    format!(
        "You are a performance marketing strategist. Using the business context below, \
         return a JSON object with keys \"angles\", \"hooks\", \"offers\", \"targeting\" \
         (each an array of short strings) and \"ads\" (an array of objects with \
         \"primary_text\", \"headline\", \"cta\").\n\nContext: {context}\n\n\
         Respond with ONLY valid JSON, no other text."
    )
}

/// Break-even cost per lead: what one lead is worth at the org's close rate.
fn lead_value(org: &Org) -> f64 {
    org.avg_deal_value.unwrap_or(DEFAULT_DEAL_VALUE)
        * org.close_rate_percent.unwrap_or(DEFAULT_CLOSE_RATE)
        / 100.0
}

fn stub_strategy(request: &StrategyRequest<'_>) -> AdStrategy {
    let org = request.org;
    let (product, audience) = match org.industry_slug.as_deref() {
        Some("marine_dealer") => ("boat", "boating enthusiasts within 100 miles of a marina"),
        Some("equipment_dealer") => ("equipment", "contractors and fleet managers"),
        Some("solar") => ("solar system", "homeowners with high summer power bills"),
        _ => ("service", "local homeowners and small businesses"),
    };

    let (angles, offers, cta) = match request.goal {
        AdGoal::Sales => (
            vec![
                format!("Get the right {product} without the runaround"),
                "Local experts who answer the phone".to_string(),
                "Fast quotes, no pressure".to_string(),
            ],
            vec![
                "Free same-week consultation".to_string(),
                format!("Priority scheduling for {product} inquiries this month"),
            ],
            "Get Quote",
        ),
        AdGoal::Traffic => (
            vec![
                format!("Everything to know before choosing a {product}"),
                "Real customer stories".to_string(),
            ],
            vec![format!("Free {product} buyer's guide")],
            "Learn More",
        ),
        AdGoal::Financing => (
            vec![
                format!("Own your {product} for a low monthly payment"),
                "Pre-qualify in minutes without affecting your credit".to_string(),
            ],
            vec![
                "Low-APR financing for qualified buyers".to_string(),
                "Trade-ins welcome toward your down payment".to_string(),
            ],
            "Apply Now",
        ),
    };

    let daily = request.monthly_budget / 30.0;
    let targeting = vec![
        audience.to_string(),
        format!("Daily budget around ${daily:.0}"),
        format!(
            "Keep cost per lead under ${:.0} (break-even at current close rate)",
            lead_value(org)
        ),
    ];

    let hooks = vec![
        format!("Still shopping for a {product}?"),
        "Most people overpay. Here's how to avoid it.".to_string(),
        "Answer 3 quick questions and get a same-day callback.".to_string(),
    ];

    let ads = angles
        .iter()
        .zip(hooks.iter())
        .map(|(angle, hook)| AdCopy {
            primary_text: format!("{hook} {angle}."),
            headline: angle.clone(),
            cta: cta.to_string(),
        })
        .collect();

    AdStrategy {
        angles,
        hooks,
        offers,
        targeting,
        ads,
        mode: GenerationMode::Stub,
    }
}
