//! Lead quality scoring.
//!
//! [`LeadScorer::score`] never fails: any model problem (missing key,
//! transport error, malformed or out-of-range answer) falls back to
//! [`deterministic_score`], and the outcome records which path produced it.

use leadforge_shared::{Answers, ChannelError, answer_text};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::ClaudeClient;

const SCORE_MAX_TOKENS: u32 = 256;

/// Which path produced a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    Claude,
    Deterministic,
}

impl ScoringMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringMode::Claude => "claude",
            ScoringMode::Deterministic => "deterministic",
        }
    }
}

/// Score (0-100) plus a short human summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreOutcome {
    pub score: u8,
    pub summary: String,
    pub mode: ScoringMode,
}

#[derive(Deserialize)]
struct ScorePayload {
    score: Value,
    summary: Value,
}

/// Scores leads with the model when configured, deterministically otherwise.
#[derive(Debug, Clone, Default)]
pub struct LeadScorer {
    client: Option<ClaudeClient>,
}

impl LeadScorer {
    pub fn new(client: Option<ClaudeClient>) -> Self {
        Self { client }
    }

    /// A scorer that never calls the model.
    pub fn deterministic() -> Self {
        Self { client: None }
    }

    pub async fn score(&self, answers: &Answers, scoring_config: Option<&Value>) -> ScoreOutcome {
        if let Some(client) = &self.client {
            match score_with_model(client, answers, scoring_config).await {
                Ok(outcome) => return outcome,
                Err(e) => warn!(error = %e, "AI scoring failed, using deterministic fallback"),
            }
        }
        deterministic_score(answers, scoring_config)
    }
}

async fn score_with_model(
    client: &ClaudeClient,
    answers: &Answers,
    scoring_config: Option<&Value>,
) -> Result<ScoreOutcome, ChannelError> {
    let prompt = build_prompt(answers, scoring_config);
    let payload: ScorePayload = client.complete_json(&prompt, SCORE_MAX_TOKENS).await?;

    let score = payload
        .score
        .as_i64()
        .filter(|s| (0..=100).contains(s))
        .ok_or_else(|| {
            ChannelError::InvalidResponse(format!("score {} is not an integer in 0-100", payload.score))
        })?;
    let summary = payload
        .summary
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ChannelError::InvalidResponse("summary is missing or empty".into()))?;

    debug!(score, model = client.model(), "model score accepted");
    Ok(ScoreOutcome {
        score: score as u8,
        summary: summary.to_string(),
        mode: ScoringMode::Claude,
    })
}

fn build_prompt(answers: &Answers, scoring_config: Option<&Value>) -> String {
    let mut prompt = String::from(
        "You are a lead scoring assistant. Given the following lead form answers, \
         return a JSON object with exactly two keys: \"score\" (integer 0-100 indicating \
         lead quality) and \"summary\" (2-3 sentence summary of the lead).\n\n",
    );
    if let Some(config) = scoring_config.filter(|c| !c.is_null()) {
        prompt.push_str(&format!("Scoring rubric: {config}\n\n"));
    }
    prompt.push_str(&format!("Answers: {}\n\n", Value::Object(answers.clone())));
    prompt.push_str("Respond with ONLY valid JSON, no other text.");
    prompt
}

/// Rule-based score used when the model is unavailable.
///
/// Service `solar` scores 80, `buy`/`sell` 70, anything else 60. When the org
/// has a scoring configuration, `timeframe` shifts the score: `immediate` +10,
/// `browsing`/`planning` -10. The result is clamped to 0-100.
pub fn deterministic_score(answers: &Answers, scoring_config: Option<&Value>) -> ScoreOutcome {
    let service = answer_text(answers, "service");

    let mut score: i32 = match service.as_deref() {
        Some("solar") => 80,
        Some("buy") | Some("sell") => 70,
        _ => 60,
    };

    if scoring_config.is_some_and(|c| !c.is_null()) {
        match answer_text(answers, "timeframe").as_deref() {
            Some("immediate") => score += 10,
            Some("browsing") | Some("planning") => score -= 10,
            _ => {}
        }
    }

    let name = answer_text(answers, "name").unwrap_or_else(|| "Unknown".into());
    let zip = answer_text(answers, "zip_code").unwrap_or_else(|| "N/A".into());
    let phone = answer_text(answers, "phone").unwrap_or_else(|| "N/A".into());
    let service = service.unwrap_or_else(|| "unknown".into());

    ScoreOutcome {
        score: score.clamp(0, 100) as u8,
        summary: format!(
            "Lead from {name} in zip {zip}. Interested in: {service}. Contact phone: {phone}."
        ),
        mode: ScoringMode::Deterministic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClaudeConfig;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn answers(value: Value) -> Answers {
        serde_json::from_value(value).expect("answers object")
    }

    async fn scorer_answering(text: &str) -> (MockServer, LeadScorer) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": text}]
            })))
            .mount(&server)
            .await;
        let client =
            ClaudeClient::new(ClaudeConfig::new("k").with_endpoint(server.uri())).unwrap();
        (server, LeadScorer::new(Some(client)))
    }

    #[test]
    fn service_base_scores() {
        let solar = deterministic_score(&answers(json!({"service": "solar"})), None);
        assert_eq!(solar.score, 80);
        assert_eq!(solar.mode, ScoringMode::Deterministic);
        assert_eq!(deterministic_score(&answers(json!({"service": "buy"})), None).score, 70);
        assert_eq!(deterministic_score(&answers(json!({"service": "sell"})), None).score, 70);
        assert_eq!(deterministic_score(&answers(json!({"service": "roofing"})), None).score, 60);
        assert_eq!(deterministic_score(&Answers::new(), None).score, 60);
    }

    #[test]
    fn timeframe_only_counts_with_scoring_config() {
        let hot = answers(json!({"service": "solar", "timeframe": "immediate"}));
        let cold = answers(json!({"service": "other", "timeframe": "browsing"}));
        let rubric = json!({"rubric": "immediate buyers first"});

        assert_eq!(deterministic_score(&hot, None).score, 80);
        assert_eq!(deterministic_score(&hot, Some(&rubric)).score, 90);
        assert_eq!(deterministic_score(&cold, Some(&rubric)).score, 50);
        assert_eq!(
            deterministic_score(&answers(json!({"timeframe": "planning"})), Some(&rubric)).score,
            50
        );
    }

    #[test]
    fn malformed_scoring_config_never_panics() {
        let a = answers(json!({"service": 42, "timeframe": ["immediate"], "name": null}));
        for config in [json!(null), json!("text"), json!([1, 2]), json!({"rubric": {}})] {
            let outcome = deterministic_score(&a, Some(&config));
            assert!(outcome.score <= 100);
        }
    }

    #[test]
    fn summary_uses_defaults() {
        let outcome = deterministic_score(&Answers::new(), None);
        assert_eq!(
            outcome.summary,
            "Lead from Unknown in zip N/A. Interested in: unknown. Contact phone: N/A."
        );

        let full = deterministic_score(
            &answers(json!({"name": "Jane", "zip_code": "90210", "service": "solar", "phone": "5551234567"})),
            None,
        );
        assert_eq!(
            full.summary,
            "Lead from Jane in zip 90210. Interested in: solar. Contact phone: 5551234567."
        );
    }

    #[tokio::test]
    async fn uses_model_answer_when_valid() {
        let (_server, scorer) =
            scorer_answering("{\"score\": 91, \"summary\": \"Ready to buy this week.\"}").await;
        let outcome = scorer.score(&answers(json!({"service": "solar"})), None).await;
        assert_eq!(outcome.score, 91);
        assert_eq!(outcome.summary, "Ready to buy this week.");
        assert_eq!(outcome.mode, ScoringMode::Claude);
    }

    #[tokio::test]
    async fn out_of_range_score_falls_back() {
        let (_server, scorer) = scorer_answering("{\"score\": 140, \"summary\": \"x\"}").await;
        let outcome = scorer.score(&answers(json!({"service": "buy"})), None).await;
        assert_eq!(outcome.score, 70);
        assert_eq!(outcome.mode, ScoringMode::Deterministic);
    }

    #[tokio::test]
    async fn non_json_answer_falls_back() {
        let (_server, scorer) = scorer_answering("I think this lead is great!").await;
        let outcome = scorer.score(&answers(json!({"service": "solar"})), None).await;
        assert_eq!(outcome.score, 80);
        assert_eq!(outcome.mode, ScoringMode::Deterministic);
    }

    #[tokio::test]
    async fn transport_failure_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let client =
            ClaudeClient::new(ClaudeConfig::new("k").with_endpoint(server.uri())).unwrap();
        let outcome = LeadScorer::new(Some(client))
            .score(&answers(json!({"service": "sell"})), None)
            .await;
        assert_eq!(outcome.score, 70);
        assert_eq!(outcome.mode, ScoringMode::Deterministic);
    }

    #[test]
    fn prompt_embeds_rubric_only_when_present() {
        let a = answers(json!({"service": "solar"}));
        assert!(!build_prompt(&a, None).contains("rubric"));
        assert!(build_prompt(&a, Some(&json!({"rubric": "boats"}))).contains("boats"));
    }
}
