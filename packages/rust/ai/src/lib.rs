//! AI adapters for LeadForge.
//!
//! Every adapter here has the same contract: when a Claude key is
//! configured it asks the model for a strict JSON answer, and on any failure
//! (no key, transport error, malformed answer) it returns a deterministic
//! fallback instead of an error. Results carry the mode that produced them.

pub mod assist;
pub mod client;
pub mod scoring;
pub mod strategy;

use serde::{Deserialize, Serialize};

pub use assist::{ConversionAssist, generate_conversion_assist};
pub use client::{ClaudeClient, ClaudeConfig, extract_json_object};
pub use scoring::{LeadScorer, ScoreOutcome, ScoringMode, deterministic_score};
pub use strategy::{AdCopy, AdGoal, AdStrategy, StrategyRequest, generate_ad_strategy};

/// Whether generated content came from the model or a built-in template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    Claude,
    Stub,
}
