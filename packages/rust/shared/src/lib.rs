//! Shared types, error model, and configuration for LeadForge.
//!
//! This crate is the foundation depended on by all other LeadForge crates.
//! It provides:
//! - [`LeadForgeError`] and [`ChannelError`], the unified error types
//! - Domain types ([`Lead`], [`Funnel`], [`Org`], [`Stage`], ...)
//! - Configuration ([`AppConfig`], config loading, secret resolution)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AiConfig, AppConfig, CallRetryConfig, DEV_WEBHOOK_SECRET, DatabaseConfig,
    SequenceWorkerConfig, ServerConfig, SmtpConfig, TwilioConfig, config_dir, config_file_path,
    init_config, load_config, load_config_from, secret_from_env, twilio_credentials,
    validate_config, webhook_secret,
};
pub use error::{ChannelError, LeadForgeError, Result};
pub use types::{
    Answers, AutomationEvent, AutomationEventType, CallStatus, DeliveryStatus, FieldOption,
    Funnel, FunnelField, FunnelId, FunnelSchema, FunnelStep, Lead, LeadId, Localized, Org, OrgId,
    Priority, RoutingRule, RoutingRules, RuleAction, RuleCondition, SequenceConfig,
    SequenceStatus, SequenceStep, SequenceStepRecord, Stage, StageHistoryEvent, WorkingHours,
    answer_text,
};
