//! Core domain types for LeadForge: organizations, funnels, leads, and the
//! records the automation pipeline appends as it works a lead.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::LeadForgeError;

/// Submitted form answers, keyed by field key.
pub type Answers = Map<String, Value>;

/// Read an answer as trimmed text. Numbers and booleans are stringified;
/// empty strings, nulls, arrays, and objects count as absent.
pub fn answer_text(answers: &Answers, key: &str) -> Option<String> {
    match answers.get(key)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new time-sortable identifier.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(
    /// Organization (tenant) identifier.
    OrgId
);
uuid_id!(
    /// Funnel identifier.
    FunnelId
);
uuid_id!(
    /// Lead identifier.
    LeadId
);

// ---------------------------------------------------------------------------
// String-backed enums
// ---------------------------------------------------------------------------

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $text)] $variant),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The stored/wire representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = LeadForgeError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(LeadForgeError::parse(format!(
                        "unknown {} '{other}'",
                        stringify!($name)
                    ))),
                }
            }
        }
    };
}

string_enum!(
    /// Sales pipeline stage. `Won` and `Lost` are terminal.
    Stage {
        New => "new",
        Contacted => "contacted",
        Qualified => "qualified",
        Proposal => "proposal",
        Won => "won",
        Lost => "lost",
    }
);

impl Stage {
    /// Whether entering this stage closes the lead.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Won | Stage::Lost)
    }
}

impl Default for Stage {
    fn default() -> Self {
        Stage::New
    }
}

string_enum!(
    /// Lead priority assigned by routing rules.
    Priority {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
);

string_enum!(
    /// Email/SMS delivery status. `Delivered`/`Undelivered` only arrive via
    /// provider status callbacks. `Sending` marks a claimed text-back that
    /// has not finished yet.
    DeliveryStatus {
        Sending => "sending",
        Sent => "sent",
        Delivered => "delivered",
        Undelivered => "undelivered",
        Failed => "failed",
        SkippedMissingConfig => "skipped_missing_config",
    }
);

string_enum!(
    /// Rep call-bridge status.
    CallStatus {
        Initiated => "initiated",
        SkippedMissingConfig => "skipped_missing_config",
        SkippedOutsideHours => "skipped_outside_hours",
        Failed => "failed",
        Retrying => "retrying",
        Completed => "completed",
        Busy => "busy",
        NoAnswer => "no_answer",
        Canceled => "canceled",
        RepDeclined => "rep_declined",
    }
);

impl CallStatus {
    /// Terminal outcomes that qualify for an automatic retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CallStatus::Failed | CallStatus::NoAnswer | CallStatus::Busy)
    }

    /// Outcomes where the rep never spoke to anyone and the lead gets a text-back.
    pub fn is_missed(&self) -> bool {
        matches!(self, CallStatus::NoAnswer | CallStatus::Busy)
    }
}

string_enum!(
    /// Lifecycle of a scheduled follow-up message. Only `Pending` records are
    /// ever picked up; `Sending` is the claim marker.
    SequenceStatus {
        Pending => "pending",
        Sending => "sending",
        Sent => "sent",
        Skipped => "skipped",
        Failed => "failed",
    }
);

string_enum!(
    /// Kind of automation audit event.
    AutomationEventType {
        Routed => "routed",
        AiScored => "ai_scored",
        EmailSent => "email_sent",
        SmsSent => "sms_sent",
        CallStarted => "call_started",
        SequenceScheduled => "sequence_scheduled",
        CallRetried => "call_retried",
        TextbackSent => "textback_sent",
    }
);

// ---------------------------------------------------------------------------
// Organization
// ---------------------------------------------------------------------------

/// A tenant. Industry data feeds AI prompts and deterministic fallbacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Org {
    pub id: OrgId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry_slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_deal_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_rate_percent: Option<f64>,
    /// Free-form scoring rubric handed to the AI scorer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoring_config: Option<Value>,
}

// ---------------------------------------------------------------------------
// Funnel
// ---------------------------------------------------------------------------

/// Localized text keyed by language code (`{"en": "...", "es": "..."}`).
pub type Localized = BTreeMap<String, String>;

/// Ordered steps of typed fields a submission is validated against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunnelSchema {
    #[serde(default)]
    pub steps: Vec<FunnelStep>,
}

impl FunnelSchema {
    /// All fields across all steps, in display order.
    pub fn fields(&self) -> impl Iterator<Item = &FunnelField> {
        self.steps.iter().flat_map(|s| s.fields.iter())
    }
}

/// One page of the funnel form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelStep {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: Localized,
    #[serde(default)]
    pub fields: Vec<FunnelField>,
}

/// A single form field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelField {
    pub key: String,
    /// Input type (`text`, `tel`, `select`, `email`, ...).
    #[serde(rename = "type", default = "default_field_type")]
    pub kind: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub label: Localized,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<FieldOption>,
}

fn default_field_type() -> String {
    "text".into()
}

impl FunnelField {
    pub fn is_phone(&self) -> bool {
        self.kind == "tel"
    }
}

/// A selectable option of a `select` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldOption {
    pub value: String,
    #[serde(default)]
    pub label: Localized,
}

/// Ordered routing rules. The first matching rule that sets a priority wins
/// the priority; every matching rule contributes its tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingRules {
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub when: RuleCondition,
    #[serde(default)]
    pub then: RuleAction,
}

/// Matches when `answers[field] == equals`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: String,
    pub equals: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

/// Delayed follow-up messages sent after a lead arrives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SequenceConfig {
    #[serde(default)]
    pub steps: Vec<SequenceStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceStep {
    pub delay_minutes: u32,
    /// Message template; `{{key}}` is replaced with the matching answer.
    pub message: String,
}

/// Hours (0-23, local server time) during which reps may be called.
/// `start > end` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    pub start: u32,
    pub end: u32,
}

impl Default for WorkingHours {
    fn default() -> Self {
        Self { start: 9, end: 19 }
    }
}

impl WorkingHours {
    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            self.start <= hour && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

/// A lead-capture form plus its automation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Funnel {
    pub id: FunnelId,
    pub org_id: OrgId,
    pub slug: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub schema: FunnelSchema,
    #[serde(default)]
    pub routing_rules: RoutingRules,
    #[serde(default)]
    pub auto_email_enabled: bool,
    #[serde(default)]
    pub auto_sms_enabled: bool,
    #[serde(default)]
    pub auto_call_enabled: bool,
    #[serde(default)]
    pub notification_emails: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rep_phone_number: Option<String>,
    /// Provider number messages and calls are sent from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sending_number: Option<String>,
    #[serde(default)]
    pub working_hours: WorkingHours,
    #[serde(default)]
    pub sequence_enabled: bool,
    #[serde(default)]
    pub sequence: SequenceConfig,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Lead
// ---------------------------------------------------------------------------

/// A captured submission and everything automation learned about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub org_id: OrgId,
    pub funnel_id: FunnelId,
    pub language: String,
    pub answers: Answers,
    #[serde(default)]
    pub source: Map<String, Value>,
    #[serde(default)]
    pub is_spam: bool,

    pub tags: Vec<String>,
    pub priority: Option<Priority>,
    pub ai_score: Option<u8>,
    pub ai_summary: Option<String>,

    pub email_status: Option<DeliveryStatus>,
    pub sms_status: Option<DeliveryStatus>,
    pub call_status: Option<CallStatus>,
    pub textback_status: Option<DeliveryStatus>,
    pub call_attempts: u32,
    pub contact_status: Option<String>,
    pub last_contacted_at: Option<DateTime<Utc>>,

    pub stage: Stage,
    pub stage_updated_at: Option<DateTime<Utc>>,
    pub deal_amount: Option<f64>,
    pub outcome_reason: Option<String>,
    pub outcome_note: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,

    pub automation_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Lead {
    /// A fresh, unprocessed lead in the `new` stage.
    pub fn new(org_id: OrgId, funnel_id: FunnelId, language: &str, answers: Answers) -> Self {
        Self {
            id: LeadId::new(),
            org_id,
            funnel_id,
            language: language.to_string(),
            answers,
            source: Map::new(),
            is_spam: false,
            tags: Vec::new(),
            priority: None,
            ai_score: None,
            ai_summary: None,
            email_status: None,
            sms_status: None,
            call_status: None,
            textback_status: None,
            call_attempts: 0,
            contact_status: None,
            last_contacted_at: None,
            stage: Stage::New,
            stage_updated_at: None,
            deal_amount: None,
            outcome_reason: None,
            outcome_note: None,
            closed_at: None,
            automation_started_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn answer(&self, key: &str) -> Option<String> {
        answer_text(&self.answers, key)
    }

    pub fn name(&self) -> Option<String> {
        self.answer("name")
    }

    pub fn phone(&self) -> Option<String> {
        self.answer("phone")
    }

    pub fn service(&self) -> Option<String> {
        self.answer("service")
    }
}

// ---------------------------------------------------------------------------
// Audit records
// ---------------------------------------------------------------------------

/// Append-only record of one stage change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageHistoryEvent {
    pub id: Uuid,
    pub lead_id: LeadId,
    pub from_stage: Option<Stage>,
    pub to_stage: Stage,
    pub actor: Option<String>,
    pub reason: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Append-only automation audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationEvent {
    pub id: Uuid,
    pub org_id: OrgId,
    pub lead_id: LeadId,
    pub event_type: AutomationEventType,
    /// Outcome text: `success`, `failed`, or a channel status like `skipped_missing_config`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// One scheduled follow-up message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceStepRecord {
    pub id: Uuid,
    pub lead_id: LeadId,
    /// 1-based position in the funnel's sequence.
    pub step: u32,
    pub scheduled_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub status: SequenceStatus,
    /// Resolved message text.
    pub message: String,
    pub detail: Option<String>,
}
