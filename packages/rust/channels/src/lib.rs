//! Outbound notification channels: SMTP email, Twilio SMS, and the Twilio
//! rep call bridge, plus the TwiML the bridge webhooks answer with.
//!
//! Each sender has a `try_*` form returning `Result<_, ChannelError>` and a
//! status form that never fails. A missing credential, destination, or
//! sender identity is reported as [`ChannelError::MissingConfig`] without
//! any network call.

pub mod email;
pub mod phone;
pub mod sms;
pub mod twilio;
pub mod twiml;
pub mod voice;

use leadforge_shared::{ChannelError, DeliveryStatus};

pub use email::{EmailSender, SmtpSettings, new_lead_message};
pub use phone::{is_valid_phone, normalize_phone};
pub use sms::{SmsSender, acknowledgement_body};
pub use twilio::{CallbackKind, TwilioClient, TwilioCredentials, WebhookUrls};
pub use voice::{CallOutcome, VoiceBridge, call_status};

/// Proof of a successful hand-off to a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Receipt {
    /// Provider message/call identifier, when the provider returns one.
    pub provider_id: Option<String>,
}

impl Receipt {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            provider_id: Some(id.into()),
        }
    }
}

/// Collapse a send result into the persisted delivery status.
pub fn delivery_status<T>(result: &Result<T, ChannelError>) -> DeliveryStatus {
    match result {
        Ok(_) => DeliveryStatus::Sent,
        Err(e) if e.is_missing_config() => DeliveryStatus::SkippedMissingConfig,
        Err(_) => DeliveryStatus::Failed,
    }
}
