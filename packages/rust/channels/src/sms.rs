//! SMS acknowledgements and free-form texts over Twilio.

use leadforge_shared::{ChannelError, DeliveryStatus, Funnel, Lead};
use tracing::{info, warn};

use crate::phone::normalize_phone;
use crate::twilio::{CallbackKind, TwilioClient, WebhookUrls};
use crate::{Receipt, delivery_status};

/// Lead acknowledgement text.
pub fn acknowledgement_body(lead: &Lead) -> String {
    let name = lead.name().unwrap_or_else(|| "there".into());
    let service = lead.service().unwrap_or_else(|| "your request".into());
    format!(
        "Hi {name}, thanks for contacting us about {service}! A team member will reach out shortly."
    )
}

#[derive(Debug, Clone)]
pub struct SmsSender {
    twilio: TwilioClient,
    callbacks: Option<WebhookUrls>,
}

impl SmsSender {
    pub fn new(twilio: TwilioClient, callbacks: Option<WebhookUrls>) -> Self {
        Self { twilio, callbacks }
    }

    /// Text the lead an acknowledgement from the funnel's sending number.
    pub async fn try_send_lead_ack(
        &self,
        lead: &Lead,
        funnel: &Funnel,
    ) -> Result<Receipt, ChannelError> {
        let callback = self
            .callbacks
            .as_ref()
            .map(|urls| urls.status(&lead.id, CallbackKind::Sms));
        self.deliver(
            funnel.sending_number.as_deref(),
            lead.phone().as_deref(),
            &acknowledgement_body(lead),
            callback.as_ref(),
        )
        .await
    }

    pub async fn send_lead_ack(&self, lead: &Lead, funnel: &Funnel) -> DeliveryStatus {
        let result = self.try_send_lead_ack(lead, funnel).await;
        log_outcome(&result, "lead acknowledgement");
        delivery_status(&result)
    }

    /// Send an arbitrary message. Used by the sequence worker and text-back.
    pub async fn try_send_text(
        &self,
        from: Option<&str>,
        to: Option<&str>,
        body: &str,
    ) -> Result<Receipt, ChannelError> {
        self.deliver(from, to, body, None).await
    }

    pub async fn send_text(&self, from: Option<&str>, to: Option<&str>, body: &str) -> DeliveryStatus {
        let result = self.try_send_text(from, to, body).await;
        log_outcome(&result, "text");
        delivery_status(&result)
    }

    async fn deliver(
        &self,
        from: Option<&str>,
        to: Option<&str>,
        body: &str,
        status_callback: Option<&url::Url>,
    ) -> Result<Receipt, ChannelError> {
        if !self.twilio.is_configured() {
            return Err(ChannelError::missing("twilio credentials"));
        }
        let from = from
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ChannelError::missing("sending number"))?;
        let to = to
            .and_then(normalize_phone)
            .ok_or_else(|| ChannelError::missing("destination phone"))?;

        let sid = self
            .twilio
            .send_message(from.trim(), &to, body, status_callback)
            .await?;
        Ok(Receipt::with_id(sid))
    }
}

fn log_outcome(result: &Result<Receipt, ChannelError>, what: &str) {
    match result {
        Ok(receipt) => info!(sid = ?receipt.provider_id, "{what} sms sent"),
        Err(e) if e.is_missing_config() => info!(reason = %e, "{what} sms skipped"),
        Err(e) => warn!(error = %e, "{what} sms failed"),
    }
}
