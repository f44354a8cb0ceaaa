//! Rep call bridge: ring the rep, who presses 1 to be connected to the lead.

use chrono::{Local, Timelike};
use leadforge_shared::{CallStatus, ChannelError, Funnel, Lead};
use tracing::{info, warn};

use crate::twilio::{CallRequest, CallbackKind, TwilioClient, WebhookUrls};

/// Non-error outcome of a call attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Initiated { sid: String },
    OutsideHours,
}

impl CallOutcome {
    pub fn status(&self) -> CallStatus {
        match self {
            CallOutcome::Initiated { .. } => CallStatus::Initiated,
            CallOutcome::OutsideHours => CallStatus::SkippedOutsideHours,
        }
    }
}

/// Map a call attempt result to the persisted call status.
pub fn call_status(result: &Result<CallOutcome, ChannelError>) -> CallStatus {
    match result {
        Ok(outcome) => outcome.status(),
        Err(e) if e.is_missing_config() => CallStatus::SkippedMissingConfig,
        Err(_) => CallStatus::Failed,
    }
}

#[derive(Debug, Clone)]
pub struct VoiceBridge {
    twilio: TwilioClient,
    urls: WebhookUrls,
}

impl VoiceBridge {
    pub fn new(twilio: TwilioClient, urls: WebhookUrls) -> Self {
        Self { twilio, urls }
    }

    pub fn urls(&self) -> &WebhookUrls {
        &self.urls
    }

    /// Start the rep call, treating `hour` as the current local hour.
    pub async fn try_start_rep_call_at(
        &self,
        lead: &Lead,
        funnel: &Funnel,
        hour: u32,
    ) -> Result<CallOutcome, ChannelError> {
        if !funnel.working_hours.contains(hour) {
            return Ok(CallOutcome::OutsideHours);
        }
        if !self.twilio.is_configured() {
            return Err(ChannelError::missing("twilio credentials"));
        }
        let rep = non_blank(funnel.rep_phone_number.as_deref())
            .ok_or_else(|| ChannelError::missing("rep phone number"))?;
        let from = non_blank(funnel.sending_number.as_deref())
            .ok_or_else(|| ChannelError::missing("sending number"))?;

        let answer_url = self.urls.rep_answer(&lead.id);
        let status_callback = self.urls.status(&lead.id, CallbackKind::Call);
        let sid = self
            .twilio
            .create_call(&CallRequest {
                from,
                to: rep,
                answer_url: &answer_url,
                status_callback: &status_callback,
            })
            .await?;
        Ok(CallOutcome::Initiated { sid })
    }

    pub async fn try_start_rep_call(
        &self,
        lead: &Lead,
        funnel: &Funnel,
    ) -> Result<CallOutcome, ChannelError> {
        self.try_start_rep_call_at(lead, funnel, Local::now().hour())
            .await
    }

    pub async fn start_rep_call(&self, lead: &Lead, funnel: &Funnel) -> CallStatus {
        let result = self.try_start_rep_call(lead, funnel).await;
        match &result {
            Ok(CallOutcome::Initiated { sid }) => info!(lead_id = %lead.id, %sid, "rep call started"),
            Ok(CallOutcome::OutsideHours) => info!(lead_id = %lead.id, "rep call skipped, outside working hours"),
            Err(e) if e.is_missing_config() => info!(lead_id = %lead.id, reason = %e, "rep call skipped"),
            Err(e) => warn!(lead_id = %lead.id, error = %e, "rep call failed"),
        }
        call_status(&result)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::twilio::TwilioCredentials;
    use leadforge_shared::{FunnelId, OrgId};
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn lead() -> Lead {
        Lead::new(OrgId::new(), FunnelId::new(), "en", Default::default())
    }

    fn funnel(rep: Option<&str>) -> Funnel {
        serde_json::from_value(json!({
            "id": FunnelId::new(),
            "org_id": OrgId::new(),
            "slug": "solar",
            "name": "Solar",
            "auto_call_enabled": true,
            "rep_phone_number": rep,
            "sending_number": "+15550001111",
            "working_hours": {"start": 9, "end": 17},
        }))
        .unwrap()
    }

    fn bridge(uri: String, configured: bool) -> VoiceBridge {
        let creds = configured.then(|| TwilioCredentials {
            account_sid: "AC1".into(),
            auth_token: "tok".into(),
        });
        VoiceBridge::new(
            TwilioClient::new(uri, creds, Duration::from_secs(5)).unwrap(),
            WebhookUrls::new("https://hooks.example.com", "s3cret").unwrap(),
        )
    }

    #[tokio::test]
    async fn initiates_call_with_webhooks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Accounts/AC1/Calls.json"))
            .and(body_string_contains("To=%2B15559998888"))
            .and(body_string_contains("rep-answer"))
            .and(body_string_contains("StatusCallbackEvent=no-answer"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"sid": "CA1"})))
            .expect(1)
            .mount(&server)
            .await;

        let result = bridge(server.uri(), true)
            .try_start_rep_call_at(&lead(), &funnel(Some("+15559998888")), 10)
            .await;
        assert_eq!(result.unwrap(), CallOutcome::Initiated { sid: "CA1".into() });
    }

    #[tokio::test]
    async fn outside_hours_checked_first() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        // Even without credentials the window wins.
        let result = bridge(server.uri(), false)
            .try_start_rep_call_at(&lead(), &funnel(Some("+15559998888")), 20)
            .await;
        assert_eq!(call_status(&result), CallStatus::SkippedOutsideHours);
    }

    #[tokio::test]
    async fn missing_rep_number_skips() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let result = bridge(server.uri(), true)
            .try_start_rep_call_at(&lead(), &funnel(None), 10)
            .await;
        assert_eq!(call_status(&result), CallStatus::SkippedMissingConfig);

        let result = bridge(server.uri(), false)
            .try_start_rep_call_at(&lead(), &funnel(Some("+15559998888")), 10)
            .await;
        assert_eq!(call_status(&result), CallStatus::SkippedMissingConfig);
    }

    #[tokio::test]
    async fn provider_error_is_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = bridge(server.uri(), true)
            .try_start_rep_call_at(&lead(), &funnel(Some("+15559998888")), 10)
            .await;
        assert_eq!(call_status(&result), CallStatus::Failed);
    }
}
