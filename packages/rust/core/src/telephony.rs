//! Twilio webhook handling for the rep call bridge and delivery callbacks.
//!
//! Every handler checks the shared secret before touching state and answers
//! with a TwiML document.

use std::sync::Arc;

use chrono::Utc;
use leadforge_channels::{SmsSender, WebhookUrls, delivery_status, normalize_phone, twiml};
use leadforge_shared::{
    AutomationEventType, CallStatus, DeliveryStatus, Lead, LeadForgeError, LeadId, Result,
};
use leadforge_storage::Storage;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::calls::CallRetryController;
use crate::events::record_event;

const TEXTBACK_BODY: &str = "Sorry we missed you. Reply YES and we'll call you back.";

/// Query string carried by every webhook URL we hand to Twilio.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookQuery {
    #[serde(default)]
    pub lead_id: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatherForm {
    #[serde(default, rename = "Digits")]
    pub digits: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusForm {
    #[serde(default, rename = "CallStatus")]
    pub call_status: Option<String>,
    #[serde(default, rename = "SmsStatus")]
    pub sms_status: Option<String>,
    #[serde(default, rename = "MessageStatus")]
    pub message_status: Option<String>,
}

fn parse_call_status(raw: &str) -> Option<CallStatus> {
    match raw {
        "completed" => Some(CallStatus::Completed),
        "busy" => Some(CallStatus::Busy),
        "no-answer" => Some(CallStatus::NoAnswer),
        "failed" => Some(CallStatus::Failed),
        "canceled" => Some(CallStatus::Canceled),
        _ => None,
    }
}

fn parse_sms_status(raw: &str) -> Option<DeliveryStatus> {
    match raw {
        "sent" => Some(DeliveryStatus::Sent),
        "delivered" => Some(DeliveryStatus::Delivered),
        "undelivered" => Some(DeliveryStatus::Undelivered),
        "failed" => Some(DeliveryStatus::Failed),
        _ => None,
    }
}

#[derive(Clone)]
pub struct TelephonyHandler {
    storage: Arc<Storage>,
    sms: SmsSender,
    urls: WebhookUrls,
    retry: CallRetryController,
}

impl TelephonyHandler {
    pub fn new(
        storage: Arc<Storage>,
        sms: SmsSender,
        urls: WebhookUrls,
        retry: CallRetryController,
    ) -> Self {
        Self {
            storage,
            sms,
            urls,
            retry,
        }
    }

    fn authorize(&self, query: &WebhookQuery) -> Result<LeadId> {
        if query.secret != self.urls.secret() {
            warn!("webhook rejected: secret mismatch");
            return Err(LeadForgeError::Unauthorized("invalid webhook secret".into()));
        }
        query
            .lead_id
            .parse()
            .map_err(|_| LeadForgeError::validation(format!("invalid lead_id '{}'", query.lead_id)))
    }

    /// The rep picked up: prompt them to press 1.
    pub fn rep_answer(&self, query: &WebhookQuery) -> Result<String> {
        let lead_id = self.authorize(query)?;
        Ok(twiml::rep_answer_prompt(self.urls.rep_gather(&lead_id).as_str()))
    }

    /// The rep pressed a key. `1` bridges them to the lead.
    #[instrument(skip_all, fields(lead_id = %query.lead_id))]
    pub async fn rep_gather(&self, query: &WebhookQuery, form: &GatherForm) -> Result<String> {
        let lead_id = self.authorize(query)?;

        if form.digits.as_deref().map(str::trim) != Some("1") {
            match self.storage.set_call_status(&lead_id, CallStatus::RepDeclined).await {
                Ok(()) | Err(LeadForgeError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
            info!("rep declined the lead");
            return Ok(twiml::say_and_hangup("Goodbye."));
        }

        let Some(lead) = self.storage.get_lead(&lead_id).await? else {
            return Ok(twiml::say_and_hangup("Lead not found. Goodbye."));
        };
        let Some(phone) = lead.phone().as_deref().and_then(normalize_phone) else {
            return Ok(twiml::say_and_hangup("No phone number on file. Goodbye."));
        };
        self.storage.mark_connected(&lead_id, Utc::now()).await?;
        info!("rep connected to lead");
        Ok(twiml::connect(&phone))
    }

    /// Delivery status from Twilio for a call or a message.
    #[instrument(skip_all, fields(lead_id = %query.lead_id, kind = ?query.kind))]
    pub async fn status_callback(&self, query: &WebhookQuery, form: &StatusForm) -> Result<String> {
        let lead_id = self.authorize(query)?;
        match query.kind.as_deref() {
            Some("call") => self.call_status(&lead_id, form.call_status.as_deref()).await?,
            Some("sms") => {
                let raw = form.sms_status.as_deref().or(form.message_status.as_deref());
                self.sms_status(&lead_id, raw).await?
            }
            other => {
                return Err(LeadForgeError::validation(format!(
                    "unknown callback type {other:?}"
                )));
            }
        }
        Ok(twiml::empty())
    }

    async fn call_status(&self, lead_id: &LeadId, raw: Option<&str>) -> Result<()> {
        let Some(status) = raw.and_then(parse_call_status) else {
            debug!(status = ?raw, "ignoring call status");
            return Ok(());
        };
        let Some(lead) = self.storage.get_lead(lead_id).await? else {
            warn!("status callback for unknown lead");
            return Ok(());
        };

        if status == CallStatus::Completed && lead.call_status == Some(CallStatus::RepDeclined) {
            debug!("keeping rep_declined over completed");
            return Ok(());
        }
        if !self.storage.record_call_outcome(lead_id, status).await? {
            debug!(status = %status, "repeated call status ignored");
            return Ok(());
        }
        info!(status = %status, "call status updated");

        if self.retry.claim_retry(lead_id, status).await? {
            self.retry.schedule_retry(*lead_id);
        }
        if status.is_missed() {
            self.send_textback(&lead).await;
        }
        Ok(())
    }

    /// One-shot missed-call text-back. Failures after the claim are logged;
    /// the call outcome is already stored.
    async fn send_textback(&self, lead: &Lead) {
        match self.storage.claim_textback(&lead.id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("text-back already claimed");
                return;
            }
            Err(e) => {
                warn!(error = %e, "text-back claim failed");
                return;
            }
        }

        let from = match self.storage.get_funnel(&lead.funnel_id).await {
            Ok(funnel) => funnel.and_then(|f| f.sending_number),
            Err(e) => {
                warn!(error = %e, "funnel lookup failed for text-back");
                None
            }
        };
        let result = self
            .sms
            .try_send_text(from.as_deref(), lead.phone().as_deref(), TEXTBACK_BODY)
            .await;
        let sent = delivery_status(&result);
        let detail = match &result {
            Ok(receipt) => receipt.provider_id.as_ref().map(|sid| json!({"sid": sid})),
            Err(e) => Some(json!({"error": e.to_string()})),
        };
        if let Err(e) = self.storage.set_textback_status(&lead.id, sent).await {
            warn!(error = %e, status = %sent, "text-back status not saved");
        }
        record_event(
            &self.storage,
            lead,
            AutomationEventType::TextbackSent,
            sent.as_str(),
            detail,
        )
        .await;
    }

    async fn sms_status(&self, lead_id: &LeadId, raw: Option<&str>) -> Result<()> {
        let Some(status) = raw.and_then(parse_sms_status) else {
            debug!(status = ?raw, "ignoring sms status");
            return Ok(());
        };
        match self.storage.set_sms_status(lead_id, status).await {
            Ok(()) => info!(status = %status, "sms status updated"),
            Err(LeadForgeError::NotFound { .. }) => warn!("status callback for unknown lead"),
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testutil::{execute_raw, seed_funnel, seed_lead_in, temp_storage, temp_storage_at};
    use leadforge_channels::{TwilioClient, TwilioCredentials, VoiceBridge};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SECRET: &str = "s3cret";

    fn handler(storage: Arc<Storage>, uri: String) -> TelephonyHandler {
        handler_with_retry_delay(storage, uri, Duration::from_secs(3600))
    }

    fn handler_with_retry_delay(
        storage: Arc<Storage>,
        uri: String,
        retry_delay: Duration,
    ) -> TelephonyHandler {
        let creds = TwilioCredentials {
            account_sid: "AC1".into(),
            auth_token: "tok".into(),
        };
        let twilio = TwilioClient::new(uri, Some(creds), Duration::from_secs(5)).unwrap();
        let urls = WebhookUrls::new("https://hooks.example.com", SECRET).unwrap();
        let retry = CallRetryController::new(
            storage.clone(),
            VoiceBridge::new(twilio.clone(), urls.clone()),
            retry_delay,
            2,
        );
        TelephonyHandler::new(storage, SmsSender::new(twilio, None), urls, retry)
    }

    fn query(lead: &Lead, kind: Option<&str>) -> WebhookQuery {
        WebhookQuery {
            lead_id: lead.id.to_string(),
            secret: SECRET.into(),
            kind: kind.map(str::to_string),
        }
    }

    async fn seeded(storage: &Storage) -> Lead {
        let (_, funnel) = seed_funnel(storage, json!({"sending_number": "+15550001111"})).await;
        seed_lead_in(storage, &funnel, json!({"name": "Jane", "phone": "3105551234"})).await
    }

    #[tokio::test]
    async fn wrong_secret_has_no_side_effects() {
        let storage = temp_storage().await;
        let lead = seeded(&storage).await;
        let handler = handler(storage.clone(), "http://127.0.0.1:1".into());

        let mut bad = query(&lead, None);
        bad.secret = "nope".into();
        let form = GatherForm {
            digits: Some("1".into()),
        };
        let err = handler.rep_gather(&bad, &form).await.unwrap_err();
        assert!(matches!(err, LeadForgeError::Unauthorized(_)));
        assert!(handler.rep_answer(&bad).is_err());

        let stored = storage.get_lead(&lead.id).await.unwrap().unwrap();
        assert_eq!(stored.contact_status, None);
    }

    #[tokio::test]
    async fn answer_prompts_with_gather_url() {
        let storage = temp_storage().await;
        let lead = seeded(&storage).await;
        let handler = handler(storage, "http://127.0.0.1:1".into());

        let xml = handler.rep_answer(&query(&lead, None)).unwrap();
        assert!(xml.contains("<Gather"));
        assert!(xml.contains("/public/twilio/rep-gather?lead_id="));
        assert!(xml.contains("&amp;secret=s3cret"));
    }

    #[tokio::test]
    async fn pressing_one_connects() {
        let storage = temp_storage().await;
        let lead = seeded(&storage).await;
        let handler = handler(storage.clone(), "http://127.0.0.1:1".into());

        let form = GatherForm {
            digits: Some("1".into()),
        };
        let xml = handler.rep_gather(&query(&lead, None), &form).await.unwrap();
        assert!(xml.contains("<Dial>+13105551234</Dial>"));

        let stored = storage.get_lead(&lead.id).await.unwrap().unwrap();
        assert_eq!(stored.contact_status.as_deref(), Some("connected"));
        assert!(stored.last_contacted_at.is_some());
    }

    #[tokio::test]
    async fn other_digit_declines_and_completed_keeps_it() {
        let storage = temp_storage().await;
        let lead = seeded(&storage).await;
        let handler = handler(storage.clone(), "http://127.0.0.1:1".into());

        let form = GatherForm {
            digits: Some("2".into()),
        };
        let xml = handler.rep_gather(&query(&lead, None), &form).await.unwrap();
        assert!(xml.contains("Goodbye."));

        let completed = StatusForm {
            call_status: Some("completed".into()),
            ..Default::default()
        };
        handler
            .status_callback(&query(&lead, Some("call")), &completed)
            .await
            .unwrap();
        let stored = storage.get_lead(&lead.id).await.unwrap().unwrap();
        assert_eq!(stored.call_status, Some(CallStatus::RepDeclined));
    }

    #[tokio::test]
    async fn missed_call_texts_back_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Accounts/AC1/Messages.json"))
            .and(body_string_contains("missed+you"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"sid": "SM9"})))
            .expect(1)
            .mount(&server)
            .await;

        let storage = temp_storage().await;
        let lead = seeded(&storage).await;
        let handler = handler(storage.clone(), server.uri());

        let busy = StatusForm {
            call_status: Some("busy".into()),
            ..Default::default()
        };
        for _ in 0..2 {
            handler
                .status_callback(&query(&lead, Some("call")), &busy)
                .await
                .unwrap();
        }

        let stored = storage.get_lead(&lead.id).await.unwrap().unwrap();
        assert_eq!(stored.call_status, Some(CallStatus::Retrying));
        assert_eq!(stored.textback_status, Some(DeliveryStatus::Sent));
        let textbacks = storage
            .list_events(&lead.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == AutomationEventType::TextbackSent)
            .count();
        assert_eq!(textbacks, 1);
    }

    #[tokio::test]
    async fn simultaneous_missed_callbacks_text_and_retry_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Accounts/AC1/Messages.json"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"sid": "SM9"}))
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/Accounts/AC1/Calls.json"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"sid": "CA2"})))
            .expect(1)
            .mount(&server)
            .await;

        let storage = temp_storage().await;
        let (_, funnel) = seed_funnel(
            &storage,
            json!({
                "auto_call_enabled": true,
                "rep_phone_number": "+15559998888",
                "sending_number": "+15550001111",
                "working_hours": {"start": 0, "end": 24},
            }),
        )
        .await;
        let lead = seed_lead_in(&storage, &funnel, json!({"name": "Jane", "phone": "3105551234"})).await;
        let handler =
            handler_with_retry_delay(storage.clone(), server.uri(), Duration::from_millis(50));

        let no_answer = StatusForm {
            call_status: Some("no-answer".into()),
            ..Default::default()
        };
        let q = query(&lead, Some("call"));
        let (first, second) = tokio::join!(
            handler.status_callback(&q, &no_answer),
            handler.status_callback(&q, &no_answer),
        );
        first.unwrap();
        second.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let stored = storage.get_lead(&lead.id).await.unwrap().unwrap();
        assert_eq!(stored.call_attempts, 1);
        assert_eq!(stored.call_status, Some(CallStatus::Initiated));
        assert_eq!(stored.textback_status, Some(DeliveryStatus::Sent));
        let events = storage.list_events(&lead.id).await.unwrap();
        let count = |kind: AutomationEventType| events.iter().filter(|e| e.event_type == kind).count();
        assert_eq!(count(AutomationEventType::TextbackSent), 1);
        assert_eq!(count(AutomationEventType::CallRetried), 1);
    }

    #[tokio::test]
    async fn unreadable_funnel_does_not_fail_missed_call() {
        let (storage, db_path) = temp_storage_at().await;
        let lead = seeded(&storage).await;
        execute_raw(
            &db_path,
            &format!("UPDATE funnels SET schema_json = '{{' WHERE id = '{}'", lead.funnel_id),
        )
        .await;
        let handler = handler(storage.clone(), "http://127.0.0.1:1".into());

        let busy = StatusForm {
            call_status: Some("busy".into()),
            ..Default::default()
        };
        let xml = handler
            .status_callback(&query(&lead, Some("call")), &busy)
            .await
            .unwrap();
        assert!(xml.contains("<Response/>"));

        let stored = storage.get_lead(&lead.id).await.unwrap().unwrap();
        assert_eq!(stored.call_status, Some(CallStatus::Retrying));
        assert_eq!(stored.textback_status, Some(DeliveryStatus::SkippedMissingConfig));
    }

    #[tokio::test]
    async fn sms_and_unknown_statuses() {
        let storage = temp_storage().await;
        let lead = seeded(&storage).await;
        let handler = handler(storage.clone(), "http://127.0.0.1:1".into());

        let delivered = StatusForm {
            message_status: Some("delivered".into()),
            ..Default::default()
        };
        let xml = handler
            .status_callback(&query(&lead, Some("sms")), &delivered)
            .await
            .unwrap();
        assert!(xml.contains("<Response/>"));

        let ringing = StatusForm {
            call_status: Some("ringing".into()),
            ..Default::default()
        };
        handler
            .status_callback(&query(&lead, Some("call")), &ringing)
            .await
            .unwrap();

        let stored = storage.get_lead(&lead.id).await.unwrap().unwrap();
        assert_eq!(stored.sms_status, Some(DeliveryStatus::Delivered));
        assert_eq!(stored.call_status, None);

        let err = handler
            .status_callback(&query(&lead, Some("fax")), &StatusForm::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LeadForgeError::Validation { .. }));
    }
}
