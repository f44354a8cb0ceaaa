//! Delayed retries of the rep call after a failed, busy, or unanswered attempt.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use leadforge_channels::{VoiceBridge, call_status};
use leadforge_shared::{AutomationEventType, CallStatus, LeadId, Result};
use leadforge_storage::Storage;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use crate::events::record_event;

#[derive(Clone)]
pub struct CallRetryController {
    storage: Arc<Storage>,
    voice: VoiceBridge,
    delay: Duration,
    max_attempts: u32,
}

impl CallRetryController {
    pub fn new(storage: Arc<Storage>, voice: VoiceBridge, delay: Duration, max_attempts: u32) -> Self {
        Self {
            storage,
            voice,
            delay,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Claim the retry owed for a freshly recorded `status`. At most one
    /// caller per outcome gets `true`; the lead is then `retrying`.
    pub async fn claim_retry(&self, lead_id: &LeadId, status: CallStatus) -> Result<bool> {
        if !status.is_retryable() {
            return Ok(false);
        }
        self.storage
            .claim_call_retry(lead_id, status, self.max_attempts)
            .await
    }

    /// Retry after the configured delay on a background task.
    pub fn schedule_retry(&self, lead_id: LeadId) -> JoinHandle<()> {
        let controller = self.clone();
        info!(%lead_id, delay_secs = self.delay.as_secs(), "call retry scheduled");
        tokio::spawn(async move {
            tokio::time::sleep(controller.delay).await;
            if let Err(e) = controller.retry_now(&lead_id).await {
                error!(%lead_id, error = %e, "call retry failed");
            }
        })
    }

    /// Consume one attempt and call the rep again. Returns the new call
    /// status, or `None` when no retry happened.
    #[instrument(skip_all, fields(lead_id = %lead_id))]
    pub async fn retry_now(&self, lead_id: &LeadId) -> Result<Option<CallStatus>> {
        let Some(lead) = self.storage.get_lead(lead_id).await? else {
            return Ok(None);
        };
        if lead.contact_status.as_deref() == Some("connected") {
            info!("lead already connected, retry dropped");
            return Ok(None);
        }
        if !self.storage.increment_call_attempt(lead_id, self.max_attempts).await? {
            info!(max_attempts = self.max_attempts, "call attempts exhausted");
            return Ok(None);
        }
        let Some(funnel) = self.storage.get_funnel(&lead.funnel_id).await? else {
            return Ok(None);
        };

        let attempt = lead.call_attempts + 1;
        let result = self.voice.try_start_rep_call(&lead, &funnel).await;
        let status = call_status(&result);
        self.storage.set_call_status(lead_id, status).await?;

        let detail = match &result {
            Ok(_) => json!({"attempt": attempt, "call_status": status.as_str()}),
            Err(e) => json!({"attempt": attempt, "call_status": status.as_str(), "error": e.to_string()}),
        };
        record_event(
            &self.storage,
            &lead,
            AutomationEventType::CallRetried,
            status.as_str(),
            Some(detail),
        )
        .await;
        info!(attempt, status = %status, "call retried");
        Ok(Some(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{seed_funnel, seed_lead_in, temp_storage};
    use leadforge_channels::{TwilioClient, TwilioCredentials, WebhookUrls};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn controller(storage: Arc<Storage>, uri: String, max: u32) -> CallRetryController {
        let creds = TwilioCredentials {
            account_sid: "AC1".into(),
            auth_token: "tok".into(),
        };
        let voice = VoiceBridge::new(
            TwilioClient::new(uri, Some(creds), Duration::from_secs(5)).unwrap(),
            WebhookUrls::new("https://hooks.example.com", "s").unwrap(),
        );
        CallRetryController::new(storage, voice, Duration::from_millis(10), max)
    }

    fn always_open() -> serde_json::Value {
        serde_json::json!({
            "auto_call_enabled": true,
            "rep_phone_number": "+15559998888",
            "sending_number": "+15550001111",
            "working_hours": {"start": 0, "end": 24},
        })
    }

    #[tokio::test]
    async fn retries_until_cap() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Accounts/AC1/Calls.json"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"sid": "CA2"})))
            .expect(2)
            .mount(&server)
            .await;

        let storage = temp_storage().await;
        let (_, funnel) = seed_funnel(&storage, always_open()).await;
        let lead = seed_lead_in(&storage, &funnel, json!({"phone": "3105551234"})).await;
        let calls = controller(storage.clone(), server.uri(), 2);

        assert_eq!(calls.retry_now(&lead.id).await.unwrap(), Some(CallStatus::Initiated));
        assert_eq!(calls.retry_now(&lead.id).await.unwrap(), Some(CallStatus::Initiated));
        assert_eq!(calls.retry_now(&lead.id).await.unwrap(), None);

        let lead = storage.get_lead(&lead.id).await.unwrap().unwrap();
        assert_eq!(lead.call_attempts, 2);
        let retried = storage
            .list_events(&lead.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == AutomationEventType::CallRetried)
            .count();
        assert_eq!(retried, 2);
    }

    #[tokio::test]
    async fn connected_lead_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let storage = temp_storage().await;
        let (_, funnel) = seed_funnel(&storage, always_open()).await;
        let lead = seed_lead_in(&storage, &funnel, json!({})).await;
        storage.mark_connected(&lead.id, Utc::now()).await.unwrap();

        let calls = controller(storage.clone(), server.uri(), 2);
        assert_eq!(calls.retry_now(&lead.id).await.unwrap(), None);
        assert_eq!(storage.get_lead(&lead.id).await.unwrap().unwrap().call_attempts, 0);
    }

    #[tokio::test]
    async fn scheduled_retry_runs_after_delay() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let storage = temp_storage().await;
        let (_, funnel) = seed_funnel(&storage, always_open()).await;
        let lead = seed_lead_in(&storage, &funnel, json!({})).await;
        let calls = controller(storage.clone(), server.uri(), 2);

        storage.record_call_outcome(&lead.id, CallStatus::Completed).await.unwrap();
        assert!(!calls.claim_retry(&lead.id, CallStatus::Completed).await.unwrap());
        storage.record_call_outcome(&lead.id, CallStatus::NoAnswer).await.unwrap();
        assert!(calls.claim_retry(&lead.id, CallStatus::NoAnswer).await.unwrap());
        assert!(!calls.claim_retry(&lead.id, CallStatus::NoAnswer).await.unwrap());
        calls.schedule_retry(lead.id).await.unwrap();

        let lead = storage.get_lead(&lead.id).await.unwrap().unwrap();
        assert_eq!(lead.call_attempts, 1);
        assert_eq!(lead.call_status, Some(CallStatus::Failed));
    }
}
