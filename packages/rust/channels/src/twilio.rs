//! Twilio REST client (Messages and Calls) plus webhook URL construction.

use std::time::Duration;

use leadforge_shared::{ChannelError, LeadId, TwilioConfig, twilio_credentials};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

/// Call progress events the status webhook subscribes to.
pub const CALL_STATUS_EVENTS: [&str; 4] = ["completed", "busy", "no-answer", "failed"];

#[derive(Debug, Clone)]
pub struct TwilioCredentials {
    pub account_sid: String,
    pub auth_token: String,
}

/// Outbound call parameters.
#[derive(Debug, Clone)]
pub struct CallRequest<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub answer_url: &'a Url,
    pub status_callback: &'a Url,
}

#[derive(Deserialize)]
struct TwilioResource {
    sid: String,
}

#[derive(Deserialize)]
struct TwilioApiError {
    #[serde(default)]
    message: String,
}

/// Thin Twilio client. Without credentials every call returns
/// [`ChannelError::MissingConfig`] before touching the network.
#[derive(Debug, Clone)]
pub struct TwilioClient {
    http: Client,
    base_url: String,
    credentials: Option<TwilioCredentials>,
}

impl TwilioClient {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Option<TwilioCredentials>,
        timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Build from app config, reading credentials from the configured env vars.
    pub fn from_config(config: &TwilioConfig) -> Result<Self, ChannelError> {
        let credentials = twilio_credentials(config).map(|(account_sid, auth_token)| {
            TwilioCredentials {
                account_sid,
                auth_token,
            }
        });
        Self::new(
            config.api_base.clone(),
            credentials,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    fn credentials(&self) -> Result<&TwilioCredentials, ChannelError> {
        self.credentials
            .as_ref()
            .ok_or_else(|| ChannelError::missing("twilio credentials"))
    }

    /// Send an SMS. Returns the message SID.
    pub async fn send_message(
        &self,
        from: &str,
        to: &str,
        body: &str,
        status_callback: Option<&Url>,
    ) -> Result<String, ChannelError> {
        let creds = self.credentials()?;
        let mut form = vec![("From", from.to_string()), ("To", to.to_string()), ("Body", body.to_string())];
        if let Some(url) = status_callback {
            form.push(("StatusCallback", url.to_string()));
        }
        debug!(to, "sending sms");
        self.post(creds, "Messages.json", &form).await
    }

    /// Start an outbound call. Returns the call SID.
    pub async fn create_call(&self, request: &CallRequest<'_>) -> Result<String, ChannelError> {
        let creds = self.credentials()?;
        let mut form = vec![
            ("From", request.from.to_string()),
            ("To", request.to.to_string()),
            ("Url", request.answer_url.to_string()),
            ("StatusCallback", request.status_callback.to_string()),
            ("StatusCallbackMethod", "POST".to_string()),
        ];
        for event in CALL_STATUS_EVENTS {
            form.push(("StatusCallbackEvent", event.to_string()));
        }
        debug!(to = request.to, "creating call");
        self.post(creds, "Calls.json", &form).await
    }

    async fn post(
        &self,
        creds: &TwilioCredentials,
        resource: &str,
        form: &[(&str, String)],
    ) -> Result<String, ChannelError> {
        let url = format!(
            "{}/Accounts/{}/{resource}",
            self.base_url, creds.account_sid
        );

        let response = self
            .http
            .post(&url)
            .basic_auth(&creds.account_sid, Some(&creds.auth_token))
            .form(form)
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let body = serde_json::from_str::<TwilioApiError>(&text)
                .map(|e| e.message)
                .ok()
                .filter(|m| !m.is_empty())
                .unwrap_or(text);
            return Err(ChannelError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let resource: TwilioResource = response
            .json()
            .await
            .map_err(|e| ChannelError::InvalidResponse(e.to_string()))?;
        Ok(resource.sid)
    }
}

/// Which delivery channel a status callback reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    Call,
    Sms,
}

impl CallbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackKind::Call => "call",
            CallbackKind::Sms => "sms",
        }
    }
}

/// Builds the public webhook URLs handed to Twilio. Every URL carries the
/// lead ID and the shared secret.
#[derive(Debug, Clone)]
pub struct WebhookUrls {
    base: String,
    secret: String,
}

impl WebhookUrls {
    pub fn new(public_base_url: &str, secret: impl Into<String>) -> Result<Self, ChannelError> {
        Url::parse(public_base_url)
            .map_err(|e| ChannelError::missing(format!("public base url: {e}")))?;
        Ok(Self {
            base: public_base_url.trim_end_matches('/').to_string(),
            secret: secret.into(),
        })
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    fn build(&self, route: &str, lead_id: &LeadId, kind: Option<CallbackKind>) -> Url {
        // The base was validated in `new`, so appending a fixed path cannot fail.
        let mut url = Url::parse(&format!("{}/public/twilio/{route}", self.base))
            .unwrap_or_else(|_| unreachable!("validated base url"));
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("lead_id", &lead_id.to_string());
            if let Some(kind) = kind {
                query.append_pair("type", kind.as_str());
            }
            query.append_pair("secret", &self.secret);
        }
        url
    }

    pub fn rep_answer(&self, lead_id: &LeadId) -> Url {
        self.build("rep-answer", lead_id, None)
    }

    pub fn rep_gather(&self, lead_id: &LeadId) -> Url {
        self.build("rep-gather", lead_id, None)
    }

    pub fn status(&self, lead_id: &LeadId, kind: CallbackKind) -> Url {
        self.build("status", lead_id, Some(kind))
    }
}
