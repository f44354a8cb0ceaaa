//! New-lead notification email over SMTP.

use std::time::Duration;

use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use leadforge_shared::{ChannelError, DeliveryStatus, Funnel, Lead, SmtpConfig, secret_from_env};
use tracing::{info, warn};

use crate::{Receipt, delivery_status};

/// SMTP settings with the password already resolved.
#[derive(Debug, Clone, Default)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub from: String,
    pub timeout: Duration,
}

impl SmtpSettings {
    pub fn from_config(config: &SmtpConfig) -> Self {
        let from = if config.from.trim().is_empty() {
            config.user.clone()
        } else {
            config.from.clone()
        };
        Self {
            host: config.host.trim().to_string(),
            port: config.port,
            user: config.user.clone(),
            password: secret_from_env(&config.password_env),
            from,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn login(&self) -> Option<Credentials> {
        let password = self.password.as_ref()?;
        if self.user.is_empty() {
            return None;
        }
        Some(Credentials::new(self.user.clone(), password.clone()))
    }
}

/// Subject and body of the notification sent to the funnel's recipients.
pub fn new_lead_message(lead: &Lead) -> (String, String) {
    let name = lead.name().unwrap_or_else(|| "Unknown".into());
    let phone = lead.phone().unwrap_or_else(|| "N/A".into());
    let service = lead.service().unwrap_or_else(|| "N/A".into());
    let priority = lead.priority.map_or("N/A", |p| p.as_str());
    let score = lead
        .ai_score
        .map_or_else(|| "N/A".to_string(), |s| s.to_string());

    let subject = format!("New Lead: {name} - {service}");
    let body = format!(
        "New lead submitted:\n\n\
         Name: {name}\n\
         Phone: {phone}\n\
         Service: {service}\n\
         Lead ID: {}\n\
         Priority: {priority}\n\
         AI Score: {score}\n",
        lead.id
    );
    (subject, body)
}

#[derive(Debug, Clone)]
pub struct EmailSender {
    settings: SmtpSettings,
}

impl EmailSender {
    pub fn new(settings: SmtpSettings) -> Self {
        Self { settings }
    }

    pub fn from_config(config: &SmtpConfig) -> Self {
        Self::new(SmtpSettings::from_config(config))
    }

    /// Notify the funnel's recipient list about a new lead.
    pub async fn try_send_new_lead(
        &self,
        lead: &Lead,
        funnel: &Funnel,
    ) -> Result<Receipt, ChannelError> {
        let settings = &self.settings;
        if settings.host.is_empty() {
            return Err(ChannelError::missing("smtp host"));
        }
        if settings.from.trim().is_empty() {
            return Err(ChannelError::missing("smtp sender address"));
        }
        let recipients: Vec<&str> = funnel
            .notification_emails
            .iter()
            .map(|e| e.trim())
            .filter(|e| !e.is_empty())
            .collect();
        if recipients.is_empty() {
            return Err(ChannelError::missing("notification recipients"));
        }

        let (subject, body) = new_lead_message(lead);
        let from: Mailbox = settings
            .from
            .parse()
            .map_err(|e| ChannelError::missing(format!("invalid sender address: {e}")))?;

        let mut builder = Message::builder().from(from).subject(subject);
        for recipient in &recipients {
            let mailbox: Mailbox = recipient.parse().map_err(|e| {
                ChannelError::InvalidResponse(format!("invalid recipient '{recipient}': {e}"))
            })?;
            builder = builder.to(mailbox);
        }
        let message = builder
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| ChannelError::InvalidResponse(e.to_string()))?;

        let mailer = match settings.login() {
            Some(creds) => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                    .map_err(|e| ChannelError::Transport(e.to_string()))?
                    .port(settings.port)
                    .credentials(creds)
                    .timeout(Some(settings.timeout))
                    .build()
            }
            None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
                .port(settings.port)
                .timeout(Some(settings.timeout))
                .build(),
        };

        let response = mailer
            .send(message)
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        Ok(Receipt {
            provider_id: response.message().next().map(str::to_string),
        })
    }

    pub async fn send_new_lead(&self, lead: &Lead, funnel: &Funnel) -> DeliveryStatus {
        let result = self.try_send_new_lead(lead, funnel).await;
        match &result {
            Ok(_) => info!(lead_id = %lead.id, "notification email sent"),
            Err(e) if e.is_missing_config() => {
                info!(lead_id = %lead.id, reason = %e, "notification email skipped")
            }
            Err(e) => warn!(lead_id = %lead.id, error = %e, "notification email failed"),
        }
        delivery_status(&result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadforge_shared::{FunnelId, OrgId, Priority};
    use serde_json::json;

    fn lead() -> Lead {
        let answers = serde_json::from_value(json!({
            "name": "Ana", "phone": "5551234567", "service": "solar"
        }))
        .unwrap();
        Lead::new(OrgId::new(), FunnelId::new(), "en", answers)
    }

    fn funnel(recipients: &[&str]) -> Funnel {
        serde_json::from_value(json!({
            "id": FunnelId::new(),
            "org_id": OrgId::new(),
            "slug": "solar",
            "name": "Solar",
            "notification_emails": recipients,
        }))
        .unwrap()
    }

    fn settings(host: &str, port: u16) -> SmtpSettings {
        SmtpSettings {
            host: host.into(),
            port,
            from: "alerts@example.com".into(),
            timeout: Duration::from_secs(2),
            ..SmtpSettings::default()
        }
    }

    #[test]
    fn message_lists_lead_details() {
        let mut lead = lead();
        lead.priority = Some(Priority::High);
        lead.ai_score = Some(80);
        let (subject, body) = new_lead_message(&lead);
        assert_eq!(subject, "New Lead: Ana - solar");
        assert!(body.contains("Phone: 5551234567"));
        assert!(body.contains(&format!("Lead ID: {}", lead.id)));
        assert!(body.contains("Priority: high"));
        assert!(body.contains("AI Score: 80"));
    }

    #[test]
    fn message_defaults_unknown_fields() {
        let lead = Lead::new(OrgId::new(), FunnelId::new(), "en", Default::default());
        let (subject, body) = new_lead_message(&lead);
        assert_eq!(subject, "New Lead: Unknown - N/A");
        assert!(body.contains("AI Score: N/A"));
    }

    #[tokio::test]
    async fn skips_without_host_or_recipients() {
        let no_host = EmailSender::new(settings("", 25));
        assert_eq!(
            no_host.send_new_lead(&lead(), &funnel(&["ops@example.com"])).await,
            DeliveryStatus::SkippedMissingConfig
        );

        let no_recipients = EmailSender::new(settings("smtp.example.com", 25));
        assert_eq!(
            no_recipients.send_new_lead(&lead(), &funnel(&[])).await,
            DeliveryStatus::SkippedMissingConfig
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_failed() {
        let sender = EmailSender::new(settings("127.0.0.1", 1));
        assert_eq!(
            sender.send_new_lead(&lead(), &funnel(&["ops@example.com"])).await,
            DeliveryStatus::Failed
        );
    }

    #[test]
    fn sender_falls_back_to_user() {
        let config = SmtpConfig {
            host: "smtp.example.com".into(),
            user: "me@example.com".into(),
            password_env: "LF_TEST_NONEXISTENT_SMTP_PASS_12345".into(),
            ..SmtpConfig::default()
        };
        let settings = SmtpSettings::from_config(&config);
        assert_eq!(settings.from, "me@example.com");
        assert!(settings.password.is_none());
        assert!(settings.login().is_none());
    }
}
