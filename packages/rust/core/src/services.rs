//! Wiring: build every long-lived component from an [`AppConfig`].

use std::sync::Arc;
use std::time::Duration;

use leadforge_ai::{ClaudeClient, ClaudeConfig, LeadScorer};
use leadforge_channels::{EmailSender, SmsSender, TwilioClient, VoiceBridge, WebhookUrls};
use leadforge_shared::{AppConfig, ChannelError, LeadForgeError, Result, webhook_secret};
use leadforge_storage::Storage;
use tracing::{debug, info};

use crate::calls::CallRetryController;
use crate::pipeline::AutomationPipeline;
use crate::sequence::SequenceWorker;
use crate::telephony::TelephonyHandler;

fn config_err(what: &str) -> impl FnOnce(ChannelError) -> LeadForgeError + '_ {
    move |e| LeadForgeError::config(format!("{what}: {e}"))
}

pub struct Services {
    pub config: AppConfig,
    pub storage: Arc<Storage>,
    /// `None` when no model key is configured.
    pub claude: Option<ClaudeClient>,
    pub pipeline: Arc<AutomationPipeline>,
    pub worker: SequenceWorker,
    pub telephony: TelephonyHandler,
}

impl Services {
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let db_path = config.database.resolved_path()?;
        let storage = Arc::new(Storage::open(&db_path).await?);
        debug!(path = %db_path.display(), "database opened");

        let claude = ClaudeConfig::from_app_config(&config.ai)
            .map(ClaudeClient::new)
            .transpose()
            .map_err(config_err("ai client"))?;
        if claude.is_none() {
            info!(var = %config.ai.api_key_env, "no model key set, AI features use fallbacks");
        }

        let twilio = TwilioClient::from_config(&config.twilio).map_err(config_err("twilio client"))?;
        let urls = WebhookUrls::new(&config.server.public_base_url, webhook_secret(&config.twilio))
            .map_err(config_err("server.public_base_url"))?;

        let sms = SmsSender::new(twilio.clone(), Some(urls.clone()));
        let voice = VoiceBridge::new(twilio, urls.clone());
        let worker = SequenceWorker::new(storage.clone(), sms.clone(), config.sequences.batch_size);
        let retry = CallRetryController::new(
            storage.clone(),
            voice.clone(),
            Duration::from_secs(config.calls.retry_delay_secs),
            config.calls.max_attempts,
        );

        let pipeline = Arc::new(AutomationPipeline::new(
            storage.clone(),
            LeadScorer::new(claude.clone()),
            EmailSender::from_config(&config.smtp),
            sms.clone(),
            voice,
            worker.clone(),
        ));
        let telephony = TelephonyHandler::new(storage.clone(), sms, urls, retry);

        Ok(Self {
            config,
            storage,
            claude,
            pipeline,
            worker,
            telephony,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.sequences.poll_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn builds_from_default_config() {
        let mut config = AppConfig::default();
        config.database.path = std::env::temp_dir()
            .join(format!("lf_services_{}.db", Uuid::now_v7()))
            .to_string_lossy()
            .into_owned();
        config.ai.api_key_env = "LEADFORGE_TEST_UNSET_KEY".into();

        let services = Services::from_config(config).await.expect("services");
        assert!(services.claude.is_none());
        assert!(services.storage.list_funnels().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_public_url_is_a_config_error() {
        let mut config = AppConfig::default();
        config.database.path = std::env::temp_dir()
            .join(format!("lf_services_{}.db", Uuid::now_v7()))
            .to_string_lossy()
            .into_owned();
        config.server.public_base_url = "not a url".into();

        let err = Services::from_config(config).await.err().expect("error");
        assert!(matches!(err, LeadForgeError::Config { .. }));
    }
}
