//! Fire-and-forget hand-off from intake to the automation pipeline.

use std::sync::Arc;

use leadforge_shared::{LeadForgeError, LeadId, Result};
use leadforge_storage::Storage;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::pipeline::AutomationPipeline;

/// Queues lead IDs for background automation. Clone freely; the dispatch
/// loop exits once every clone is dropped and in-flight runs finish.
#[derive(Clone)]
pub struct AutomationDispatcher {
    tx: mpsc::Sender<LeadId>,
}

impl AutomationDispatcher {
    /// Spawn the dispatch loop. Each queued lead runs on its own task.
    pub fn start(pipeline: Arc<AutomationPipeline>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<LeadId>(capacity.max(1));
        let handle = tokio::spawn(async move {
            let mut runs = JoinSet::new();
            loop {
                tokio::select! {
                    next = rx.recv() => match next {
                        Some(lead_id) => {
                            let pipeline = pipeline.clone();
                            runs.spawn(async move { pipeline.run(lead_id).await });
                        }
                        None => break,
                    },
                    Some(done) = runs.join_next(), if !runs.is_empty() => {
                        if let Err(e) = done {
                            warn!(error = %e, "automation task panicked");
                        }
                    }
                }
            }
            while let Some(done) = runs.join_next().await {
                if let Err(e) = done {
                    warn!(error = %e, "automation task panicked");
                }
            }
            debug!("automation dispatcher drained");
        });
        (Self { tx }, handle)
    }

    /// Queue a lead. Only fails once the dispatch loop is gone.
    pub async fn enqueue(&self, lead_id: LeadId) -> Result<()> {
        self.tx
            .send(lead_id)
            .await
            .map_err(|_| LeadForgeError::config("automation dispatcher is not running"))
    }

    /// Re-queue leads that were stored but never claimed, e.g. after a
    /// restart. Returns how many were queued.
    pub async fn recover(&self, storage: &Storage, limit: u32) -> Result<usize> {
        let pending = storage.list_unprocessed_leads(limit).await?;
        let count = pending.len();
        for lead_id in pending {
            self.enqueue(lead_id).await?;
        }
        if count > 0 {
            info!(count, "re-queued unprocessed leads");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::sequence::SequenceWorker;
    use crate::testutil::{seed_funnel, seed_lead_in, temp_storage};
    use leadforge_ai::LeadScorer;
    use leadforge_channels::{
        EmailSender, SmsSender, SmtpSettings, TwilioClient, VoiceBridge, WebhookUrls,
    };
    use serde_json::json;

    fn pipeline(storage: Arc<Storage>) -> Arc<AutomationPipeline> {
        let twilio = TwilioClient::new("http://127.0.0.1:1", None, Duration::from_secs(1)).unwrap();
        let urls = WebhookUrls::new("https://hooks.example.com", "s").unwrap();
        let sms = SmsSender::new(twilio.clone(), None);
        Arc::new(AutomationPipeline::new(
            storage.clone(),
            LeadScorer::deterministic(),
            EmailSender::new(SmtpSettings::default()),
            sms.clone(),
            VoiceBridge::new(twilio, urls),
            SequenceWorker::new(storage, sms, 10),
        ))
    }

    #[tokio::test]
    async fn recovered_leads_are_automated() {
        let storage = temp_storage().await;
        let (_, funnel) = seed_funnel(&storage, json!({})).await;
        let a = seed_lead_in(&storage, &funnel, json!({"service": "solar"})).await;
        let b = seed_lead_in(&storage, &funnel, json!({"service": "buy"})).await;

        let (dispatcher, handle) = AutomationDispatcher::start(pipeline(storage.clone()), 8);
        assert_eq!(dispatcher.recover(&storage, 100).await.unwrap(), 2);
        drop(dispatcher);
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("dispatcher drains")
            .unwrap();

        assert_eq!(storage.get_lead(&a.id).await.unwrap().unwrap().ai_score, Some(80));
        assert_eq!(storage.get_lead(&b.id).await.unwrap().unwrap().ai_score, Some(70));
        assert!(storage.list_unprocessed_leads(100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_fails() {
        let storage = temp_storage().await;
        let (dispatcher, handle) = AutomationDispatcher::start(pipeline(storage), 1);
        handle.abort();
        let _ = handle.await;
        assert!(dispatcher.enqueue(LeadId::new()).await.is_err());
    }
}
