//! Best-effort automation audit log.

use chrono::Utc;
use leadforge_shared::{AutomationEvent, AutomationEventType, Lead};
use leadforge_storage::Storage;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

/// Append an automation event. A storage failure is logged, never returned.
pub async fn record_event(
    storage: &Storage,
    lead: &Lead,
    event_type: AutomationEventType,
    status: &str,
    detail: Option<Value>,
) {
    let event = AutomationEvent {
        id: Uuid::now_v7(),
        org_id: lead.org_id,
        lead_id: lead.id,
        event_type,
        status: status.to_string(),
        detail,
        created_at: Utc::now(),
    };
    if let Err(e) = storage.insert_event(&event).await {
        warn!(lead_id = %lead.id, event = %event_type, error = %e, "failed to record automation event");
    }
}
