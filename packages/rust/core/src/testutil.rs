//! Fixtures shared by the core tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use leadforge_shared::{Answers, Funnel, FunnelId, Lead, Org, OrgId};
use leadforge_storage::Storage;
use serde_json::{Value, json};
use uuid::Uuid;

pub async fn temp_storage() -> Arc<Storage> {
    temp_storage_at().await.0
}

/// A fresh store plus its file, for tests that write rows behind its back.
pub async fn temp_storage_at() -> (Arc<Storage>, PathBuf) {
    let tmp = std::env::temp_dir().join(format!("lf_core_test_{}.db", Uuid::now_v7()));
    let storage = Arc::new(Storage::open(&tmp).await.expect("open test db"));
    (storage, tmp)
}

/// Run raw SQL against a test database file.
pub async fn execute_raw(path: &Path, sql: &str) {
    let db = libsql::Builder::new_local(path).build().await.expect("open raw db");
    db.connect()
        .expect("raw connection")
        .execute(sql, libsql::params![])
        .await
        .expect("raw statement");
}

pub fn answers(value: Value) -> Answers {
    serde_json::from_value(value).expect("answers object")
}

pub fn sample_org() -> Org {
    Org {
        id: OrgId::new(),
        name: "Sunrise Solar".into(),
        industry_slug: Some("solar".into()),
        industry_name: Some("Solar Installer".into()),
        avg_deal_value: Some(18_000.0),
        close_rate_percent: Some(20.0),
        scoring_config: None,
    }
}

/// A funnel for `org` built from `overrides` merged over a minimal base.
pub fn sample_funnel(org: &Org, overrides: Value) -> Funnel {
    let mut base = json!({
        "id": FunnelId::new(),
        "org_id": org.id,
        "slug": format!("test-{}", Uuid::now_v7()),
        "name": "Solar Quote",
        "languages": ["en"],
    });
    if let (Some(base), Value::Object(extra)) = (base.as_object_mut(), overrides) {
        base.extend(extra);
    }
    serde_json::from_value(base).expect("funnel fixture")
}

pub async fn seed_funnel(storage: &Storage, overrides: Value) -> (Org, Funnel) {
    let org = sample_org();
    storage.upsert_org(&org).await.expect("insert org");
    let funnel = sample_funnel(&org, overrides);
    storage.upsert_funnel(&funnel).await.expect("insert funnel");
    (org, funnel)
}

pub async fn seed_lead_in(storage: &Storage, funnel: &Funnel, value: Value) -> Lead {
    let lead = Lead::new(funnel.org_id, funnel.id, "en", answers(value));
    storage.insert_lead(&lead).await.expect("insert lead");
    lead
}

/// Seed an org, a bare funnel, and a lead with `value` as answers.
pub async fn seed_lead(storage: &Storage, value: Value) -> Lead {
    let (_, funnel) = seed_funnel(storage, json!({})).await;
    seed_lead_in(storage, &funnel, value).await
}
