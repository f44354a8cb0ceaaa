//! HTTP adapter: public lead submission and the Twilio webhooks.

use std::sync::Arc;

use axum::extract::{Form, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use color_eyre::eyre::{Result, eyre};
use leadforge_core::{
    AutomationDispatcher, GatherForm, LeadSubmission, Services, StatusForm, TelephonyHandler,
    WebhookQuery, submit_lead,
};
use leadforge_shared::LeadForgeError;
use leadforge_storage::Storage;
use serde_json::json;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Leads re-queued at startup if they were stored but never automated.
const RECOVERY_LIMIT: u32 = 500;
const DISPATCH_CAPACITY: usize = 256;

#[derive(Clone)]
pub(crate) struct AppState {
    storage: Arc<Storage>,
    telephony: TelephonyHandler,
    dispatcher: AutomationDispatcher,
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

pub(crate) struct ApiError(LeadForgeError);

impl From<LeadForgeError> for ApiError {
    fn from(e: LeadForgeError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            LeadForgeError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            LeadForgeError::NotFound { .. } => StatusCode::NOT_FOUND,
            LeadForgeError::Unauthorized(_) => StatusCode::FORBIDDEN,
            other => {
                error!(error = %other, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "internal error".to_string()
        } else {
            self.0.to_string()
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

fn twiml(xml: String) -> Response {
    ([(header::CONTENT_TYPE, "text/xml")], xml).into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn submit(
    State(state): State<AppState>,
    Json(submission): Json<LeadSubmission>,
) -> Result<Response, ApiError> {
    let outcome = submit_lead(&state.storage, submission).await?;
    if !outcome.is_spam {
        if let Err(e) = state.dispatcher.enqueue(outcome.lead_id).await {
            // The lead is stored; startup recovery picks it up.
            warn!(lead_id = %outcome.lead_id, error = %e, "automation not queued");
        }
    }
    Ok((StatusCode::CREATED, Json(json!({"lead_id": outcome.lead_id}))).into_response())
}

async fn rep_answer(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
) -> Result<Response, ApiError> {
    Ok(twiml(state.telephony.rep_answer(&query)?))
}

async fn rep_gather(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    Form(form): Form<GatherForm>,
) -> Result<Response, ApiError> {
    Ok(twiml(state.telephony.rep_gather(&query, &form).await?))
}

async fn status(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    Form(form): Form<StatusForm>,
) -> Result<Response, ApiError> {
    Ok(twiml(state.telephony.status_callback(&query, &form).await?))
}

// ---------------------------------------------------------------------------
// Router and server
// ---------------------------------------------------------------------------

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

pub(crate) fn router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/public/leads/submit", post(submit))
        .route("/public/twilio/rep-answer", post(rep_answer))
        .route("/public/twilio/rep-gather", post(rep_gather))
        .route("/public/twilio/status", post(status))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
    }
    info!("shutdown requested");
}

/// Run the HTTP server, dispatcher, and sequence worker until ctrl-c.
pub(crate) async fn serve(services: Services) -> Result<()> {
    let (dispatcher, dispatch_handle) =
        AutomationDispatcher::start(services.pipeline.clone(), DISPATCH_CAPACITY);
    dispatcher
        .recover(&services.storage, RECOVERY_LIMIT)
        .await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let worker = services.worker.clone();
    let interval = services.poll_interval();
    let worker_handle = tokio::spawn(async move { worker.run_forever(interval, stop_rx).await });

    let state = AppState {
        storage: services.storage.clone(),
        telephony: services.telephony.clone(),
        dispatcher,
    };
    let app = router(state, &services.config.server.cors_origins);

    let bind = &services.config.server.bind;
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| eyre!("cannot bind {bind}: {e}"))?;
    info!(%bind, public_url = %services.config.server.public_base_url, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = stop_tx.send(true);
    if let Err(e) = worker_handle.await {
        warn!(error = %e, "sequence worker task ended abnormally");
    }
    // The router (and its dispatcher clone) is gone; in-flight runs drain.
    if let Err(e) = dispatch_handle.await {
        warn!(error = %e, "dispatcher task ended abnormally");
    }
    info!("server stopped");
    Ok(())
}
