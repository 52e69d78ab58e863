//! HTTP surface of the sync server.
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint (no auth required)
//! - `GET /me`: Returns current user info
//! - `POST /sync/push`: Applies a batch of client events
//! - `GET /sync/pull`: Pages through events recorded since a checkpoint
//! - `GET /sync/status`: Latest checkpoint and pending event count

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use carelog_core::{Action, PullResponse, PushRequest, PushResponse, StatusResponse, SyncEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::auth::{auth_middleware, ApiKeyStore, AuthUser};
use super::changelog::ChangeLog;
use super::dispatcher::Dispatcher;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub api_keys: Arc<ApiKeyStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub changes: Arc<ChangeLog>,
    /// Upper bound on events per pull page
    pub pull_limit: i64,
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    // Public routes (no auth)
    let public_routes = Router::new().route("/health", get(health));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/me", get(me))
        .route("/sync/push", post(push))
        .route("/sync/pull", get(pull))
        .route("/sync/status", get(status))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Error response body
#[derive(Serialize)]
struct ApiError {
    error: &'static str,
    message: String,
}

fn error_response(status: StatusCode, error: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ApiError {
            error,
            message: message.into(),
        }),
    )
        .into_response()
}

fn storage_error(e: sqlx::Error) -> Response {
    tracing::error!("Storage error: {}", e);
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "storage_error",
        "Failed to access the change log",
    )
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint (no auth required)
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Current user response
#[derive(Serialize)]
struct MeResponse {
    user_id: String,
    family_id: String,
}

async fn me(Extension(user): Extension<AuthUser>) -> Json<MeResponse> {
    Json(MeResponse {
        user_id: user.user_id,
        family_id: user.family_id,
    })
}

/// Applies a push batch.
///
/// Events already recorded for the family are answered from the change log
/// without touching the collaborators again.
async fn push(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    body: Result<Json<PushRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "malformed_batch",
                rejection.body_text(),
            )
        }
    };

    if request.client_id.trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "missing_client_id",
            "client_id is required",
        );
    }

    let ids: Vec<String> = request.events.iter().map(|e| e.id.clone()).collect();
    let known = match state.changes.applied(&user.family_id, &ids).await {
        Ok(known) => known,
        Err(e) => return storage_error(e),
    };

    let mut seen = HashSet::new();
    let fresh: Vec<SyncEvent> = request
        .events
        .iter()
        .filter(|e| !known.contains_key(&e.id) && seen.insert(e.id.as_str()))
        .cloned()
        .collect();

    if fresh.len() < request.events.len() {
        tracing::debug!(
            "{} of {} event(s) from {} already applied",
            request.events.len() - fresh.len(),
            request.events.len(),
            request.client_id
        );
    }

    let outcome = state.dispatcher.push(&user, &fresh).await;

    // An event the change log could not record is reported failed so the
    // client resubmits it; otherwise other devices would never pull it.
    let mut failed: HashSet<&str> = outcome.failed_ids.iter().map(String::as_str).collect();
    let by_id: HashMap<&str, &SyncEvent> = fresh.iter().map(|e| (e.id.as_str(), e)).collect();
    for applied in &outcome.applied {
        let Some(event) = by_id.get(applied.event_id.as_str()) else {
            continue;
        };
        if let Err(e) = state
            .changes
            .record(&user.family_id, &request.client_id, event, &applied.entity_id)
            .await
        {
            tracing::error!("Failed to record event {}: {}", event.id, e);
            failed.insert(event.id.as_str());
        }
    }

    let mut processed = 0;
    let mut failed_ids = Vec::new();
    let mut results = HashMap::new();
    let mut answered = HashSet::new();

    for event in &request.events {
        if !answered.insert(event.id.as_str()) {
            continue;
        }
        if failed.contains(event.id.as_str()) {
            failed_ids.push(event.id.clone());
            continue;
        }
        processed += 1;
        if event.action == Action::Create.as_str() {
            let assigned = known
                .get(&event.id)
                .or_else(|| outcome.results.get(&event.id));
            if let Some(entity_id) = assigned {
                results.insert(event.id.clone(), entity_id.clone());
            }
        }
    }

    tracing::info!(
        "Push from {} ({}): {} processed, {} failed",
        user.user_id,
        request.client_id,
        processed,
        failed_ids.len()
    );

    Json(PushResponse {
        processed,
        failed: failed_ids.len(),
        failed_ids,
        results,
        server_time: outcome.server_time,
    })
    .into_response()
}

/// Query parameters for pull and status
#[derive(Debug, Default, Deserialize)]
struct SyncQuery {
    last_sync: Option<String>,
    client_id: Option<String>,
    limit: Option<i64>,
}

impl SyncQuery {
    /// Parses `last_sync`; an absent or empty value means "from the start".
    fn since(&self) -> Result<Option<DateTime<Utc>>, Response> {
        match self.last_sync.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|e| {
                    error_response(
                        StatusCode::BAD_REQUEST,
                        "invalid_last_sync",
                        format!("last_sync must be RFC 3339: {}", e),
                    )
                }),
        }
    }

    fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref().filter(|id| !id.is_empty())
    }
}

async fn pull(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<SyncQuery>,
) -> Response {
    let since = match query.since() {
        Ok(since) => since,
        Err(response) => return response,
    };
    let limit = query
        .limit
        .filter(|l| *l > 0)
        .map_or(state.pull_limit, |l| l.min(state.pull_limit));

    let page = match state
        .changes
        .since(&user.family_id, since, query.client_id(), limit)
        .await
    {
        Ok(page) => page,
        Err(e) => return storage_error(e),
    };

    // The checkpoint to resume from: never past an event the client has not seen.
    let server_time = page
        .last_recorded
        .or(since)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    tracing::debug!(
        "Pull by {}: {} event(s), has_more={}",
        user.user_id,
        page.events.len(),
        page.has_more
    );

    Json(PullResponse {
        events: page.events,
        server_time,
        has_more: page.has_more,
    })
    .into_response()
}

async fn status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<SyncQuery>,
) -> Response {
    let since = match query.since() {
        Ok(since) => since,
        Err(response) => return response,
    };

    let latest = match state.changes.latest(&user.family_id).await {
        Ok(latest) => latest,
        Err(e) => return storage_error(e),
    };
    let pending = match state
        .changes
        .count_since(&user.family_id, since, query.client_id())
        .await
    {
        Ok(pending) => pending,
        Err(e) => return storage_error(e),
    };

    Json(StatusResponse {
        last_sync: latest.unwrap_or_default(),
        pending,
        server_time: Utc::now(),
    })
    .into_response()
}
