//! HTTP request handlers
//!
//! REST endpoints for license administration, task control, and the
//! accuracy/pattern queries.

use crate::api::server::AppContext;
use crate::error::Error;
use crate::events::EngineEvent;
use crate::history::PatternSummary;
use crate::licensing::{License, LicenseError};
use crate::supervisor::{StartOutcome, TaskSnapshot};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateLicenseRequest {
    /// Generated when omitted
    pub id: Option<String>,
    pub max_uses: u32,
    pub ttl_days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub subscriber_id: i64,
}

#[derive(Debug, Serialize)]
pub struct LicenseListResponse {
    pub licenses: Vec<License>,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub removed: u64,
}

#[derive(Debug, Deserialize)]
pub struct StartTaskRequest {
    pub subscriber_id: i64,
    pub feed: String,
    pub license_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StopTaskRequest {
    pub subscriber_id: i64,
    pub feed: String,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskSnapshot>,
}

#[derive(Debug, Deserialize)]
pub struct AccuracyQuery {
    pub feed: Option<String>,
    pub subscriber_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PatternQuery {
    pub feed: String,
}

type HandlerError = (StatusCode, Json<StatusResponse>);

/// Map component errors onto HTTP statuses. License failures carry the
/// most specific codes; anything unexpected is a 500.
fn error_response(e: Error) -> HandlerError {
    let status = match &e {
        Error::License(le) => match le {
            LicenseError::NotFound(_) => StatusCode::NOT_FOUND,
            LicenseError::AlreadyExists(_)
            | LicenseError::LimitReached(_)
            | LicenseError::AlreadyRedeemed(_, _) => StatusCode::CONFLICT,
            LicenseError::Inactive(_) => StatusCode::FORBIDDEN,
            LicenseError::Expired(_) => StatusCode::GONE,
        },
        Error::Unlicensed { .. } => StatusCode::FORBIDDEN,
        Error::BadRequest(_) => StatusCode::BAD_REQUEST,
        Error::Task(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Request failed: {}", e);
    }

    (
        status,
        Json(StatusResponse {
            status: format!("error: {}", e),
        }),
    )
}

// ============================================================================
// Health Endpoint
// ============================================================================

/// GET /health - Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "tipcast".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// License Endpoints
// ============================================================================

/// POST /licenses - Create a license
pub async fn create_license(
    State(ctx): State<AppContext>,
    Json(req): Json<CreateLicenseRequest>,
) -> Result<Json<License>, HandlerError> {
    let id = req.id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let ttl = req.ttl_days.map(chrono::Duration::days);

    let license = ctx
        .licenses
        .create(&id, req.max_uses, ttl)
        .await
        .map_err(error_response)?;

    info!("License '{}' created (max_uses {})", license.id, license.max_uses);
    ctx.bus.emit_lossy(EngineEvent::LicenseCreated {
        id: license.id.clone(),
        max_uses: license.max_uses,
        expires_at: license.expires_at,
        timestamp: Utc::now(),
    });

    Ok(Json(license))
}

/// POST /licenses/:id/redeem - Redeem a license for a subscriber
pub async fn redeem_license(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(req): Json<RedeemRequest>,
) -> Result<Json<License>, HandlerError> {
    let license = ctx
        .licenses
        .redeem(&id, req.subscriber_id)
        .await
        .map_err(error_response)?;

    info!("License '{}' redeemed by subscriber {}", id, req.subscriber_id);
    Ok(Json(license))
}

/// POST /licenses/:id/revoke - Revoke a license
pub async fn revoke_license(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, HandlerError> {
    ctx.licenses.revoke(&id).await.map_err(error_response)?;

    info!("License '{}' revoked", id);
    ctx.bus.emit_lossy(EngineEvent::LicenseRevoked {
        id,
        timestamp: Utc::now(),
    });

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /licenses/:id - Delete a license
pub async fn delete_license(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, HandlerError> {
    ctx.licenses.remove(&id).await.map_err(error_response)?;

    info!("License '{}' deleted", id);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /licenses - List all licenses in creation order
pub async fn list_licenses(State(ctx): State<AppContext>) -> Json<LicenseListResponse> {
    Json(LicenseListResponse {
        licenses: ctx.licenses.list().await,
    })
}

/// POST /licenses/purge - Delete every license
pub async fn purge_licenses(
    State(ctx): State<AppContext>,
) -> Result<Json<PurgeResponse>, HandlerError> {
    let removed = ctx.licenses.purge_all().await.map_err(error_response)?;

    info!("Purged {} licenses", removed);
    Ok(Json(PurgeResponse { removed }))
}

// ============================================================================
// Task Endpoints
// ============================================================================

/// POST /tasks/start - Start a poll task, redeeming a license if given
pub async fn start_task(
    State(ctx): State<AppContext>,
    Json(req): Json<StartTaskRequest>,
) -> Result<Json<StatusResponse>, HandlerError> {
    let outcome = ctx
        .supervisor
        .start(req.subscriber_id, &req.feed, req.license_id.as_deref())
        .await
        .map_err(error_response)?;

    let status = match outcome {
        StartOutcome::Started => "started",
        StartOutcome::AlreadyRunning => "already_running",
    };
    Ok(Json(StatusResponse {
        status: status.to_string(),
    }))
}

/// POST /tasks/stop - Request a cooperative stop
pub async fn stop_task(
    State(ctx): State<AppContext>,
    Json(req): Json<StopTaskRequest>,
) -> Result<Json<StatusResponse>, HandlerError> {
    ctx.supervisor
        .stop(req.subscriber_id, &req.feed)
        .await
        .map_err(error_response)?;

    Ok(Json(StatusResponse {
        status: "stopping".to_string(),
    }))
}

/// GET /tasks - Snapshot of every known task and its state
pub async fn list_tasks(State(ctx): State<AppContext>) -> Json<TaskListResponse> {
    Json(TaskListResponse {
        tasks: ctx.supervisor.snapshot().await,
    })
}

// ============================================================================
// Observability Endpoints
// ============================================================================

/// GET /accuracy - Prediction scores; filter by feed and subscriber
pub async fn get_accuracy(
    State(ctx): State<AppContext>,
    Query(query): Query<AccuracyQuery>,
) -> Json<serde_json::Value> {
    match (query.feed, query.subscriber_id) {
        (Some(feed), Some(subscriber)) => {
            let stats = ctx.accuracy.stats(&feed, subscriber).await;
            Json(json!({
                "feed": feed,
                "subscriber_id": subscriber,
                "correct": stats.correct,
                "total": stats.total,
                "ratio": stats.ratio(),
            }))
        }
        (Some(feed), None) => {
            let stats = ctx.accuracy.feed_stats(&feed).await;
            Json(json!({
                "feed": feed,
                "correct": stats.correct,
                "total": stats.total,
                "ratio": stats.ratio(),
            }))
        }
        (None, _) => {
            let entries: Vec<serde_json::Value> = ctx
                .accuracy
                .all_stats()
                .await
                .into_iter()
                .map(|(feed, subscriber, stats)| {
                    json!({
                        "feed": feed,
                        "subscriber_id": subscriber,
                        "correct": stats.correct,
                        "total": stats.total,
                        "ratio": stats.ratio(),
                    })
                })
                .collect();
            Json(json!({ "entries": entries }))
        }
    }
}

/// GET /pattern - Recent outcome pattern for a feed
pub async fn get_pattern(
    State(ctx): State<AppContext>,
    Query(query): Query<PatternQuery>,
) -> Json<PatternSummary> {
    Json(ctx.history.pattern_summary(&query.feed).await)
}
