//! Request handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use editorial_core::{ManuscriptId, ReviewerKind, ReviewerRef};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use super::AppState;
use crate::scheduler::SchedulerError;
use crate::signed_link::{InviteLink, LinkError};
use crate::sweep::{SweepJob, SweepReport};
use crate::workflow::{InviteResponse, TimelineEntry, WorkflowError};

/// Validate the authorization header against the admin token.
#[allow(clippy::result_large_err)] // Response is large but this is idiomatic in Axum handlers
fn validate_auth(headers: &HeaderMap, auth_token: &Option<String>) -> Result<(), Response> {
    let Some(expected_token) = auth_token else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "Admin API is disabled (ADMIN_AUTH_TOKEN not configured)",
        )
            .into_response());
    };

    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match auth_header.and_then(|v| v.strip_prefix("Bearer ")) {
        Some(provided) if provided == expected_token => Ok(()),
        Some(_) => Err((StatusCode::UNAUTHORIZED, "Invalid token").into_response()),
        None => Err((
            StatusCode::UNAUTHORIZED,
            "Missing or malformed Authorization header. Expected: Bearer <token>",
        )
            .into_response()),
    }
}

fn workflow_error(err: WorkflowError) -> Response {
    match err {
        WorkflowError::NotFound { .. } => (StatusCode::NOT_FOUND, err.to_string()).into_response(),
        WorkflowError::Rejected(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()).into_response()
        }
        WorkflowError::NotPermitted { .. } => {
            (StatusCode::FORBIDDEN, err.to_string()).into_response()
        }
        WorkflowError::Repository(_) | WorkflowError::Storage(_) => {
            error!("Request failed: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
        }
    }
}

/// Handler: GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "editorial",
        "version": editorial_core::get_service_version(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct InviteQuery {
    pub expires: i64,
    pub signature: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InviteAnswer {
    pub manuscript: String,
    pub response: String,
    /// `false` when another answer got there first.
    pub recorded: bool,
}

/// Handler: GET /invitations/{manuscript}/{response}/{kind}/{reviewer}
///
/// The link carries its own signature and expiry, so no login is needed.
pub async fn respond_to_invitation(
    State(state): State<Arc<AppState>>,
    Path((manuscript, response, kind, reviewer)): Path<(i64, String, String, i64)>,
    Query(query): Query<InviteQuery>,
) -> Result<Json<InviteAnswer>, Response> {
    let bad_link = || (StatusCode::NOT_FOUND, "Unknown invitation link").into_response();
    let response: InviteResponse = response.parse().map_err(|_| bad_link())?;
    let kind: ReviewerKind = kind.parse().map_err(|_| bad_link())?;

    let link = InviteLink {
        manuscript: ManuscriptId(manuscript),
        response,
        reviewer: ReviewerRef::from_parts(kind, reviewer),
        expires: query.expires,
    };
    let now = state.service.clock().now();
    state
        .service
        .interpreter()
        .signer
        .verify(&link, &query.signature, now)
        .map_err(|e| {
            warn!("Rejected invitation link for manuscript {}: {}", manuscript, e);
            match e {
                LinkError::Expired => {
                    (StatusCode::GONE, "This invitation link has expired").into_response()
                }
                LinkError::BadSignature | LinkError::EmptySecret => {
                    (StatusCode::FORBIDDEN, "Invalid invitation link").into_response()
                }
            }
        })?;

    let agg = state
        .service
        .load(link.manuscript)
        .await
        .map_err(workflow_error)?;
    let recorded = state
        .service
        .answer_invitation(&agg, link.reviewer, response)
        .await
        .map_err(workflow_error)?;

    Ok(Json(InviteAnswer {
        manuscript: agg.manuscript().code.clone(),
        response: response.to_string(),
        recorded,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct SweepQuery {
    #[serde(default)]
    pub dry_run: bool,
}

/// Handler: POST /admin/sweeps/{job}
pub async fn run_sweep(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(job): Path<String>,
    Query(query): Query<SweepQuery>,
) -> Result<Json<SweepReport>, Response> {
    validate_auth(&headers, &state.admin_auth_token)?;

    let job: SweepJob = job
        .parse()
        .map_err(|e: editorial_core::ParseError| {
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        })?;

    info!("Manual {} sweep requested", job);
    match state.scheduler.run(job, query.dry_run).await {
        Ok(report) => Ok(Json(report)),
        Err(err @ SchedulerError::AlreadyRunning(_)) => {
            Err((StatusCode::CONFLICT, err.to_string()).into_response())
        }
        Err(err) => {
            error!("Manual {} sweep failed: {}", job, err);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Sweep failed").into_response())
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TimelineResponse {
    pub code: String,
    pub events: Vec<TimelineEntry>,
}

/// Handler: GET /admin/manuscripts/{code}/timeline
pub async fn timeline(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<TimelineResponse>, Response> {
    validate_auth(&headers, &state.admin_auth_token)?;

    let events = state
        .service
        .timeline(&code)
        .await
        .map_err(workflow_error)?;
    Ok(Json(TimelineResponse { code, events }))
}
