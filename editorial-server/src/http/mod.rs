//! HTTP surface.
//!
//! - `GET /health`
//! - `GET /invitations/{manuscript}/{response}/{kind}/{reviewer}` answers a
//!   review invitation from a signed email link
//! - `POST /admin/sweeps/{job}` and `GET /admin/manuscripts/{code}/timeline`
//!   require `Authorization: Bearer <ADMIN_AUTH_TOKEN>`

pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::scheduler::SweepScheduler;
use crate::workflow::WorkflowService;

pub struct AppState {
    pub service: Arc<WorkflowService>,
    pub scheduler: Arc<SweepScheduler>,
    /// `None` disables the admin routes.
    pub admin_auth_token: Option<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/invitations/{manuscript}/{response}/{kind}/{reviewer}",
            get(handlers::respond_to_invitation),
        )
        .route("/admin/sweeps/{job}", post(handlers::run_sweep))
        .route(
            "/admin/manuscripts/{code}/timeline",
            get(handlers::timeline),
        )
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
