//! Admin HTTP API.
//!
//! # Endpoints
//! - `GET /admin/status`: full system report
//! - `GET /admin/breakers`: circuit breaker states
//! - `GET /admin/quotas`: per-API quota usage
//! - `GET /admin/tokens`: cached OAuth token status
//!
//! Every endpoint requires `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::http::Request;
use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::gateway::Gateway;

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub api_key: Arc<str>,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        let api_key = Arc::from(gateway.config().admin.api_key.as_str());
        Self { gateway, api_key }
    }
}

/// UUID v4 request IDs for the `x-request-id` header.
#[derive(Debug, Clone, Copy, Default)]
struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// Build the admin router with auth, tracing, request IDs and a request timeout.
#[allow(deprecated)]
pub fn setup_admin_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/breakers", get(get_breakers))
        .route("/admin/quotas", get(get_quotas))
        .route("/admin/tokens", get(get_tokens))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::new(request_timeout)),
        )
}

/// Serve the admin API on `listener` until `shutdown` flips to `true`.
pub async fn serve_admin(
    listener: TcpListener,
    state: AppState,
    request_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin API starting");

    let app = setup_admin_router(state, request_timeout);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|triggered| *triggered).await;
        })
        .await?;

    tracing::info!("Admin API stopped");
    Ok(())
}
