use axum::{extract::State, Json};

use super::AppState;
use crate::auth::TokenStatus;
use crate::gateway::SystemStatus;
use crate::resilience::BreakerStatus;
use crate::security::QuotaStatus;

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(state.gateway.status())
}

pub async fn get_breakers(State(state): State<AppState>) -> Json<Vec<BreakerStatus>> {
    Json(state.gateway.breakers().statuses())
}

pub async fn get_quotas(State(state): State<AppState>) -> Json<Vec<QuotaStatus>> {
    Json(state.gateway.limiter().statuses())
}

pub async fn get_tokens(State(state): State<AppState>) -> Json<Vec<TokenStatus>> {
    Json(state.gateway.token_statuses())
}
