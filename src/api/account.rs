//! Account endpoints: balance, top-up, usage and payments.

use std::sync::Arc;

use axum::{
    extract::{Extension, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use super::auth::AuthUser;
use super::error_response;
use super::routes::AppState;
use crate::labeler::{Account, TopUp};
use crate::ledger::UsageSummary;
use crate::store::Payment;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_account))
        .route("/top-up", post(top_up))
        .route("/usage", get(get_usage))
        .route("/payments", get(list_payments))
}

#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    /// Amount to credit, in account currency
    pub amount: f64,
}

async fn get_account(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Account>, (StatusCode, String)> {
    state
        .labeler
        .account(&user.id)
        .map(Json)
        .map_err(error_response)
}

async fn top_up(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<TopUpRequest>,
) -> Result<Json<TopUp>, (StatusCode, String)> {
    state
        .labeler
        .top_up(&user.id, req.amount)
        .map(Json)
        .map_err(error_response)
}

async fn get_usage(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<UsageSummary>, (StatusCode, String)> {
    state
        .labeler
        .usage(&user.id)
        .map(Json)
        .map_err(error_response)
}

async fn list_payments(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<Payment>>, (StatusCode, String)> {
    state
        .labeler
        .payments(&user.id)
        .map(Json)
        .map_err(error_response)
}
