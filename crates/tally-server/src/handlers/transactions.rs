//! Transaction categorization handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{AppError, AppState, TenantId};
use tally_core::models::{ApplyOutcome, StatementTransaction, TransactionCategory};

/// Result of a categorization change
#[derive(Debug, Serialize)]
pub struct CategorizeResponse {
    pub outcome: ApplyOutcome,
    pub transaction: StatementTransaction,
}

fn respond(
    state: &AppState,
    tenant_id: i64,
    transaction_id: i64,
    outcome: ApplyOutcome,
) -> Result<Json<CategorizeResponse>, AppError> {
    let transaction = state.db().require_transaction(tenant_id, transaction_id)?;
    Ok(Json(CategorizeResponse {
        outcome,
        transaction,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SetCategoryRequest {
    pub sub_category_id: i64,
}

/// POST /api/transactions/:id/category - Categorize by hand
///
/// Manual categories are never replaced by automatic matching.
pub async fn set_manual_category(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<i64>,
    Json(req): Json<SetCategoryRequest>,
) -> Result<Json<CategorizeResponse>, AppError> {
    let outcome = state
        .orchestrator
        .categorizer()
        .set_manual_category(tenant_id, id, req.sub_category_id)?;
    respond(&state, tenant_id, id, outcome)
}

/// DELETE /api/transactions/:id/category - Clear a keyword category
pub async fn clear_category(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<i64>,
) -> Result<Json<CategorizeResponse>, AppError> {
    let outcome = state
        .orchestrator
        .categorizer()
        .clear_category(tenant_id, id)?;
    respond(&state, tenant_id, id, outcome)
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(default = "default_verified")]
    pub verified: bool,
}

fn default_verified() -> bool {
    true
}

/// POST /api/transactions/:id/verify - Confirm (or unconfirm) a transaction
pub async fn verify_transaction(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<i64>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<CategorizeResponse>, AppError> {
    let outcome = state
        .orchestrator
        .categorizer()
        .verify_transaction(tenant_id, id, req.verified)?;
    respond(&state, tenant_id, id, outcome)
}

/// GET /api/transactions/:id/matches - Match records, primary first
pub async fn list_matches(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<i64>,
) -> Result<Json<Vec<TransactionCategory>>, AppError> {
    state.db().require_transaction(tenant_id, id)?;
    Ok(Json(state.db().list_match_records(tenant_id, id)?))
}

#[derive(Debug, Serialize)]
pub struct PromoteResponse {
    pub outcome: ApplyOutcome,
    pub record_id: i64,
}

/// POST /api/matches/:id/promote - Make a match record the primary one
pub async fn promote_match(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Path(record_id): Path<i64>,
) -> Result<Json<PromoteResponse>, AppError> {
    let outcome = state
        .orchestrator
        .categorizer()
        .promote_match(tenant_id, record_id)?;
    Ok(Json(PromoteResponse { outcome, record_id }))
}
