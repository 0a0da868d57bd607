//! Keyword rule handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{AppError, AppState, SuccessResponse, TenantId};
use tally_core::models::{Keyword, KeywordUpdate, MatchResult, NewKeyword};

/// GET /api/keywords - List keyword rules in evaluation order
pub async fn list_keywords(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
) -> Result<Json<Vec<Keyword>>, AppError> {
    Ok(Json(state.db().list_keywords(tenant_id)?))
}

/// GET /api/keywords/:id - Get a keyword rule
pub async fn get_keyword(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<i64>,
) -> Result<Json<Keyword>, AppError> {
    let keyword = state
        .db()
        .get_keyword(tenant_id, id)?
        .ok_or_else(|| AppError::not_found("Keyword not found"))?;
    Ok(Json(keyword))
}

/// POST /api/keywords - Create a keyword rule
///
/// Regex rules are compiled under the configured limits first; a rule that
/// does not compile is rejected with 400.
pub async fn create_keyword(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Json(req): Json<NewKeyword>,
) -> Result<Json<Keyword>, AppError> {
    let id = state
        .orchestrator
        .categorizer()
        .create_keyword(tenant_id, &req)?;
    info!(tenant_id, keyword_id = id, "Keyword created via API");

    let keyword = state
        .db()
        .get_keyword(tenant_id, id)?
        .ok_or_else(|| AppError::not_found("Keyword not found after creation"))?;
    Ok(Json(keyword))
}

/// PATCH /api/keywords/:id - Update fields of a keyword rule
pub async fn update_keyword(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<i64>,
    Json(req): Json<KeywordUpdate>,
) -> Result<Json<Keyword>, AppError> {
    let keyword = state
        .orchestrator
        .categorizer()
        .update_keyword(tenant_id, id, &req)?;
    Ok(Json(keyword))
}

/// DELETE /api/keywords/:id - Delete a keyword rule
pub async fn delete_keyword(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse>, AppError> {
    if !state.db().delete_keyword(tenant_id, id)? {
        return Err(AppError::not_found("Keyword not found"));
    }
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Debug, Deserialize)]
pub struct TestKeywordRequest {
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct TestKeywordResponse {
    pub description: String,
    /// The first matching rule, or null
    #[serde(rename = "match")]
    pub matched: Option<MatchResult>,
}

/// POST /api/keywords/test - Run the tenant's rules against a description
pub async fn test_keyword(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Json(req): Json<TestKeywordRequest>,
) -> Result<Json<TestKeywordResponse>, AppError> {
    let matched = state
        .orchestrator
        .categorizer()
        .match_description(tenant_id, &req.description)?;
    Ok(Json(TestKeywordResponse {
        description: req.description,
        matched,
    }))
}
