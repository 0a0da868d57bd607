//! Keyword suggestion handlers

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::{AppError, AppState, TenantId};
use tally_core::models::{KeywordSuggestion, NewKeyword};
use tally_core::ConfirmOutcome;

#[derive(Debug, Deserialize)]
pub struct SuggestionsQuery {
    /// Limit suggestions to one statement
    pub statement_id: Option<i64>,
}

/// GET /api/suggestions - Propose keywords for unmatched transactions
pub async fn list_suggestions(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Query(params): Query<SuggestionsQuery>,
) -> Result<Json<Vec<KeywordSuggestion>>, AppError> {
    let suggestions = state
        .orchestrator
        .categorizer()
        .suggest_keywords(tenant_id, params.statement_id)?;
    Ok(Json(suggestions))
}

/// POST /api/suggestions/confirm - Create the keyword and rematch unmatched
/// transactions
pub async fn confirm_suggestion(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Json(req): Json<NewKeyword>,
) -> Result<Json<ConfirmOutcome>, AppError> {
    let outcome = state
        .orchestrator
        .categorizer()
        .confirm_suggestion(tenant_id, &req)?;
    Ok(Json(outcome))
}
