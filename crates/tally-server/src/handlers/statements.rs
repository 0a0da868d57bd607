//! Statement upload and lifecycle handlers

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    Json,
};
use serde::Deserialize;
use tracing::info;

use crate::{AppError, AppState, SuccessResponse, TenantId, MAX_PAGE_LIMIT, MAX_UPLOAD_SIZE};
use tally_core::db::{StatementFilter, TransactionQuery};
use tally_core::models::{
    AccountMatch, BankStatement, MatchingStatus, OcrStatus, StatementTransaction,
};
use tally_core::pipeline::StatementStatus;

/// POST /api/statements - Upload a statement PDF
///
/// Expects multipart form with:
/// - file: PDF statement (required)
/// - bank_id: Bank the statement is from (required)
///
/// Returns as soon as the file is stored; OCR runs on the queue.
pub async fn upload_statement(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    mut multipart: Multipart,
) -> Result<Json<BankStatement>, AppError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut bank_id: Option<i64> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(&format!("Failed to read form field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let file_name = field
                    .file_name()
                    .unwrap_or("statement.pdf")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| AppError::bad_request("Failed to read file data"))?;

                if bytes.len() > MAX_UPLOAD_SIZE {
                    return Err(AppError::bad_request(&format!(
                        "File too large. Maximum size is {} MB",
                        MAX_UPLOAD_SIZE / 1024 / 1024
                    )));
                }

                file = Some((file_name, bytes.to_vec()));
            }
            "bank_id" => {
                let value = field
                    .text()
                    .await
                    .map_err(|_| AppError::bad_request("Failed to read bank_id"))?;
                bank_id = Some(value.trim().parse().map_err(|_| {
                    AppError::bad_request(&format!("Invalid bank_id: {}", value))
                })?);
            }
            _ => {}
        }
    }

    let (file_name, data) = file.ok_or_else(|| AppError::bad_request("Missing file field"))?;
    let bank_id = bank_id.ok_or_else(|| AppError::bad_request("Missing bank_id field"))?;

    let statement = state
        .orchestrator
        .upload_statement(tenant_id, bank_id, &file_name, data)
        .await?;

    Ok(Json(statement))
}

/// Query parameters for listing statements
#[derive(Debug, Deserialize)]
pub struct StatementsQuery {
    pub ocr_status: Option<OcrStatus>,
    pub matching_status: Option<MatchingStatus>,
    pub bank_id: Option<i64>,
    /// Maximum number of results (default 50)
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// GET /api/statements - List statements, newest first
pub async fn list_statements(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Query(params): Query<StatementsQuery>,
) -> Result<Json<Vec<BankStatement>>, AppError> {
    let filter = StatementFilter {
        ocr_status: params.ocr_status,
        matching_status: params.matching_status,
        bank_id: params.bank_id,
        limit: Some(params.limit.clamp(1, MAX_PAGE_LIMIT)),
        offset: Some(params.offset.max(0)),
    };
    Ok(Json(state.db().list_statements(tenant_id, &filter)?))
}

/// GET /api/statements/:id - Statement detail with its pipeline stage
pub async fn get_statement(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<i64>,
) -> Result<Json<StatementStatus>, AppError> {
    Ok(Json(state.orchestrator.statement_status(tenant_id, id)?))
}

/// DELETE /api/statements/:id - Delete a statement and its transactions
pub async fn delete_statement(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.orchestrator.delete_statement(tenant_id, id)?;
    Ok(Json(SuccessResponse { success: true }))
}

/// POST /api/statements/:id/rematch - Queue a fresh transaction matching pass
pub async fn rematch_statement(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<i64>,
) -> Result<Json<BankStatement>, AppError> {
    let statement = state.orchestrator.rematch_statement(tenant_id, id).await?;
    info!(tenant_id, statement_id = id, "Rematch queued via API");
    Ok(Json(statement))
}

/// GET /api/statements/:id/transactions - Extracted transactions
pub async fn list_statement_transactions(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<i64>,
) -> Result<Json<Vec<StatementTransaction>>, AppError> {
    state.db().require_statement(tenant_id, id)?;
    let transactions = state
        .db()
        .list_transactions(tenant_id, &TransactionQuery::for_statement(id))?;
    Ok(Json(transactions))
}

/// GET /api/statements/:id/account-matches - Account assignments
pub async fn list_statement_account_matches(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<i64>,
) -> Result<Json<Vec<AccountMatch>>, AppError> {
    state.db().require_statement(tenant_id, id)?;
    Ok(Json(state.db().list_account_matches(tenant_id, id)?))
}
