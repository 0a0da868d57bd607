//! Tenant, bank, category, and account handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use tracing::info;

use crate::{AppError, AppState, SuccessResponse, TenantId};
use tally_core::models::{
    Account, AccountKeyword, Bank, CategoryPath, NewAccountKeyword, SubCategoryWithPath, Tenant,
};

// ========== Tenants ==========

#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    pub name: String,
}

/// GET /api/tenants - List tenants
pub async fn list_tenants(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Tenant>>, AppError> {
    Ok(Json(state.db().list_tenants()?))
}

/// POST /api/tenants - Create a tenant
pub async fn create_tenant(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTenantRequest>,
) -> Result<Json<Tenant>, AppError> {
    let id = state.db().create_tenant(&req.name)?;
    info!(tenant_id = id, name = %req.name, "Tenant created");
    Ok(Json(state.db().require_tenant(id)?))
}

// ========== Banks ==========

#[derive(Debug, Deserialize)]
pub struct CreateBankRequest {
    pub code: String,
    pub name: String,
    /// Overrides the configured OCR endpoint for this bank
    pub ocr_endpoint: Option<String>,
}

/// GET /api/banks - List banks
pub async fn list_banks(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Bank>>, AppError> {
    Ok(Json(state.db().list_banks()?))
}

/// POST /api/banks - Register a bank
pub async fn create_bank(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateBankRequest>,
) -> Result<Json<Bank>, AppError> {
    let id = state
        .db()
        .create_bank(&req.code, &req.name, req.ocr_endpoint.as_deref())?;
    let bank = state
        .db()
        .get_bank(id)?
        .ok_or_else(|| AppError::not_found("Bank not found after creation"))?;
    Ok(Json(bank))
}

// ========== Categories ==========

/// Request body for creating a category chain
#[derive(Debug, Deserialize)]
pub struct CreateCategoryPathRequest {
    #[serde(rename = "type")]
    pub type_name: String,
    pub category: String,
    pub sub_category: String,
}

/// GET /api/categories - List sub-categories with their full path
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
) -> Result<Json<Vec<SubCategoryWithPath>>, AppError> {
    Ok(Json(state.db().list_sub_categories(tenant_id)?))
}

/// POST /api/categories - Create (or reuse) `type > category > sub-category`
pub async fn create_category_path(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Json(req): Json<CreateCategoryPathRequest>,
) -> Result<Json<CategoryPath>, AppError> {
    let path = state.db().ensure_category_path(
        tenant_id,
        &req.type_name,
        &req.category,
        &req.sub_category,
    )?;
    Ok(Json(path))
}

// ========== Accounts ==========

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub code: String,
    pub name: String,
}

/// GET /api/accounts - List ledger accounts
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
) -> Result<Json<Vec<Account>>, AppError> {
    Ok(Json(state.db().list_accounts(tenant_id)?))
}

/// POST /api/accounts - Create a ledger account
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Json(req): Json<CreateAccountRequest>,
) -> Result<Json<Account>, AppError> {
    let id = state.db().create_account(tenant_id, &req.code, &req.name)?;
    let account = state
        .db()
        .get_account(tenant_id, id)?
        .ok_or_else(|| AppError::not_found("Account not found after creation"))?;
    Ok(Json(account))
}

/// POST /api/accounts/:id/keywords - Add an account keyword
pub async fn create_account_keyword(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Path(account_id): Path<i64>,
    Json(req): Json<NewAccountKeyword>,
) -> Result<Json<AccountKeyword>, AppError> {
    let id = state
        .orchestrator
        .categorizer()
        .create_account_keyword(tenant_id, account_id, &req)?;
    let keyword = state
        .db()
        .list_account_keywords(tenant_id)?
        .into_iter()
        .find(|k| k.id == id)
        .ok_or_else(|| AppError::not_found("Account keyword not found after creation"))?;
    Ok(Json(keyword))
}

/// GET /api/account-keywords - List account keywords
pub async fn list_account_keywords(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
) -> Result<Json<Vec<AccountKeyword>>, AppError> {
    Ok(Json(state.db().list_account_keywords(tenant_id)?))
}

/// DELETE /api/account-keywords/:id - Delete an account keyword
pub async fn delete_account_keyword(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse>, AppError> {
    if !state.db().delete_account_keyword(tenant_id, id)? {
        return Err(AppError::not_found("Account keyword not found"));
    }
    Ok(Json(SuccessResponse { success: true }))
}
