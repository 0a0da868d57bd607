//! Dead letter and denormalization drift handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{AppError, AppState, TenantId};
use tally_core::models::FailedJob;
use tally_core::pipeline::Job;

#[derive(Debug, Deserialize)]
pub struct FailedJobsQuery {
    /// Include jobs that were already retried
    #[serde(default)]
    pub include_retried: bool,
}

/// GET /api/failed-jobs - Jobs that exhausted their retries
pub async fn list_failed_jobs(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Query(params): Query<FailedJobsQuery>,
) -> Result<Json<Vec<FailedJob>>, AppError> {
    Ok(Json(
        state
            .db()
            .list_failed_jobs(tenant_id, params.include_retried)?,
    ))
}

/// POST /api/failed-jobs/:id/retry - Reset the failed stage and queue it
pub async fn retry_failed_job(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
    Path(id): Path<i64>,
) -> Result<Json<Job>, AppError> {
    let job = state.orchestrator.retry_failed_job(tenant_id, id).await?;
    info!(tenant_id, failed_job_id = id, kind = %job.kind, "Failed job retried via API");
    Ok(Json(job))
}

#[derive(Debug, Serialize)]
pub struct DriftResponse {
    /// Transactions whose denormalized fields disagree with their primary match
    pub transaction_ids: Vec<i64>,
}

/// GET /api/drift - Report denormalization drift
pub async fn get_drift(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
) -> Result<Json<DriftResponse>, AppError> {
    let transaction_ids = state.db().find_denormalization_drift(tenant_id)?;
    Ok(Json(DriftResponse { transaction_ids }))
}

/// POST /api/drift/repair - Copy primary matches back onto drifted rows
pub async fn repair_drift(
    State(state): State<Arc<AppState>>,
    TenantId(tenant_id): TenantId,
) -> Result<Json<DriftResponse>, AppError> {
    let transaction_ids = state.orchestrator.categorizer().repair_drift(tenant_id)?;
    Ok(Json(DriftResponse { transaction_ids }))
}
