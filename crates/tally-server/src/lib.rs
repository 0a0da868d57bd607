//! Tally Web Server
//!
//! Axum-based REST API over the statement categorization pipeline.
//!
//! Every tenant-scoped route reads the tenant from the `X-Tenant-Id` header;
//! there is no ambient tenant. Statement processing happens on the
//! in-process queue lanes started by [`serve`].

use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use tally_core::db::Database;
use tally_core::pipeline::{JobHandler, Orchestrator, QueueReceivers};

mod handlers;

/// Maximum statement upload size (20 MB)
pub const MAX_UPLOAD_SIZE: usize = 20 * 1024 * 1024;

/// Maximum pagination limit
pub const MAX_PAGE_LIMIT: i64 = 1000;

/// Header carrying the tenant id
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Server configuration
#[derive(Clone, Default)]
pub struct ServerConfig {
    /// Allowed CORS origins (empty = same-origin only)
    pub allowed_origins: Vec<String>,
}

/// Shared application state
pub struct AppState {
    pub orchestrator: Orchestrator,
}

impl AppState {
    pub fn db(&self) -> &Database {
        self.orchestrator.db()
    }
}

/// Tenant resolved from the `X-Tenant-Id` header
///
/// Rejects with 400 when the header is missing or not a number, and with 404
/// when no such tenant exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantId(pub i64);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for TenantId {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::bad_request("Missing X-Tenant-Id header"))?;
        let id: i64 = raw
            .trim()
            .parse()
            .map_err(|_| AppError::bad_request(&format!("Invalid tenant id: {}", raw)))?;

        if state.db().get_tenant(id)?.is_none() {
            return Err(AppError::not_found(&format!("Tenant {} not found", id)));
        }
        Ok(TenantId(id))
    }
}

/// Success response
#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Create the application router
pub fn create_router(orchestrator: Orchestrator, config: ServerConfig) -> Router {
    let state = Arc::new(AppState { orchestrator });

    let api_routes = Router::new()
        // Tenants and banks (not tenant-scoped)
        .route(
            "/tenants",
            get(handlers::list_tenants).post(handlers::create_tenant),
        )
        .route("/banks", get(handlers::list_banks).post(handlers::create_bank))
        // Categories and accounts
        .route(
            "/categories",
            get(handlers::list_categories).post(handlers::create_category_path),
        )
        .route(
            "/accounts",
            get(handlers::list_accounts).post(handlers::create_account),
        )
        .route(
            "/accounts/:id/keywords",
            post(handlers::create_account_keyword),
        )
        .route("/account-keywords", get(handlers::list_account_keywords))
        .route(
            "/account-keywords/:id",
            delete(handlers::delete_account_keyword),
        )
        // Keyword rules
        .route(
            "/keywords",
            get(handlers::list_keywords).post(handlers::create_keyword),
        )
        .route("/keywords/test", post(handlers::test_keyword))
        .route(
            "/keywords/:id",
            get(handlers::get_keyword)
                .patch(handlers::update_keyword)
                .delete(handlers::delete_keyword),
        )
        // Statements
        .route(
            "/statements",
            get(handlers::list_statements).post(handlers::upload_statement),
        )
        .route(
            "/statements/:id",
            get(handlers::get_statement).delete(handlers::delete_statement),
        )
        .route("/statements/:id/rematch", post(handlers::rematch_statement))
        .route(
            "/statements/:id/transactions",
            get(handlers::list_statement_transactions),
        )
        .route(
            "/statements/:id/account-matches",
            get(handlers::list_statement_account_matches),
        )
        // Transactions
        .route(
            "/transactions/:id/category",
            post(handlers::set_manual_category).delete(handlers::clear_category),
        )
        .route("/transactions/:id/verify", post(handlers::verify_transaction))
        .route("/transactions/:id/matches", get(handlers::list_matches))
        .route("/matches/:id/promote", post(handlers::promote_match))
        // Suggestions
        .route("/suggestions", get(handlers::list_suggestions))
        .route("/suggestions/confirm", post(handlers::confirm_suggestion))
        // Dead letters
        .route("/failed-jobs", get(handlers::list_failed_jobs))
        .route("/failed-jobs/:id/retry", post(handlers::retry_failed_job))
        // Denormalization drift
        .route("/drift", get(handlers::get_drift))
        .route("/drift/repair", post(handlers::repair_drift));

    let cors = if config.allowed_origins.is_empty() {
        CorsLayer::new()
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE, header::HeaderName::from_static(TENANT_HEADER)])
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE, header::HeaderName::from_static(TENANT_HEADER)])
    };

    Router::new()
        .nest("/api", api_routes)
        .with_state(state)
        .layer(axum::extract::DefaultBodyLimit::max(MAX_UPLOAD_SIZE))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
}

/// Start the queue workers and the server
///
/// Statements left `processing` by a previous run are failed first, and
/// every pending stage is dispatched again.
pub async fn serve(
    orchestrator: Orchestrator,
    receivers: QueueReceivers,
    host: &str,
    port: u16,
    config: ServerConfig,
) -> anyhow::Result<()> {
    let handler: Arc<dyn JobHandler> = Arc::new(orchestrator.clone());
    let workers = receivers.spawn_workers(handler, &orchestrator.config().queue);
    info!(workers = workers.len(), "Queue workers started");

    match orchestrator.recover_and_resume().await {
        Ok(report) if report.recovered > 0 => {
            warn!(
                "⚠️  Recovered {} stuck statement stage(s) from previous server session",
                report.recovered
            );
        }
        Ok(_) => {}
        Err(e) => {
            warn!("Failed to recover stuck statements: {}", e);
        }
    }

    let app = create_router(orchestrator, config);
    let addr = format!("{}:{}", host, port);

    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let result = axum::serve(listener, app).await;
    workers.abort();
    result?;

    Ok(())
}

// ============================================================================
// Error Handling
// ============================================================================

/// Application error type with proper HTTP status codes
pub struct AppError {
    status: StatusCode,
    message: String,
    internal: Option<anyhow::Error>,
}

impl AppError {
    pub fn bad_request(msg: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn not_found(msg: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn conflict(msg: &str) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.to_string(),
            internal: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(err) = &self.internal {
            error!(error = %err, "Internal error");
        }

        let body = Json(serde_json::json!({
            "error": self.message
        }));

        (self.status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err = err.into();

        // Client errors from the core carry their own message
        if let Some(core) = err.downcast_ref::<tally_core::Error>() {
            let message = core.to_string();
            match core {
                tally_core::Error::NotFound(_) => return Self::not_found(&message),
                tally_core::Error::Conflict(_) => return Self::conflict(&message),
                tally_core::Error::InvalidData(_) | tally_core::Error::InvalidKeyword(_) => {
                    return Self::bad_request(&message)
                }
                _ => {}
            }
        }

        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            // Return generic message to client
            message: "An internal error occurred".to_string(),
            // Keep full error for logging
            internal: Some(err),
        }
    }
}

#[cfg(test)]
mod tests;
