//! Server API tests

use super::*;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tally_core::{
    categorize::Categorizer,
    config::PipelineConfig,
    hooks::NoopInvalidator,
    ocr::{parse_ocr_response, MockOcrBackend, MockOcrStep, OcrBackend, OcrExtraction},
    pipeline::RecordingDispatcher,
};
use tempfile::TempDir;
use tower::ServiceExt;

fn march_statement() -> OcrExtraction {
    parse_ocr_response(
        r#"{"success": true, "data": {
            "period_start": "2024-03-01",
            "period_end": "2024-03-31",
            "transactions": [
                {"date": "2024-03-01", "description": "QRIS GOJEK JAKARTA", "debit": 25000},
                {"date": "2024-03-02", "description": "TOKOPEDIA ORDER 8812", "debit": 120000},
                {"date": "2024-03-03", "description": "TOKOPEDIA ORDER 9921", "debit": 80000}
            ]
        }}"#,
    )
    .unwrap()
}

struct TestApp {
    router: Router,
    orchestrator: Orchestrator,
    recorder: Arc<RecordingDispatcher>,
    tenant: i64,
    bank: i64,
    _storage: TempDir,
}

fn setup_test_app_with(ocr: Arc<dyn OcrBackend>) -> TestApp {
    let storage = TempDir::new().unwrap();
    let mut config = PipelineConfig::default();
    config.storage_dir = storage.path().to_path_buf();
    config.ocr.retry_delay = std::time::Duration::ZERO;
    config.matching.retry_delay = std::time::Duration::ZERO;
    config.matching.stage_delay = std::time::Duration::ZERO;

    let db = Database::in_memory().unwrap();
    let tenant = db.create_tenant("Acme").unwrap();
    let bank = db.create_bank("bca", "Bank Central Asia", None).unwrap();

    let recorder = Arc::new(RecordingDispatcher::new());
    let categorizer = Categorizer::new(db, Arc::new(NoopInvalidator), &config);
    let orchestrator = Orchestrator::new(categorizer, ocr, recorder.clone(), config);
    let router = create_router(orchestrator.clone(), ServerConfig::default());

    TestApp {
        router,
        orchestrator,
        recorder,
        tenant,
        bank,
        _storage: storage,
    }
}

fn setup_test_app() -> TestApp {
    setup_test_app_with(Arc::new(MockOcrBackend::new(march_statement())))
}

async fn get_body_json(response: axum::response::Response) -> Value {
    let body = response.into_body();
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

impl TestApp {
    async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.call_as(Some(self.tenant), method, uri, body).await
    }

    async fn call_as(
        &self,
        tenant: Option<i64>,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(t) = tenant {
            builder = builder.header(TENANT_HEADER, t.to_string());
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&json).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        (status, get_body_json(response).await)
    }

    async fn upload(&self, bank_id: Option<i64>, file_name: &str, data: &[u8]) -> (StatusCode, Value) {
        let boundary = "tally-test-boundary";
        let mut body = Vec::new();
        if let Some(id) = bank_id {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"bank_id\"\r\n\r\n{}\r\n",
                    boundary, id
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/pdf\r\n\r\n",
                boundary, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

        let request = Request::builder()
            .method("POST")
            .uri("/api/statements")
            .header(TENANT_HEADER, self.tenant.to_string())
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        (status, get_body_json(response).await)
    }

    /// Upload a statement and run the whole pipeline for it
    async fn processed_statement(&self, tag: &str) -> i64 {
        let (status, json) = self
            .upload(Some(self.bank), "march.pdf", format!("%PDF-1.4 {}", tag).as_bytes())
            .await;
        assert_eq!(status, StatusCode::OK);
        self.orchestrator.run_pending(&self.recorder).await.unwrap();
        json["id"].as_i64().unwrap()
    }

    async fn food_sub_category(&self) -> i64 {
        let (status, json) = self
            .call(
                "POST",
                "/api/categories",
                Some(json!({"type": "Expense", "category": "Meals", "sub_category": "Food"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        json["sub_category_id"].as_i64().unwrap()
    }
}

// ========== Tenant Header Tests ==========

#[tokio::test]
async fn test_missing_tenant_header_is_rejected() {
    let app = setup_test_app();

    let (status, json) = app.call_as(None, "GET", "/api/keywords", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("X-Tenant-Id"));
}

#[tokio::test]
async fn test_unknown_tenant_is_not_found() {
    let app = setup_test_app();

    let (status, _) = app.call_as(Some(999), "GET", "/api/keywords", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_and_list_tenants() {
    let app = setup_test_app();

    let (status, json) = app
        .call_as(None, "POST", "/api/tenants", Some(json!({"name": "Globex"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "Globex");

    let (_, json) = app
        .call_as(None, "POST", "/api/tenants", Some(json!({"name": "Globex"})))
        .await;
    assert!(json.get("error").is_some());

    let (status, json) = app.call_as(None, "GET", "/api/tenants", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 2);
}

// ========== Keyword API Tests ==========

#[tokio::test]
async fn test_keyword_crud() {
    let app = setup_test_app();
    let sub = app.food_sub_category().await;

    let (status, json) = app
        .call(
            "POST",
            "/api/keywords",
            Some(json!({"keyword": "GOJEK", "priority": 5, "sub_category_id": sub})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let id = json["id"].as_i64().unwrap();
    assert_eq!(json["is_active"], true);

    let (status, json) = app
        .call(
            "PATCH",
            &format!("/api/keywords/{}", id),
            Some(json!({"priority": 9, "is_active": false})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["priority"], 9);
    assert_eq!(json["is_active"], false);

    let (status, _) = app
        .call("DELETE", &format!("/api/keywords/{}", id), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.call("GET", &format!("/api/keywords/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_regex_keyword_is_rejected() {
    let app = setup_test_app();
    let sub = app.food_sub_category().await;

    let (status, json) = app
        .call(
            "POST",
            "/api/keywords",
            Some(json!({"keyword": "(unclosed", "is_regex": true, "sub_category_id": sub})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().is_some());
}

#[tokio::test]
async fn test_keyword_from_other_tenant_category_is_rejected() {
    let app = setup_test_app();
    let sub = app.food_sub_category().await;
    let other = app.orchestrator.db().create_tenant("Globex").unwrap();

    let (status, _) = app
        .call_as(
            Some(other),
            "POST",
            "/api/keywords",
            Some(json!({"keyword": "GOJEK", "sub_category_id": sub})),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_keyword_test_endpoint() {
    let app = setup_test_app();
    let sub = app.food_sub_category().await;
    app.call(
        "POST",
        "/api/keywords",
        Some(json!({"keyword": "^TRX-\\d+$", "is_regex": true, "case_sensitive": true, "sub_category_id": sub})),
    )
    .await;

    let (status, json) = app
        .call("POST", "/api/keywords/test", Some(json!({"description": "TRX-998"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["match"]["sub_category_id"], sub);
    assert_eq!(json["match"]["confidence_score"], 100);

    let (_, json) = app
        .call("POST", "/api/keywords/test", Some(json!({"description": "trx-998"})))
        .await;
    assert!(json["match"].is_null());
}

// ========== Statement API Tests ==========

#[tokio::test]
async fn test_upload_and_process_statement() {
    let app = setup_test_app();
    let sub = app.food_sub_category().await;
    app.call(
        "POST",
        "/api/keywords",
        Some(json!({"keyword": "GOJEK", "sub_category_id": sub})),
    )
    .await;

    let (status, json) = app.upload(Some(app.bank), "march.pdf", b"%PDF-1.4 upload").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ocr_status"], "pending");
    assert_eq!(json["original_filename"], "march.pdf");
    let id = json["id"].as_i64().unwrap();

    app.orchestrator.run_pending(&app.recorder).await.unwrap();

    let (status, json) = app.call("GET", &format!("/api/statements/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["stage"], "account_matching_skipped");
    assert_eq!(json["matching_status"], "completed");
    assert_eq!(json["transaction_count"], 3);
    assert_eq!(json["matched_count"], 1);

    let (_, json) = app
        .call("GET", &format!("/api/statements/{}/transactions", id), None)
        .await;
    let transactions = json.as_array().unwrap();
    assert_eq!(transactions.len(), 3);
    assert_eq!(transactions[0]["sub_category_id"], sub);

    let (_, json) = app
        .call("GET", "/api/statements?matching_status=completed", None)
        .await;
    assert_eq!(json.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_upload_validation() {
    let app = setup_test_app();

    let (status, _) = app.upload(Some(app.bank), "a.pdf", b"%PDF-1.4 same").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.upload(Some(app.bank), "b.pdf", b"%PDF-1.4 same").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app.upload(Some(app.bank), "notes.txt", b"plain text").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = app.upload(None, "c.pdf", b"%PDF-1.4 other").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Missing bank_id field");

    let (status, _) = app.upload(Some(999), "d.pdf", b"%PDF-1.4 nobank").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_statements_are_tenant_scoped() {
    let app = setup_test_app();
    let id = app.processed_statement("scoped").await;
    let other = app.orchestrator.db().create_tenant("Globex").unwrap();

    let (status, _) = app
        .call_as(Some(other), "GET", &format!("/api/statements/{}", id), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, json) = app.call_as(Some(other), "GET", "/api/statements", None).await;
    assert!(json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_rematch_statement() {
    let app = setup_test_app();

    // Still waiting for OCR
    let (status, json) = app.upload(Some(app.bank), "march.pdf", b"%PDF-1.4 rematch").await;
    assert_eq!(status, StatusCode::OK);
    let id = json["id"].as_i64().unwrap();
    let (status, _) = app
        .call("POST", &format!("/api/statements/{}/rematch", id), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    app.orchestrator.run_pending(&app.recorder).await.unwrap();
    let (status, json) = app
        .call("POST", &format!("/api/statements/{}/rematch", id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["matching_status"], "pending");
    assert_eq!(app.recorder.recorded().len(), 1);
}

#[tokio::test]
async fn test_delete_statement() {
    let app = setup_test_app();
    let id = app.processed_statement("delete").await;

    let (status, _) = app
        .call("DELETE", &format!("/api/statements/{}", id), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.call("GET", &format!("/api/statements/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ========== Transaction API Tests ==========

#[tokio::test]
async fn test_manual_category_and_verify() {
    let app = setup_test_app();
    let sub = app.food_sub_category().await;
    let id = app.processed_statement("manual").await;

    let (_, json) = app
        .call("GET", &format!("/api/statements/{}/transactions", id), None)
        .await;
    let tx_id = json[0]["id"].as_i64().unwrap();

    let (status, json) = app
        .call(
            "POST",
            &format!("/api/transactions/{}/category", tx_id),
            Some(json!({"sub_category_id": sub})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "updated");
    assert_eq!(json["transaction"]["is_manual"], true);
    assert_eq!(json["transaction"]["sub_category_id"], sub);

    // Same category again writes nothing
    let (_, json) = app
        .call(
            "POST",
            &format!("/api/transactions/{}/category", tx_id),
            Some(json!({"sub_category_id": sub})),
        )
        .await;
    assert_eq!(json["outcome"], "unchanged");

    let (_, json) = app
        .call("GET", &format!("/api/transactions/{}/matches", tx_id), None)
        .await;
    let records = json.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["is_primary"], true);
    assert_eq!(records[0]["source"], "manual");

    let (status, json) = app
        .call(
            "POST",
            &format!("/api/transactions/{}/verify", tx_id),
            Some(json!({})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["transaction"]["is_verified"], true);
}

// ========== Suggestion API Tests ==========

#[tokio::test]
async fn test_suggestions_and_confirm() {
    let app = setup_test_app();
    let sub = app.food_sub_category().await;
    let id = app.processed_statement("suggest").await;

    let (status, json) = app
        .call("GET", &format!("/api/suggestions?statement_id={}", id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let suggestions = json.as_array().unwrap();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0]["keyword"], "TOKOPEDIA ORDER");
    assert_eq!(suggestions[0]["frequency"], 2);

    let (status, json) = app
        .call(
            "POST",
            "/api/suggestions/confirm",
            Some(json!({"keyword": "TOKOPEDIA ORDER", "sub_category_id": sub})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["newly_matched"], 2);
}

// ========== Failed Job API Tests ==========

#[tokio::test]
async fn test_failed_jobs_list_and_retry() {
    let ocr = MockOcrBackend::new(march_statement())
        .with_script([MockOcrStep::Rejected("Unsupported layout".into())]);
    let app = setup_test_app_with(Arc::new(ocr));
    let id = app.processed_statement("failing").await;

    let (_, json) = app.call("GET", &format!("/api/statements/{}", id), None).await;
    assert_eq!(json["stage"], "ocr_failed");
    assert!(json["ocr_error"].as_str().unwrap().contains("Unsupported layout"));

    let (status, json) = app.call("GET", "/api/failed-jobs", None).await;
    assert_eq!(status, StatusCode::OK);
    let jobs = json.as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    let job_id = jobs[0]["id"].as_i64().unwrap();

    let (status, _) = app
        .call("POST", &format!("/api/failed-jobs/{}/retry", job_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    app.orchestrator.run_pending(&app.recorder).await.unwrap();

    let (_, json) = app.call("GET", &format!("/api/statements/{}", id), None).await;
    assert_eq!(json["ocr_status"], "completed");

    let (status, _) = app
        .call("POST", &format!("/api/failed-jobs/{}/retry", job_id), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, json) = app.call("GET", "/api/failed-jobs?include_retried=true", None).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
}

// ========== Drift API Tests ==========

#[tokio::test]
async fn test_drift_report_and_repair() {
    let app = setup_test_app();
    app.processed_statement("drift").await;

    let (status, json) = app.call("GET", "/api/drift", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["transaction_ids"].as_array().unwrap().is_empty());

    let (status, json) = app.call("POST", "/api/drift/repair", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["transaction_ids"].as_array().unwrap().is_empty());
}

// ========== Catalog API Tests ==========

#[tokio::test]
async fn test_accounts_and_account_keywords() {
    let app = setup_test_app();

    let (status, json) = app
        .call("POST", "/api/accounts", Some(json!({"code": "6100", "name": "Meals"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    let account_id = json["id"].as_i64().unwrap();

    let (status, json) = app
        .call(
            "POST",
            &format!("/api/accounts/{}/keywords", account_id),
            Some(json!({"keyword": "GOJEK"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let keyword_id = json["id"].as_i64().unwrap();

    let id = app.processed_statement("accounts").await;
    let (_, json) = app
        .call("GET", &format!("/api/statements/{}/account-matches", id), None)
        .await;
    let matches = json.as_array().unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0]["account_id"], account_id);

    let (status, _) = app
        .call("DELETE", &format!("/api/account-keywords/{}", keyword_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, json) = app.call("GET", "/api/account-keywords", None).await;
    assert!(json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_banks() {
    let app = setup_test_app();

    let (status, json) = app
        .call_as(
            None,
            "POST",
            "/api/banks",
            Some(json!({"code": "Mandiri", "name": "Bank Mandiri", "ocr_endpoint": "mandiri/v2"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["code"], "mandiri");
    assert_eq!(json["ocr_endpoint"], "mandiri/v2");

    let (_, json) = app.call_as(None, "GET", "/api/banks", None).await;
    assert_eq!(json.as_array().unwrap().len(), 2);
}
