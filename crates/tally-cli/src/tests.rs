//! CLI command tests
//!
//! This module contains all tests for the CLI commands.

use std::sync::Arc;
use std::time::Duration;

use tally_core::config::PipelineConfig;
use tally_core::db::{Database, TransactionQuery};
use tally_core::models::{MatchingStatus, OcrStatus};
use tally_core::ocr::{parse_ocr_response, MockOcrBackend, MockOcrStep, OcrExtraction};
use tempfile::TempDir;

use crate::commands::{self, truncate, Pipeline};

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

/// Test fixture: pipeline over an in-memory database with one tenant and bank
struct Fixture {
    pipeline: Pipeline,
    tenant: i64,
    food: i64,
    dir: TempDir,
}

fn setup_with(ocr: MockOcrBackend) -> Fixture {
    let dir = TempDir::new().unwrap();
    let mut config = PipelineConfig::default();
    config.storage_dir = dir.path().join("statements");
    config.ocr.retry_delay = Duration::ZERO;
    config.matching.retry_delay = Duration::ZERO;
    config.matching.stage_delay = Duration::ZERO;

    let db = Database::in_memory().unwrap();
    let tenant = db.create_tenant("Acme").unwrap();
    db.create_bank("bca", "Bank Central Asia", None).unwrap();
    let food = db
        .ensure_category_path(tenant, "Expense", "Meals", "Food Delivery")
        .unwrap()
        .sub_category_id;

    Fixture {
        pipeline: Pipeline::new(db, config, Arc::new(ocr)),
        tenant,
        food,
        dir,
    }
}

fn setup() -> Fixture {
    setup_with(MockOcrBackend::new(march_statement()))
}

impl Fixture {
    fn db(&self) -> &Database {
        self.pipeline.db()
    }

    fn write_pdf(&self, name: &str) -> std::path::PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, format!("%PDF-1.4 {}", name)).unwrap();
        path
    }

    async fn upload(&self, name: &str) -> i64 {
        let file = self.write_pdf(name);
        commands::cmd_statements_upload(&self.pipeline, self.tenant, &file, "bca", true)
            .await
            .unwrap();
        self.latest_statement()
    }

    fn latest_statement(&self) -> i64 {
        self.db()
            .list_statements(self.tenant, &Default::default())
            .unwrap()
            .iter()
            .map(|s| s.id)
            .max()
            .unwrap()
    }
}

// ========== Helper Tests ==========

#[test]
fn test_truncate() {
    assert_eq!(truncate("GOJEK", 10), "GOJEK");
    assert_eq!(truncate("TOKOPEDIA ORDER 8812", 10), "TOKOPED...");
    // Multi-byte characters are not split
    assert_eq!(truncate("KOPI ☕☕☕☕☕☕", 8), "KOPI ...");
}

#[test]
fn test_require_tenant() {
    let f = setup();
    assert_eq!(commands::require_tenant(f.db(), Some(f.tenant)).unwrap(), f.tenant);
    assert!(commands::require_tenant(f.db(), None).is_err());
    assert!(commands::require_tenant(f.db(), Some(999)).is_err());
}

#[test]
fn test_cmd_init_creates_database() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tally.db");
    commands::cmd_init(&path, true).unwrap();
    assert!(path.exists());

    let db = commands::open_db(&path, true).unwrap();
    assert!(db.list_tenants().unwrap().is_empty());
}

// ========== Catalog Command Tests ==========

#[test]
fn test_cmd_tenants() {
    let f = setup();
    commands::cmd_tenants_add(f.db(), "Globex").unwrap();
    commands::cmd_tenants_list(f.db()).unwrap();

    let names: Vec<String> = f.db().list_tenants().unwrap().into_iter().map(|t| t.name).collect();
    assert!(names.contains(&"Globex".to_string()));
}

#[test]
fn test_cmd_banks_add_lowercases_code() {
    let f = setup();
    commands::cmd_banks_add(f.db(), "MANDIRI", "Bank Mandiri", Some("mandiri/extract")).unwrap();
    commands::cmd_banks_list(f.db()).unwrap();

    let bank = f.db().get_bank_by_code("mandiri").unwrap().unwrap();
    assert_eq!(bank.ocr_endpoint.as_deref(), Some("mandiri/extract"));
}

#[test]
fn test_cmd_categories_add_reuses_levels() {
    let f = setup();
    commands::cmd_categories_add(f.db(), f.tenant, "Expense", "Meals", "Groceries").unwrap();
    commands::cmd_categories_list(f.db(), f.tenant).unwrap();

    let subs = f.db().list_sub_categories(f.tenant).unwrap();
    assert_eq!(subs.len(), 2);
    // Both sub-categories share the Meals category
    assert_eq!(subs[0].path.category_id, subs[1].path.category_id);
}

#[test]
fn test_cmd_accounts_and_keywords() {
    let f = setup();
    commands::cmd_accounts_add(f.db(), f.tenant, "6100", "Meals").unwrap();
    let account = f.db().list_accounts(f.tenant).unwrap()[0].id;

    commands::cmd_accounts_keyword(f.pipeline.categorizer(), f.tenant, account, "GOJEK", false, false, 5)
        .unwrap();
    commands::cmd_accounts_list(f.db(), f.tenant).unwrap();

    let keywords = f.db().list_account_keywords(f.tenant).unwrap();
    assert_eq!(keywords.len(), 1);
    assert_eq!(keywords[0].account_id, account);
    assert_eq!(keywords[0].priority, 5);
}

#[test]
fn test_cmd_accounts_keyword_unknown_account() {
    let f = setup();
    let result =
        commands::cmd_accounts_keyword(f.pipeline.categorizer(), f.tenant, 999, "GOJEK", false, false, 0);
    assert!(result.is_err());
}

// ========== Keyword Command Tests ==========

#[test]
fn test_cmd_keywords_add_and_list() {
    let f = setup();
    let categorizer = f.pipeline.categorizer();
    commands::cmd_keywords_add(categorizer, f.tenant, "GOJEK", f.food, false, false, 10).unwrap();
    commands::cmd_keywords_list(categorizer, f.tenant).unwrap();

    let keywords = f.db().list_keywords(f.tenant).unwrap();
    assert_eq!(keywords.len(), 1);
    assert_eq!(keywords[0].keyword, "GOJEK");
    assert_eq!(keywords[0].priority, 10);
    assert!(keywords[0].is_active);
}

#[test]
fn test_cmd_keywords_add_invalid_regex() {
    let f = setup();
    let result =
        commands::cmd_keywords_add(f.pipeline.categorizer(), f.tenant, "GOJEK(", f.food, true, false, 0);
    assert!(result.is_err());
    assert!(f.db().list_keywords(f.tenant).unwrap().is_empty());
}

#[test]
fn test_cmd_keywords_add_foreign_sub_category() {
    let f = setup();
    let other = f.db().create_tenant("Globex").unwrap();
    let result =
        commands::cmd_keywords_add(f.pipeline.categorizer(), other, "GOJEK", f.food, false, false, 0);
    assert!(result.is_err());
}

#[test]
fn test_cmd_keywords_enable_disable_delete() {
    let f = setup();
    let categorizer = f.pipeline.categorizer();
    commands::cmd_keywords_add(categorizer, f.tenant, "GOJEK", f.food, false, false, 0).unwrap();
    let id = f.db().list_keywords(f.tenant).unwrap()[0].id;

    commands::cmd_keywords_set_active(categorizer, f.tenant, id, false).unwrap();
    assert!(!f.db().get_keyword(f.tenant, id).unwrap().unwrap().is_active);
    assert!(categorizer
        .match_description(f.tenant, "QRIS GOJEK JAKARTA")
        .unwrap()
        .is_none());

    commands::cmd_keywords_set_active(categorizer, f.tenant, id, true).unwrap();
    assert!(categorizer
        .match_description(f.tenant, "QRIS GOJEK JAKARTA")
        .unwrap()
        .is_some());

    commands::cmd_keywords_delete(categorizer, f.tenant, id).unwrap();
    assert!(f.db().get_keyword(f.tenant, id).unwrap().is_none());

    // Second delete reports the missing keyword
    assert!(commands::cmd_keywords_delete(categorizer, f.tenant, id).is_err());
}

#[test]
fn test_cmd_keywords_test() {
    let f = setup();
    let categorizer = f.pipeline.categorizer();
    commands::cmd_keywords_add(categorizer, f.tenant, "GOJEK", f.food, false, false, 0).unwrap();

    assert!(commands::cmd_keywords_test(categorizer, f.tenant, "QRIS GOJEK JAKARTA").is_ok());
    assert!(commands::cmd_keywords_test(categorizer, f.tenant, "SALARY MARCH").is_ok());
}

// ========== Statement Command Tests ==========

#[tokio::test]
async fn test_cmd_statements_upload_runs_pipeline() {
    let f = setup();
    commands::cmd_keywords_add(f.pipeline.categorizer(), f.tenant, "GOJEK", f.food, false, false, 0)
        .unwrap();

    let id = f.upload("march.pdf").await;

    let statement = f.db().require_statement(f.tenant, id).unwrap();
    assert_eq!(statement.ocr_status, OcrStatus::Completed);
    assert_eq!(statement.matching_status, Some(MatchingStatus::Completed));
    assert_eq!(statement.transaction_count, 3);
    assert_eq!(statement.matched_count, 1);
    assert_eq!(statement.unmatched_count, 2);

    commands::cmd_statements_show(&f.pipeline, f.tenant, id, false).unwrap();
    commands::cmd_statements_show(&f.pipeline, f.tenant, id, true).unwrap();
    commands::cmd_statements_transactions(&f.pipeline, f.tenant, id).unwrap();
}

#[tokio::test]
async fn test_cmd_statements_upload_unknown_bank() {
    let f = setup();
    let file = f.write_pdf("march.pdf");
    let result = commands::cmd_statements_upload(&f.pipeline, f.tenant, &file, "nope", true).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_cmd_statements_upload_rejects_non_pdf() {
    let f = setup();
    let file = f.dir.path().join("notes.txt");
    std::fs::write(&file, "hello").unwrap();

    let result = commands::cmd_statements_upload(&f.pipeline, f.tenant, &file, "bca", true).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_cmd_statements_upload_without_processing() {
    let f = setup();
    let file = f.write_pdf("march.pdf");
    commands::cmd_statements_upload(&f.pipeline, f.tenant, &file, "bca", false)
        .await
        .unwrap();

    let id = f.latest_statement();
    let statement = f.db().require_statement(f.tenant, id).unwrap();
    assert_eq!(statement.ocr_status, OcrStatus::Pending);

    // 'process' picks up what the upload left behind
    f.pipeline.recorder.take();
    commands::cmd_statements_process(&f.pipeline, f.tenant).await.unwrap();
    let statement = f.db().require_statement(f.tenant, id).unwrap();
    assert_eq!(statement.ocr_status, OcrStatus::Completed);
    assert_eq!(statement.transaction_count, 3);

    // Nothing left
    commands::cmd_statements_process(&f.pipeline, f.tenant).await.unwrap();
}

#[tokio::test]
async fn test_cmd_statements_list_filters() {
    let f = setup();
    f.upload("march.pdf").await;

    commands::cmd_statements_list(&f.pipeline, f.tenant, Some("completed"), None, 20).unwrap();
    commands::cmd_statements_list(&f.pipeline, f.tenant, None, Some("skipped"), 20).unwrap();
    assert!(commands::cmd_statements_list(&f.pipeline, f.tenant, Some("bogus"), None, 20).is_err());
}

#[tokio::test]
async fn test_cmd_statements_rematch_picks_up_new_keyword() {
    let f = setup();
    commands::cmd_keywords_add(f.pipeline.categorizer(), f.tenant, "GOJEK", f.food, false, false, 0)
        .unwrap();
    let id = f.upload("march.pdf").await;
    assert_eq!(f.db().require_statement(f.tenant, id).unwrap().matched_count, 1);

    commands::cmd_keywords_add(f.pipeline.categorizer(), f.tenant, "TOKOPEDIA", f.food, false, false, 0)
        .unwrap();
    commands::cmd_statements_rematch(&f.pipeline, f.tenant, id).await.unwrap();

    let statement = f.db().require_statement(f.tenant, id).unwrap();
    assert_eq!(statement.matched_count, 3);
    assert_eq!(statement.unmatched_count, 0);
}

#[tokio::test]
async fn test_cmd_statements_delete() {
    let f = setup();
    let id = f.upload("march.pdf").await;

    commands::cmd_statements_delete(&f.pipeline, f.tenant, id).unwrap();
    assert!(f.db().get_statement(f.tenant, id).unwrap().is_none());
    assert!(commands::cmd_statements_delete(&f.pipeline, f.tenant, id).is_err());
}

#[tokio::test]
async fn test_cmd_statements_are_tenant_scoped() {
    let f = setup();
    let id = f.upload("march.pdf").await;
    let other = f.db().create_tenant("Globex").unwrap();

    assert!(commands::cmd_statements_show(&f.pipeline, other, id, false).is_err());
    assert!(commands::cmd_statements_transactions(&f.pipeline, other, id).is_err());
    assert!(commands::cmd_statements_delete(&f.pipeline, other, id).is_err());
    assert!(f.db().get_statement(f.tenant, id).unwrap().is_some());
}

// ========== Transaction Command Tests ==========

#[tokio::test]
async fn test_cmd_transactions_manual_category_survives_rematch() {
    let f = setup();
    let categorizer = f.pipeline.categorizer();
    commands::cmd_keywords_add(categorizer, f.tenant, "GOJEK", f.food, false, false, 0).unwrap();
    let id = f.upload("march.pdf").await;
    let gojek = f
        .db()
        .list_transactions(f.tenant, &TransactionQuery::for_statement(id))
        .unwrap()
        .into_iter()
        .find(|tx| tx.description.contains("GOJEK"))
        .unwrap();

    let groceries = f
        .db()
        .ensure_category_path(f.tenant, "Expense", "Meals", "Groceries")
        .unwrap()
        .sub_category_id;
    commands::cmd_transactions_categorize(categorizer, f.tenant, gojek.id, groceries).unwrap();
    commands::cmd_transactions_matches(categorizer, f.tenant, gojek.id).unwrap();

    commands::cmd_statements_rematch(&f.pipeline, f.tenant, id).await.unwrap();
    let tx = f.db().require_transaction(f.tenant, gojek.id).unwrap();
    assert!(tx.is_manual);
    assert_eq!(tx.sub_category_id, Some(groceries));

    // A manual category is not cleared
    commands::cmd_transactions_clear(categorizer, f.tenant, gojek.id).unwrap();
    let tx = f.db().require_transaction(f.tenant, gojek.id).unwrap();
    assert_eq!(tx.sub_category_id, Some(groceries));
}

#[tokio::test]
async fn test_cmd_transactions_verify_and_promote() {
    let f = setup();
    let categorizer = f.pipeline.categorizer();
    commands::cmd_keywords_add(categorizer, f.tenant, "GOJEK", f.food, false, false, 0).unwrap();
    let id = f.upload("march.pdf").await;
    let gojek = f
        .db()
        .list_transactions(f.tenant, &TransactionQuery::for_statement(id))
        .unwrap()
        .into_iter()
        .find(|tx| tx.description.contains("GOJEK"))
        .unwrap();

    commands::cmd_transactions_verify(categorizer, f.tenant, gojek.id, true).unwrap();
    assert!(f.db().require_transaction(f.tenant, gojek.id).unwrap().is_verified);
    commands::cmd_transactions_verify(categorizer, f.tenant, gojek.id, false).unwrap();
    assert!(!f.db().require_transaction(f.tenant, gojek.id).unwrap().is_verified);

    let primary = f.db().list_match_records(f.tenant, gojek.id).unwrap()[0].id;
    commands::cmd_transactions_promote(categorizer, f.tenant, primary).unwrap();
    assert!(commands::cmd_transactions_promote(categorizer, f.tenant, 9999).is_err());

    let other = f.db().create_tenant("Globex").unwrap();
    assert!(commands::cmd_transactions_verify(categorizer, other, gojek.id, true).is_err());
}

// ========== Review Command Tests ==========

#[tokio::test]
async fn test_cmd_suggestions_list_and_confirm() {
    let f = setup();
    let id = f.upload("march.pdf").await;

    commands::cmd_suggestions_list(f.pipeline.categorizer(), f.tenant, None).unwrap();
    commands::cmd_suggestions_list(f.pipeline.categorizer(), f.tenant, Some(id)).unwrap();

    commands::cmd_suggestions_confirm(f.pipeline.categorizer(), f.tenant, "TOKOPEDIA ORDER", f.food, 0)
        .unwrap();

    let matched = f
        .db()
        .list_transactions(f.tenant, &TransactionQuery::for_statement(id))
        .unwrap()
        .into_iter()
        .filter(|tx| tx.sub_category_id == Some(f.food))
        .count();
    assert_eq!(matched, 2);
}

#[tokio::test]
async fn test_cmd_failed_jobs_list_and_retry() {
    let ocr = MockOcrBackend::new(march_statement()).with_script([
        MockOcrStep::Unavailable,
        MockOcrStep::Unavailable,
        MockOcrStep::Unavailable,
    ]);
    let f = setup_with(ocr);
    let id = f.upload("march.pdf").await;

    let statement = f.db().require_statement(f.tenant, id).unwrap();
    assert_eq!(statement.ocr_status, OcrStatus::Failed);

    let failed = f.db().list_failed_jobs(f.tenant, false).unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].statement_id, id);
    assert_eq!(failed[0].attempts, 3);
    commands::cmd_failed_jobs_list(f.db(), f.tenant, false).unwrap();

    commands::cmd_failed_jobs_retry(&f.pipeline, f.tenant, failed[0].id)
        .await
        .unwrap();
    let statement = f.db().require_statement(f.tenant, id).unwrap();
    assert_eq!(statement.ocr_status, OcrStatus::Completed);
    assert_eq!(statement.transaction_count, 3);

    // Already retried
    assert!(f.db().list_failed_jobs(f.tenant, false).unwrap().is_empty());
    assert_eq!(f.db().list_failed_jobs(f.tenant, true).unwrap().len(), 1);
    commands::cmd_failed_jobs_list(f.db(), f.tenant, true).unwrap();
    assert!(commands::cmd_failed_jobs_retry(&f.pipeline, f.tenant, failed[0].id)
        .await
        .is_err());
}

#[tokio::test]
async fn test_cmd_drift_report_and_repair() {
    let f = setup();
    commands::cmd_keywords_add(f.pipeline.categorizer(), f.tenant, "GOJEK", f.food, false, false, 0)
        .unwrap();
    let id = f.upload("march.pdf").await;
    let gojek = f
        .db()
        .list_transactions(f.tenant, &TransactionQuery::for_statement(id))
        .unwrap()
        .into_iter()
        .find(|tx| tx.description.contains("GOJEK"))
        .unwrap();

    // Break the denormalized copy behind the synchronizer's back
    f.db()
        .conn()
        .unwrap()
        .execute(
            "UPDATE statement_transactions SET sub_category_id = NULL WHERE id = ?1",
            [gojek.id],
        )
        .unwrap();
    assert_eq!(f.db().find_denormalization_drift(f.tenant).unwrap(), vec![gojek.id]);

    commands::cmd_drift(f.pipeline.categorizer(), f.tenant, false).unwrap();
    assert_eq!(f.db().find_denormalization_drift(f.tenant).unwrap().len(), 1);

    commands::cmd_drift(f.pipeline.categorizer(), f.tenant, true).unwrap();
    assert!(f.db().find_denormalization_drift(f.tenant).unwrap().is_empty());
    let repaired = f.db().require_transaction(f.tenant, gojek.id).unwrap();
    assert_eq!(repaired.sub_category_id, Some(f.food));
}
