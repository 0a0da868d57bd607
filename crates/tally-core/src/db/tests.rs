//! Database tests

use super::*;
use crate::models::*;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rusqlite::params;

    struct Fixture {
        db: Database,
        tenant: i64,
        bank: i64,
        food: CategoryPath,
        transport: CategoryPath,
    }

    fn fixture() -> Fixture {
        let db = Database::in_memory().unwrap();
        let tenant = db.create_tenant("Acme").unwrap();
        let bank = db.create_bank("BCA", "Bank Central Asia", None).unwrap();
        let food = db
            .ensure_category_path(tenant, "Expense", "Meals", "Food Delivery")
            .unwrap();
        let transport = db
            .ensure_category_path(tenant, "Expense", "Travel", "Ride Hailing")
            .unwrap();
        Fixture {
            db,
            tenant,
            bank,
            food,
            transport,
        }
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn line(day: u32, description: &str, debit: f64) -> NewStatementTransaction {
        NewStatementTransaction {
            date: date(day),
            description: description.to_string(),
            debit,
            credit: 0.0,
            balance: None,
        }
    }

    fn new_statement(bank: i64, hash: &str) -> NewBankStatement {
        NewBankStatement {
            bank_id: bank,
            file_path: format!("/tmp/{}.pdf", hash),
            original_filename: Some("march.pdf".to_string()),
            file_hash: hash.to_string(),
            period_start: None,
            period_end: None,
        }
    }

    /// Statement with OCR completed and the given lines stored
    fn statement_with_lines(f: &Fixture, hash: &str, lines: &[NewStatementTransaction]) -> i64 {
        let id = f.db.create_statement(f.tenant, &new_statement(f.bank, hash)).unwrap();
        assert!(f.db.start_ocr(f.tenant, id).unwrap());
        assert!(f
            .db
            .store_ocr_result(f.tenant, id, lines, StatementPeriod::default())
            .unwrap());
        id
    }

    fn first_transaction(f: &Fixture, statement: i64) -> StatementTransaction {
        f.db.list_transactions(f.tenant, &TransactionQuery::for_statement(statement))
            .unwrap()
            .remove(0)
    }

    fn keyword(f: &Fixture, text: &str, path: CategoryPath, priority: i32) -> i64 {
        f.db.create_keyword(
            f.tenant,
            &NewKeyword {
                keyword: text.to_string(),
                is_regex: false,
                case_sensitive: false,
                priority,
                sub_category_id: path.sub_category_id,
            },
        )
        .unwrap()
    }

    fn match_for(keyword_id: i64, path: CategoryPath, confidence: i32) -> MatchResult {
        MatchResult {
            keyword_id,
            sub_category_id: path.sub_category_id,
            category_id: path.category_id,
            type_id: path.type_id,
            confidence_score: confidence,
        }
    }

    // ========== Schema ==========

    #[test]
    fn test_in_memory_db() {
        let db = Database::in_memory().unwrap();
        assert!(db.list_tenants().unwrap().is_empty());
        assert!(db.list_banks().unwrap().is_empty());
    }

    #[test]
    fn test_primary_index_rejects_second_primary() {
        let f = fixture();
        let statement = statement_with_lines(&f, "h1", &[line(1, "GOJEK", 10.0)]);
        let tx = first_transaction(&f, statement);
        let conn = f.db.conn().unwrap();

        let insert = r#"INSERT INTO transaction_categories
            (tenant_id, transaction_id, sub_category_id, category_id, type_id, confidence_score, is_primary, source)
            VALUES (?, ?, ?, ?, ?, 50, 1, 'keyword')"#;
        conn.execute(
            insert,
            params![f.tenant, tx.id, f.food.sub_category_id, f.food.category_id, f.food.type_id],
        )
        .unwrap();
        let second = conn.execute(
            insert,
            params![
                f.tenant,
                tx.id,
                f.transport.sub_category_id,
                f.transport.category_id,
                f.transport.type_id
            ],
        );
        assert!(second.is_err(), "two primary records must be rejected");
    }

    // ========== Tenants and categories ==========

    #[test]
    fn test_tenant_names_are_unique() {
        let db = Database::in_memory().unwrap();
        db.create_tenant("Acme").unwrap();
        assert!(matches!(db.create_tenant("Acme"), Err(Error::Conflict(_))));
        assert!(db.create_tenant("  ").is_err());
    }

    #[test]
    fn test_bank_codes_are_lowercased() {
        let f = fixture();
        let bank = f.db.get_bank_by_code("bca").unwrap().unwrap();
        assert_eq!(bank.id, f.bank);
        assert_eq!(bank.code, "bca");
    }

    #[test]
    fn test_category_path_is_tenant_scoped() {
        let f = fixture();
        let other = f.db.create_tenant("Globex").unwrap();

        let path = f.db.category_path(f.tenant, f.food.sub_category_id).unwrap();
        assert_eq!(path, f.food);
        assert!(matches!(
            f.db.category_path(other, f.food.sub_category_id),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_ensure_category_path_reuses_rows() {
        let f = fixture();
        let again = f
            .db
            .ensure_category_path(f.tenant, "Expense", "Meals", "Food Delivery")
            .unwrap();
        assert_eq!(again, f.food);
        assert_eq!(f.db.list_category_types(f.tenant).unwrap().len(), 1);
        assert_eq!(f.db.list_sub_categories(f.tenant).unwrap().len(), 2);
    }

    // ========== Keywords ==========

    #[test]
    fn test_active_rules_order_by_priority_then_id() {
        let f = fixture();
        let low = keyword(&f, "GRAB", f.transport, 1);
        let first = keyword(&f, "GOJEK", f.food, 5);
        let second = keyword(&f, "GOJEK DRIVER", f.transport, 5);
        let inactive = keyword(&f, "OVO", f.food, 9);
        f.db.set_keyword_active(f.tenant, inactive, false).unwrap();

        let rules = f.db.list_active_keyword_rules(f.tenant).unwrap();
        let ids: Vec<i64> = rules.iter().map(|r| r.keyword.id).collect();
        assert_eq!(ids, vec![first, second, low]);
        assert_eq!(rules[0].path(), f.food);
        assert_eq!(f.db.count_active_keywords(f.tenant).unwrap(), 3);
    }

    #[test]
    fn test_keyword_requires_tenant_sub_category() {
        let f = fixture();
        let other = f.db.create_tenant("Globex").unwrap();
        let result = f.db.create_keyword(
            other,
            &NewKeyword {
                keyword: "GOJEK".into(),
                is_regex: false,
                case_sensitive: false,
                priority: 0,
                sub_category_id: f.food.sub_category_id,
            },
        );
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_update_keyword() {
        let f = fixture();
        let id = keyword(&f, "GOJEK", f.food, 0);
        let updated = f
            .db
            .update_keyword(
                f.tenant,
                id,
                &KeywordUpdate {
                    priority: Some(7),
                    sub_category_id: Some(f.transport.sub_category_id),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.priority, 7);
        assert_eq!(updated.sub_category_id, f.transport.sub_category_id);
        assert_eq!(updated.keyword, "GOJEK");

        assert!(f.db.delete_keyword(f.tenant, id).unwrap());
        assert!(f.db.get_keyword(f.tenant, id).unwrap().is_none());
    }

    // ========== Statements ==========

    #[test]
    fn test_duplicate_hash_is_conflict() {
        let f = fixture();
        let id = f.db.create_statement(f.tenant, &new_statement(f.bank, "abc")).unwrap();

        let err = f
            .db
            .create_statement(f.tenant, &new_statement(f.bank, "abc"))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(ref m) if m.contains(&id.to_string())));

        // Other tenants may upload the same file
        let other = f.db.create_tenant("Globex").unwrap();
        assert!(f.db.create_statement(other, &new_statement(f.bank, "abc")).is_ok());

        // A deleted statement no longer blocks re-upload
        f.db.delete_statement(f.tenant, id).unwrap();
        assert!(f.db.create_statement(f.tenant, &new_statement(f.bank, "abc")).is_ok());
    }

    #[test]
    fn test_store_ocr_result_requires_processing() {
        let f = fixture();
        let id = f.db.create_statement(f.tenant, &new_statement(f.bank, "h")).unwrap();

        // Still pending: nothing stored
        let stored = f
            .db
            .store_ocr_result(f.tenant, id, &[line(1, "GOJEK", 1.0)], StatementPeriod::default())
            .unwrap();
        assert!(!stored);

        assert!(f.db.start_ocr(f.tenant, id).unwrap());
        assert!(!f.db.start_ocr(f.tenant, id).unwrap(), "second claim must fail");

        let period = StatementPeriod {
            start: Some(date(1)),
            end: Some(date(31)),
        };
        let lines = [line(2, "QRIS GOJEK", 25000.0), line(3, "SALARY", 0.0)];
        assert!(f.db.store_ocr_result(f.tenant, id, &lines, period).unwrap());

        let statement = f.db.require_statement(f.tenant, id).unwrap();
        assert_eq!(statement.ocr_status, OcrStatus::Completed);
        assert_eq!(statement.matching_status, Some(MatchingStatus::Pending));
        assert_eq!(statement.transaction_count, 2);
        assert_eq!(statement.unmatched_count, 2);
        assert_eq!(statement.period_end, Some(date(31)));
    }

    #[test]
    fn test_store_ocr_result_rolls_back_on_bad_line() {
        let f = fixture();
        let id = f.db.create_statement(f.tenant, &new_statement(f.bank, "h")).unwrap();
        f.db.start_ocr(f.tenant, id).unwrap();

        let lines = [line(1, "GOJEK", 1.0), line(2, "   ", 1.0)];
        let result = f.db.store_ocr_result(f.tenant, id, &lines, StatementPeriod::default());
        assert!(matches!(result, Err(Error::InvalidData(_))));

        let statement = f.db.require_statement(f.tenant, id).unwrap();
        assert_eq!(statement.ocr_status, OcrStatus::Processing);
        assert_eq!(f.db.count_statement_transactions(f.tenant, id).unwrap(), 0);
    }

    #[test]
    fn test_failed_matching_skips_account_matching() {
        let f = fixture();
        let id = statement_with_lines(&f, "h", &[line(1, "GOJEK", 1.0)]);
        f.db.start_matching(f.tenant, id).unwrap();
        f.db.finish_matching(f.tenant, id, MatchingStatus::Failed, Some("boom"))
            .unwrap();

        let statement = f.db.require_statement(f.tenant, id).unwrap();
        assert_eq!(statement.matching_status, Some(MatchingStatus::Failed));
        assert_eq!(statement.matching_note.as_deref(), Some("boom"));
        assert_eq!(statement.account_matching_status, Some(MatchingStatus::Skipped));
        assert_eq!(
            statement.account_matching_note.as_deref(),
            Some("Transaction matching failed")
        );
    }

    #[test]
    fn test_list_statements_filters() {
        let f = fixture();
        let done = statement_with_lines(&f, "a", &[line(1, "GOJEK", 1.0)]);
        let pending = f.db.create_statement(f.tenant, &new_statement(f.bank, "b")).unwrap();

        let filter = StatementFilter {
            ocr_status: Some(OcrStatus::Pending),
            ..Default::default()
        };
        let listed = f.db.list_statements(f.tenant, &filter).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, pending);

        let filter = StatementFilter {
            matching_status: Some(MatchingStatus::Pending),
            ..Default::default()
        };
        assert_eq!(f.db.list_statements(f.tenant, &filter).unwrap()[0].id, done);
    }

    #[test]
    fn test_delete_statement_removes_transactions() {
        let f = fixture();
        let id = statement_with_lines(&f, "h", &[line(1, "GOJEK", 1.0), line(2, "GRAB", 2.0)]);

        assert!(f.db.delete_statement(f.tenant, id).unwrap());
        assert!(!f.db.delete_statement(f.tenant, id).unwrap());
        assert!(f.db.get_statement(f.tenant, id).unwrap().is_none());
        assert_eq!(f.db.count_statement_transactions(f.tenant, id).unwrap(), 0);
    }

    #[test]
    fn test_recover_stuck_statements() {
        let f = fixture();
        let ocr = f.db.create_statement(f.tenant, &new_statement(f.bank, "a")).unwrap();
        f.db.start_ocr(f.tenant, ocr).unwrap();
        let matching = statement_with_lines(&f, "b", &[line(1, "GOJEK", 1.0)]);
        f.db.start_matching(f.tenant, matching).unwrap();
        let queued = f.db.create_statement(f.tenant, &new_statement(f.bank, "c")).unwrap();

        assert_eq!(f.db.recover_stuck_statements().unwrap(), 2);

        let s = f.db.require_statement(f.tenant, ocr).unwrap();
        assert_eq!(s.ocr_status, OcrStatus::Failed);
        assert!(s.ocr_error.unwrap().contains("restarted"));

        let s = f.db.require_statement(f.tenant, matching).unwrap();
        assert_eq!(s.matching_status, Some(MatchingStatus::Failed));
        assert_eq!(s.account_matching_status, Some(MatchingStatus::Skipped));

        let pending = f.db.list_pending_jobs().unwrap();
        assert_eq!(pending, vec![(f.tenant, queued, JobKind::ProcessOcr)]);
    }

    // ========== Synchronizer ==========

    #[test]
    fn test_apply_primary_match_is_idempotent() {
        let f = fixture();
        let statement = statement_with_lines(&f, "h", &[line(1, "QRIS GOJEK", 1.0)]);
        let tx = first_transaction(&f, statement);
        let kw = keyword(&f, "GOJEK", f.food, 0);
        let m = match_for(kw, f.food, 50);

        assert_eq!(
            f.db.apply_primary_match(f.tenant, tx.id, &m).unwrap(),
            ApplyOutcome::Updated
        );
        let before = f.db.require_transaction(f.tenant, tx.id).unwrap();
        assert_eq!(
            f.db.apply_primary_match(f.tenant, tx.id, &m).unwrap(),
            ApplyOutcome::Unchanged
        );
        let after = f.db.require_transaction(f.tenant, tx.id).unwrap();

        assert_eq!(before.updated_at, after.updated_at);
        assert_eq!(after.sub_category_id, Some(f.food.sub_category_id));
        assert_eq!(after.matched_keyword_id, Some(kw));
        assert_eq!(after.confidence_score, Some(50));
        assert_eq!(f.db.list_match_records(f.tenant, tx.id).unwrap().len(), 1);
        assert!(f.db.check_denormalization(f.tenant, tx.id).unwrap());
    }

    #[test]
    fn test_switching_keyword_demotes_previous_primary() {
        let f = fixture();
        let statement = statement_with_lines(&f, "h", &[line(1, "GOJEK RIDE", 1.0)]);
        let tx = first_transaction(&f, statement);
        let food_kw = keyword(&f, "GOJEK", f.food, 0);
        let ride_kw = keyword(&f, "RIDE", f.transport, 0);

        f.db.apply_primary_match(f.tenant, tx.id, &match_for(food_kw, f.food, 50))
            .unwrap();
        f.db.apply_primary_match(f.tenant, tx.id, &match_for(ride_kw, f.transport, 40))
            .unwrap();

        let records = f.db.list_match_records(f.tenant, tx.id).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records.iter().filter(|r| r.is_primary).count(), 1);
        assert_eq!(records[0].matched_keyword_id, Some(ride_kw));
        assert!(f.db.check_denormalization(f.tenant, tx.id).unwrap());

        // Promote the old candidate back
        let old = records.iter().find(|r| !r.is_primary).unwrap().id;
        let (owner, outcome) = f.db.promote_match(f.tenant, old).unwrap();
        assert_eq!(owner, tx.id);
        assert_eq!(outcome, ApplyOutcome::Updated);
        let tx = f.db.require_transaction(f.tenant, tx.id).unwrap();
        assert_eq!(tx.sub_category_id, Some(f.food.sub_category_id));
        assert_eq!(
            f.db.promote_match(f.tenant, old).unwrap().1,
            ApplyOutcome::Unchanged
        );
    }

    #[test]
    fn test_manual_category_shields_transaction() {
        let f = fixture();
        let statement = statement_with_lines(&f, "h", &[line(1, "GOJEK", 1.0)]);
        let tx = first_transaction(&f, statement);
        let kw = keyword(&f, "GOJEK", f.food, 0);

        f.db.set_manual_category(f.tenant, tx.id, f.transport.sub_category_id)
            .unwrap();
        let manual = f.db.require_transaction(f.tenant, tx.id).unwrap();
        assert!(manual.is_manual);
        assert_eq!(manual.confidence_score, Some(100));
        assert_eq!(manual.matched_keyword_id, None);

        // Keyword matching and clearing leave it alone
        assert_eq!(
            f.db.apply_primary_match(f.tenant, tx.id, &match_for(kw, f.food, 50))
                .unwrap(),
            ApplyOutcome::Unchanged
        );
        assert_eq!(
            f.db.clear_primary_match(f.tenant, tx.id).unwrap(),
            ApplyOutcome::Unchanged
        );
        let tx = f.db.require_transaction(f.tenant, tx.id).unwrap();
        assert_eq!(tx.sub_category_id, Some(f.transport.sub_category_id));
    }

    #[test]
    fn test_clear_primary_match() {
        let f = fixture();
        let statement = statement_with_lines(&f, "h", &[line(1, "GOJEK", 1.0)]);
        let tx = first_transaction(&f, statement);
        let kw = keyword(&f, "GOJEK", f.food, 0);

        assert_eq!(
            f.db.clear_primary_match(f.tenant, tx.id).unwrap(),
            ApplyOutcome::Unchanged
        );
        f.db.apply_primary_match(f.tenant, tx.id, &match_for(kw, f.food, 100))
            .unwrap();
        assert_eq!(
            f.db.clear_primary_match(f.tenant, tx.id).unwrap(),
            ApplyOutcome::Updated
        );

        let tx = f.db.require_transaction(f.tenant, tx.id).unwrap();
        assert_eq!(tx.sub_category_id, None);
        assert_eq!(tx.confidence_score, None);
        assert!(f.db.get_primary_match(f.tenant, tx.id).unwrap().is_none());
        assert!(f.db.check_denormalization(f.tenant, tx.id).unwrap());
    }

    #[test]
    fn test_failed_propagation_rolls_back_match_record() {
        let f = fixture();
        let statement = statement_with_lines(&f, "h", &[line(1, "EXPLODE", 1.0)]);
        let tx = first_transaction(&f, statement);
        let kw = keyword(&f, "EXPLODE", f.food, 0);

        f.db.conn()
            .unwrap()
            .execute_batch(
                r#"CREATE TRIGGER fail_propagation
                   BEFORE UPDATE OF sub_category_id ON statement_transactions
                   WHEN NEW.description = 'EXPLODE'
                   BEGIN SELECT RAISE(ABORT, 'forced failure'); END;"#,
            )
            .unwrap();

        let result = f
            .db
            .apply_primary_match(f.tenant, tx.id, &match_for(kw, f.food, 100));
        assert!(result.is_err());

        assert!(f.db.list_match_records(f.tenant, tx.id).unwrap().is_empty());
        assert!(f.db.check_denormalization(f.tenant, tx.id).unwrap());
    }

    #[test]
    fn test_drift_detection_and_repair() {
        let f = fixture();
        let statement = statement_with_lines(&f, "h", &[line(1, "GOJEK", 1.0), line(2, "GRAB", 2.0)]);
        let txs = f
            .db
            .list_transactions(f.tenant, &TransactionQuery::for_statement(statement))
            .unwrap();
        let kw = keyword(&f, "GOJEK", f.food, 0);
        f.db.apply_primary_match(f.tenant, txs[0].id, &match_for(kw, f.food, 80))
            .unwrap();
        assert!(f.db.find_denormalization_drift(f.tenant).unwrap().is_empty());

        // Out-of-band writes
        let conn = f.db.conn().unwrap();
        conn.execute(
            "UPDATE statement_transactions SET confidence_score = 10 WHERE id = ?",
            params![txs[0].id],
        )
        .unwrap();
        conn.execute(
            "UPDATE statement_transactions SET sub_category_id = ? WHERE id = ?",
            params![f.transport.sub_category_id, txs[1].id],
        )
        .unwrap();

        let drift = f.db.find_denormalization_drift(f.tenant).unwrap();
        assert_eq!(drift, vec![txs[0].id, txs[1].id]);
        assert!(!f.db.check_denormalization(f.tenant, txs[0].id).unwrap());

        for id in &drift {
            assert_eq!(
                f.db.repair_denormalization(f.tenant, *id).unwrap(),
                ApplyOutcome::Updated
            );
        }
        assert!(f.db.find_denormalization_drift(f.tenant).unwrap().is_empty());
        let repaired = f.db.require_transaction(f.tenant, txs[0].id).unwrap();
        assert_eq!(repaired.confidence_score, Some(80));
        let cleared = f.db.require_transaction(f.tenant, txs[1].id).unwrap();
        assert_eq!(cleared.sub_category_id, None);
    }

    #[test]
    fn test_synchronizer_is_tenant_scoped() {
        let f = fixture();
        let statement = statement_with_lines(&f, "h", &[line(1, "GOJEK", 1.0)]);
        let tx = first_transaction(&f, statement);
        let other = f.db.create_tenant("Globex").unwrap();
        let kw = keyword(&f, "GOJEK", f.food, 0);

        let result = f.db.apply_primary_match(other, tx.id, &match_for(kw, f.food, 100));
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    // ========== Accounts ==========

    #[test]
    fn test_replace_account_matches() {
        let f = fixture();
        let statement = statement_with_lines(&f, "h", &[line(1, "GOJEK", 1.0), line(2, "GRAB", 2.0)]);
        let txs = f
            .db
            .list_transactions(f.tenant, &TransactionQuery::for_statement(statement))
            .unwrap();
        let cash = f.db.create_account(f.tenant, "1100", "Cash").unwrap();
        let bank = f.db.create_account(f.tenant, "1200", "Bank").unwrap();
        assert!(matches!(
            f.db.create_account(f.tenant, "1100", "Again"),
            Err(Error::Conflict(_))
        ));

        let assign = |tx: i64, account: i64| AccountAssignment {
            transaction_id: tx,
            account_id: account,
            account_keyword_id: None,
            confidence_score: 100,
        };

        let first = [assign(txs[0].id, cash), assign(txs[1].id, cash)];
        assert_eq!(f.db.replace_account_matches(f.tenant, statement, &first).unwrap(), 2);
        assert_eq!(f.db.replace_account_matches(f.tenant, statement, &first).unwrap(), 0);

        let second = [assign(txs[0].id, bank)];
        assert_eq!(f.db.replace_account_matches(f.tenant, statement, &second).unwrap(), 2);

        let matches = f.db.list_account_matches(f.tenant, statement).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].account_id, bank);
    }

    #[test]
    fn test_inactive_account_hides_its_keywords() {
        let f = fixture();
        let cash = f.db.create_account(f.tenant, "1100", "Cash").unwrap();
        f.db.create_account_keyword(
            f.tenant,
            cash,
            &NewAccountKeyword {
                keyword: "ATM".into(),
                is_regex: false,
                case_sensitive: false,
                priority: 0,
            },
        )
        .unwrap();
        assert_eq!(f.db.list_active_account_keywords(f.tenant).unwrap().len(), 1);

        f.db.conn()
            .unwrap()
            .execute("UPDATE accounts SET is_active = 0 WHERE id = ?", params![cash])
            .unwrap();
        assert!(f.db.list_active_account_keywords(f.tenant).unwrap().is_empty());
        assert_eq!(f.db.list_account_keywords(f.tenant).unwrap().len(), 1);
    }

    // ========== Failed jobs ==========

    #[test]
    fn test_failed_job_lifecycle() {
        let f = fixture();
        let statement = f.db.create_statement(f.tenant, &new_statement(f.bank, "h")).unwrap();

        let id = f
            .db
            .record_failed_job(f.tenant, statement, JobKind::ProcessOcr, 3, "OCR down")
            .unwrap();
        let job = f.db.get_failed_job(f.tenant, id).unwrap().unwrap();
        assert_eq!(job.lane, Lane::OcrProcessing);
        assert_eq!(job.kind, JobKind::ProcessOcr);
        assert_eq!(job.attempts, 3);
        assert!(job.retried_at.is_none());

        assert!(f.db.mark_failed_job_retried(f.tenant, id).unwrap());
        assert!(!f.db.mark_failed_job_retried(f.tenant, id).unwrap());
        assert!(f.db.list_failed_jobs(f.tenant, false).unwrap().is_empty());
        assert_eq!(f.db.list_failed_jobs(f.tenant, true).unwrap().len(), 1);

        let other = f.db.create_tenant("Globex").unwrap();
        assert!(f.db.get_failed_job(other, id).unwrap().is_none());
    }
}
