//! Bank statement operations
//!
//! A statement carries one status column per pipeline stage. Stage columns are
//! only written through the methods here so the orchestrator's guards see a
//! consistent view.

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};

use super::{parse_date, parse_datetime, parse_optional_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{BankStatement, JobKind, MatchingStatus, NewBankStatement, OcrStatus};

const STATEMENT_COLUMNS: &str = "id, tenant_id, bank_id, file_path, original_filename, file_hash, \
     ocr_status, matching_status, account_matching_status, period_start, period_end, \
     transaction_count, matched_count, unmatched_count, ocr_error, matching_note, \
     account_matching_note, uploaded_at, ocr_started_at, ocr_completed_at, \
     matching_completed_at, account_matching_completed_at, deleted_at";

/// Message stored on statements interrupted by a restart
const RESTART_MESSAGE: &str = "Server restarted while processing. Retry the statement.";

/// Filter for statement listings
#[derive(Debug, Clone, Default)]
pub struct StatementFilter {
    pub ocr_status: Option<OcrStatus>,
    pub matching_status: Option<MatchingStatus>,
    pub bank_id: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Database {
    /// Record an uploaded statement in `ocr_status = pending`
    ///
    /// Returns `Conflict` if the tenant already has a live statement with the
    /// same file hash.
    pub fn create_statement(&self, tenant_id: i64, new: &NewBankStatement) -> Result<i64> {
        if self.get_bank(new.bank_id)?.is_none() {
            return Err(Error::NotFound(format!("bank {}", new.bank_id)));
        }
        if let Some(existing) = self.find_statement_by_hash(tenant_id, &new.file_hash)? {
            return Err(Error::Conflict(format!(
                "Statement already uploaded (id {})",
                existing
            )));
        }

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO bank_statements
                (tenant_id, bank_id, file_path, original_filename, file_hash, period_start, period_end)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                tenant_id,
                new.bank_id,
                new.file_path,
                new.original_filename,
                new.file_hash,
                new.period_start.map(|d| d.to_string()),
                new.period_end.map(|d| d.to_string()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Find a live statement by file hash
    pub fn find_statement_by_hash(&self, tenant_id: i64, file_hash: &str) -> Result<Option<i64>> {
        let conn = self.conn()?;
        let id = conn
            .query_row(
                "SELECT id FROM bank_statements WHERE tenant_id = ? AND file_hash = ? AND deleted_at IS NULL",
                params![tenant_id, file_hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Get a live (not deleted) statement
    pub fn get_statement(&self, tenant_id: i64, id: i64) -> Result<Option<BankStatement>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM bank_statements WHERE id = ? AND tenant_id = ? AND deleted_at IS NULL",
            STATEMENT_COLUMNS
        );
        let statement = conn
            .query_row(&sql, params![id, tenant_id], Self::row_to_statement)
            .optional()?;
        Ok(statement)
    }

    /// Get a live statement, or `NotFound`
    pub fn require_statement(&self, tenant_id: i64, id: i64) -> Result<BankStatement> {
        self.get_statement(tenant_id, id)?
            .ok_or_else(|| Error::NotFound(format!("statement {}", id)))
    }

    /// List live statements, newest first
    pub fn list_statements(
        &self,
        tenant_id: i64,
        filter: &StatementFilter,
    ) -> Result<Vec<BankStatement>> {
        let conn = self.conn()?;

        let mut conditions = vec!["tenant_id = ?", "deleted_at IS NULL"];
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(tenant_id)];

        if let Some(status) = filter.ocr_status {
            conditions.push("ocr_status = ?");
            params.push(Box::new(status.as_str()));
        }
        if let Some(status) = filter.matching_status {
            conditions.push("matching_status = ?");
            params.push(Box::new(status.as_str()));
        }
        if let Some(bank_id) = filter.bank_id {
            conditions.push("bank_id = ?");
            params.push(Box::new(bank_id));
        }
        params.push(Box::new(filter.limit.unwrap_or(100)));
        params.push(Box::new(filter.offset.unwrap_or(0)));

        let sql = format!(
            "SELECT {} FROM bank_statements WHERE {} ORDER BY uploaded_at DESC, id DESC LIMIT ? OFFSET ?",
            STATEMENT_COLUMNS,
            conditions.join(" AND ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let statements = stmt
            .query_map(params_refs.as_slice(), Self::row_to_statement)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(statements)
    }

    // ========== OCR stage ==========

    /// Move OCR to processing. Returns false if the statement is not in
    /// `pending` (duplicate delivery or deleted).
    pub fn start_ocr(&self, tenant_id: i64, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let count = conn.execute(
            r#"UPDATE bank_statements SET
                ocr_status = 'processing',
                ocr_started_at = CURRENT_TIMESTAMP,
                ocr_error = NULL
            WHERE id = ? AND tenant_id = ? AND ocr_status = 'pending' AND deleted_at IS NULL"#,
            params![id, tenant_id],
        )?;
        Ok(count > 0)
    }

    pub fn mark_ocr_failed(&self, tenant_id: i64, id: i64, error: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"UPDATE bank_statements SET
                ocr_status = 'failed',
                ocr_error = ?,
                ocr_completed_at = CURRENT_TIMESTAMP
            WHERE id = ? AND tenant_id = ?"#,
            params![error, id, tenant_id],
        )?;
        Ok(())
    }

    /// Reset OCR to pending and clear downstream stages (administrative retry)
    pub fn reset_ocr(&self, tenant_id: i64, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"UPDATE bank_statements SET
                ocr_status = 'pending',
                ocr_error = NULL,
                ocr_started_at = NULL,
                ocr_completed_at = NULL,
                matching_status = NULL,
                matching_note = NULL,
                matching_completed_at = NULL,
                account_matching_status = NULL,
                account_matching_note = NULL,
                account_matching_completed_at = NULL
            WHERE id = ? AND tenant_id = ? AND deleted_at IS NULL"#,
            params![id, tenant_id],
        )?;
        Ok(())
    }

    // ========== Transaction matching stage ==========

    /// Move matching to processing. Returns false unless it is `pending`.
    pub fn start_matching(&self, tenant_id: i64, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let count = conn.execute(
            r#"UPDATE bank_statements SET
                matching_status = 'processing',
                matching_note = NULL
            WHERE id = ? AND tenant_id = ? AND matching_status = 'pending' AND deleted_at IS NULL"#,
            params![id, tenant_id],
        )?;
        Ok(count > 0)
    }

    /// Record the terminal matching status and open the account matching stage
    ///
    /// When matching failed, account matching is recorded as skipped right away.
    pub fn finish_matching(
        &self,
        tenant_id: i64,
        id: i64,
        status: MatchingStatus,
        note: Option<&str>,
    ) -> Result<()> {
        debug_assert!(status.is_terminal());
        let (account_status, account_note) = if status == MatchingStatus::Failed {
            (
                MatchingStatus::Skipped,
                Some("Transaction matching failed".to_string()),
            )
        } else {
            (MatchingStatus::Pending, None)
        };

        let conn = self.conn()?;
        conn.execute(
            r#"UPDATE bank_statements SET
                matching_status = ?,
                matching_note = ?,
                matching_completed_at = CURRENT_TIMESTAMP,
                account_matching_status = ?,
                account_matching_note = ?,
                account_matching_completed_at = CASE WHEN ? = 'skipped' THEN CURRENT_TIMESTAMP ELSE NULL END
            WHERE id = ? AND tenant_id = ?"#,
            params![
                status.as_str(),
                note,
                account_status.as_str(),
                account_note,
                account_status.as_str(),
                id,
                tenant_id,
            ],
        )?;
        Ok(())
    }

    /// Reset matching to pending and clear account matching (rematch / retry)
    pub fn reset_matching(&self, tenant_id: i64, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"UPDATE bank_statements SET
                matching_status = 'pending',
                matching_note = NULL,
                matching_completed_at = NULL,
                account_matching_status = NULL,
                account_matching_note = NULL,
                account_matching_completed_at = NULL
            WHERE id = ? AND tenant_id = ? AND ocr_status = 'completed' AND deleted_at IS NULL"#,
            params![id, tenant_id],
        )?;
        Ok(())
    }

    /// Recompute matched/unmatched counts from the transactions
    pub fn refresh_statement_counts(&self, tenant_id: i64, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"UPDATE bank_statements SET
                transaction_count = (SELECT COUNT(*) FROM statement_transactions WHERE statement_id = ?1),
                matched_count = (SELECT COUNT(*) FROM statement_transactions
                                 WHERE statement_id = ?1 AND sub_category_id IS NOT NULL),
                unmatched_count = (SELECT COUNT(*) FROM statement_transactions
                                   WHERE statement_id = ?1 AND sub_category_id IS NULL)
            WHERE id = ?1 AND tenant_id = ?2"#,
            params![id, tenant_id],
        )?;
        Ok(())
    }

    // ========== Account matching stage ==========

    /// Move account matching to processing. Returns false unless it is `pending`.
    pub fn start_account_matching(&self, tenant_id: i64, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let count = conn.execute(
            r#"UPDATE bank_statements SET
                account_matching_status = 'processing',
                account_matching_note = NULL
            WHERE id = ? AND tenant_id = ? AND account_matching_status = 'pending' AND deleted_at IS NULL"#,
            params![id, tenant_id],
        )?;
        Ok(count > 0)
    }

    pub fn finish_account_matching(
        &self,
        tenant_id: i64,
        id: i64,
        status: MatchingStatus,
        note: Option<&str>,
    ) -> Result<()> {
        debug_assert!(status.is_terminal());
        let conn = self.conn()?;
        conn.execute(
            r#"UPDATE bank_statements SET
                account_matching_status = ?,
                account_matching_note = ?,
                account_matching_completed_at = CURRENT_TIMESTAMP
            WHERE id = ? AND tenant_id = ?"#,
            params![status.as_str(), note, id, tenant_id],
        )?;
        Ok(())
    }

    /// Reset account matching to pending (administrative retry)
    pub fn reset_account_matching(&self, tenant_id: i64, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"UPDATE bank_statements SET
                account_matching_status = 'pending',
                account_matching_note = NULL,
                account_matching_completed_at = NULL
            WHERE id = ? AND tenant_id = ? AND deleted_at IS NULL"#,
            params![id, tenant_id],
        )?;
        Ok(())
    }

    // ========== Lifecycle ==========

    /// Soft-delete a statement and hard-delete its transactions (match
    /// records cascade). Returns false if there was nothing to delete.
    pub fn delete_statement(&self, tenant_id: i64, id: i64) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let count = tx.execute(
            "UPDATE bank_statements SET deleted_at = CURRENT_TIMESTAMP WHERE id = ? AND tenant_id = ? AND deleted_at IS NULL",
            params![id, tenant_id],
        )?;
        if count > 0 {
            tx.execute(
                "DELETE FROM statement_transactions WHERE statement_id = ? AND tenant_id = ?",
                params![id, tenant_id],
            )?;
        }

        tx.commit()?;
        Ok(count > 0)
    }

    /// Recover statements left in `processing` by a restart. Marks them failed
    /// and returns the number of stage columns recovered.
    pub fn recover_stuck_statements(&self) -> Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let ocr = tx.execute(
            r#"UPDATE bank_statements SET
                ocr_status = 'failed',
                ocr_error = ?,
                ocr_completed_at = CURRENT_TIMESTAMP
            WHERE ocr_status = 'processing' AND deleted_at IS NULL"#,
            params![RESTART_MESSAGE],
        )?;
        let matching = tx.execute(
            r#"UPDATE bank_statements SET
                matching_status = 'failed',
                matching_note = ?,
                matching_completed_at = CURRENT_TIMESTAMP,
                account_matching_status = 'skipped',
                account_matching_note = 'Transaction matching failed',
                account_matching_completed_at = CURRENT_TIMESTAMP
            WHERE matching_status = 'processing' AND deleted_at IS NULL"#,
            params![RESTART_MESSAGE],
        )?;
        let accounts = tx.execute(
            r#"UPDATE bank_statements SET
                account_matching_status = 'failed',
                account_matching_note = ?,
                account_matching_completed_at = CURRENT_TIMESTAMP
            WHERE account_matching_status = 'processing' AND deleted_at IS NULL"#,
            params![RESTART_MESSAGE],
        )?;

        tx.commit()?;
        Ok((ocr + matching + accounts) as i64)
    }

    /// Statements with a stage still `pending`, as `(tenant_id, statement_id, job)`
    ///
    /// Used on startup to re-dispatch work an in-process queue lost.
    pub fn list_pending_jobs(&self) -> Result<Vec<(i64, i64, JobKind)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT tenant_id, id,
                   CASE
                       WHEN ocr_status = 'pending' THEN 'process_ocr'
                       WHEN matching_status = 'pending' THEN 'match_transactions'
                       ELSE 'match_accounts'
                   END
            FROM bank_statements
            WHERE deleted_at IS NULL
              AND (ocr_status = 'pending'
                   OR matching_status = 'pending'
                   OR account_matching_status = 'pending')
            ORDER BY id
            "#,
        )?;
        let jobs = stmt
            .query_map([], |row| {
                let kind: String = row.get(2)?;
                Ok((row.get(0)?, row.get(1)?, kind))
            })?
            .collect::<std::result::Result<Vec<(i64, i64, String)>, _>>()?;

        Ok(jobs
            .into_iter()
            .filter_map(|(tenant, id, kind)| kind.parse().ok().map(|k| (tenant, id, k)))
            .collect())
    }

    /// Column order follows `STATEMENT_COLUMNS`
    fn row_to_statement(row: &rusqlite::Row) -> rusqlite::Result<BankStatement> {
        let ocr_status: String = row.get(6)?;
        let matching_status: Option<String> = row.get(7)?;
        let account_matching_status: Option<String> = row.get(8)?;
        let period_start: Option<String> = row.get(9)?;
        let period_end: Option<String> = row.get(10)?;
        let uploaded_at: String = row.get(17)?;

        Ok(BankStatement {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            bank_id: row.get(2)?,
            file_path: row.get(3)?,
            original_filename: row.get(4)?,
            file_hash: row.get(5)?,
            ocr_status: ocr_status.parse().unwrap_or_default(),
            matching_status: matching_status.and_then(|s| s.parse().ok()),
            account_matching_status: account_matching_status.and_then(|s| s.parse().ok()),
            period_start: period_start.as_deref().map(parse_date),
            period_end: period_end.as_deref().map(parse_date),
            transaction_count: row.get(11)?,
            matched_count: row.get(12)?,
            unmatched_count: row.get(13)?,
            ocr_error: row.get(14)?,
            matching_note: row.get(15)?,
            account_matching_note: row.get(16)?,
            uploaded_at: parse_datetime(&uploaded_at),
            ocr_started_at: parse_optional_datetime(row.get(18)?),
            ocr_completed_at: parse_optional_datetime(row.get(19)?),
            matching_completed_at: parse_optional_datetime(row.get(20)?),
            account_matching_completed_at: parse_optional_datetime(row.get(21)?),
            deleted_at: parse_optional_datetime(row.get(22)?),
        })
    }
}

/// Statement period as extracted, for `store_ocr_result`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatementPeriod {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}
