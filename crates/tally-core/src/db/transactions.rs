//! Statement transaction operations

use rusqlite::{params, OptionalExtension};

use super::statements::StatementPeriod;
use super::{parse_date, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{NewStatementTransaction, StatementTransaction, TransactionType};

pub(crate) const TRANSACTION_COLUMNS: &str = "id, tenant_id, statement_id, date, description, \
     debit, credit, balance, transaction_type, matched_keyword_id, sub_category_id, category_id, \
     type_id, confidence_score, is_verified, is_manual, created_at, updated_at";

/// Query options for transaction listings
#[derive(Debug, Clone, Default)]
pub struct TransactionQuery {
    pub statement_id: Option<i64>,
    pub sub_category_id: Option<i64>,
    /// Only transactions without a category
    pub unmatched_only: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl TransactionQuery {
    pub fn for_statement(statement_id: i64) -> Self {
        Self {
            statement_id: Some(statement_id),
            ..Default::default()
        }
    }
}

impl Database {
    /// Store the OCR extraction for a statement and complete the OCR stage
    ///
    /// Runs in one SQL transaction: previously extracted lines for the
    /// statement are replaced, the statement's counts and period are updated,
    /// and transaction matching is opened (`matching_status = pending`).
    /// Returns false (and writes nothing) if the statement is no longer in
    /// `ocr_status = processing`.
    pub fn store_ocr_result(
        &self,
        tenant_id: i64,
        statement_id: i64,
        lines: &[NewStatementTransaction],
        period: StatementPeriod,
    ) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let updated = tx.execute(
            r#"UPDATE bank_statements SET
                ocr_status = 'completed',
                ocr_completed_at = CURRENT_TIMESTAMP,
                ocr_error = NULL,
                period_start = COALESCE(?, period_start),
                period_end = COALESCE(?, period_end),
                transaction_count = ?,
                matched_count = 0,
                unmatched_count = ?,
                matching_status = 'pending',
                matching_note = NULL,
                account_matching_status = NULL,
                account_matching_note = NULL
            WHERE id = ? AND tenant_id = ? AND ocr_status = 'processing' AND deleted_at IS NULL"#,
            params![
                period.start.map(|d| d.to_string()),
                period.end.map(|d| d.to_string()),
                lines.len() as i64,
                lines.len() as i64,
                statement_id,
                tenant_id,
            ],
        )?;
        if updated == 0 {
            return Ok(false);
        }

        tx.execute(
            "DELETE FROM statement_transactions WHERE statement_id = ? AND tenant_id = ?",
            params![statement_id, tenant_id],
        )?;

        {
            let mut insert = tx.prepare(
                r#"
                INSERT INTO statement_transactions
                    (tenant_id, statement_id, date, description, debit, credit, balance, transaction_type)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )?;
            for line in lines {
                if line.description.trim().is_empty() {
                    return Err(Error::InvalidData(format!(
                        "Transaction on {} has an empty description",
                        line.date
                    )));
                }
                let kind = TransactionType::from_amounts(line.debit, line.credit);
                insert.execute(params![
                    tenant_id,
                    statement_id,
                    line.date.to_string(),
                    line.description,
                    line.debit.abs(),
                    line.credit.abs(),
                    line.balance,
                    kind.as_str(),
                ])?;
            }
        }

        tx.commit()?;
        Ok(true)
    }

    pub fn get_transaction(&self, tenant_id: i64, id: i64) -> Result<Option<StatementTransaction>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM statement_transactions WHERE id = ? AND tenant_id = ?",
            TRANSACTION_COLUMNS
        );
        let transaction = conn
            .query_row(&sql, params![id, tenant_id], Self::row_to_transaction)
            .optional()?;
        Ok(transaction)
    }

    /// Get a transaction, or `NotFound`
    pub fn require_transaction(&self, tenant_id: i64, id: i64) -> Result<StatementTransaction> {
        self.get_transaction(tenant_id, id)?
            .ok_or_else(|| Error::NotFound(format!("transaction {}", id)))
    }

    /// List transactions in statement order (date, then extraction order)
    pub fn list_transactions(
        &self,
        tenant_id: i64,
        query: &TransactionQuery,
    ) -> Result<Vec<StatementTransaction>> {
        let conn = self.conn()?;

        let mut conditions = vec!["tenant_id = ?"];
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(tenant_id)];

        if let Some(statement_id) = query.statement_id {
            conditions.push("statement_id = ?");
            params.push(Box::new(statement_id));
        }
        if let Some(sub_category_id) = query.sub_category_id {
            conditions.push("sub_category_id = ?");
            params.push(Box::new(sub_category_id));
        }
        if query.unmatched_only {
            conditions.push("sub_category_id IS NULL");
        }
        params.push(Box::new(query.limit.unwrap_or(-1)));
        params.push(Box::new(query.offset.unwrap_or(0)));

        let sql = format!(
            "SELECT {} FROM statement_transactions WHERE {} ORDER BY date, id LIMIT ? OFFSET ?",
            TRANSACTION_COLUMNS,
            conditions.join(" AND ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let transactions = stmt
            .query_map(params_refs.as_slice(), Self::row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(transactions)
    }

    /// Uncategorized transactions that automatic matching may still touch
    ///
    /// Manual and verified transactions are excluded. `statement_id = None`
    /// covers every live statement of the tenant.
    pub fn list_auto_matchable_unmatched(
        &self,
        tenant_id: i64,
        statement_id: Option<i64>,
    ) -> Result<Vec<StatementTransaction>> {
        let conn = self.conn()?;
        let sql = format!(
            r#"
            SELECT {} FROM statement_transactions
            WHERE tenant_id = ?1
              AND (?2 IS NULL OR statement_id = ?2)
              AND sub_category_id IS NULL
              AND is_manual = 0
              AND is_verified = 0
            ORDER BY date, id
            "#,
            TRANSACTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let transactions = stmt
            .query_map(params![tenant_id, statement_id], Self::row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(transactions)
    }

    pub fn count_statement_transactions(&self, tenant_id: i64, statement_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM statement_transactions WHERE statement_id = ? AND tenant_id = ?",
            params![statement_id, tenant_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Mark a transaction as human-confirmed (or clear the flag)
    pub fn set_transaction_verified(&self, tenant_id: i64, id: i64, verified: bool) -> Result<bool> {
        let conn = self.conn()?;
        let count = conn.execute(
            r#"UPDATE statement_transactions SET
                is_verified = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ? AND tenant_id = ? AND is_verified != ?"#,
            params![verified, id, tenant_id, verified],
        )?;
        Ok(count > 0)
    }

    /// Column order follows `TRANSACTION_COLUMNS`
    pub(crate) fn row_to_transaction(row: &rusqlite::Row) -> rusqlite::Result<StatementTransaction> {
        let date_str: String = row.get(3)?;
        let type_str: String = row.get(8)?;
        let created_at_str: String = row.get(16)?;
        let updated_at_str: String = row.get(17)?;
        Ok(StatementTransaction {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            statement_id: row.get(2)?,
            date: parse_date(&date_str),
            description: row.get(4)?,
            debit: row.get(5)?,
            credit: row.get(6)?,
            balance: row.get(7)?,
            transaction_type: type_str.parse().unwrap_or(TransactionType::Debit),
            matched_keyword_id: row.get(9)?,
            sub_category_id: row.get(10)?,
            category_id: row.get(11)?,
            type_id: row.get(12)?,
            confidence_score: row.get(13)?,
            is_verified: row.get(14)?,
            is_manual: row.get(15)?,
            created_at: parse_datetime(&created_at_str),
            updated_at: parse_datetime(&updated_at_str),
        })
    }
}
