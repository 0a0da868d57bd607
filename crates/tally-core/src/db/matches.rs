//! Match records and the denormalization synchronizer
//!
//! `transaction_categories` is authoritative. The category columns on
//! `statement_transactions` are a copy of the transaction's primary record and
//! are only written here, inside the same SQL transaction that changes the
//! primary record. Every operation reports whether it wrote anything so the
//! caller can skip post-mutation hooks on no-ops.

use rusqlite::{params, Connection, OptionalExtension};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{ApplyOutcome, MatchResult, MatchSource, TransactionCategory};

/// The five fields copied from the primary record onto the transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Assignment {
    sub_category_id: Option<i64>,
    category_id: Option<i64>,
    type_id: Option<i64>,
    matched_keyword_id: Option<i64>,
    confidence_score: Option<i32>,
}

impl Assignment {
    fn from_record(record: &TransactionCategory) -> Self {
        Self {
            sub_category_id: Some(record.sub_category_id),
            category_id: Some(record.category_id),
            type_id: Some(record.type_id),
            matched_keyword_id: record.matched_keyword_id,
            confidence_score: Some(record.confidence_score),
        }
    }

    fn from_match(m: &MatchResult) -> Self {
        Self {
            sub_category_id: Some(m.sub_category_id),
            category_id: Some(m.category_id),
            type_id: Some(m.type_id),
            matched_keyword_id: Some(m.keyword_id),
            confidence_score: Some(m.confidence_score),
        }
    }
}

/// Flags and current denormalized fields of a transaction
struct TransactionState {
    assignment: Assignment,
    is_manual: bool,
    is_verified: bool,
}

const RECORD_COLUMNS: &str = "id, tenant_id, transaction_id, sub_category_id, category_id, type_id, \
     matched_keyword_id, confidence_score, is_primary, source, created_at, updated_at";

impl Database {
    /// Make `m` the primary keyword match of a transaction
    ///
    /// Idempotent: re-applying the match that is already primary (with the
    /// transaction in sync) writes nothing and returns `Unchanged`. Manual or
    /// verified transactions are never touched by keyword matches.
    pub fn apply_primary_match(
        &self,
        tenant_id: i64,
        transaction_id: i64,
        m: &MatchResult,
    ) -> Result<ApplyOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let state = load_state(&tx, tenant_id, transaction_id)?;
        if state.is_manual || state.is_verified {
            return Ok(ApplyOutcome::Unchanged);
        }

        let wanted = Assignment::from_match(m);
        let primary = load_primary(&tx, transaction_id)?;
        if let Some(ref record) = primary {
            if record.source == MatchSource::Keyword
                && Assignment::from_record(record) == wanted
                && state.assignment == wanted
            {
                return Ok(ApplyOutcome::Unchanged);
            }
        }

        demote_primary(&tx, transaction_id)?;

        // Reuse the candidate record this keyword produced before, if any
        let candidate: Option<i64> = tx
            .query_row(
                r#"SELECT id FROM transaction_categories
                   WHERE transaction_id = ? AND source = 'keyword' AND matched_keyword_id = ?
                   ORDER BY id LIMIT 1"#,
                params![transaction_id, m.keyword_id],
                |row| row.get(0),
            )
            .optional()?;

        match candidate {
            Some(record_id) => {
                tx.execute(
                    r#"UPDATE transaction_categories SET
                        sub_category_id = ?,
                        category_id = ?,
                        type_id = ?,
                        confidence_score = ?,
                        is_primary = 1,
                        updated_at = CURRENT_TIMESTAMP
                    WHERE id = ?"#,
                    params![
                        m.sub_category_id,
                        m.category_id,
                        m.type_id,
                        m.confidence_score,
                        record_id
                    ],
                )?;
            }
            None => {
                tx.execute(
                    r#"INSERT INTO transaction_categories
                        (tenant_id, transaction_id, sub_category_id, category_id, type_id,
                         matched_keyword_id, confidence_score, is_primary, source)
                    VALUES (?, ?, ?, ?, ?, ?, ?, 1, 'keyword')"#,
                    params![
                        tenant_id,
                        transaction_id,
                        m.sub_category_id,
                        m.category_id,
                        m.type_id,
                        m.keyword_id,
                        m.confidence_score,
                    ],
                )?;
            }
        }

        write_assignment(&tx, transaction_id, &wanted, None)?;
        tx.commit()?;
        Ok(ApplyOutcome::Updated)
    }

    /// Promote an existing match record to primary, demoting any other
    ///
    /// Returns the owning transaction id with the outcome.
    pub fn promote_match(&self, tenant_id: i64, record_id: i64) -> Result<(i64, ApplyOutcome)> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let sql = format!(
            "SELECT {} FROM transaction_categories WHERE id = ? AND tenant_id = ?",
            RECORD_COLUMNS
        );
        let record = tx
            .query_row(&sql, params![record_id, tenant_id], row_to_record)
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("match record {}", record_id)))?;

        let state = load_state(&tx, tenant_id, record.transaction_id)?;
        let wanted = Assignment::from_record(&record);
        let manual = record.source == MatchSource::Manual;
        if record.is_primary && state.assignment == wanted && state.is_manual == manual {
            return Ok((record.transaction_id, ApplyOutcome::Unchanged));
        }

        demote_primary(&tx, record.transaction_id)?;
        tx.execute(
            "UPDATE transaction_categories SET is_primary = 1, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![record.id],
        )?;
        write_assignment(&tx, record.transaction_id, &wanted, Some(manual))?;

        tx.commit()?;
        Ok((record.transaction_id, ApplyOutcome::Updated))
    }

    /// Demote a keyword-sourced primary and clear the denormalized fields
    ///
    /// A manual primary, or a manual/verified transaction, is left alone.
    /// Already-clear transactions return `Unchanged`.
    pub fn clear_primary_match(&self, tenant_id: i64, transaction_id: i64) -> Result<ApplyOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let state = load_state(&tx, tenant_id, transaction_id)?;
        if state.is_manual || state.is_verified {
            return Ok(ApplyOutcome::Unchanged);
        }

        let primary = load_primary(&tx, transaction_id)?;
        if let Some(ref record) = primary {
            if record.source == MatchSource::Manual {
                return Ok(ApplyOutcome::Unchanged);
            }
        }
        if primary.is_none() && state.assignment == Assignment::default() {
            return Ok(ApplyOutcome::Unchanged);
        }

        demote_primary(&tx, transaction_id)?;
        write_assignment(&tx, transaction_id, &Assignment::default(), None)?;

        tx.commit()?;
        Ok(ApplyOutcome::Updated)
    }

    /// Categorize a transaction by hand
    ///
    /// Creates (or reuses) a manual primary record with confidence 100 and
    /// marks the transaction `is_manual`, which shields it from automatic
    /// matching from then on.
    pub fn set_manual_category(
        &self,
        tenant_id: i64,
        transaction_id: i64,
        sub_category_id: i64,
    ) -> Result<ApplyOutcome> {
        let path = self.category_path(tenant_id, sub_category_id)?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let state = load_state(&tx, tenant_id, transaction_id)?;
        let wanted = Assignment {
            sub_category_id: Some(path.sub_category_id),
            category_id: Some(path.category_id),
            type_id: Some(path.type_id),
            matched_keyword_id: None,
            confidence_score: Some(100),
        };

        let primary = load_primary(&tx, transaction_id)?;
        if let Some(ref record) = primary {
            if record.source == MatchSource::Manual
                && Assignment::from_record(record) == wanted
                && state.assignment == wanted
                && state.is_manual
            {
                return Ok(ApplyOutcome::Unchanged);
            }
        }

        demote_primary(&tx, transaction_id)?;

        let candidate: Option<i64> = tx
            .query_row(
                r#"SELECT id FROM transaction_categories
                   WHERE transaction_id = ? AND source = 'manual' AND sub_category_id = ?
                   ORDER BY id LIMIT 1"#,
                params![transaction_id, path.sub_category_id],
                |row| row.get(0),
            )
            .optional()?;

        match candidate {
            Some(record_id) => {
                tx.execute(
                    r#"UPDATE transaction_categories SET
                        category_id = ?,
                        type_id = ?,
                        confidence_score = 100,
                        is_primary = 1,
                        updated_at = CURRENT_TIMESTAMP
                    WHERE id = ?"#,
                    params![path.category_id, path.type_id, record_id],
                )?;
            }
            None => {
                tx.execute(
                    r#"INSERT INTO transaction_categories
                        (tenant_id, transaction_id, sub_category_id, category_id, type_id,
                         matched_keyword_id, confidence_score, is_primary, source)
                    VALUES (?, ?, ?, ?, ?, NULL, 100, 1, 'manual')"#,
                    params![
                        tenant_id,
                        transaction_id,
                        path.sub_category_id,
                        path.category_id,
                        path.type_id,
                    ],
                )?;
            }
        }

        write_assignment(&tx, transaction_id, &wanted, Some(true))?;
        tx.commit()?;
        Ok(ApplyOutcome::Updated)
    }

    /// All match records of a transaction, primary first
    pub fn list_match_records(
        &self,
        tenant_id: i64,
        transaction_id: i64,
    ) -> Result<Vec<TransactionCategory>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM transaction_categories WHERE transaction_id = ? AND tenant_id = ? ORDER BY is_primary DESC, id",
            RECORD_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![transaction_id, tenant_id], row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// The primary match record of a transaction, if any
    pub fn get_primary_match(
        &self,
        tenant_id: i64,
        transaction_id: i64,
    ) -> Result<Option<TransactionCategory>> {
        let conn = self.conn()?;
        // Tenant check
        load_state(&conn, tenant_id, transaction_id)?;
        load_primary(&conn, transaction_id)
    }

    /// Whether the transaction's denormalized fields equal its primary record
    /// (or are all null when there is none)
    pub fn check_denormalization(&self, tenant_id: i64, transaction_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let state = load_state(&conn, tenant_id, transaction_id)?;
        let expected = load_primary(&conn, transaction_id)?
            .map(|r| Assignment::from_record(&r))
            .unwrap_or_default();
        Ok(state.assignment == expected)
    }

    /// Transaction ids whose denormalized fields disagree with their primary record
    pub fn find_denormalization_drift(&self, tenant_id: i64) -> Result<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT t.id
            FROM statement_transactions t
            LEFT JOIN transaction_categories p
                ON p.transaction_id = t.id AND p.is_primary = 1
            WHERE t.tenant_id = ?
              AND (
                  (p.id IS NULL AND (t.sub_category_id IS NOT NULL
                                     OR t.category_id IS NOT NULL
                                     OR t.type_id IS NOT NULL
                                     OR t.matched_keyword_id IS NOT NULL
                                     OR t.confidence_score IS NOT NULL))
                  OR
                  (p.id IS NOT NULL AND (t.sub_category_id IS NOT p.sub_category_id
                                         OR t.category_id IS NOT p.category_id
                                         OR t.type_id IS NOT p.type_id
                                         OR t.matched_keyword_id IS NOT p.matched_keyword_id
                                         OR t.confidence_score IS NOT p.confidence_score))
              )
            ORDER BY t.id
            "#,
        )?;
        let ids = stmt
            .query_map(params![tenant_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// Copy the primary record's fields back onto the transaction
    pub fn repair_denormalization(
        &self,
        tenant_id: i64,
        transaction_id: i64,
    ) -> Result<ApplyOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let state = load_state(&tx, tenant_id, transaction_id)?;
        let expected = load_primary(&tx, transaction_id)?
            .map(|r| Assignment::from_record(&r))
            .unwrap_or_default();
        if state.assignment == expected {
            return Ok(ApplyOutcome::Unchanged);
        }

        write_assignment(&tx, transaction_id, &expected, None)?;
        tx.commit()?;
        Ok(ApplyOutcome::Updated)
    }
}

fn load_state(conn: &Connection, tenant_id: i64, transaction_id: i64) -> Result<TransactionState> {
    conn.query_row(
        r#"SELECT sub_category_id, category_id, type_id, matched_keyword_id, confidence_score,
                  is_manual, is_verified
           FROM statement_transactions WHERE id = ? AND tenant_id = ?"#,
        params![transaction_id, tenant_id],
        |row| {
            Ok(TransactionState {
                assignment: Assignment {
                    sub_category_id: row.get(0)?,
                    category_id: row.get(1)?,
                    type_id: row.get(2)?,
                    matched_keyword_id: row.get(3)?,
                    confidence_score: row.get(4)?,
                },
                is_manual: row.get(5)?,
                is_verified: row.get(6)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| Error::NotFound(format!("transaction {}", transaction_id)))
}

fn load_primary(conn: &Connection, transaction_id: i64) -> Result<Option<TransactionCategory>> {
    let sql = format!(
        "SELECT {} FROM transaction_categories WHERE transaction_id = ? AND is_primary = 1",
        RECORD_COLUMNS
    );
    let record = conn
        .query_row(&sql, params![transaction_id], row_to_record)
        .optional()?;
    Ok(record)
}

fn demote_primary(conn: &Connection, transaction_id: i64) -> Result<()> {
    conn.execute(
        r#"UPDATE transaction_categories SET is_primary = 0, updated_at = CURRENT_TIMESTAMP
           WHERE transaction_id = ? AND is_primary = 1"#,
        params![transaction_id],
    )?;
    Ok(())
}

/// Write the denormalized fields; `manual` also sets `is_manual` when given
fn write_assignment(
    conn: &Connection,
    transaction_id: i64,
    a: &Assignment,
    manual: Option<bool>,
) -> Result<()> {
    conn.execute(
        r#"UPDATE statement_transactions SET
            sub_category_id = ?,
            category_id = ?,
            type_id = ?,
            matched_keyword_id = ?,
            confidence_score = ?,
            is_manual = COALESCE(?, is_manual),
            updated_at = CURRENT_TIMESTAMP
        WHERE id = ?"#,
        params![
            a.sub_category_id,
            a.category_id,
            a.type_id,
            a.matched_keyword_id,
            a.confidence_score,
            manual,
            transaction_id,
        ],
    )?;
    Ok(())
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<TransactionCategory> {
    let source: String = row.get(9)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;
    Ok(TransactionCategory {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        transaction_id: row.get(2)?,
        sub_category_id: row.get(3)?,
        category_id: row.get(4)?,
        type_id: row.get(5)?,
        matched_keyword_id: row.get(6)?,
        confidence_score: row.get(7)?,
        is_primary: row.get(8)?,
        source: source.parse().unwrap_or(MatchSource::Keyword),
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}
