//! Account, account keyword, and account match operations

use std::collections::HashSet;

use rusqlite::{params, OptionalExtension};

use super::{conflict_on_unique, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Account, AccountKeyword, AccountMatch, NewAccountKeyword};

/// One account assignment produced by the account matching stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountAssignment {
    pub transaction_id: i64,
    pub account_id: i64,
    pub account_keyword_id: i64,
    pub confidence_score: i32,
}

const ACCOUNT_KEYWORD_COLUMNS: &str = "k.id, k.tenant_id, k.account_id, k.keyword, k.is_regex, \
     k.case_sensitive, k.priority, k.is_active, k.created_at";

impl Database {
    pub fn create_account(&self, tenant_id: i64, code: &str, name: &str) -> Result<i64> {
        let code = code.trim();
        if code.is_empty() || name.trim().is_empty() {
            return Err(Error::InvalidData("Account code and name are required".into()));
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO accounts (tenant_id, code, name) VALUES (?, ?, ?)",
            params![tenant_id, code, name.trim()],
        )
        .map_err(|e| conflict_on_unique(e, || format!("Account '{}' already exists", code)))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_account(&self, tenant_id: i64, id: i64) -> Result<Option<Account>> {
        let conn = self.conn()?;
        let account = conn
            .query_row(
                "SELECT id, tenant_id, code, name, is_active, created_at FROM accounts WHERE id = ? AND tenant_id = ?",
                params![id, tenant_id],
                Self::row_to_account,
            )
            .optional()?;
        Ok(account)
    }

    pub fn list_accounts(&self, tenant_id: i64) -> Result<Vec<Account>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, code, name, is_active, created_at FROM accounts WHERE tenant_id = ? ORDER BY code",
        )?;
        let accounts = stmt
            .query_map(params![tenant_id], Self::row_to_account)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(accounts)
    }

    fn row_to_account(row: &rusqlite::Row) -> rusqlite::Result<Account> {
        let created_at: String = row.get(5)?;
        Ok(Account {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            code: row.get(2)?,
            name: row.get(3)?,
            is_active: row.get(4)?,
            created_at: parse_datetime(&created_at),
        })
    }

    // ========== Account keywords ==========

    pub fn create_account_keyword(
        &self,
        tenant_id: i64,
        account_id: i64,
        new: &NewAccountKeyword,
    ) -> Result<i64> {
        if new.keyword.trim().is_empty() {
            return Err(Error::InvalidKeyword("Keyword text cannot be empty".into()));
        }
        if self.get_account(tenant_id, account_id)?.is_none() {
            return Err(Error::NotFound(format!("account {}", account_id)));
        }

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO account_keywords (tenant_id, account_id, keyword, is_regex, case_sensitive, priority)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                tenant_id,
                account_id,
                new.keyword,
                new.is_regex,
                new.case_sensitive,
                new.priority,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// All account keywords in evaluation order (priority desc, id asc)
    pub fn list_account_keywords(&self, tenant_id: i64) -> Result<Vec<AccountKeyword>> {
        self.query_account_keywords(tenant_id, false)
    }

    /// Active keywords of active accounts, in evaluation order
    pub fn list_active_account_keywords(&self, tenant_id: i64) -> Result<Vec<AccountKeyword>> {
        self.query_account_keywords(tenant_id, true)
    }

    fn query_account_keywords(&self, tenant_id: i64, active_only: bool) -> Result<Vec<AccountKeyword>> {
        let conn = self.conn()?;
        let filter = if active_only {
            "AND k.is_active = 1 AND a.is_active = 1"
        } else {
            ""
        };
        let sql = format!(
            r#"
            SELECT {}
            FROM account_keywords k
            JOIN accounts a ON k.account_id = a.id
            WHERE k.tenant_id = ? {}
            ORDER BY k.priority DESC, k.id ASC
            "#,
            ACCOUNT_KEYWORD_COLUMNS, filter
        );
        let mut stmt = conn.prepare(&sql)?;
        let keywords = stmt
            .query_map(params![tenant_id], |row| {
                let created_at: String = row.get(8)?;
                Ok(AccountKeyword {
                    id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    account_id: row.get(2)?,
                    keyword: row.get(3)?,
                    is_regex: row.get(4)?,
                    case_sensitive: row.get(5)?,
                    priority: row.get(6)?,
                    is_active: row.get(7)?,
                    created_at: parse_datetime(&created_at),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keywords)
    }

    pub fn set_account_keyword_active(&self, tenant_id: i64, id: i64, active: bool) -> Result<bool> {
        let conn = self.conn()?;
        let count = conn.execute(
            "UPDATE account_keywords SET is_active = ? WHERE id = ? AND tenant_id = ?",
            params![active, id, tenant_id],
        )?;
        Ok(count > 0)
    }

    pub fn delete_account_keyword(&self, tenant_id: i64, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let count = conn.execute(
            "DELETE FROM account_keywords WHERE id = ? AND tenant_id = ?",
            params![id, tenant_id],
        )?;
        Ok(count > 0)
    }

    // ========== Account matches ==========

    /// Replace the account matches of a statement's transactions
    ///
    /// Rows that already hold the same assignment are left untouched, and
    /// transactions absent from `assignments` lose their match. Returns the
    /// number of rows written or removed.
    pub fn replace_account_matches(
        &self,
        tenant_id: i64,
        statement_id: i64,
        assignments: &[AccountAssignment],
    ) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut changed = 0;

        {
            let mut upsert = tx.prepare(
                r#"
                INSERT INTO account_matches
                    (tenant_id, transaction_id, account_id, account_keyword_id, confidence_score)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(transaction_id) DO UPDATE SET
                    account_id = excluded.account_id,
                    account_keyword_id = excluded.account_keyword_id,
                    confidence_score = excluded.confidence_score
                WHERE account_id IS NOT excluded.account_id
                   OR account_keyword_id IS NOT excluded.account_keyword_id
                   OR confidence_score IS NOT excluded.confidence_score
                "#,
            )?;
            for a in assignments {
                changed += upsert.execute(params![
                    tenant_id,
                    a.transaction_id,
                    a.account_id,
                    a.account_keyword_id,
                    a.confidence_score,
                ])?;
            }
        }

        let keep: HashSet<i64> = assignments.iter().map(|a| a.transaction_id).collect();
        let existing: Vec<i64> = {
            let mut stmt = tx.prepare(
                r#"SELECT m.transaction_id FROM account_matches m
                   JOIN statement_transactions t ON m.transaction_id = t.id
                   WHERE t.statement_id = ? AND m.tenant_id = ?"#,
            )?;
            let ids = stmt
                .query_map(params![statement_id, tenant_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<i64>, _>>()?;
            ids
        };
        for transaction_id in existing.into_iter().filter(|id| !keep.contains(id)) {
            changed += tx.execute(
                "DELETE FROM account_matches WHERE transaction_id = ?",
                params![transaction_id],
            )?;
        }

        tx.commit()?;
        Ok(changed)
    }

    /// Account matches for a statement's transactions
    pub fn list_account_matches(&self, tenant_id: i64, statement_id: i64) -> Result<Vec<AccountMatch>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT m.id, m.tenant_id, m.transaction_id, m.account_id, m.account_keyword_id,
                   m.confidence_score, m.created_at
            FROM account_matches m
            JOIN statement_transactions t ON m.transaction_id = t.id
            WHERE t.statement_id = ? AND m.tenant_id = ?
            ORDER BY m.transaction_id
            "#,
        )?;
        let matches = stmt
            .query_map(params![statement_id, tenant_id], |row| {
                let created_at: String = row.get(6)?;
                Ok(AccountMatch {
                    id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    transaction_id: row.get(2)?,
                    account_id: row.get(3)?,
                    account_keyword_id: row.get(4)?,
                    confidence_score: row.get(5)?,
                    created_at: parse_datetime(&created_at),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(matches)
    }
}
