//! Keyword rule store

use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Keyword, KeywordUpdate, KeywordWithPath, NewKeyword};

const KEYWORD_COLUMNS: &str = "k.id, k.tenant_id, k.keyword, k.is_regex, k.case_sensitive, \
     k.priority, k.sub_category_id, k.is_active, k.created_at";

impl Database {
    /// Insert a keyword rule
    ///
    /// Only checks shape and ownership; pattern compilation is validated by
    /// the caller against the configured limits (see `matcher::validate_rule`).
    pub fn create_keyword(&self, tenant_id: i64, new: &NewKeyword) -> Result<i64> {
        if new.keyword.trim().is_empty() {
            return Err(Error::InvalidKeyword("Keyword text cannot be empty".into()));
        }
        // Rejects sub-categories of other tenants
        self.category_path(tenant_id, new.sub_category_id)?;

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO keywords (tenant_id, keyword, is_regex, case_sensitive, priority, sub_category_id)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                tenant_id,
                new.keyword,
                new.is_regex,
                new.case_sensitive,
                new.priority,
                new.sub_category_id,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_keyword(&self, tenant_id: i64, id: i64) -> Result<Option<Keyword>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM keywords k WHERE k.id = ? AND k.tenant_id = ?",
            KEYWORD_COLUMNS
        );
        let keyword = conn
            .query_row(&sql, params![id, tenant_id], Self::row_to_keyword)
            .optional()?;
        Ok(keyword)
    }

    /// List all keywords for a tenant (active and inactive), in evaluation order
    pub fn list_keywords(&self, tenant_id: i64) -> Result<Vec<Keyword>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM keywords k WHERE k.tenant_id = ? ORDER BY k.priority DESC, k.id ASC",
            KEYWORD_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let keywords = stmt
            .query_map(params![tenant_id], Self::row_to_keyword)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keywords)
    }

    /// Active keywords joined with their category path, priority desc then id asc
    pub fn list_active_keyword_rules(&self, tenant_id: i64) -> Result<Vec<KeywordWithPath>> {
        let conn = self.conn()?;
        let sql = format!(
            r#"
            SELECT {}, c.id, c.type_id
            FROM keywords k
            JOIN sub_categories s ON k.sub_category_id = s.id
            JOIN categories c ON s.category_id = c.id
            WHERE k.tenant_id = ? AND k.is_active = 1
            ORDER BY k.priority DESC, k.id ASC
            "#,
            KEYWORD_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rules = stmt
            .query_map(params![tenant_id], |row| {
                Ok(KeywordWithPath {
                    keyword: Self::row_to_keyword(row)?,
                    category_id: row.get(9)?,
                    type_id: row.get(10)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    pub fn count_active_keywords(&self, tenant_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM keywords WHERE tenant_id = ? AND is_active = 1",
            params![tenant_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Apply a partial update, returning the updated keyword
    pub fn update_keyword(&self, tenant_id: i64, id: i64, update: &KeywordUpdate) -> Result<Keyword> {
        let existing = self
            .get_keyword(tenant_id, id)?
            .ok_or_else(|| Error::NotFound(format!("keyword {}", id)))?;

        let keyword = update.keyword.clone().unwrap_or(existing.keyword);
        if keyword.trim().is_empty() {
            return Err(Error::InvalidKeyword("Keyword text cannot be empty".into()));
        }
        let sub_category_id = update.sub_category_id.unwrap_or(existing.sub_category_id);
        if update.sub_category_id.is_some() {
            self.category_path(tenant_id, sub_category_id)?;
        }

        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE keywords SET
                keyword = ?,
                is_regex = ?,
                case_sensitive = ?,
                priority = ?,
                sub_category_id = ?,
                is_active = ?
            WHERE id = ? AND tenant_id = ?
            "#,
            params![
                keyword,
                update.is_regex.unwrap_or(existing.is_regex),
                update.case_sensitive.unwrap_or(existing.case_sensitive),
                update.priority.unwrap_or(existing.priority),
                sub_category_id,
                update.is_active.unwrap_or(existing.is_active),
                id,
                tenant_id,
            ],
        )?;
        drop(conn);

        self.get_keyword(tenant_id, id)?
            .ok_or_else(|| Error::NotFound(format!("keyword {}", id)))
    }

    /// Activate or deactivate a keyword. Returns false if it doesn't exist.
    pub fn set_keyword_active(&self, tenant_id: i64, id: i64, active: bool) -> Result<bool> {
        let conn = self.conn()?;
        let count = conn.execute(
            "UPDATE keywords SET is_active = ? WHERE id = ? AND tenant_id = ?",
            params![active, id, tenant_id],
        )?;
        Ok(count > 0)
    }

    /// Delete a keyword. Transactions it matched keep their category but lose
    /// the keyword reference (ON DELETE SET NULL).
    pub fn delete_keyword(&self, tenant_id: i64, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let count = conn.execute(
            "DELETE FROM keywords WHERE id = ? AND tenant_id = ?",
            params![id, tenant_id],
        )?;
        Ok(count > 0)
    }

    /// Column order follows `KEYWORD_COLUMNS`
    fn row_to_keyword(row: &rusqlite::Row) -> rusqlite::Result<Keyword> {
        let created_at_str: String = row.get(8)?;
        Ok(Keyword {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            keyword: row.get(2)?,
            is_regex: row.get(3)?,
            case_sensitive: row.get(4)?,
            priority: row.get(5)?,
            sub_category_id: row.get(6)?,
            is_active: row.get(7)?,
            created_at: parse_datetime(&created_at_str),
        })
    }
}
