//! Tenant and bank operations

use rusqlite::{params, OptionalExtension};

use super::{conflict_on_unique, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Bank, Tenant};

impl Database {
    /// Create a tenant, returning its id
    pub fn create_tenant(&self, name: &str) -> Result<i64> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidData("Tenant name cannot be empty".into()));
        }

        let conn = self.conn()?;
        conn.execute("INSERT INTO tenants (name) VALUES (?)", params![name])
            .map_err(|e| conflict_on_unique(e, || format!("Tenant '{}' already exists", name)))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_tenant(&self, id: i64) -> Result<Option<Tenant>> {
        let conn = self.conn()?;
        let tenant = conn
            .query_row(
                "SELECT id, name, created_at FROM tenants WHERE id = ?",
                params![id],
                Self::row_to_tenant,
            )
            .optional()?;
        Ok(tenant)
    }

    /// Get a tenant, or `NotFound`
    pub fn require_tenant(&self, id: i64) -> Result<Tenant> {
        self.get_tenant(id)?
            .ok_or_else(|| Error::NotFound(format!("tenant {}", id)))
    }

    pub fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name, created_at FROM tenants ORDER BY id")?;
        let tenants = stmt
            .query_map([], Self::row_to_tenant)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tenants)
    }

    fn row_to_tenant(row: &rusqlite::Row) -> rusqlite::Result<Tenant> {
        let created_at_str: String = row.get(2)?;
        Ok(Tenant {
            id: row.get(0)?,
            name: row.get(1)?,
            created_at: parse_datetime(&created_at_str),
        })
    }

    // ========== Banks ==========

    /// Register a bank (global reference data)
    pub fn create_bank(&self, code: &str, name: &str, ocr_endpoint: Option<&str>) -> Result<i64> {
        let code = code.trim().to_lowercase();
        if code.is_empty() {
            return Err(Error::InvalidData("Bank code cannot be empty".into()));
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO banks (code, name, ocr_endpoint) VALUES (?, ?, ?)",
            params![code, name, ocr_endpoint],
        )
        .map_err(|e| conflict_on_unique(e, || format!("Bank '{}' already exists", code)))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_bank(&self, id: i64) -> Result<Option<Bank>> {
        let conn = self.conn()?;
        let bank = conn
            .query_row(
                "SELECT id, code, name, ocr_endpoint, created_at FROM banks WHERE id = ?",
                params![id],
                Self::row_to_bank,
            )
            .optional()?;
        Ok(bank)
    }

    pub fn get_bank_by_code(&self, code: &str) -> Result<Option<Bank>> {
        let conn = self.conn()?;
        let bank = conn
            .query_row(
                "SELECT id, code, name, ocr_endpoint, created_at FROM banks WHERE code = ?",
                params![code.trim().to_lowercase()],
                Self::row_to_bank,
            )
            .optional()?;
        Ok(bank)
    }

    pub fn list_banks(&self) -> Result<Vec<Bank>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, code, name, ocr_endpoint, created_at FROM banks ORDER BY code")?;
        let banks = stmt
            .query_map([], Self::row_to_bank)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(banks)
    }

    fn row_to_bank(row: &rusqlite::Row) -> rusqlite::Result<Bank> {
        let created_at_str: String = row.get(4)?;
        Ok(Bank {
            id: row.get(0)?,
            code: row.get(1)?,
            name: row.get(2)?,
            ocr_endpoint: row.get(3)?,
            created_at: parse_datetime(&created_at_str),
        })
    }
}
