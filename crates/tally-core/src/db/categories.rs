//! Category hierarchy operations (type > category > sub-category)

use rusqlite::{params, OptionalExtension};

use super::{conflict_on_unique, Database};
use crate::error::{Error, Result};
use crate::models::{Category, CategoryPath, CategoryType, SubCategory, SubCategoryWithPath};

impl Database {
    pub fn create_category_type(&self, tenant_id: i64, name: &str) -> Result<i64> {
        let name = require_name(name)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO category_types (tenant_id, name) VALUES (?, ?)",
            params![tenant_id, name],
        )
        .map_err(|e| conflict_on_unique(e, || format!("Category type '{}' already exists", name)))?;
        Ok(conn.last_insert_rowid())
    }

    /// Create a category under a type owned by the same tenant
    pub fn create_category(&self, tenant_id: i64, type_id: i64, name: &str) -> Result<i64> {
        let name = require_name(name)?;
        let conn = self.conn()?;

        let owned: Option<i64> = conn
            .query_row(
                "SELECT id FROM category_types WHERE id = ? AND tenant_id = ?",
                params![type_id, tenant_id],
                |row| row.get(0),
            )
            .optional()?;
        if owned.is_none() {
            return Err(Error::NotFound(format!("category type {}", type_id)));
        }

        conn.execute(
            "INSERT INTO categories (tenant_id, type_id, name) VALUES (?, ?, ?)",
            params![tenant_id, type_id, name],
        )
        .map_err(|e| conflict_on_unique(e, || format!("Category '{}' already exists", name)))?;
        Ok(conn.last_insert_rowid())
    }

    /// Create a sub-category under a category owned by the same tenant
    pub fn create_sub_category(&self, tenant_id: i64, category_id: i64, name: &str) -> Result<i64> {
        let name = require_name(name)?;
        let conn = self.conn()?;

        let owned: Option<i64> = conn
            .query_row(
                "SELECT id FROM categories WHERE id = ? AND tenant_id = ?",
                params![category_id, tenant_id],
                |row| row.get(0),
            )
            .optional()?;
        if owned.is_none() {
            return Err(Error::NotFound(format!("category {}", category_id)));
        }

        conn.execute(
            "INSERT INTO sub_categories (tenant_id, category_id, name) VALUES (?, ?, ?)",
            params![tenant_id, category_id, name],
        )
        .map_err(|e| conflict_on_unique(e, || format!("Sub-category '{}' already exists", name)))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_category_types(&self, tenant_id: i64) -> Result<Vec<CategoryType>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, name FROM category_types WHERE tenant_id = ? ORDER BY name",
        )?;
        let types = stmt
            .query_map(params![tenant_id], |row| {
                Ok(CategoryType {
                    id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    name: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(types)
    }

    pub fn list_categories(&self, tenant_id: i64) -> Result<Vec<Category>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, type_id, name FROM categories WHERE tenant_id = ? ORDER BY name",
        )?;
        let categories = stmt
            .query_map(params![tenant_id], |row| {
                Ok(Category {
                    id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    type_id: row.get(2)?,
                    name: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(categories)
    }

    pub fn get_sub_category(&self, tenant_id: i64, id: i64) -> Result<Option<SubCategory>> {
        let conn = self.conn()?;
        let sub = conn
            .query_row(
                "SELECT id, tenant_id, category_id, name FROM sub_categories WHERE id = ? AND tenant_id = ?",
                params![id, tenant_id],
                |row| {
                    Ok(SubCategory {
                        id: row.get(0)?,
                        tenant_id: row.get(1)?,
                        category_id: row.get(2)?,
                        name: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(sub)
    }

    /// Resolve the category and type ids a sub-category implies
    ///
    /// Returns `NotFound` when the sub-category does not belong to the tenant.
    pub fn category_path(&self, tenant_id: i64, sub_category_id: i64) -> Result<CategoryPath> {
        let conn = self.conn()?;
        conn.query_row(
            r#"
            SELECT s.id, c.id, c.type_id
            FROM sub_categories s
            JOIN categories c ON s.category_id = c.id
            WHERE s.id = ? AND s.tenant_id = ?
            "#,
            params![sub_category_id, tenant_id],
            |row| {
                Ok(CategoryPath {
                    sub_category_id: row.get(0)?,
                    category_id: row.get(1)?,
                    type_id: row.get(2)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("sub-category {}", sub_category_id)))
    }

    /// List every sub-category with its full path, for pickers and reports
    pub fn list_sub_categories(&self, tenant_id: i64) -> Result<Vec<SubCategoryWithPath>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT s.id, c.id, t.id, t.name, c.name, s.name
            FROM sub_categories s
            JOIN categories c ON s.category_id = c.id
            JOIN category_types t ON c.type_id = t.id
            WHERE s.tenant_id = ?
            ORDER BY t.name, c.name, s.name
            "#,
        )?;
        let subs = stmt
            .query_map(params![tenant_id], |row| {
                Ok(SubCategoryWithPath {
                    path: CategoryPath {
                        sub_category_id: row.get(0)?,
                        category_id: row.get(1)?,
                        type_id: row.get(2)?,
                    },
                    type_name: row.get(3)?,
                    category_name: row.get(4)?,
                    sub_category_name: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(subs)
    }

    /// Create (or reuse) a full `type > category > sub-category` chain
    ///
    /// Convenience for CLI setup and tests; existing rows are reused by name.
    pub fn ensure_category_path(
        &self,
        tenant_id: i64,
        type_name: &str,
        category_name: &str,
        sub_category_name: &str,
    ) -> Result<CategoryPath> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT OR IGNORE INTO category_types (tenant_id, name) VALUES (?, ?)",
            params![tenant_id, require_name(type_name)?],
        )?;
        let type_id: i64 = conn.query_row(
            "SELECT id FROM category_types WHERE tenant_id = ? AND name = ?",
            params![tenant_id, type_name.trim()],
            |row| row.get(0),
        )?;

        conn.execute(
            "INSERT OR IGNORE INTO categories (tenant_id, type_id, name) VALUES (?, ?, ?)",
            params![tenant_id, type_id, require_name(category_name)?],
        )?;
        let category_id: i64 = conn.query_row(
            "SELECT id FROM categories WHERE type_id = ? AND name = ?",
            params![type_id, category_name.trim()],
            |row| row.get(0),
        )?;

        conn.execute(
            "INSERT OR IGNORE INTO sub_categories (tenant_id, category_id, name) VALUES (?, ?, ?)",
            params![tenant_id, category_id, require_name(sub_category_name)?],
        )?;
        let sub_category_id: i64 = conn.query_row(
            "SELECT id FROM sub_categories WHERE category_id = ? AND name = ?",
            params![category_id, sub_category_name.trim()],
            |row| row.get(0),
        )?;

        Ok(CategoryPath {
            sub_category_id,
            category_id,
            type_id,
        })
    }
}

fn require_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidData("Name cannot be empty".into()));
    }
    Ok(name)
}
