//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `tenants` - Tenants and banks (reference data)
//! - `categories` - Category types, categories, sub-categories
//! - `keywords` - Keyword rules
//! - `statements` - Bank statements and their stage columns
//! - `transactions` - Extracted statement transactions
//! - `matches` - Match records and the denormalization synchronizer
//! - `accounts` - Accounts, account keywords, account matches
//! - `failed_jobs` - Dead-letter store for exhausted pipeline jobs
//!
//! Every query takes an explicit `tenant_id`; there is no ambient tenant.

use chrono::{DateTime, NaiveDate, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::{Error, Result};

mod accounts;
mod categories;
mod failed_jobs;
mod keywords;
mod matches;
mod statements;
mod tenants;
mod transactions;

pub use accounts::AccountAssignment;
pub use statements::{StatementFilter, StatementPeriod};
pub use transactions::TransactionQuery;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for database encryption key
pub const DB_KEY_ENV: &str = "TALLY_DB_KEY";

/// Derive an encryption key from a passphrase using Argon2
///
/// Uses a fixed application salt so the same passphrase always produces the same key,
/// regardless of database path.
fn derive_key(passphrase: &str) -> Result<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Changing this invalidates every existing encrypted database
    const APP_SALT: &[u8; 16] = b"tally-salt-v1-fx";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| Error::Encryption(format!("Failed to create salt: {}", e)))?;

    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Encryption(format!("Failed to derive key: {}", e)))?;

    let hash_str = hash
        .hash
        .ok_or_else(|| Error::Encryption("No hash output".to_string()))?;
    Ok(hex::encode(hash_str.as_bytes()))
}

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // SQLite stores as "YYYY-MM-DD HH:MM:SS" format
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(parse_datetime)
}

/// Parse a SQLite DATE column ("YYYY-MM-DD")
pub(crate) fn parse_date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap_or_default()
}

/// Map a UNIQUE constraint violation to `Error::Conflict`
pub(crate) fn conflict_on_unique(e: rusqlite::Error, what: impl FnOnce() -> String) -> Error {
    match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::Conflict(what())
        }
        other => Error::Database(other),
    }
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    db_path: String,
}

impl Database {
    /// Create a new database connection pool with encryption
    ///
    /// Requires `TALLY_DB_KEY` environment variable to be set. Use
    /// `new_unencrypted()` for development/testing without encryption.
    pub fn new(path: &str) -> Result<Self> {
        match std::env::var(DB_KEY_ENV).ok() {
            Some(key) => Self::new_with_key(path, Some(&key)),
            None => Err(Error::Encryption(format!(
                "Database encryption required. Set {} environment variable with your passphrase, \
                or use --no-encrypt for unencrypted databases (not recommended for production).",
                DB_KEY_ENV
            ))),
        }
    }

    /// Create a new unencrypted database connection pool
    pub fn new_unencrypted(path: &str) -> Result<Self> {
        Self::new_with_key(path, None)
    }

    /// Create a new database with an explicit encryption key
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);

        // Foreign keys are per-connection in SQLite, so they go in the init hook
        let pool = if let Some(pass) = passphrase {
            let key = derive_key(pass)?;
            let init = format!("PRAGMA key = 'x\"{}\"'; PRAGMA foreign_keys = ON;", key);
            let manager = manager.with_init(move |conn| conn.execute_batch(&init));
            Pool::builder().max_size(10).build(manager)?
        } else {
            let manager =
                manager.with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
            Pool::builder().max_size(10).build(manager)?
        };

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create a fresh throwaway database (for testing)
    ///
    /// Uses a temporary file rather than `:memory:` because every pooled
    /// connection would otherwise see its own empty database.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "tally_test_{}_{}.db",
            std::process::id(),
            id
        ));
        let path = path.to_string_lossy().to_string();

        let _ = std::fs::remove_file(&path);

        Self::new_unencrypted(&path)
    }

    /// Check if the database is encrypted
    pub fn is_encrypted(&self) -> Result<bool> {
        let conn = self.conn()?;
        // SQLCipher sets cipher_version if encryption is active
        let result: rusqlite::Result<String> =
            conn.query_row("PRAGMA cipher_version;", [], |row| row.get(0));
        Ok(result.is_ok() && std::env::var(DB_KEY_ENV).is_ok())
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;

            CREATE TABLE IF NOT EXISTS tenants (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            -- Banks are global reference data
            CREATE TABLE IF NOT EXISTS banks (
                id INTEGER PRIMARY KEY,
                code TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                ocr_endpoint TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            -- Category hierarchy: type > category > sub-category
            CREATE TABLE IF NOT EXISTS category_types (
                id INTEGER PRIMARY KEY,
                tenant_id INTEGER NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                UNIQUE(tenant_id, name)
            );

            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                tenant_id INTEGER NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                type_id INTEGER NOT NULL REFERENCES category_types(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                UNIQUE(type_id, name)
            );

            CREATE TABLE IF NOT EXISTS sub_categories (
                id INTEGER PRIMARY KEY,
                tenant_id INTEGER NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                UNIQUE(category_id, name)
            );

            CREATE INDEX IF NOT EXISTS idx_categories_tenant ON categories(tenant_id);
            CREATE INDEX IF NOT EXISTS idx_sub_categories_tenant ON sub_categories(tenant_id);

            -- Keyword rules (tenant-scoped)
            CREATE TABLE IF NOT EXISTS keywords (
                id INTEGER PRIMARY KEY,
                tenant_id INTEGER NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                keyword TEXT NOT NULL,
                is_regex BOOLEAN NOT NULL DEFAULT 0,
                case_sensitive BOOLEAN NOT NULL DEFAULT 0,
                priority INTEGER NOT NULL DEFAULT 0,
                sub_category_id INTEGER NOT NULL REFERENCES sub_categories(id) ON DELETE CASCADE,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_keywords_tenant_active ON keywords(tenant_id, is_active);
            CREATE INDEX IF NOT EXISTS idx_keywords_priority ON keywords(priority DESC);

            -- Bank statements (one per uploaded document)
            CREATE TABLE IF NOT EXISTS bank_statements (
                id INTEGER PRIMARY KEY,
                tenant_id INTEGER NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                bank_id INTEGER NOT NULL REFERENCES banks(id),
                file_path TEXT NOT NULL,
                original_filename TEXT,
                file_hash TEXT NOT NULL,
                ocr_status TEXT NOT NULL DEFAULT 'pending',       -- pending, processing, completed, failed
                matching_status TEXT,                             -- NULL until OCR completes
                account_matching_status TEXT,                     -- NULL until matching is terminal
                period_start DATE,
                period_end DATE,
                transaction_count INTEGER NOT NULL DEFAULT 0,
                matched_count INTEGER NOT NULL DEFAULT 0,
                unmatched_count INTEGER NOT NULL DEFAULT 0,
                ocr_error TEXT,
                matching_note TEXT,                               -- skip reason or error
                account_matching_note TEXT,
                uploaded_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                ocr_started_at DATETIME,
                ocr_completed_at DATETIME,
                matching_completed_at DATETIME,
                account_matching_completed_at DATETIME,
                deleted_at DATETIME                               -- soft delete
            );

            CREATE INDEX IF NOT EXISTS idx_statements_tenant_status ON bank_statements(tenant_id, ocr_status);
            CREATE INDEX IF NOT EXISTS idx_statements_tenant_matching ON bank_statements(tenant_id, matching_status);
            CREATE INDEX IF NOT EXISTS idx_statements_hash ON bank_statements(tenant_id, file_hash);

            -- Statement transactions (category fields are denormalized from the primary match)
            CREATE TABLE IF NOT EXISTS statement_transactions (
                id INTEGER PRIMARY KEY,
                tenant_id INTEGER NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                statement_id INTEGER NOT NULL REFERENCES bank_statements(id) ON DELETE CASCADE,
                date DATE NOT NULL,
                description TEXT NOT NULL,
                debit REAL NOT NULL DEFAULT 0,
                credit REAL NOT NULL DEFAULT 0,
                balance REAL,
                transaction_type TEXT NOT NULL,
                matched_keyword_id INTEGER REFERENCES keywords(id) ON DELETE SET NULL,
                sub_category_id INTEGER REFERENCES sub_categories(id) ON DELETE SET NULL,
                category_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
                type_id INTEGER REFERENCES category_types(id) ON DELETE SET NULL,
                confidence_score INTEGER,
                is_verified BOOLEAN NOT NULL DEFAULT 0,
                is_manual BOOLEAN NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_statement ON statement_transactions(statement_id);
            CREATE INDEX IF NOT EXISTS idx_transactions_tenant_keyword ON statement_transactions(tenant_id, matched_keyword_id);
            CREATE INDEX IF NOT EXISTS idx_transactions_tenant_sub ON statement_transactions(tenant_id, sub_category_id);

            -- Match records (authoritative category assignments)
            CREATE TABLE IF NOT EXISTS transaction_categories (
                id INTEGER PRIMARY KEY,
                tenant_id INTEGER NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                transaction_id INTEGER NOT NULL REFERENCES statement_transactions(id) ON DELETE CASCADE,
                sub_category_id INTEGER NOT NULL REFERENCES sub_categories(id) ON DELETE CASCADE,
                category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
                type_id INTEGER NOT NULL REFERENCES category_types(id) ON DELETE CASCADE,
                matched_keyword_id INTEGER REFERENCES keywords(id) ON DELETE SET NULL,
                confidence_score INTEGER NOT NULL,
                is_primary BOOLEAN NOT NULL DEFAULT 0,
                source TEXT NOT NULL DEFAULT 'keyword',          -- keyword, manual
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_tx_categories_transaction ON transaction_categories(transaction_id);
            -- At most one primary record per transaction
            CREATE UNIQUE INDEX IF NOT EXISTS idx_tx_categories_primary
                ON transaction_categories(transaction_id) WHERE is_primary = 1;

            -- Internal ledger accounts
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY,
                tenant_id INTEGER NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                code TEXT NOT NULL,
                name TEXT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(tenant_id, code)
            );

            CREATE TABLE IF NOT EXISTS account_keywords (
                id INTEGER PRIMARY KEY,
                tenant_id INTEGER NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                keyword TEXT NOT NULL,
                is_regex BOOLEAN NOT NULL DEFAULT 0,
                case_sensitive BOOLEAN NOT NULL DEFAULT 0,
                priority INTEGER NOT NULL DEFAULT 0,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_account_keywords_tenant ON account_keywords(tenant_id, is_active);

            CREATE TABLE IF NOT EXISTS account_matches (
                id INTEGER PRIMARY KEY,
                tenant_id INTEGER NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                transaction_id INTEGER NOT NULL UNIQUE REFERENCES statement_transactions(id) ON DELETE CASCADE,
                account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                account_keyword_id INTEGER REFERENCES account_keywords(id) ON DELETE SET NULL,
                confidence_score INTEGER NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_account_matches_account ON account_matches(account_id);

            -- Dead-letter store for pipeline jobs that exhausted their retries
            CREATE TABLE IF NOT EXISTS failed_jobs (
                id INTEGER PRIMARY KEY,
                tenant_id INTEGER NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                statement_id INTEGER NOT NULL REFERENCES bank_statements(id) ON DELETE CASCADE,
                lane TEXT NOT NULL,
                kind TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                error TEXT NOT NULL,
                failed_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                retried_at DATETIME
            );

            CREATE INDEX IF NOT EXISTS idx_failed_jobs_pending ON failed_jobs(retried_at);
            "#,
        )?;

        info!("Database schema initialized");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
