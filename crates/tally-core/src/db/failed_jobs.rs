//! Dead-letter store for pipeline jobs

use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, parse_optional_datetime, Database};
use crate::error::Result;
use crate::models::{FailedJob, JobKind, Lane};

impl Database {
    /// Record a job that exhausted its retries
    pub fn record_failed_job(
        &self,
        tenant_id: i64,
        statement_id: i64,
        kind: JobKind,
        attempts: u32,
        error: &str,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO failed_jobs (tenant_id, statement_id, lane, kind, attempts, error)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                tenant_id,
                statement_id,
                kind.lane().as_str(),
                kind.as_str(),
                attempts,
                error
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// List dead-letter entries, newest first
    pub fn list_failed_jobs(&self, tenant_id: i64, include_retried: bool) -> Result<Vec<FailedJob>> {
        let conn = self.conn()?;
        let sql = if include_retried {
            "SELECT id, tenant_id, statement_id, lane, kind, attempts, error, failed_at, retried_at
             FROM failed_jobs WHERE tenant_id = ? ORDER BY id DESC"
        } else {
            "SELECT id, tenant_id, statement_id, lane, kind, attempts, error, failed_at, retried_at
             FROM failed_jobs WHERE tenant_id = ? AND retried_at IS NULL ORDER BY id DESC"
        };
        let mut stmt = conn.prepare(sql)?;
        let jobs = stmt
            .query_map(params![tenant_id], Self::row_to_failed_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    pub fn get_failed_job(&self, tenant_id: i64, id: i64) -> Result<Option<FailedJob>> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                "SELECT id, tenant_id, statement_id, lane, kind, attempts, error, failed_at, retried_at
                 FROM failed_jobs WHERE id = ? AND tenant_id = ?",
                params![id, tenant_id],
                Self::row_to_failed_job,
            )
            .optional()?;
        Ok(job)
    }

    /// Mark an entry as retried. Returns false if it was already retried.
    pub fn mark_failed_job_retried(&self, tenant_id: i64, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let count = conn.execute(
            "UPDATE failed_jobs SET retried_at = CURRENT_TIMESTAMP WHERE id = ? AND tenant_id = ? AND retried_at IS NULL",
            params![id, tenant_id],
        )?;
        Ok(count > 0)
    }

    fn row_to_failed_job(row: &rusqlite::Row) -> rusqlite::Result<FailedJob> {
        let lane: String = row.get(3)?;
        let kind: String = row.get(4)?;
        let failed_at: String = row.get(7)?;
        Ok(FailedJob {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            statement_id: row.get(2)?,
            lane: lane.parse().unwrap_or(Lane::Matching),
            kind: kind.parse().unwrap_or(JobKind::MatchTransactions),
            attempts: row.get(5)?,
            error: row.get(6)?,
            failed_at: parse_datetime(&failed_at),
            retried_at: parse_optional_datetime(row.get(8)?),
        })
    }
}
