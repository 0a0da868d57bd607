//! Statement pipeline orchestrator
//!
//! One orchestrator drives every statement through its stages:
//!
//! ```text
//! upload ─▶ process_ocr ─▶ match_transactions ─▶ match_accounts
//!  (hash,      (OCR call,      (keyword rules,      (account rules,
//!   store)      store lines)    synchronizer)        account matches)
//! ```
//!
//! Each stage is a separate job with its own retry budget. A job first claims
//! its stage (`pending` -> `processing`) with a conditional update, so
//! duplicate deliveries find nothing to claim and return `AlreadyDone`.
//! Failures are confined to the statement the job belongs to.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use super::queue::{Job, JobDispatcher, JobHandler, RecordingDispatcher};
use super::state::{transition, StageEvent, StatementStage};
use crate::categorize::Categorizer;
use crate::config::{Deadline, PipelineConfig};
use crate::db::{Database, StatementPeriod};
use crate::error::{Error, Result};
use crate::hooks::TransactionMutation;
use crate::models::{
    BankStatement, JobKind, MatchingStatus, NewBankStatement, NewStatementTransaction,
};
use crate::ocr::{OcrBackend, OcrExtraction};

pub const NO_TRANSACTIONS: &str = "No transactions extracted from statement";
pub const NO_KEYWORDS: &str = "No active keywords configured for tenant";
pub const NO_ACCOUNT_TRANSACTIONS: &str = "No transactions to match to accounts";
pub const NO_ACCOUNT_KEYWORDS: &str = "No active account keywords configured for tenant";

/// How many times an account matching job waits for transaction matching
const MAX_DEFERRALS: u32 = 20;

/// What a job did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    /// Terminal non-error stop, with the recorded reason
    Skipped(String),
    /// The stage was already claimed or finished (duplicate delivery)
    AlreadyDone,
    /// Retries exhausted or permanent error; recorded as `*_failed`
    Failed(String),
    /// Put back on the queue until an earlier stage finishes
    Deferred,
}

/// A statement with its derived stage, for detail views
#[derive(Debug, Clone, Serialize)]
pub struct StatementStatus {
    #[serde(flatten)]
    pub statement: BankStatement,
    pub stage: StatementStage,
}

/// Result of startup recovery
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Stage columns moved from `processing` to `failed`
    pub recovered: i64,
    /// Pending stages dispatched again
    pub redispatched: usize,
}

/// Outcome of a matching pass before it is recorded
enum PassResult<T> {
    Done(T),
    Skipped(&'static str),
}

/// Drives statements through the pipeline
#[derive(Clone)]
pub struct Orchestrator {
    categorizer: Categorizer,
    ocr: Arc<dyn OcrBackend>,
    dispatcher: Arc<dyn JobDispatcher>,
    config: Arc<PipelineConfig>,
}

impl Orchestrator {
    pub fn new(
        categorizer: Categorizer,
        ocr: Arc<dyn OcrBackend>,
        dispatcher: Arc<dyn JobDispatcher>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            categorizer,
            ocr,
            dispatcher,
            config: Arc::new(config),
        }
    }

    pub fn db(&self) -> &Database {
        self.categorizer.db()
    }

    pub fn categorizer(&self) -> &Categorizer {
        &self.categorizer
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // ========== Statement lifecycle ==========

    /// Store an uploaded PDF, record the statement, and queue OCR
    pub async fn upload_statement(
        &self,
        tenant_id: i64,
        bank_id: i64,
        file_name: &str,
        pdf: Vec<u8>,
    ) -> Result<BankStatement> {
        self.db().require_tenant(tenant_id)?;
        if self.db().get_bank(bank_id)?.is_none() {
            return Err(Error::NotFound(format!("bank {}", bank_id)));
        }
        if pdf.is_empty() {
            return Err(Error::InvalidData("Uploaded file is empty".into()));
        }
        if !pdf.starts_with(b"%PDF") {
            return Err(Error::InvalidData(format!("{} is not a PDF", file_name)));
        }

        let file_hash = hex::encode(Sha256::digest(&pdf));
        if let Some(existing) = self.db().find_statement_by_hash(tenant_id, &file_hash)? {
            return Err(Error::Conflict(format!(
                "Statement already uploaded (id {})",
                existing
            )));
        }

        let dir = self.config.storage_dir.join(tenant_id.to_string());
        tokio::fs::create_dir_all(&dir).await?;
        let path: PathBuf = dir.join(format!("{}.pdf", file_hash));
        tokio::fs::write(&path, &pdf).await?;

        let statement_id = self.db().create_statement(
            tenant_id,
            &NewBankStatement {
                bank_id,
                file_path: path.to_string_lossy().to_string(),
                original_filename: Some(file_name.to_string()),
                file_hash,
                period_start: None,
                period_end: None,
            },
        )?;

        transition(StatementStage::Uploaded, StageEvent::OcrQueued)?;
        self.dispatcher
            .dispatch(Job::new(tenant_id, statement_id, JobKind::ProcessOcr), None)
            .await?;

        info!(tenant_id, statement_id, bank_id, file = file_name, "Statement uploaded");
        self.db().require_statement(tenant_id, statement_id)
    }

    /// Statement with its derived stage
    pub fn statement_status(&self, tenant_id: i64, statement_id: i64) -> Result<StatementStatus> {
        let statement = self.db().require_statement(tenant_id, statement_id)?;
        let stage = StatementStage::of(&statement);
        Ok(StatementStatus { statement, stage })
    }

    /// Force a new transaction matching pass (account matching follows)
    pub async fn rematch_statement(&self, tenant_id: i64, statement_id: i64) -> Result<BankStatement> {
        let statement = self.db().require_statement(tenant_id, statement_id)?;
        transition(StatementStage::of(&statement), StageEvent::RematchRequested)?;

        self.db().reset_matching(tenant_id, statement_id)?;
        self.dispatcher
            .dispatch(
                Job::new(tenant_id, statement_id, JobKind::MatchTransactions),
                None,
            )
            .await?;

        info!(tenant_id, statement_id, "Rematch requested");
        self.db().require_statement(tenant_id, statement_id)
    }

    /// Soft-delete a statement and its transactions
    pub fn delete_statement(&self, tenant_id: i64, statement_id: i64) -> Result<()> {
        self.db().require_statement(tenant_id, statement_id)?;
        if self.db().delete_statement(tenant_id, statement_id)? {
            self.categorizer.hooks().after_mutation(TransactionMutation::Deleted {
                tenant_id,
                statement_id,
            });
            info!(tenant_id, statement_id, "Statement deleted");
        }
        Ok(())
    }

    /// Reset the failed stage of a dead-lettered job and queue it again
    pub async fn retry_failed_job(&self, tenant_id: i64, failed_job_id: i64) -> Result<Job> {
        let failed = self
            .db()
            .get_failed_job(tenant_id, failed_job_id)?
            .ok_or_else(|| Error::NotFound(format!("failed job {}", failed_job_id)))?;
        if failed.retried_at.is_some() {
            return Err(Error::Conflict(format!(
                "Failed job {} was already retried",
                failed_job_id
            )));
        }

        let statement = self.db().require_statement(tenant_id, failed.statement_id)?;
        let stage = StatementStage::of(&statement);
        match failed.kind {
            JobKind::ProcessOcr => {
                transition(stage, StageEvent::OcrRetried)?;
                self.db().reset_ocr(tenant_id, statement.id)?;
            }
            JobKind::MatchTransactions => {
                transition(stage, StageEvent::RematchRequested)?;
                self.db().reset_matching(tenant_id, statement.id)?;
            }
            JobKind::MatchAccounts => {
                transition(stage, StageEvent::AccountMatchingRetried)?;
                self.db().reset_account_matching(tenant_id, statement.id)?;
            }
        }

        self.db().mark_failed_job_retried(tenant_id, failed_job_id)?;
        let job = Job::new(tenant_id, statement.id, failed.kind);
        self.dispatcher.dispatch(job, None).await?;

        info!(
            tenant_id,
            statement_id = statement.id,
            kind = %failed.kind,
            "Dead-lettered job requeued"
        );
        Ok(job)
    }

    /// Mark stages interrupted by a restart as failed and re-dispatch every
    /// stage still pending
    pub async fn recover_and_resume(&self) -> Result<RecoveryReport> {
        let recovered = self.db().recover_stuck_statements()?;
        if recovered > 0 {
            warn!(recovered, "Recovered stages interrupted by restart");
        }

        let pending = self.db().list_pending_jobs()?;
        for (tenant_id, statement_id, kind) in &pending {
            self.dispatcher
                .dispatch(Job::new(*tenant_id, *statement_id, *kind), None)
                .await?;
        }
        if !pending.is_empty() {
            info!(redispatched = pending.len(), "Pending pipeline jobs re-dispatched");
        }

        Ok(RecoveryReport {
            recovered,
            redispatched: pending.len(),
        })
    }

    /// Run every job recorded by `recorder` until none are left
    ///
    /// For synchronous drivers (the CLI, tests) whose dispatcher is the same
    /// `RecordingDispatcher`. Delays are not honored.
    pub async fn run_pending(&self, recorder: &RecordingDispatcher) -> Result<Vec<(Job, JobOutcome)>> {
        let mut ran = Vec::new();
        loop {
            let jobs = recorder.take();
            if jobs.is_empty() {
                return Ok(ran);
            }
            for job in jobs {
                let outcome = self.run_job(job).await?;
                ran.push((job, outcome));
            }
        }
    }

    // ========== Jobs ==========

    /// Execute one job
    pub async fn run_job(&self, job: Job) -> Result<JobOutcome> {
        let statement = match self.db().get_statement(job.tenant_id, job.statement_id)? {
            Some(statement) => statement,
            None => {
                debug!(statement_id = job.statement_id, "Statement gone, dropping job");
                return Ok(JobOutcome::AlreadyDone);
            }
        };
        let stage = StatementStage::of(&statement);

        match job.kind {
            JobKind::ProcessOcr => self.run_ocr(job, statement, stage).await,
            JobKind::MatchTransactions => self.run_matching(job, stage).await,
            JobKind::MatchAccounts => self.run_account_matching(job, stage).await,
        }
    }

    async fn run_ocr(&self, job: Job, statement: BankStatement, stage: StatementStage) -> Result<JobOutcome> {
        if transition(stage, StageEvent::OcrStarted).is_err()
            || !self.db().start_ocr(job.tenant_id, job.statement_id)?
        {
            return Ok(already_done(&job, stage));
        }
        info!(tenant_id = job.tenant_id, statement_id = job.statement_id, backend = self.ocr.name(), "OCR started");

        let outcome = self.ocr_stage(job, statement, stage).await;
        self.settle(&job, outcome).await
    }

    async fn ocr_stage(&self, job: Job, statement: BankStatement, stage: StatementStage) -> Result<JobOutcome> {
        let pdf = match tokio::fs::read(&statement.file_path).await {
            Ok(pdf) => pdf,
            Err(e) => {
                let e = Error::Io(e);
                return self.fail(&job, 1, &e).await;
            }
        };
        let endpoint = match self.db().get_bank(statement.bank_id)? {
            Some(bank) => self.config.ocr.endpoint_for(&bank),
            None => {
                let e = Error::NotFound(format!("bank {}", statement.bank_id));
                return self.fail(&job, 1, &e).await;
            }
        };
        let file_name = statement
            .original_filename
            .clone()
            .unwrap_or_else(|| format!("statement-{}.pdf", statement.id));

        let result = self
            .with_retry(&job, |deadline| {
                self.extract_and_store(&job, &endpoint, &file_name, pdf.clone(), deadline)
            })
            .await;

        match result {
            Ok(None) => Ok(already_done(&job, stage)),
            Ok(Some(0)) => {
                info!(statement_id = job.statement_id, "OCR finished with no transactions");
                self.dispatch_next(&job, JobKind::MatchTransactions).await?;
                Ok(JobOutcome::Completed)
            }
            Ok(Some(count)) => {
                self.categorizer.hooks().after_mutation(TransactionMutation::Created {
                    tenant_id: job.tenant_id,
                    statement_id: job.statement_id,
                    count,
                });
                info!(statement_id = job.statement_id, transactions = count, "OCR finished");
                self.dispatch_next(&job, JobKind::MatchTransactions).await?;
                Ok(JobOutcome::Completed)
            }
            Err((attempts, e)) => self.fail(&job, attempts, &e).await,
        }
    }

    /// One OCR attempt. `None` means the statement left `processing` while
    /// the call was in flight.
    ///
    /// Only the OCR call is bounded by the deadline; storing the result is a
    /// single database transaction that runs to completion.
    async fn extract_and_store(
        &self,
        job: &Job,
        endpoint: &str,
        file_name: &str,
        pdf: Vec<u8>,
        deadline: Deadline,
    ) -> Result<Option<usize>> {
        let extract = self.ocr.extract(endpoint, file_name, pdf);
        let OcrExtraction {
            transactions,
            period_start,
            period_end,
        } = tokio::time::timeout_at(tokio::time::Instant::from_std(deadline.instant()), extract)
            .await
            .map_err(|_| deadline.elapsed_error())??;
        let transactions = drop_blank_lines(job, transactions);

        let db = self.db().clone();
        let job = *job;
        blocking(move || {
            let stored = db.store_ocr_result(
                job.tenant_id,
                job.statement_id,
                &transactions,
                StatementPeriod {
                    start: period_start,
                    end: period_end,
                },
            )?;
            Ok(stored.then_some(transactions.len()))
        })
        .await
    }

    async fn run_matching(&self, job: Job, stage: StatementStage) -> Result<JobOutcome> {
        if transition(stage, StageEvent::MatchingStarted).is_err()
            || !self.db().start_matching(job.tenant_id, job.statement_id)?
        {
            return Ok(already_done(&job, stage));
        }
        debug!(statement_id = job.statement_id, "Transaction matching started");

        let outcome = self.matching_stage(job).await;
        self.settle(&job, outcome).await
    }

    async fn matching_stage(&self, job: Job) -> Result<JobOutcome> {
        let result = self
            .with_retry(&job, |deadline| {
                let categorizer = self.categorizer.clone();
                blocking(move || {
                    let db = categorizer.db();
                    if db.count_statement_transactions(job.tenant_id, job.statement_id)? == 0 {
                        return Ok(PassResult::Skipped(NO_TRANSACTIONS));
                    }
                    if db.count_active_keywords(job.tenant_id)? == 0 {
                        return Ok(PassResult::Skipped(NO_KEYWORDS));
                    }
                    categorizer
                        .categorize_statement(job.tenant_id, job.statement_id, &deadline)
                        .map(PassResult::Done)
                })
            })
            .await;

        match result {
            Ok(PassResult::Done(summary)) => {
                self.retry_write(&job, || {
                    self.db().finish_matching(
                        job.tenant_id,
                        job.statement_id,
                        MatchingStatus::Completed,
                        None,
                    )
                })
                .await?;
                debug!(statement_id = job.statement_id, ?summary, "Transaction matching completed");
                self.dispatch_next(&job, JobKind::MatchAccounts).await?;
                Ok(JobOutcome::Completed)
            }
            Ok(PassResult::Skipped(reason)) => {
                self.retry_write(&job, || {
                    self.db().finish_matching(
                        job.tenant_id,
                        job.statement_id,
                        MatchingStatus::Skipped,
                        Some(reason),
                    )
                })
                .await?;
                info!(statement_id = job.statement_id, reason, "Transaction matching skipped");
                self.dispatch_next(&job, JobKind::MatchAccounts).await?;
                Ok(JobOutcome::Skipped(reason.to_string()))
            }
            Err((attempts, e)) => self.fail(&job, attempts, &e).await,
        }
    }

    async fn run_account_matching(&self, job: Job, stage: StatementStage) -> Result<JobOutcome> {
        // Ordering guard: transaction matching must be terminal first
        if matches!(
            stage,
            StatementStage::OcrCompleted
                | StatementStage::MatchingPending
                | StatementStage::MatchingProcessing
        ) {
            return self.defer(job).await;
        }
        if transition(stage, StageEvent::AccountMatchingStarted).is_err()
            || !self.db().start_account_matching(job.tenant_id, job.statement_id)?
        {
            return Ok(already_done(&job, stage));
        }
        debug!(statement_id = job.statement_id, "Account matching started");

        let outcome = self.account_matching_stage(job).await;
        self.settle(&job, outcome).await
    }

    async fn account_matching_stage(&self, job: Job) -> Result<JobOutcome> {
        let result = self
            .with_retry(&job, |deadline| {
                let categorizer = self.categorizer.clone();
                blocking(move || {
                    let db = categorizer.db();
                    if db.count_statement_transactions(job.tenant_id, job.statement_id)? == 0 {
                        return Ok(PassResult::Skipped(NO_ACCOUNT_TRANSACTIONS));
                    }
                    if db.list_active_account_keywords(job.tenant_id)?.is_empty() {
                        return Ok(PassResult::Skipped(NO_ACCOUNT_KEYWORDS));
                    }
                    categorizer
                        .match_statement_accounts(job.tenant_id, job.statement_id, &deadline)
                        .map(PassResult::Done)
                })
            })
            .await;

        match result {
            Ok(PassResult::Done(summary)) => {
                self.retry_write(&job, || {
                    self.db().finish_account_matching(
                        job.tenant_id,
                        job.statement_id,
                        MatchingStatus::Completed,
                        None,
                    )
                })
                .await?;
                debug!(statement_id = job.statement_id, ?summary, "Account matching completed");
                Ok(JobOutcome::Completed)
            }
            Ok(PassResult::Skipped(reason)) => {
                self.retry_write(&job, || {
                    self.db().finish_account_matching(
                        job.tenant_id,
                        job.statement_id,
                        MatchingStatus::Skipped,
                        Some(reason),
                    )
                })
                .await?;
                info!(statement_id = job.statement_id, reason, "Account matching skipped");
                Ok(JobOutcome::Skipped(reason.to_string()))
            }
            Err((attempts, e)) => self.fail(&job, attempts, &e).await,
        }
    }

    async fn defer(&self, job: Job) -> Result<JobOutcome> {
        if job.deferrals >= MAX_DEFERRALS {
            // The matching job that finishes will queue its own account job
            warn!(
                statement_id = job.statement_id,
                deferrals = job.deferrals,
                "Account matching still waiting on transaction matching, dropping job"
            );
            return Ok(JobOutcome::AlreadyDone);
        }
        let next = Job {
            deferrals: job.deferrals + 1,
            ..job
        };
        self.dispatcher
            .dispatch(next, Some(self.config.matching.retry_delay))
            .await?;
        debug!(statement_id = job.statement_id, deferrals = next.deferrals, "Account matching deferred");
        Ok(JobOutcome::Deferred)
    }

    /// Queue the next stage after the configured pause
    async fn dispatch_next(&self, job: &Job, kind: JobKind) -> Result<()> {
        let delay = Some(self.config.matching.stage_delay).filter(|d| !d.is_zero());
        self.dispatcher
            .dispatch(Job::new(job.tenant_id, job.statement_id, kind), delay)
            .await
    }

    /// Run `attempt` under the job's retry policy
    ///
    /// Each attempt gets a fresh deadline from the policy timeout and is
    /// expected to stop on its own once it passes. Attempts are never
    /// abandoned mid-flight, so nothing they write can land after the job
    /// has been recorded as failed. Only transient errors are retried. On
    /// failure returns the attempts made and the last error.
    async fn with_retry<T, F, Fut>(&self, job: &Job, mut attempt: F) -> std::result::Result<T, (u32, Error)>
    where
        F: FnMut(Deadline) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = self.config.retry_policy(job.kind);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match attempt(policy.deadline()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempts < policy.max_attempts => {
                    warn!(
                        statement_id = job.statement_id,
                        kind = %job.kind,
                        attempt = attempts,
                        max_attempts = policy.max_attempts,
                        error = %e,
                        "Job attempt failed, retrying"
                    );
                    sleep_unless_zero(policy.delay).await;
                }
                Err(e) => return Err((attempts, e)),
            }
        }
    }

    /// Retry a stage bookkeeping write while it fails transiently
    async fn retry_write<T>(&self, job: &Job, mut write: impl FnMut() -> Result<T>) -> Result<T> {
        let policy = self.config.retry_policy(job.kind);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match write() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempts < policy.max_attempts => {
                    warn!(
                        statement_id = job.statement_id,
                        kind = %job.kind,
                        attempt = attempts,
                        error = %e,
                        "Stage write failed, retrying"
                    );
                    sleep_unless_zero(policy.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Close out a claimed stage whose body returned an error
    ///
    /// The stage is marked failed and dead-lettered unless it already left
    /// `processing` (only the next-stage dispatch failed; recovery picks the
    /// pending stage up again).
    async fn settle(&self, job: &Job, outcome: Result<JobOutcome>) -> Result<JobOutcome> {
        let e = match outcome {
            Ok(outcome) => return Ok(outcome),
            Err(e) => e,
        };

        match self.db().get_statement(job.tenant_id, job.statement_id) {
            Ok(Some(statement)) if holds_claim(StatementStage::of(&statement), job.kind) => {}
            Ok(_) => {
                error!(
                    tenant_id = job.tenant_id,
                    statement_id = job.statement_id,
                    kind = %job.kind,
                    error = %e,
                    "Job aborted after its stage was recorded"
                );
                return Err(e);
            }
            Err(lookup) => {
                warn!(statement_id = job.statement_id, error = %lookup, "Could not re-read statement");
            }
        }

        match self.fail(job, 1, &e).await {
            Ok(outcome) => Ok(outcome),
            Err(record) => {
                error!(
                    tenant_id = job.tenant_id,
                    statement_id = job.statement_id,
                    kind = %job.kind,
                    error = %e,
                    record_error = %record,
                    "Could not record stage failure"
                );
                Err(e)
            }
        }
    }

    /// Record a stage failure and dead-letter the job
    async fn fail(&self, job: &Job, attempts: u32, e: &Error) -> Result<JobOutcome> {
        let reason = e.to_string();
        self.retry_write(job, || match job.kind {
            JobKind::ProcessOcr => self
                .db()
                .mark_ocr_failed(job.tenant_id, job.statement_id, &reason),
            JobKind::MatchTransactions => self.db().finish_matching(
                job.tenant_id,
                job.statement_id,
                MatchingStatus::Failed,
                Some(&reason),
            ),
            JobKind::MatchAccounts => self.db().finish_account_matching(
                job.tenant_id,
                job.statement_id,
                MatchingStatus::Failed,
                Some(&reason),
            ),
        })
        .await?;

        let failed_id = self
            .retry_write(job, || {
                self.db().record_failed_job(
                    job.tenant_id,
                    job.statement_id,
                    job.kind,
                    attempts,
                    &reason,
                )
            })
            .await?;
        error!(
            tenant_id = job.tenant_id,
            statement_id = job.statement_id,
            kind = %job.kind,
            lane = %job.lane(),
            attempts,
            failed_job_id = failed_id,
            error = %reason,
            "Job failed"
        );
        Ok(JobOutcome::Failed(reason))
    }
}

#[async_trait]
impl JobHandler for Orchestrator {
    async fn handle(&self, job: Job) {
        match self.run_job(job).await {
            Ok(outcome) => debug!(
                statement_id = job.statement_id,
                kind = %job.kind,
                ?outcome,
                "Job finished"
            ),
            Err(e) => error!(
                tenant_id = job.tenant_id,
                statement_id = job.statement_id,
                kind = %job.kind,
                error = %e,
                "Job aborted"
            ),
        }
    }
}

/// Drop OCR lines whose description is blank
///
/// Every other description is kept byte for byte.
fn drop_blank_lines(job: &Job, lines: Vec<NewStatementTransaction>) -> Vec<NewStatementTransaction> {
    let total = lines.len();
    let kept: Vec<_> = lines
        .into_iter()
        .filter(|line| !line.description.trim().is_empty())
        .collect();
    if kept.len() < total {
        warn!(
            tenant_id = job.tenant_id,
            statement_id = job.statement_id,
            skipped = total - kept.len(),
            "Skipped OCR lines with a blank description"
        );
    }
    kept
}

/// Whether `stage` is the `processing` state a job of `kind` claims
fn holds_claim(stage: StatementStage, kind: JobKind) -> bool {
    matches!(
        (kind, stage),
        (JobKind::ProcessOcr, StatementStage::OcrProcessing)
            | (JobKind::MatchTransactions, StatementStage::MatchingProcessing)
            | (JobKind::MatchAccounts, StatementStage::AccountMatchingProcessing)
    )
}

fn already_done(job: &Job, stage: StatementStage) -> JobOutcome {
    debug!(
        statement_id = job.statement_id,
        kind = %job.kind,
        %stage,
        "Stage already claimed, skipping duplicate job"
    );
    JobOutcome::AlreadyDone
}

/// Run synchronous database work off the async workers
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Queue(format!("Worker task failed: {}", e)))?
}

async fn sleep_unless_zero(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
