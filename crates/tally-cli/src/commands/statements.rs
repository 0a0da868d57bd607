//! Statement command implementations

use std::path::Path;

use anyhow::{Context, Result};
use tally_core::db::{StatementFilter, TransactionQuery};
use tally_core::pipeline::{Job, JobOutcome, StatementStage, StatementStatus};

use super::{truncate, Pipeline};

pub async fn cmd_statements_upload(
    pipeline: &Pipeline,
    tenant_id: i64,
    file: &Path,
    bank_code: &str,
    process: bool,
) -> Result<()> {
    let bank = pipeline
        .db()
        .get_bank_by_code(bank_code)?
        .with_context(|| format!("Unknown bank '{}' (see 'tally banks list')", bank_code))?;
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "statement.pdf".to_string());

    println!("📤 Uploading {} ({})...", file.display(), bank.name);
    let statement = pipeline
        .orchestrator
        .upload_statement(tenant_id, bank.id, &file_name, data)
        .await?;
    println!("   Statement {} stored", statement.id);

    if !process {
        println!("   Queued for OCR. Run 'tally statements process' or start the server.");
        return Ok(());
    }

    let ran = pipeline.drain().await?;
    print_outcomes(&ran);
    print_status(&pipeline.orchestrator.statement_status(tenant_id, statement.id)?);
    Ok(())
}

/// Run every pending stage of the tenant's statements
pub async fn cmd_statements_process(pipeline: &Pipeline, tenant_id: i64) -> Result<()> {
    let pending: Vec<Job> = pipeline
        .db()
        .list_pending_jobs()?
        .into_iter()
        .filter(|(tenant, _, _)| *tenant == tenant_id)
        .map(|(tenant, statement, kind)| Job::new(tenant, statement, kind))
        .collect();

    if pending.is_empty() {
        println!("✅ Nothing to process");
        return Ok(());
    }

    println!("⚙️  Processing {} pending stage(s)...", pending.len());
    let mut ran = Vec::new();
    for job in pending {
        ran.push((job, pipeline.orchestrator.run_job(job).await?));
    }
    ran.extend(pipeline.drain().await?);
    print_outcomes(&ran);
    Ok(())
}

pub fn cmd_statements_list(
    pipeline: &Pipeline,
    tenant_id: i64,
    ocr_status: Option<&str>,
    matching_status: Option<&str>,
    limit: i64,
) -> Result<()> {
    let filter = StatementFilter {
        ocr_status: ocr_status
            .map(str::parse)
            .transpose()
            .map_err(|e: String| anyhow::anyhow!(e))?,
        matching_status: matching_status
            .map(str::parse)
            .transpose()
            .map_err(|e: String| anyhow::anyhow!(e))?,
        limit: Some(limit),
        ..Default::default()
    };
    let statements = pipeline.db().list_statements(tenant_id, &filter)?;

    if statements.is_empty() {
        println!("No statements found.");
        return Ok(());
    }

    println!();
    println!("📄 Statements");
    println!("   ─────────────────────────────────────────────────────────────────────");
    for s in &statements {
        println!(
            "   {:>4}  {:<24} {:<28} {:>3}/{:<3} matched",
            s.id,
            truncate(s.original_filename.as_deref().unwrap_or("-"), 24),
            StatementStage::of(s).as_str(),
            s.matched_count,
            s.transaction_count
        );
    }

    Ok(())
}

pub fn cmd_statements_show(pipeline: &Pipeline, tenant_id: i64, id: i64, json: bool) -> Result<()> {
    let status = pipeline.orchestrator.statement_status(tenant_id, id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
    }
    Ok(())
}

pub fn cmd_statements_transactions(pipeline: &Pipeline, tenant_id: i64, id: i64) -> Result<()> {
    pipeline.db().require_statement(tenant_id, id)?;
    let transactions = pipeline
        .db()
        .list_transactions(tenant_id, &TransactionQuery::for_statement(id))?;

    if transactions.is_empty() {
        println!("No transactions extracted for statement {}.", id);
        return Ok(());
    }

    println!();
    println!("💳 Transactions for statement {}", id);
    println!("   ─────────────────────────────────────────────────────────────────────");
    for tx in &transactions {
        let category = match (tx.sub_category_id, tx.is_manual) {
            (Some(sub), true) => format!("#{} (manual)", sub),
            (Some(sub), false) => format!("#{} ({}%)", sub, tx.confidence_score.unwrap_or(0)),
            (None, _) => "-".to_string(),
        };
        let verified = if tx.is_verified { " ✔" } else { "" };
        println!(
            "   {:>5}  {}  {:<36} {:>14.2}  {}{}",
            tx.id,
            tx.date,
            truncate(&tx.description, 36),
            tx.amount(),
            category,
            verified
        );
    }

    Ok(())
}

pub async fn cmd_statements_rematch(pipeline: &Pipeline, tenant_id: i64, id: i64) -> Result<()> {
    pipeline.orchestrator.rematch_statement(tenant_id, id).await?;
    let ran = pipeline.drain().await?;
    print_outcomes(&ran);
    print_status(&pipeline.orchestrator.statement_status(tenant_id, id)?);
    Ok(())
}

pub fn cmd_statements_delete(pipeline: &Pipeline, tenant_id: i64, id: i64) -> Result<()> {
    pipeline.orchestrator.delete_statement(tenant_id, id)?;
    println!("🗑️  Deleted statement {}", id);
    Ok(())
}

pub fn print_outcomes(ran: &[(Job, JobOutcome)]) {
    for (job, outcome) in ran {
        let line = match outcome {
            JobOutcome::Completed => "✅ completed".to_string(),
            JobOutcome::Skipped(reason) => format!("⏭️  skipped: {}", reason),
            JobOutcome::AlreadyDone => "↩️  already done".to_string(),
            JobOutcome::Failed(reason) => format!("❌ failed: {}", reason),
            JobOutcome::Deferred => "⏳ deferred".to_string(),
        };
        println!("   [{}] {} {}", job.statement_id, job.kind, line);
    }
}

fn print_status(status: &StatementStatus) {
    let s = &status.statement;
    println!();
    println!("📊 Statement {}", s.id);
    println!("   ─────────────────────────────");
    println!("   Stage:        {}", status.stage.as_str());
    println!("   File:         {}", s.original_filename.as_deref().unwrap_or("-"));
    if let (Some(start), Some(end)) = (s.period_start, s.period_end) {
        println!("   Period:       {} to {}", start, end);
    }
    println!("   OCR:          {}", s.ocr_status.as_str());
    if let Some(err) = &s.ocr_error {
        println!("                 {}", err);
    }
    if let Some(status) = s.matching_status {
        println!("   Matching:     {}", status.as_str());
    }
    if let Some(note) = &s.matching_note {
        println!("                 {}", note);
    }
    if let Some(status) = s.account_matching_status {
        println!("   Accounts:     {}", status.as_str());
    }
    if let Some(note) = &s.account_matching_note {
        println!("                 {}", note);
    }
    println!(
        "   Transactions: {} ({} matched, {} unmatched)",
        s.transaction_count, s.matched_count, s.unmatched_count
    );
}
