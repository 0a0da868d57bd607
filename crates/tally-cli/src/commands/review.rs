//! Review command implementations: suggestions, failed jobs, drift

use anyhow::Result;
use tally_core::categorize::Categorizer;
use tally_core::db::Database;
use tally_core::models::NewKeyword;

use super::{print_outcomes, truncate, Pipeline};

pub fn cmd_suggestions_list(
    categorizer: &Categorizer,
    tenant_id: i64,
    statement_id: Option<i64>,
) -> Result<()> {
    let suggestions = categorizer.suggest_keywords(tenant_id, statement_id)?;

    if suggestions.is_empty() {
        println!("✅ No suggestions, unmatched transactions have nothing in common");
        return Ok(());
    }

    println!();
    println!("💡 Keyword suggestions");
    println!("   ─────────────────────────────────────────────────────────────");
    for s in &suggestions {
        println!(
            "   {:<24} {:>3}x  avg {:>12.2}  e.g. {}",
            truncate(&s.keyword, 24),
            s.frequency,
            s.average_amount,
            truncate(&s.sample_description, 40)
        );
    }
    println!();
    println!("Confirm one with: tally suggestions confirm \"<KEYWORD>\" --sub-category <ID>");

    Ok(())
}

pub fn cmd_suggestions_confirm(
    categorizer: &Categorizer,
    tenant_id: i64,
    keyword: &str,
    sub_category_id: i64,
    priority: i32,
) -> Result<()> {
    let outcome = categorizer.confirm_suggestion(
        tenant_id,
        &NewKeyword {
            keyword: keyword.to_string(),
            is_regex: false,
            case_sensitive: false,
            priority,
            sub_category_id,
        },
    )?;
    println!(
        "✅ Created keyword '{}' (id: {}), {} transaction(s) newly matched",
        keyword, outcome.keyword_id, outcome.newly_matched
    );
    Ok(())
}

pub fn cmd_failed_jobs_list(db: &Database, tenant_id: i64, all: bool) -> Result<()> {
    let jobs = db.list_failed_jobs(tenant_id, all)?;

    if jobs.is_empty() {
        println!("✅ No failed jobs");
        return Ok(());
    }

    println!();
    println!("☠️  Failed jobs");
    println!("   ─────────────────────────────────────────────────────────────");
    for job in &jobs {
        let retried = job
            .retried_at
            .map(|t| format!(" (retried {})", t.format("%Y-%m-%d %H:%M")))
            .unwrap_or_default();
        println!(
            "   {:>4}  statement {:<5} {:<18} {} attempt(s)  {}{}",
            job.id,
            job.statement_id,
            job.kind.as_str(),
            job.attempts,
            job.failed_at.format("%Y-%m-%d %H:%M"),
            retried
        );
        println!("         {}", truncate(&job.error, 70));
    }

    Ok(())
}

pub async fn cmd_failed_jobs_retry(pipeline: &Pipeline, tenant_id: i64, id: i64) -> Result<()> {
    let job = pipeline.orchestrator.retry_failed_job(tenant_id, id).await?;
    println!(
        "🔁 Retrying {} for statement {}",
        job.kind, job.statement_id
    );
    let ran = pipeline.drain().await?;
    print_outcomes(&ran);
    Ok(())
}

pub fn cmd_drift(categorizer: &Categorizer, tenant_id: i64, repair: bool) -> Result<()> {
    if repair {
        let repaired = categorizer.repair_drift(tenant_id)?;
        if repaired.is_empty() {
            println!("✅ No drift to repair");
        } else {
            println!("🔧 Repaired {} transaction(s): {:?}", repaired.len(), repaired);
        }
        return Ok(());
    }

    let drifted = categorizer.db().find_denormalization_drift(tenant_id)?;
    if drifted.is_empty() {
        println!("✅ Transaction columns agree with their primary matches");
    } else {
        println!(
            "⚠️  {} transaction(s) disagree with their primary match: {:?}",
            drifted.len(),
            drifted
        );
        println!("   Run 'tally drift --repair' to fix them.");
    }
    Ok(())
}
