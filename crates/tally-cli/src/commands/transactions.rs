//! Transaction categorization commands

use anyhow::Result;
use tally_core::categorize::Categorizer;
use tally_core::models::ApplyOutcome;

fn report(outcome: ApplyOutcome, changed: &str, transaction_id: i64) {
    match outcome {
        ApplyOutcome::Updated => println!("✅ Transaction {} {}", transaction_id, changed),
        ApplyOutcome::Unchanged => println!("   Transaction {} unchanged", transaction_id),
    }
}

pub fn cmd_transactions_categorize(
    categorizer: &Categorizer,
    tenant_id: i64,
    id: i64,
    sub_category_id: i64,
) -> Result<()> {
    let outcome = categorizer.set_manual_category(tenant_id, id, sub_category_id)?;
    report(outcome, "categorized by hand", id);
    Ok(())
}

pub fn cmd_transactions_clear(categorizer: &Categorizer, tenant_id: i64, id: i64) -> Result<()> {
    let outcome = categorizer.clear_category(tenant_id, id)?;
    report(outcome, "cleared", id);
    Ok(())
}

pub fn cmd_transactions_verify(
    categorizer: &Categorizer,
    tenant_id: i64,
    id: i64,
    verified: bool,
) -> Result<()> {
    let outcome = categorizer.verify_transaction(tenant_id, id, verified)?;
    report(outcome, if verified { "verified" } else { "unverified" }, id);
    Ok(())
}

pub fn cmd_transactions_matches(categorizer: &Categorizer, tenant_id: i64, id: i64) -> Result<()> {
    let db = categorizer.db();
    db.require_transaction(tenant_id, id)?;
    let records = db.list_match_records(tenant_id, id)?;

    if records.is_empty() {
        println!("No match records for transaction {}.", id);
        return Ok(());
    }

    println!();
    println!("🧾 Match records for transaction {}", id);
    println!("   ─────────────────────────────────────────────");
    for record in &records {
        let primary = if record.is_primary { "★" } else { " " };
        let keyword = record
            .matched_keyword_id
            .map(|k| format!("keyword {}", k))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "   {} {:>5}  sub-category {:<5} {:>3}%  {:<7} {}",
            primary,
            record.id,
            record.sub_category_id,
            record.confidence_score,
            record.source.as_str(),
            keyword
        );
    }

    Ok(())
}

pub fn cmd_transactions_promote(categorizer: &Categorizer, tenant_id: i64, record_id: i64) -> Result<()> {
    match categorizer.promote_match(tenant_id, record_id)? {
        ApplyOutcome::Updated => println!("✅ Match record {} is now primary", record_id),
        ApplyOutcome::Unchanged => println!("   Match record {} was already primary", record_id),
    }
    Ok(())
}
