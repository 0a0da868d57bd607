//! Tenant, bank, category, and account command implementations

use anyhow::Result;
use tally_core::categorize::Categorizer;
use tally_core::db::Database;
use tally_core::models::NewAccountKeyword;

use super::truncate;

// ========== Tenants ==========

pub fn cmd_tenants_list(db: &Database) -> Result<()> {
    let tenants = db.list_tenants()?;

    if tenants.is_empty() {
        println!("No tenants yet. Create one with: tally tenants add \"Acme\"");
        return Ok(());
    }

    println!();
    println!("🏢 Tenants");
    println!("   ─────────────────────────────────────────");
    for tenant in &tenants {
        println!(
            "   {:>4}  {:<28} {}",
            tenant.id,
            truncate(&tenant.name, 28),
            tenant.created_at.format("%Y-%m-%d")
        );
    }

    Ok(())
}

pub fn cmd_tenants_add(db: &Database, name: &str) -> Result<()> {
    let id = db.create_tenant(name)?;
    println!("✅ Created tenant '{}' (id: {})", name, id);
    Ok(())
}

// ========== Banks ==========

pub fn cmd_banks_list(db: &Database) -> Result<()> {
    let banks = db.list_banks()?;

    if banks.is_empty() {
        println!("No banks registered. Add one with: tally banks add bca \"Bank Central Asia\"");
        return Ok(());
    }

    println!();
    println!("🏦 Banks");
    println!("   ─────────────────────────────────────────────────────");
    for bank in &banks {
        let endpoint = bank
            .ocr_endpoint
            .as_deref()
            .map(|e| format!(" → {}", e))
            .unwrap_or_default();
        println!(
            "   {:>4}  {:<10} {}{}",
            bank.id, bank.code, bank.name, endpoint
        );
    }

    Ok(())
}

pub fn cmd_banks_add(db: &Database, code: &str, name: &str, endpoint: Option<&str>) -> Result<()> {
    let id = db.create_bank(code, name, endpoint)?;
    println!("✅ Registered bank '{}' (id: {})", code, id);
    Ok(())
}

// ========== Categories ==========

pub fn cmd_categories_list(db: &Database, tenant_id: i64) -> Result<()> {
    let subs = db.list_sub_categories(tenant_id)?;

    if subs.is_empty() {
        println!("No categories yet. Add one with: tally categories add --type Expense --category Meals --sub Food");
        return Ok(());
    }

    println!();
    println!("🗂️  Categories");
    println!("   ─────────────────────────────────────────────────────");
    for sub in &subs {
        println!(
            "   {:>4}  {} > {} > {}",
            sub.path.sub_category_id, sub.type_name, sub.category_name, sub.sub_category_name
        );
    }

    Ok(())
}

pub fn cmd_categories_add(
    db: &Database,
    tenant_id: i64,
    type_name: &str,
    category: &str,
    sub: &str,
) -> Result<()> {
    let path = db.ensure_category_path(tenant_id, type_name, category, sub)?;
    println!(
        "✅ {} > {} > {} (sub-category id: {})",
        type_name, category, sub, path.sub_category_id
    );
    Ok(())
}

// ========== Accounts ==========

pub fn cmd_accounts_list(db: &Database, tenant_id: i64) -> Result<()> {
    let accounts = db.list_accounts(tenant_id)?;
    let keywords = db.list_account_keywords(tenant_id)?;

    if accounts.is_empty() {
        println!("No accounts yet. Add one with: tally accounts add 6100 \"Meals\"");
        return Ok(());
    }

    println!();
    println!("📒 Accounts");
    println!("   ─────────────────────────────────────────────────────");
    for account in &accounts {
        let status = if account.is_active { "" } else { " (inactive)" };
        println!(
            "   {:>4}  {:<8} {}{}",
            account.id, account.code, account.name, status
        );
        for kw in keywords.iter().filter(|k| k.account_id == account.id) {
            let kind = if kw.is_regex { "regex" } else { "text" };
            println!(
                "         ↳ [{}] {} (priority {}, {})",
                kw.id, kw.keyword, kw.priority, kind
            );
        }
    }

    Ok(())
}

pub fn cmd_accounts_add(db: &Database, tenant_id: i64, code: &str, name: &str) -> Result<()> {
    let id = db.create_account(tenant_id, code, name)?;
    println!("✅ Created account {} '{}' (id: {})", code, name, id);
    Ok(())
}

pub fn cmd_accounts_keyword(
    categorizer: &Categorizer,
    tenant_id: i64,
    account_id: i64,
    keyword: &str,
    is_regex: bool,
    case_sensitive: bool,
    priority: i32,
) -> Result<()> {
    let id = categorizer.create_account_keyword(
        tenant_id,
        account_id,
        &NewAccountKeyword {
            keyword: keyword.to_string(),
            is_regex,
            case_sensitive,
            priority,
        },
    )?;
    println!(
        "✅ Account keyword '{}' → account {} (id: {})",
        keyword, account_id, id
    );
    Ok(())
}
