//! Keyword rule command implementations

use anyhow::Result;
use tally_core::categorize::Categorizer;
use tally_core::models::NewKeyword;

use super::truncate;

pub fn cmd_keywords_list(categorizer: &Categorizer, tenant_id: i64) -> Result<()> {
    let db = categorizer.db();
    let keywords = db.list_keywords(tenant_id)?;

    if keywords.is_empty() {
        println!("No keyword rules yet. Add one with: tally keywords add GOJEK --sub-category <ID>");
        return Ok(());
    }

    // Show the category path next to each rule
    let paths = db.list_sub_categories(tenant_id)?;
    let path_of = |sub_id: i64| {
        paths
            .iter()
            .find(|p| p.path.sub_category_id == sub_id)
            .map(|p| format!("{} > {}", p.category_name, p.sub_category_name))
            .unwrap_or_else(|| format!("#{}", sub_id))
    };

    println!();
    println!("🔑 Keyword rules (evaluation order)");
    println!("   ─────────────────────────────────────────────────────────────");
    for kw in &keywords {
        let mut flags = Vec::new();
        if kw.is_regex {
            flags.push("regex");
        }
        if kw.case_sensitive {
            flags.push("case");
        }
        if !kw.is_active {
            flags.push("disabled");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!(
            "   {:>4}  p{:<3} {:<30} → {}{}",
            kw.id,
            kw.priority,
            truncate(&kw.keyword, 30),
            path_of(kw.sub_category_id),
            flags
        );
    }

    let matcher = categorizer.compile_rules(tenant_id)?;
    for disabled in matcher.disabled() {
        println!(
            "   ⚠️  Rule {} does not compile and is skipped: {}",
            disabled.id, disabled.reason
        );
    }

    Ok(())
}

pub fn cmd_keywords_add(
    categorizer: &Categorizer,
    tenant_id: i64,
    keyword: &str,
    sub_category_id: i64,
    is_regex: bool,
    case_sensitive: bool,
    priority: i32,
) -> Result<()> {
    let id = categorizer.create_keyword(
        tenant_id,
        &NewKeyword {
            keyword: keyword.to_string(),
            is_regex,
            case_sensitive,
            priority,
            sub_category_id,
        },
    )?;
    println!("✅ Created keyword '{}' (id: {})", keyword, id);
    Ok(())
}

pub fn cmd_keywords_set_active(
    categorizer: &Categorizer,
    tenant_id: i64,
    id: i64,
    active: bool,
) -> Result<()> {
    if !categorizer.db().set_keyword_active(tenant_id, id, active)? {
        anyhow::bail!("Keyword {} not found", id);
    }
    let state = if active { "enabled" } else { "disabled" };
    println!("✅ Keyword {} {}", id, state);
    Ok(())
}

pub fn cmd_keywords_delete(categorizer: &Categorizer, tenant_id: i64, id: i64) -> Result<()> {
    if !categorizer.db().delete_keyword(tenant_id, id)? {
        anyhow::bail!("Keyword {} not found", id);
    }
    println!("🗑️  Deleted keyword {}", id);
    Ok(())
}

pub fn cmd_keywords_test(categorizer: &Categorizer, tenant_id: i64, description: &str) -> Result<()> {
    match categorizer.match_description(tenant_id, description)? {
        Some(m) => {
            let path = categorizer.db().category_path(tenant_id, m.sub_category_id)?;
            println!("✅ '{}' matches keyword {}", description, m.keyword_id);
            println!(
                "   sub-category {} (category {}, type {}), confidence {}",
                path.sub_category_id, path.category_id, path.type_id, m.confidence_score
            );
        }
        None => {
            println!("❌ No rule matches '{}'", description);
        }
    }
    Ok(())
}
