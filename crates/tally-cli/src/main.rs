//! Tally CLI - Bank statement transaction categorization
//!
//! Usage:
//!   tally init                                          Initialize database
//!   tally tenants add "Acme"                            Create a tenant
//!   tally --tenant 1 keywords add GOJEK --sub-category 3
//!   tally --tenant 1 statements upload -f march.pdf -b bca
//!   tally serve --port 3000                             Start web server

mod cli;
mod commands;

#[cfg(test)]
mod tests;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;
use commands::Pipeline;

/// Open the database and wire the pipeline against the configured OCR service
fn open_pipeline(cli: &Cli) -> Result<Pipeline> {
    let db = commands::open_db(&cli.db, cli.no_encrypt)?;
    let config = commands::load_config(cli.config.as_deref())?;
    Pipeline::open(db, config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    match &cli.command {
        Commands::Init => commands::cmd_init(&cli.db, cli.no_encrypt),
        Commands::Tenants { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                None | Some(TenantsAction::List) => commands::cmd_tenants_list(&db),
                Some(TenantsAction::Add { name }) => commands::cmd_tenants_add(&db, name),
            }
        }
        Commands::Banks { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                None | Some(BanksAction::List) => commands::cmd_banks_list(&db),
                Some(BanksAction::Add {
                    code,
                    name,
                    endpoint,
                }) => commands::cmd_banks_add(&db, code, name, endpoint.as_deref()),
            }
        }
        Commands::Categories { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let tenant = commands::require_tenant(&db, cli.tenant)?;
            match action {
                None | Some(CategoriesAction::List) => commands::cmd_categories_list(&db, tenant),
                Some(CategoriesAction::Add {
                    type_name,
                    category,
                    sub,
                }) => commands::cmd_categories_add(&db, tenant, type_name, category, sub),
            }
        }
        Commands::Keywords { action } => {
            let pipeline = open_pipeline(&cli)?;
            let tenant = commands::require_tenant(pipeline.db(), cli.tenant)?;
            let categorizer = pipeline.categorizer();
            match action {
                None | Some(KeywordsAction::List) => commands::cmd_keywords_list(categorizer, tenant),
                Some(KeywordsAction::Add {
                    keyword,
                    sub_category,
                    regex,
                    case_sensitive,
                    priority,
                }) => commands::cmd_keywords_add(
                    categorizer,
                    tenant,
                    keyword,
                    *sub_category,
                    *regex,
                    *case_sensitive,
                    *priority,
                ),
                Some(KeywordsAction::Enable { id }) => {
                    commands::cmd_keywords_set_active(categorizer, tenant, *id, true)
                }
                Some(KeywordsAction::Disable { id }) => {
                    commands::cmd_keywords_set_active(categorizer, tenant, *id, false)
                }
                Some(KeywordsAction::Delete { id }) => {
                    commands::cmd_keywords_delete(categorizer, tenant, *id)
                }
                Some(KeywordsAction::Test { description }) => {
                    commands::cmd_keywords_test(categorizer, tenant, description)
                }
            }
        }
        Commands::Accounts { action } => {
            let pipeline = open_pipeline(&cli)?;
            let tenant = commands::require_tenant(pipeline.db(), cli.tenant)?;
            match action {
                None | Some(AccountsAction::List) => commands::cmd_accounts_list(pipeline.db(), tenant),
                Some(AccountsAction::Add { code, name }) => {
                    commands::cmd_accounts_add(pipeline.db(), tenant, code, name)
                }
                Some(AccountsAction::Keyword {
                    account,
                    keyword,
                    regex,
                    case_sensitive,
                    priority,
                }) => commands::cmd_accounts_keyword(
                    pipeline.categorizer(),
                    tenant,
                    *account,
                    keyword,
                    *regex,
                    *case_sensitive,
                    *priority,
                ),
            }
        }
        Commands::Statements { action } => {
            let pipeline = open_pipeline(&cli)?;
            let tenant = commands::require_tenant(pipeline.db(), cli.tenant)?;
            match action {
                StatementsAction::Upload {
                    file,
                    bank,
                    no_process,
                } => commands::cmd_statements_upload(&pipeline, tenant, file, bank, !no_process).await,
                StatementsAction::Process => commands::cmd_statements_process(&pipeline, tenant).await,
                StatementsAction::List {
                    ocr_status,
                    matching_status,
                    limit,
                } => commands::cmd_statements_list(
                    &pipeline,
                    tenant,
                    ocr_status.as_deref(),
                    matching_status.as_deref(),
                    *limit,
                ),
                StatementsAction::Show { id, json } => {
                    commands::cmd_statements_show(&pipeline, tenant, *id, *json)
                }
                StatementsAction::Transactions { id } => {
                    commands::cmd_statements_transactions(&pipeline, tenant, *id)
                }
                StatementsAction::Rematch { id } => {
                    commands::cmd_statements_rematch(&pipeline, tenant, *id).await
                }
                StatementsAction::Delete { id } => {
                    commands::cmd_statements_delete(&pipeline, tenant, *id)
                }
            }
        }
        Commands::Transactions { action } => {
            let pipeline = open_pipeline(&cli)?;
            let tenant = commands::require_tenant(pipeline.db(), cli.tenant)?;
            let categorizer = pipeline.categorizer();
            match action {
                TransactionsAction::Categorize { id, sub_category } => {
                    commands::cmd_transactions_categorize(categorizer, tenant, *id, *sub_category)
                }
                TransactionsAction::Clear { id } => {
                    commands::cmd_transactions_clear(categorizer, tenant, *id)
                }
                TransactionsAction::Verify { id, undo } => {
                    commands::cmd_transactions_verify(categorizer, tenant, *id, !undo)
                }
                TransactionsAction::Matches { id } => {
                    commands::cmd_transactions_matches(categorizer, tenant, *id)
                }
                TransactionsAction::Promote { record } => {
                    commands::cmd_transactions_promote(categorizer, tenant, *record)
                }
            }
        }
        Commands::Suggestions { statement, action } => {
            let pipeline = open_pipeline(&cli)?;
            let tenant = commands::require_tenant(pipeline.db(), cli.tenant)?;
            match action {
                None => commands::cmd_suggestions_list(pipeline.categorizer(), tenant, *statement),
                Some(SuggestionsAction::Confirm {
                    keyword,
                    sub_category,
                    priority,
                }) => commands::cmd_suggestions_confirm(
                    pipeline.categorizer(),
                    tenant,
                    keyword,
                    *sub_category,
                    *priority,
                ),
            }
        }
        Commands::FailedJobs { action } => {
            let pipeline = open_pipeline(&cli)?;
            let tenant = commands::require_tenant(pipeline.db(), cli.tenant)?;
            match action {
                None => commands::cmd_failed_jobs_list(pipeline.db(), tenant, false),
                Some(FailedJobsAction::List { all }) => {
                    commands::cmd_failed_jobs_list(pipeline.db(), tenant, *all)
                }
                Some(FailedJobsAction::Retry { id }) => {
                    commands::cmd_failed_jobs_retry(&pipeline, tenant, *id).await
                }
            }
        }
        Commands::Drift { repair } => {
            let pipeline = open_pipeline(&cli)?;
            let tenant = commands::require_tenant(pipeline.db(), cli.tenant)?;
            commands::cmd_drift(pipeline.categorizer(), tenant, *repair)
        }
        Commands::Serve {
            port,
            host,
            allow_origin,
        } => {
            commands::cmd_serve(
                &cli.db,
                cli.no_encrypt,
                cli.config.as_deref(),
                host,
                *port,
                allow_origin.clone(),
            )
            .await
        }
    }
}
