//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tally - Categorize bank statement transactions
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Multi-tenant bank statement categorization pipeline", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "tally.db", global = true)]
    pub db: PathBuf,

    /// Pipeline config file (defaults to the data directory override, then built-in defaults)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Tenant to operate on (required by tenant-scoped commands)
    #[arg(long, global = true)]
    pub tenant: Option<i64>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set TALLY_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Manage tenants
    Tenants {
        #[command(subcommand)]
        action: Option<TenantsAction>,
    },

    /// Manage banks and their OCR endpoints
    Banks {
        #[command(subcommand)]
        action: Option<BanksAction>,
    },

    /// Manage the category hierarchy (type > category > sub-category)
    Categories {
        #[command(subcommand)]
        action: Option<CategoriesAction>,
    },

    /// Manage keyword rules
    Keywords {
        #[command(subcommand)]
        action: Option<KeywordsAction>,
    },

    /// Manage ledger accounts and account keywords
    Accounts {
        #[command(subcommand)]
        action: Option<AccountsAction>,
    },

    /// Upload and inspect bank statements
    Statements {
        #[command(subcommand)]
        action: StatementsAction,
    },

    /// Categorize and verify individual transactions
    Transactions {
        #[command(subcommand)]
        action: TransactionsAction,
    },

    /// Suggest keywords for unmatched transactions
    Suggestions {
        /// Limit to one statement
        #[arg(long)]
        statement: Option<i64>,

        #[command(subcommand)]
        action: Option<SuggestionsAction>,
    },

    /// Inspect and retry jobs that exhausted their retries
    FailedJobs {
        #[command(subcommand)]
        action: Option<FailedJobsAction>,
    },

    /// Report (or repair) transactions whose category drifted from their primary match
    Drift {
        /// Repair drifted transactions
        #[arg(long)]
        repair: bool,
    },

    /// Start the web server and queue workers
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Allowed CORS origin (repeatable)
        #[arg(long)]
        allow_origin: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum TenantsAction {
    /// List tenants
    List,
    /// Create a tenant
    Add {
        /// Tenant name
        name: String,
    },
}

#[derive(Subcommand)]
pub enum BanksAction {
    /// List banks
    List,
    /// Register a bank
    Add {
        /// Short code (e.g., bca)
        code: String,
        /// Display name
        name: String,
        /// OCR endpoint path, overriding the configured mapping
        #[arg(long)]
        endpoint: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum CategoriesAction {
    /// List sub-categories with their full path
    List,
    /// Create a category chain (existing levels are reused)
    Add {
        /// Category type (e.g., Expense)
        #[arg(long = "type")]
        type_name: String,
        /// Category (e.g., Meals)
        #[arg(long)]
        category: String,
        /// Sub-category (e.g., Food Delivery)
        #[arg(long)]
        sub: String,
    },
}

#[derive(Subcommand)]
pub enum KeywordsAction {
    /// List keyword rules in evaluation order
    List,
    /// Add a keyword rule
    Add {
        /// Literal text, or a regex with --regex
        keyword: String,
        /// Sub-category the rule assigns
        #[arg(long)]
        sub_category: i64,
        /// Treat the keyword as a regular expression
        #[arg(long)]
        regex: bool,
        /// Match case exactly
        #[arg(long)]
        case_sensitive: bool,
        /// Higher priority rules are checked first
        #[arg(long, default_value = "0")]
        priority: i32,
    },
    /// Enable a keyword rule
    Enable { id: i64 },
    /// Disable a keyword rule
    Disable { id: i64 },
    /// Delete a keyword rule
    Delete { id: i64 },
    /// Show which rule matches a description
    Test {
        /// Transaction description
        description: String,
    },
}

#[derive(Subcommand)]
pub enum AccountsAction {
    /// List ledger accounts
    List,
    /// Create a ledger account
    Add {
        /// Chart-of-accounts code (e.g., 6100)
        code: String,
        /// Account name
        name: String,
    },
    /// Add a keyword mapping descriptions to an account
    Keyword {
        /// Account ID
        account: i64,
        /// Literal text, or a regex with --regex
        keyword: String,
        #[arg(long)]
        regex: bool,
        #[arg(long)]
        case_sensitive: bool,
        #[arg(long, default_value = "0")]
        priority: i32,
    },
}

#[derive(Subcommand)]
pub enum StatementsAction {
    /// Upload a statement PDF and run the pipeline
    Upload {
        /// PDF file
        #[arg(short, long)]
        file: PathBuf,
        /// Bank code (e.g., bca)
        #[arg(short, long)]
        bank: String,
        /// Only queue the statement; a running server (or 'statements process') picks it up
        #[arg(long)]
        no_process: bool,
    },
    /// Run every pending stage for the tenant
    Process,
    /// List statements
    List {
        /// Filter by OCR status (pending, processing, completed, failed)
        #[arg(long)]
        ocr_status: Option<String>,
        /// Filter by matching status (pending, processing, completed, skipped, failed)
        #[arg(long)]
        matching_status: Option<String>,
        /// Number of statements to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },
    /// Show a statement's stage and status details
    Show {
        id: i64,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// List a statement's transactions
    Transactions { id: i64 },
    /// Run transaction matching again (account matching follows)
    Rematch { id: i64 },
    /// Delete a statement and its transactions
    Delete { id: i64 },
}

#[derive(Subcommand)]
pub enum TransactionsAction {
    /// Assign a sub-category by hand (automatic matching will leave it alone)
    Categorize {
        id: i64,
        #[arg(long)]
        sub_category: i64,
    },
    /// Remove a keyword-assigned category
    Clear { id: i64 },
    /// Mark a transaction as checked
    Verify {
        id: i64,
        /// Clear the verified flag instead
        #[arg(long)]
        undo: bool,
    },
    /// List a transaction's match records
    Matches { id: i64 },
    /// Make a match record the primary one
    Promote {
        /// Match record ID
        record: i64,
    },
}

#[derive(Subcommand)]
pub enum SuggestionsAction {
    /// Create a keyword from a suggestion and rematch unmatched transactions
    Confirm {
        /// Keyword text
        keyword: String,
        /// Sub-category the keyword assigns
        #[arg(long)]
        sub_category: i64,
        #[arg(long, default_value = "0")]
        priority: i32,
    },
}

#[derive(Subcommand)]
pub enum FailedJobsAction {
    /// List failed jobs
    List {
        /// Include jobs that were already retried
        #[arg(long)]
        all: bool,
    },
    /// Reset the failed stage and run it again
    Retry { id: i64 },
}
