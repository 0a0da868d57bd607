//! Domain models for Tally

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A company whose data is isolated from every other tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A bank whose statements the OCR service understands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bank {
    pub id: i64,
    /// Short unique code (e.g., "bca", "mandiri")
    pub code: String,
    pub name: String,
    /// Per-bank OCR endpoint path, overrides the configured mapping
    pub ocr_endpoint: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ========== Statement Models ==========

/// OCR stage status of a bank statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OcrStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OcrStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for OcrStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown OCR status: {}", s)),
        }
    }
}

impl std::fmt::Display for OcrStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a matching stage (transaction matching or account matching)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchingStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    /// Guard condition held (nothing to match); terminal, not an error
    Skipped,
    Failed,
}

impl MatchingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }

    /// Completed, skipped, and failed are terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Failed)
    }
}

impl std::str::FromStr for MatchingStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "skipped" => Ok(Self::Skipped),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown matching status: {}", s)),
        }
    }
}

impl std::fmt::Display for MatchingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One uploaded bank statement document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankStatement {
    pub id: i64,
    pub tenant_id: i64,
    pub bank_id: i64,
    /// Where the PDF is stored
    pub file_path: String,
    pub original_filename: Option<String>,
    /// SHA-256 of the file contents (hex)
    pub file_hash: String,
    pub ocr_status: OcrStatus,
    pub matching_status: Option<MatchingStatus>,
    pub account_matching_status: Option<MatchingStatus>,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub transaction_count: i64,
    pub matched_count: i64,
    pub unmatched_count: i64,
    pub ocr_error: Option<String>,
    /// Skip reason or error message for transaction matching
    pub matching_note: Option<String>,
    /// Skip reason or error message for account matching
    pub account_matching_note: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub ocr_started_at: Option<DateTime<Utc>>,
    pub ocr_completed_at: Option<DateTime<Utc>>,
    pub matching_completed_at: Option<DateTime<Utc>>,
    pub account_matching_completed_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A statement to be recorded on upload
#[derive(Debug, Clone)]
pub struct NewBankStatement {
    pub bank_id: i64,
    pub file_path: String,
    pub original_filename: Option<String>,
    pub file_hash: String,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
}

// ========== Transaction Models ==========

/// Direction of a statement line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Debit,
    Credit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }

    /// Credit when money came in, debit otherwise
    pub fn from_amounts(debit: f64, credit: f64) -> Self {
        if credit > 0.0 && debit <= 0.0 {
            Self::Credit
        } else {
            Self::Debit
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debit" | "db" => Ok(Self::Debit),
            "credit" | "cr" => Ok(Self::Credit),
            _ => Err(format!("Unknown transaction type: {}", s)),
        }
    }
}

/// One extracted statement line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementTransaction {
    pub id: i64,
    pub tenant_id: i64,
    pub statement_id: i64,
    pub date: NaiveDate,
    /// Raw description from the statement, never rewritten
    pub description: String,
    pub debit: f64,
    pub credit: f64,
    pub balance: Option<f64>,
    pub transaction_type: TransactionType,
    // Denormalized copy of the primary match
    pub matched_keyword_id: Option<i64>,
    pub sub_category_id: Option<i64>,
    pub category_id: Option<i64>,
    pub type_id: Option<i64>,
    pub confidence_score: Option<i32>,
    /// Confirmed by a human; automatic matching leaves it alone
    pub is_verified: bool,
    /// Categorized by hand; automatic matching leaves it alone
    pub is_manual: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StatementTransaction {
    /// Signed amount: positive = money in
    pub fn amount(&self) -> f64 {
        self.credit - self.debit
    }

    /// Whether automatic matching may touch this transaction
    pub fn is_auto_matchable(&self) -> bool {
        !self.is_manual && !self.is_verified
    }
}

/// A transaction line as extracted, before insertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStatementTransaction {
    pub date: NaiveDate,
    pub description: String,
    #[serde(default)]
    pub debit: f64,
    #[serde(default)]
    pub credit: f64,
    #[serde(default)]
    pub balance: Option<f64>,
}

// ========== Category Models ==========

/// Top level of the category hierarchy (e.g., "Expense", "Income")
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryType {
    pub id: i64,
    pub tenant_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub tenant_id: i64,
    pub type_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubCategory {
    pub id: i64,
    pub tenant_id: i64,
    pub category_id: i64,
    pub name: String,
}

/// The ids a sub-category implies through the hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPath {
    pub sub_category_id: i64,
    pub category_id: i64,
    pub type_id: i64,
}

/// Sub-category with its full display path (for listings)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubCategoryWithPath {
    #[serde(flatten)]
    pub path: CategoryPath,
    pub type_name: String,
    pub category_name: String,
    pub sub_category_name: String,
}

// ========== Keyword Models ==========

/// A tenant-scoped rule for auto-categorizing transactions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyword {
    pub id: i64,
    pub tenant_id: i64,
    /// Literal text, or a regex when `is_regex` is set
    pub keyword: String,
    pub is_regex: bool,
    pub case_sensitive: bool,
    /// Higher priority rules are checked first
    pub priority: i32,
    pub sub_category_id: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A keyword joined with the category ids its sub-category implies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordWithPath {
    #[serde(flatten)]
    pub keyword: Keyword,
    pub category_id: i64,
    pub type_id: i64,
}

impl KeywordWithPath {
    pub fn path(&self) -> CategoryPath {
        CategoryPath {
            sub_category_id: self.keyword.sub_category_id,
            category_id: self.category_id,
            type_id: self.type_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewKeyword {
    pub keyword: String,
    #[serde(default)]
    pub is_regex: bool,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub priority: i32,
    pub sub_category_id: i64,
}

/// Partial update of a keyword; `None` leaves the field as is
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeywordUpdate {
    pub keyword: Option<String>,
    pub is_regex: Option<bool>,
    pub case_sensitive: Option<bool>,
    pub priority: Option<i32>,
    pub sub_category_id: Option<i64>,
    pub is_active: Option<bool>,
}

// ========== Match Models ==========

/// Where a category assignment came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
    /// Produced by a keyword rule
    Keyword,
    /// Chosen by a person
    Manual,
}

impl MatchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Manual => "manual",
        }
    }
}

impl std::str::FromStr for MatchSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keyword" => Ok(Self::Keyword),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Unknown match source: {}", s)),
        }
    }
}

/// Authoritative match record linking a transaction to a category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionCategory {
    pub id: i64,
    pub tenant_id: i64,
    pub transaction_id: i64,
    pub sub_category_id: i64,
    pub category_id: i64,
    pub type_id: i64,
    pub matched_keyword_id: Option<i64>,
    pub confidence_score: i32,
    /// At most one primary record per transaction
    pub is_primary: bool,
    pub source: MatchSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of the matcher for one description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub keyword_id: i64,
    pub sub_category_id: i64,
    pub category_id: i64,
    pub type_id: i64,
    pub confidence_score: i32,
}

/// Whether a synchronizer call wrote anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyOutcome {
    Unchanged,
    Updated,
}

impl ApplyOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, Self::Updated)
    }
}

// ========== Account Models ==========

/// An internal ledger account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub tenant_id: i64,
    /// Chart-of-accounts code (e.g., "6100")
    pub code: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A rule mapping descriptions to an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountKeyword {
    pub id: i64,
    pub tenant_id: i64,
    pub account_id: i64,
    pub keyword: String,
    pub is_regex: bool,
    pub case_sensitive: bool,
    pub priority: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccountKeyword {
    pub keyword: String,
    #[serde(default)]
    pub is_regex: bool,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub priority: i32,
}

/// Mapping from a transaction to an account (one per transaction)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountMatch {
    pub id: i64,
    pub tenant_id: i64,
    pub transaction_id: i64,
    pub account_id: i64,
    pub account_keyword_id: Option<i64>,
    pub confidence_score: i32,
    pub created_at: DateTime<Utc>,
}

// ========== Queue Models ==========

/// Named queue lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lane {
    #[serde(rename = "ocr-processing")]
    OcrProcessing,
    #[serde(rename = "matching")]
    Matching,
}

impl Lane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OcrProcessing => "ocr-processing",
            Self::Matching => "matching",
        }
    }

    pub fn all() -> &'static [Lane] {
        &[Self::OcrProcessing, Self::Matching]
    }
}

impl std::str::FromStr for Lane {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ocr-processing" => Ok(Self::OcrProcessing),
            "matching" => Ok(Self::Matching),
            _ => Err(format!("Unknown lane: {}", s)),
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unit of pipeline work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ProcessOcr,
    MatchTransactions,
    MatchAccounts,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessOcr => "process_ocr",
            Self::MatchTransactions => "match_transactions",
            Self::MatchAccounts => "match_accounts",
        }
    }

    /// The lane this kind of job runs on
    pub fn lane(&self) -> Lane {
        match self {
            Self::ProcessOcr => Lane::OcrProcessing,
            Self::MatchTransactions | Self::MatchAccounts => Lane::Matching,
        }
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "process_ocr" => Ok(Self::ProcessOcr),
            "match_transactions" => Ok(Self::MatchTransactions),
            "match_accounts" => Ok(Self::MatchAccounts),
            _ => Err(format!("Unknown job kind: {}", s)),
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A job that exhausted its retry budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedJob {
    pub id: i64,
    pub tenant_id: i64,
    pub statement_id: i64,
    pub lane: Lane,
    pub kind: JobKind,
    pub attempts: i64,
    pub error: String,
    pub failed_at: DateTime<Utc>,
    pub retried_at: Option<DateTime<Utc>>,
}

// ========== Suggestion Models ==========

/// A proposed literal keyword for a cluster of unmatched transactions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordSuggestion {
    pub keyword: String,
    pub sample_description: String,
    pub frequency: usize,
    /// Mean absolute amount across the cluster
    pub average_amount: f64,
    pub transaction_ids: Vec<i64>,
}
