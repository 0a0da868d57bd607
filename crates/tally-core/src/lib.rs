//! Tally Core Library
//!
//! Statement categorization pipeline for multi-tenant bookkeeping:
//! - Database access and migrations (tenants, categories, keywords, statements)
//! - Keyword matcher with prioritized literal and bounded regex rules
//! - Denormalization synchronizer for primary category matches
//! - OCR client for the statement extraction service
//! - Stage orchestrator with per-job retries, skips, and dead letters
//! - Keyword suggestions from unmatched transactions

pub mod categorize;
pub mod config;
pub mod db;
pub mod error;
pub mod hooks;
pub mod matcher;
pub mod models;
pub mod ocr;
pub mod pipeline;
pub mod suggestions;

/// Test utilities including a mock OCR server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use categorize::{AccountMatchSummary, Categorizer, ConfirmOutcome, MatchSummary};
pub use config::{Deadline, PipelineConfig, RetryPolicy};
pub use db::Database;
pub use error::{Error, Result};
pub use hooks::{CacheInvalidator, CountingInvalidator, LoggingInvalidator, NoopInvalidator};
pub use matcher::{MatchLimits, Matcher, TieBreak};
pub use ocr::{HttpOcrClient, MockOcrBackend, OcrBackend, OcrExtraction};
pub use pipeline::{
    InProcessQueue, Job, JobDispatcher, JobOutcome, Orchestrator, RecordingDispatcher,
    StatementStage,
};
