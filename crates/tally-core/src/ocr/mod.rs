//! OCR collaborator
//!
//! The OCR service is an opaque HTTP service that takes a statement PDF and
//! returns structured transaction lines. This module provides:
//!
//! - `OcrBackend` trait: the interface the pipeline talks to
//! - `HttpOcrClient`: multipart upload to `{base_url}/{bank endpoint}`
//! - `MockOcrBackend`: scripted responses for tests
//!
//! Errors follow the retry taxonomy: timeouts, connection failures, and 5xx
//! responses surface as transient (`OcrUnavailable`, `Http`, `Timeout`);
//! 4xx responses and `success: false` payloads as permanent (`OcrRejected`).

mod http;
mod mock;

pub use http::{parse_ocr_response, HttpOcrClient};
pub use mock::{MockOcrBackend, MockOcrStep};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::NewStatementTransaction;

/// What the OCR service extracted from one statement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrExtraction {
    pub transactions: Vec<NewStatementTransaction>,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
}

/// Interface to an OCR service
#[async_trait]
pub trait OcrBackend: Send + Sync {
    /// Extract transactions from a statement PDF
    ///
    /// `endpoint` is the bank-specific path under the service's base URL.
    async fn extract(&self, endpoint: &str, file_name: &str, pdf: Vec<u8>) -> Result<OcrExtraction>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}
