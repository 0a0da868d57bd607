//! HTTP OCR client

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{OcrBackend, OcrExtraction};
use crate::config::OcrConfig;
use crate::error::{Error, Result};
use crate::models::NewStatementTransaction;

/// Client for the OCR HTTP service
///
/// Configuration (see `config/pipeline.toml`):
/// ```toml
/// [ocr]
/// base_url = "http://localhost:8001"
/// timeout_secs = 120
/// ```
#[derive(Clone)]
pub struct HttpOcrClient {
    http_client: Client,
    base_url: String,
}

impl HttpOcrClient {
    /// Create a client with a per-request timeout
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &OcrConfig) -> Result<Self> {
        Self::new(&config.base_url, config.timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl OcrBackend for HttpOcrClient {
    async fn extract(&self, endpoint: &str, file_name: &str, pdf: Vec<u8>) -> Result<OcrExtraction> {
        let url = format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'));
        debug!(%url, bytes = pdf.len(), "Submitting statement to OCR");

        let part = Part::bytes(pdf)
            .file_name(file_name.to_string())
            .mime_str("application/pdf")?;
        let form = Form::new().part("file", part);

        let response = self.http_client.post(&url).multipart(form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::OcrUnavailable(format!(
                "OCR service returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(Error::OcrRejected(format!(
                "OCR service returned {}: {}",
                status,
                error_message(&body).unwrap_or_else(|| truncate(&body, 200))
            )));
        }

        parse_ocr_response(&body)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

// ========== Wire format ==========

#[derive(Debug, Deserialize)]
struct OcrResponse {
    success: bool,
    #[serde(default)]
    data: Option<OcrData>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OcrData {
    #[serde(default)]
    transactions: Vec<OcrLine>,
    #[serde(default)]
    period_start: Option<String>,
    #[serde(default)]
    period_end: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OcrLine {
    date: String,
    description: String,
    #[serde(default)]
    debit: Option<f64>,
    #[serde(default)]
    credit: Option<f64>,
    #[serde(default)]
    balance: Option<f64>,
}

/// Parse a successful-status OCR body
///
/// `success: false` and unparseable dates are permanent failures.
pub fn parse_ocr_response(body: &str) -> Result<OcrExtraction> {
    let response: OcrResponse = serde_json::from_str(body)
        .map_err(|e| Error::OcrRejected(format!("Malformed OCR response: {}", e)))?;

    if !response.success {
        let reason = response
            .message
            .or(response.error)
            .unwrap_or_else(|| "OCR reported failure".to_string());
        return Err(Error::OcrRejected(reason));
    }

    let data = response
        .data
        .ok_or_else(|| Error::OcrRejected("OCR response has no data".into()))?;

    let transactions = data
        .transactions
        .into_iter()
        .map(|line| {
            let date = parse_ocr_date(&line.date).ok_or_else(|| {
                Error::OcrRejected(format!("Unparseable transaction date '{}'", line.date))
            })?;
            Ok(NewStatementTransaction {
                date,
                description: line.description,
                debit: line.debit.unwrap_or(0.0).abs(),
                credit: line.credit.unwrap_or(0.0).abs(),
                balance: line.balance,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(OcrExtraction {
        transactions,
        period_start: data.period_start.as_deref().and_then(parse_ocr_date),
        period_end: data.period_end.as_deref().and_then(parse_ocr_date),
    })
}

/// Accepts ISO dates and the day-first format banks print
fn parse_ocr_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

fn error_message(body: &str) -> Option<String> {
    let response: OcrResponse = serde_json::from_str(body).ok()?;
    response.message.or(response.error)
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
