//! Mock OCR backend for testing

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{OcrBackend, OcrExtraction};
use crate::error::{Error, Result};

/// One scripted response
#[derive(Debug, Clone)]
pub enum MockOcrStep {
    /// Succeed with this extraction
    Extract(OcrExtraction),
    /// Transient failure (like a 503)
    Unavailable,
    /// Permanent failure (like a 422)
    Rejected(String),
    /// Sleep before succeeding with the default extraction (for timeouts)
    Delay(Duration),
}

/// Mock OCR backend
///
/// Plays scripted steps in order, then returns the default extraction for
/// every further call.
#[derive(Clone, Default)]
pub struct MockOcrBackend {
    default: OcrExtraction,
    script: Arc<Mutex<VecDeque<MockOcrStep>>>,
    calls: Arc<AtomicUsize>,
    endpoints: Arc<Mutex<Vec<String>>>,
}

impl MockOcrBackend {
    /// Always succeed with `extraction`
    pub fn new(extraction: OcrExtraction) -> Self {
        Self {
            default: extraction,
            ..Default::default()
        }
    }

    /// Play `steps` before falling back to the default extraction
    pub fn with_script(self, steps: impl IntoIterator<Item = MockOcrStep>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.extend(steps);
        }
        self
    }

    /// Number of `extract` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Endpoints requested, in call order
    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn next_step(&self) -> Option<MockOcrStep> {
        self.script.lock().ok().and_then(|mut s| s.pop_front())
    }
}

#[async_trait]
impl OcrBackend for MockOcrBackend {
    async fn extract(&self, endpoint: &str, _file_name: &str, _pdf: Vec<u8>) -> Result<OcrExtraction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut endpoints) = self.endpoints.lock() {
            endpoints.push(endpoint.to_string());
        }

        match self.next_step() {
            None => Ok(self.default.clone()),
            Some(MockOcrStep::Extract(extraction)) => Ok(extraction),
            Some(MockOcrStep::Unavailable) => {
                Err(Error::OcrUnavailable("mock OCR returned 503".into()))
            }
            Some(MockOcrStep::Rejected(reason)) => Err(Error::OcrRejected(reason)),
            Some(MockOcrStep::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(self.default.clone())
            }
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
