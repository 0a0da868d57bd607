//! Pipeline configuration
//!
//! Loaded from TOML with this precedence:
//! 1. An explicit path (`--config`)
//! 2. The override at `~/.local/share/tally/config/pipeline.toml`
//! 3. The embedded default (`config/pipeline.toml`)
//!
//! Environment variables then override individual values:
//! `TALLY_OCR_URL`, `TALLY_OCR_TIMEOUT_SECS`, `TALLY_OCR_MAX_ATTEMPTS`,
//! `TALLY_STORAGE_DIR`, `TALLY_STAGE_DELAY_MS`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::matcher::{MatchLimits, TieBreak};
use crate::models::{Bank, JobKind};

/// Embedded default config
const DEFAULT_CONFIG: &str = include_str!("../../../config/pipeline.toml");

/// Retry budget for one kind of job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub delay: Duration,
    /// Per-attempt timeout
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Deadline for an attempt starting now
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.timeout)
    }
}

/// Time budget for one attempt
///
/// Blocking passes cannot be cancelled from outside, so they poll
/// `check` between units of work and stop on their own.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// `Error::Timeout` once the budget is spent
    pub fn check(&self) -> Result<()> {
        if self.is_expired() {
            Err(Error::Timeout(self.budget))
        } else {
            Ok(())
        }
    }

    /// Timeout error for this budget
    pub fn elapsed_error(&self) -> Error {
        Error::Timeout(self.budget)
    }
}

#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Bank code -> endpoint path
    pub endpoints: HashMap<String, String>,
}

impl OcrConfig {
    /// Endpoint path for a bank: its own override, then the mapping, then its code
    pub fn endpoint_for(&self, bank: &Bank) -> String {
        bank.ocr_endpoint
            .clone()
            .or_else(|| self.endpoints.get(&bank.code).cloned())
            .unwrap_or_else(|| bank.code.clone())
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            timeout: Duration::from_secs(120),
            max_attempts: 3,
            retry_delay: Duration::from_millis(2000),
            endpoints: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    pub tie_break: TieBreak,
    /// Pause before the next stage is dispatched
    pub stage_delay: Duration,
    pub limits: MatchLimits,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            timeout: Duration::from_secs(60),
            tie_break: TieBreak::InsertionOrder,
            stage_delay: Duration::from_millis(500),
            limits: MatchLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuggestionConfig {
    /// Smallest cluster that produces a suggestion
    pub min_cluster_size: usize,
    /// Leading tokens that form the cluster key
    pub max_tokens: usize,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 2,
            max_tokens: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub ocr_workers: usize,
    pub matching_workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            ocr_workers: 2,
            matching_workers: 4,
        }
    }
}

/// Full pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub ocr: OcrConfig,
    pub matching: MatchingConfig,
    pub suggestions: SuggestionConfig,
    pub queue: QueueConfig,
    pub storage_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ocr: OcrConfig::default(),
            matching: MatchingConfig::default(),
            suggestions: SuggestionConfig::default(),
            queue: QueueConfig::default(),
            storage_dir: default_storage_dir(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration (explicit path, then override, then embedded default)
    /// and apply environment overrides
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let content = match explicit {
            Some(path) => fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("Failed to read {}: {}", path.display(), e))
            })?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => {
                    debug!(path = %path.display(), "Using config override");
                    fs::read_to_string(&path).map_err(|e| {
                        Error::Config(format!("Failed to read {}: {}", path.display(), e))
                    })?
                }
                None => DEFAULT_CONFIG.to_string(),
            },
        };

        let mut config = Self::from_toml(&content)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid config TOML: {}", e)))?;

        let mut config = Self::default();

        if let Some(dir) = raw.storage_dir {
            config.storage_dir = PathBuf::from(dir);
        }

        if let Some(ocr) = raw.ocr {
            if let Some(url) = ocr.base_url {
                config.ocr.base_url = url;
            }
            if let Some(secs) = ocr.timeout_secs {
                config.ocr.timeout = Duration::from_secs(secs);
            }
            if let Some(n) = ocr.max_attempts {
                config.ocr.max_attempts = n;
            }
            if let Some(ms) = ocr.retry_delay_ms {
                config.ocr.retry_delay = Duration::from_millis(ms);
            }
            if let Some(endpoints) = ocr.endpoints {
                config.ocr.endpoints = endpoints
                    .into_iter()
                    .map(|(code, path)| (code.to_lowercase(), path))
                    .collect();
            }
        }

        if let Some(matching) = raw.matching {
            if let Some(n) = matching.max_attempts {
                config.matching.max_attempts = n;
            }
            if let Some(ms) = matching.retry_delay_ms {
                config.matching.retry_delay = Duration::from_millis(ms);
            }
            if let Some(secs) = matching.timeout_secs {
                config.matching.timeout = Duration::from_secs(secs);
            }
            if let Some(tie_break) = matching.tie_break {
                config.matching.tie_break = tie_break.parse().map_err(Error::Config)?;
            }
            if let Some(ms) = matching.stage_delay_ms {
                config.matching.stage_delay = Duration::from_millis(ms);
            }
            if let Some(len) = matching.max_pattern_len {
                config.matching.limits.max_pattern_len = len;
            }
            if let Some(size) = matching.regex_size_limit {
                config.matching.limits.regex_size_limit = size;
            }
        }

        if let Some(suggestions) = raw.suggestions {
            if let Some(n) = suggestions.min_cluster_size {
                config.suggestions.min_cluster_size = n;
            }
            if let Some(n) = suggestions.max_tokens {
                config.suggestions.max_tokens = n;
            }
        }

        if let Some(queue) = raw.queue {
            if let Some(n) = queue.ocr_workers {
                config.queue.ocr_workers = n;
            }
            if let Some(n) = queue.matching_workers {
                config.queue.matching_workers = n;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply `TALLY_*` overrides from a variable lookup
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("TALLY_OCR_URL") {
            self.ocr.base_url = url;
        }
        if let Some(v) = lookup("TALLY_OCR_TIMEOUT_SECS") {
            match v.parse::<u64>() {
                Ok(secs) if secs > 0 => self.ocr.timeout = Duration::from_secs(secs),
                _ => warn!(value = %v, "Ignoring invalid TALLY_OCR_TIMEOUT_SECS"),
            }
        }
        if let Some(v) = lookup("TALLY_OCR_MAX_ATTEMPTS") {
            match v.parse::<u32>() {
                Ok(n) if n > 0 => self.ocr.max_attempts = n,
                _ => warn!(value = %v, "Ignoring invalid TALLY_OCR_MAX_ATTEMPTS"),
            }
        }
        if let Some(dir) = lookup("TALLY_STORAGE_DIR") {
            self.storage_dir = PathBuf::from(dir);
        }
        if let Some(v) = lookup("TALLY_STAGE_DELAY_MS") {
            match v.parse() {
                Ok(ms) => self.matching.stage_delay = Duration::from_millis(ms),
                Err(_) => warn!(value = %v, "Ignoring invalid TALLY_STAGE_DELAY_MS"),
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.ocr.max_attempts == 0 || self.matching.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".into()));
        }
        if self.ocr.timeout.is_zero() || self.matching.timeout.is_zero() {
            return Err(Error::Config("timeout_secs must be at least 1".into()));
        }
        if self.queue.ocr_workers == 0 || self.queue.matching_workers == 0 {
            return Err(Error::Config("Each queue lane needs at least one worker".into()));
        }
        if self.suggestions.max_tokens == 0 {
            return Err(Error::Config("suggestions.max_tokens must be at least 1".into()));
        }
        Ok(())
    }

    /// Retry budget for a job kind
    pub fn retry_policy(&self, kind: JobKind) -> RetryPolicy {
        match kind {
            JobKind::ProcessOcr => RetryPolicy {
                max_attempts: self.ocr.max_attempts,
                delay: self.ocr.retry_delay,
                timeout: self.ocr.timeout,
            },
            JobKind::MatchTransactions | JobKind::MatchAccounts => RetryPolicy {
                max_attempts: self.matching.max_attempts,
                delay: self.matching.retry_delay,
                timeout: self.matching.timeout,
            },
        }
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("tally").join("config").join("pipeline.toml"))
}

/// Default statement storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tally").join("statements"))
        .unwrap_or_else(|| PathBuf::from("statements"))
}

// ========== Raw TOML ==========

#[derive(Debug, Deserialize)]
struct RawConfig {
    storage_dir: Option<String>,
    ocr: Option<RawOcr>,
    matching: Option<RawMatching>,
    suggestions: Option<RawSuggestions>,
    queue: Option<RawQueue>,
}

#[derive(Debug, Deserialize)]
struct RawOcr {
    base_url: Option<String>,
    timeout_secs: Option<u64>,
    max_attempts: Option<u32>,
    retry_delay_ms: Option<u64>,
    endpoints: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct RawMatching {
    max_attempts: Option<u32>,
    retry_delay_ms: Option<u64>,
    timeout_secs: Option<u64>,
    tie_break: Option<String>,
    stage_delay_ms: Option<u64>,
    max_pattern_len: Option<usize>,
    regex_size_limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawSuggestions {
    min_cluster_size: Option<usize>,
    max_tokens: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawQueue {
    ocr_workers: Option<usize>,
    matching_workers: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_default_parses() {
        let config = PipelineConfig::from_toml(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.ocr.max_attempts, 3);
        assert_eq!(config.matching.max_attempts, 3);
        assert_eq!(config.matching.tie_break, TieBreak::InsertionOrder);
        assert_eq!(config.ocr.endpoints.get("bca").unwrap(), "bca/extract");
        assert_eq!(config.suggestions.max_tokens, 3);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
            [matching]
            tie_break = "specificity"
            "#,
        )
        .unwrap();
        assert_eq!(config.matching.tie_break, TieBreak::Specificity);
        assert_eq!(config.ocr.base_url, "http://localhost:8001");
        assert_eq!(config.queue.matching_workers, 4);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(PipelineConfig::from_toml("[matching]\ntie_break = \"random\"").is_err());
        assert!(PipelineConfig::from_toml("[ocr]\nmax_attempts = 0").is_err());
        assert!(PipelineConfig::from_toml("not toml = = =").is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = PipelineConfig::from_toml("[matching]\ntimeout_secs = 0").unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));
        assert!(PipelineConfig::from_toml("[ocr]\ntimeout_secs = 0").is_err());
    }

    #[test]
    fn test_deadline_expires() {
        let open = Deadline::after(Duration::from_secs(60));
        assert!(open.check().is_ok());

        let spent = Deadline::after(Duration::ZERO);
        assert!(spent.is_expired());
        match spent.check() {
            Err(Error::Timeout(budget)) => assert_eq!(budget, Duration::ZERO),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_env_overrides() {
        let mut config = PipelineConfig::default();
        config.apply_env(|key| match key {
            "TALLY_OCR_URL" => Some("http://ocr:9000".to_string()),
            "TALLY_OCR_MAX_ATTEMPTS" => Some("5".to_string()),
            "TALLY_STAGE_DELAY_MS" => Some("nope".to_string()),
            "TALLY_STORAGE_DIR" => Some("/srv/statements".to_string()),
            _ => None,
        });
        assert_eq!(config.ocr.base_url, "http://ocr:9000");
        assert_eq!(config.ocr.max_attempts, 5);
        assert_eq!(config.storage_dir, PathBuf::from("/srv/statements"));
        // Invalid value left the default in place
        assert_eq!(config.matching.stage_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_endpoint_resolution() {
        let config = PipelineConfig::from_toml(DEFAULT_CONFIG).unwrap();
        let mut bank = Bank {
            id: 1,
            code: "bca".to_string(),
            name: "BCA".to_string(),
            ocr_endpoint: None,
            created_at: chrono::Utc::now(),
        };
        assert_eq!(config.ocr.endpoint_for(&bank), "bca/extract");

        bank.ocr_endpoint = Some("v2/bca".to_string());
        assert_eq!(config.ocr.endpoint_for(&bank), "v2/bca");

        bank.code = "jago".to_string();
        bank.ocr_endpoint = None;
        assert_eq!(config.ocr.endpoint_for(&bank), "jago");
    }

    #[test]
    fn test_retry_policy_per_kind() {
        let config = PipelineConfig::default();
        let ocr = config.retry_policy(JobKind::ProcessOcr);
        assert_eq!(ocr.timeout, Duration::from_secs(120));
        let matching = config.retry_policy(JobKind::MatchAccounts);
        assert_eq!(matching.max_attempts, 3);
        assert_eq!(matching.delay, Duration::from_millis(1000));
    }
}
