//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `require_tenant` - Resolve the `--tenant` flag
//! - `Pipeline` - An orchestrator that runs jobs inline instead of on a queue
//! - `cmd_init` - Initialize the database

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;
use tally_core::{
    categorize::Categorizer,
    config::PipelineConfig,
    db::Database,
    hooks::LoggingInvalidator,
    ocr::{HttpOcrClient, OcrBackend},
    pipeline::{Job, JobOutcome, Orchestrator, RecordingDispatcher},
};

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path is not valid UTF-8")?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

/// Load the pipeline config (explicit path, override, or built-in defaults)
pub fn load_config(config_path: Option<&Path>) -> Result<PipelineConfig> {
    PipelineConfig::load(config_path).context("Failed to load pipeline config")
}

/// Resolve `--tenant`, checking that the tenant exists
pub fn require_tenant(db: &Database, tenant: Option<i64>) -> Result<i64> {
    let id = tenant.context("This command needs --tenant <ID> (see 'tally tenants list')")?;
    db.require_tenant(id)?;
    Ok(id)
}

/// The statement pipeline driven synchronously from the CLI
///
/// Jobs are recorded instead of queued, and `drain` runs them in order until
/// none are left.
pub struct Pipeline {
    pub orchestrator: Orchestrator,
    pub recorder: Arc<RecordingDispatcher>,
}

impl Pipeline {
    pub fn new(db: Database, config: PipelineConfig, ocr: Arc<dyn OcrBackend>) -> Self {
        let recorder = Arc::new(RecordingDispatcher::new());
        let categorizer = Categorizer::new(db, Arc::new(LoggingInvalidator), &config);
        let orchestrator = Orchestrator::new(categorizer, ocr, recorder.clone(), config);
        Self {
            orchestrator,
            recorder,
        }
    }

    /// Pipeline that talks to the configured OCR service
    pub fn open(db: Database, config: PipelineConfig) -> Result<Self> {
        let ocr = HttpOcrClient::from_config(&config.ocr).context("Failed to create OCR client")?;
        Ok(Self::new(db, config, Arc::new(ocr)))
    }

    pub fn db(&self) -> &Database {
        self.orchestrator.db()
    }

    pub fn categorizer(&self) -> &Categorizer {
        self.orchestrator.categorizer()
    }

    /// Run recorded jobs (and the jobs they dispatch) until none are left
    pub async fn drain(&self) -> Result<Vec<(Job, JobOutcome)>> {
        let ran = self.orchestrator.run_pending(&self.recorder).await?;
        debug!(jobs = ran.len(), "Pipeline drained");
        Ok(ran)
    }
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let db = open_db(db_path, no_encrypt)?;
    let banks = db.list_banks()?;
    println!("   Schema ready ({} bank(s) registered)", banks.len());

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Create a tenant: tally tenants add \"Acme\"");
    println!("  2. Register a bank: tally banks add bca \"Bank Central Asia\"");
    println!("  3. Upload a statement: tally --tenant 1 statements upload --file march.pdf --bank bca");

    Ok(())
}
