//! Server command implementation

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tally_core::{
    categorize::Categorizer,
    hooks::LoggingInvalidator,
    ocr::HttpOcrClient,
    pipeline::{InProcessQueue, Orchestrator},
};

use super::{load_config, open_db};

pub async fn cmd_serve(
    db_path: &Path,
    no_encrypt: bool,
    config_path: Option<&Path>,
    host: &str,
    port: u16,
    allowed_origins: Vec<String>,
) -> Result<()> {
    let config = load_config(config_path)?;

    println!("🚀 Starting Tally web server...");
    println!("   Database: {}", db_path.display());
    println!("   Listening: http://{}:{}", host, port);
    println!("   OCR service: {}", config.ocr.base_url);
    println!(
        "   OCR retries: {} attempt(s), {:?} apart, {:?} timeout",
        config.ocr.max_attempts, config.ocr.retry_delay, config.ocr.timeout
    );
    println!("   Storage: {}", config.storage_dir.display());
    if allowed_origins.is_empty() {
        println!("   CORS: same-origin only");
    } else {
        println!("   CORS origins: {}", allowed_origins.join(", "));
    }
    println!();

    let db = open_db(db_path, no_encrypt)?;
    let ocr = HttpOcrClient::from_config(&config.ocr).context("Failed to create OCR client")?;
    let (queue, receivers) = InProcessQueue::new();
    let categorizer = Categorizer::new(db, Arc::new(LoggingInvalidator), &config);
    let orchestrator = Orchestrator::new(categorizer, Arc::new(ocr), Arc::new(queue), config);

    let server_config = tally_server::ServerConfig { allowed_origins };
    tally_server::serve(orchestrator, receivers, host, port, server_config).await
}
