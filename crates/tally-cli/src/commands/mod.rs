//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Init and shared utilities (open_db, tenant resolution, pipeline wiring)
//! - `catalog` - Tenants, banks, categories, and accounts
//! - `keywords` - Keyword rule management
//! - `statements` - Statement upload, processing, and inspection
//! - `transactions` - Manual categorization and verification
//! - `review` - Suggestions, failed jobs, and drift repair
//! - `serve` - Web server command

pub mod catalog;
pub mod core;
pub mod keywords;
pub mod review;
pub mod serve;
pub mod statements;
pub mod transactions;

// Re-export command functions for main.rs
pub use catalog::*;
pub use core::*;
pub use keywords::*;
pub use review::*;
pub use serve::*;
pub use statements::*;
pub use transactions::*;

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
