//! HTTP request handlers organized by domain
//!
//! Each submodule contains handlers for a specific API area.

pub mod admin;
pub mod catalog;
pub mod keywords;
pub mod statements;
pub mod suggestions;
pub mod transactions;

// Re-export all handlers for use in router
pub use admin::*;
pub use catalog::*;
pub use keywords::*;
pub use statements::*;
pub use suggestions::*;
pub use transactions::*;
