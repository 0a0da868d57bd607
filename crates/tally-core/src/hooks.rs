//! Post-mutation hooks
//!
//! Components that create, update, or delete transactions call
//! `CacheInvalidator::after_mutation` explicitly once the write has committed.
//! Nothing is registered globally; the invalidator is passed in by whoever
//! builds the component. Invalidation must be idempotent and order-free.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use tracing::debug;

/// What changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransactionMutation {
    /// Transactions were extracted for a statement
    Created {
        tenant_id: i64,
        statement_id: i64,
        count: usize,
    },
    /// A transaction's category assignment or flags changed
    Updated { tenant_id: i64, transaction_id: i64 },
    /// All transactions of a statement were removed
    Deleted { tenant_id: i64, statement_id: i64 },
}

impl TransactionMutation {
    pub fn tenant_id(&self) -> i64 {
        match self {
            Self::Created { tenant_id, .. }
            | Self::Updated { tenant_id, .. }
            | Self::Deleted { tenant_id, .. } => *tenant_id,
        }
    }
}

/// Cache collaborator: invalidated, never read
pub trait CacheInvalidator: Send + Sync {
    fn after_mutation(&self, mutation: TransactionMutation);
}

/// Does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInvalidator;

impl CacheInvalidator for NoopInvalidator {
    fn after_mutation(&self, _mutation: TransactionMutation) {}
}

/// Logs each invalidation at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingInvalidator;

impl CacheInvalidator for LoggingInvalidator {
    fn after_mutation(&self, mutation: TransactionMutation) {
        debug!(tenant_id = mutation.tenant_id(), ?mutation, "Cache invalidated");
    }
}

/// Records every call (for tests)
#[derive(Debug, Default)]
pub struct CountingInvalidator {
    calls: AtomicUsize,
    seen: Mutex<Vec<TransactionMutation>>,
}

impl CountingInvalidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn mutations(&self) -> Vec<TransactionMutation> {
        self.seen.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl CacheInvalidator for CountingInvalidator {
    fn after_mutation(&self, mutation: TransactionMutation) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(mutation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting_invalidator_records_calls() {
        let hooks = CountingInvalidator::new();
        hooks.after_mutation(TransactionMutation::Updated {
            tenant_id: 1,
            transaction_id: 7,
        });
        hooks.after_mutation(TransactionMutation::Deleted {
            tenant_id: 1,
            statement_id: 3,
        });

        assert_eq!(hooks.count(), 2);
        assert_eq!(hooks.mutations()[1].tenant_id(), 1);
    }
}
