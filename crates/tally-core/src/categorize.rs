//! Transaction categorization
//!
//! `Categorizer` ties the rule store, the matcher, and the denormalization
//! synchronizer together, and fires the post-mutation hook after every write
//! that actually changed a transaction.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{Deadline, MatchingConfig, PipelineConfig, SuggestionConfig};
use crate::db::{AccountAssignment, Database, TransactionQuery};
use crate::error::{Error, Result};
use crate::hooks::{CacheInvalidator, TransactionMutation};
use crate::matcher::{validate_rule, Matcher, Rule};
use crate::models::{
    ApplyOutcome, CategoryPath, Keyword, KeywordSuggestion, KeywordUpdate, MatchResult,
    NewAccountKeyword, NewKeyword, StatementTransaction,
};
use crate::suggestions;

/// Counts from one transaction matching pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchSummary {
    pub total: usize,
    pub matched: usize,
    pub unmatched: usize,
    /// Transactions whose assignment was written
    pub updated: usize,
    /// Manual or verified transactions left alone
    pub protected: usize,
    /// Rules disabled because they failed to compile
    pub disabled_rules: usize,
}

/// Counts from one account matching pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccountMatchSummary {
    pub total: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub changed: usize,
}

/// Result of confirming a suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfirmOutcome {
    pub keyword_id: i64,
    /// Previously unmatched transactions the new keyword now categorizes
    pub newly_matched: usize,
}

/// Categorizes transactions against a tenant's keyword rules
#[derive(Clone)]
pub struct Categorizer {
    db: Database,
    hooks: Arc<dyn CacheInvalidator>,
    matching: MatchingConfig,
    suggestions: SuggestionConfig,
}

impl Categorizer {
    pub fn new(db: Database, hooks: Arc<dyn CacheInvalidator>, config: &PipelineConfig) -> Self {
        Self {
            db,
            hooks,
            matching: config.matching.clone(),
            suggestions: config.suggestions,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn hooks(&self) -> &Arc<dyn CacheInvalidator> {
        &self.hooks
    }

    /// Compile the tenant's active category keywords
    pub fn compile_rules(&self, tenant_id: i64) -> Result<Matcher<CategoryPath>> {
        let keywords = self.db.list_active_keyword_rules(tenant_id)?;
        Ok(Matcher::compile(
            keywords.iter().map(Rule::from),
            self.matching.tie_break,
            &self.matching.limits,
        ))
    }

    /// Compile the tenant's active account keywords
    pub fn compile_account_rules(&self, tenant_id: i64) -> Result<Matcher<i64>> {
        let keywords = self.db.list_active_account_keywords(tenant_id)?;
        Ok(Matcher::compile(
            keywords.iter().map(Rule::from),
            self.matching.tie_break,
            &self.matching.limits,
        ))
    }

    /// Match an arbitrary description against the tenant's rules
    pub fn match_description(&self, tenant_id: i64, description: &str) -> Result<Option<MatchResult>> {
        let matcher = self.compile_rules(tenant_id)?;
        Ok(matcher.find(description).map(|m| m.into_result()))
    }

    /// Run transaction matching over one statement
    ///
    /// The rule set is compiled once for the pass. Each auto-matchable
    /// transaction gets its first matching rule applied as primary match, or
    /// its keyword match cleared when nothing matches. Re-running with the
    /// same rules writes nothing.
    ///
    /// The deadline is checked before each transaction. When it runs out the
    /// statement counters are refreshed over what was written so far and
    /// `Error::Timeout` is returned; nothing is written after that.
    pub fn categorize_statement(
        &self,
        tenant_id: i64,
        statement_id: i64,
        deadline: &Deadline,
    ) -> Result<MatchSummary> {
        let matcher = self.compile_rules(tenant_id)?;
        let transactions = self
            .db
            .list_transactions(tenant_id, &TransactionQuery::for_statement(statement_id))?;

        let mut summary = MatchSummary {
            total: transactions.len(),
            disabled_rules: matcher.disabled().len(),
            ..Default::default()
        };

        for tx in &transactions {
            if deadline.is_expired() {
                self.db.refresh_statement_counts(tenant_id, statement_id)?;
                warn!(
                    tenant_id,
                    statement_id,
                    updated = summary.updated,
                    remaining = transactions.len() - summary.matched - summary.unmatched,
                    "Transaction matching pass ran out of time"
                );
                return Err(deadline.elapsed_error());
            }
            if !tx.is_auto_matchable() {
                summary.protected += 1;
                if tx.sub_category_id.is_some() {
                    summary.matched += 1;
                } else {
                    summary.unmatched += 1;
                }
                continue;
            }

            let outcome = match matcher.find(&tx.description) {
                Some(m) => {
                    summary.matched += 1;
                    self.db
                        .apply_primary_match(tenant_id, tx.id, &m.into_result())?
                }
                None => {
                    summary.unmatched += 1;
                    self.db.clear_primary_match(tenant_id, tx.id)?
                }
            };

            if outcome.is_updated() {
                summary.updated += 1;
                self.notify_updated(tenant_id, tx.id);
            }
        }

        self.db.refresh_statement_counts(tenant_id, statement_id)?;

        info!(
            tenant_id,
            statement_id,
            matched = summary.matched,
            unmatched = summary.unmatched,
            updated = summary.updated,
            "Transaction matching pass finished"
        );
        Ok(summary)
    }

    /// Run account matching over one statement
    ///
    /// Assignments are computed in memory and written in one transaction,
    /// only if the deadline has not passed by then.
    pub fn match_statement_accounts(
        &self,
        tenant_id: i64,
        statement_id: i64,
        deadline: &Deadline,
    ) -> Result<AccountMatchSummary> {
        let matcher = self.compile_account_rules(tenant_id)?;
        let transactions = self
            .db
            .list_transactions(tenant_id, &TransactionQuery::for_statement(statement_id))?;

        let assignments: Vec<AccountAssignment> = transactions
            .iter()
            .filter_map(|tx| {
                matcher.find(&tx.description).map(|m| AccountAssignment {
                    transaction_id: tx.id,
                    account_id: m.target,
                    account_keyword_id: m.rule_id,
                    confidence_score: m.confidence,
                })
            })
            .collect();

        deadline.check()?;
        let changed = self
            .db
            .replace_account_matches(tenant_id, statement_id, &assignments)?;

        let summary = AccountMatchSummary {
            total: transactions.len(),
            matched: assignments.len(),
            unmatched: transactions.len() - assignments.len(),
            changed,
        };
        info!(
            tenant_id,
            statement_id,
            matched = summary.matched,
            changed = summary.changed,
            "Account matching pass finished"
        );
        Ok(summary)
    }

    // ========== Manual changes ==========

    /// Categorize a transaction by hand
    pub fn set_manual_category(
        &self,
        tenant_id: i64,
        transaction_id: i64,
        sub_category_id: i64,
    ) -> Result<ApplyOutcome> {
        let outcome = self
            .db
            .set_manual_category(tenant_id, transaction_id, sub_category_id)?;
        self.after_write(tenant_id, transaction_id, outcome)?;
        Ok(outcome)
    }

    /// Make a candidate match record primary
    pub fn promote_match(&self, tenant_id: i64, record_id: i64) -> Result<ApplyOutcome> {
        let (transaction_id, outcome) = self.db.promote_match(tenant_id, record_id)?;
        self.after_write(tenant_id, transaction_id, outcome)?;
        Ok(outcome)
    }

    /// Remove a keyword-sourced category from a transaction
    pub fn clear_category(&self, tenant_id: i64, transaction_id: i64) -> Result<ApplyOutcome> {
        let outcome = self.db.clear_primary_match(tenant_id, transaction_id)?;
        self.after_write(tenant_id, transaction_id, outcome)?;
        Ok(outcome)
    }

    /// Mark a transaction as confirmed by a person (or clear the flag)
    pub fn verify_transaction(
        &self,
        tenant_id: i64,
        transaction_id: i64,
        verified: bool,
    ) -> Result<ApplyOutcome> {
        self.db.require_transaction(tenant_id, transaction_id)?;
        let outcome = if self
            .db
            .set_transaction_verified(tenant_id, transaction_id, verified)?
        {
            ApplyOutcome::Updated
        } else {
            ApplyOutcome::Unchanged
        };
        if outcome.is_updated() {
            self.notify_updated(tenant_id, transaction_id);
        }
        Ok(outcome)
    }

    /// Repair every transaction whose denormalized fields drifted
    ///
    /// Returns the ids that were repaired.
    pub fn repair_drift(&self, tenant_id: i64) -> Result<Vec<i64>> {
        let drifted = self.db.find_denormalization_drift(tenant_id)?;
        let mut repaired = Vec::with_capacity(drifted.len());
        for transaction_id in drifted {
            let outcome = self.db.repair_denormalization(tenant_id, transaction_id)?;
            if outcome.is_updated() {
                self.notify_updated(tenant_id, transaction_id);
                repaired.push(transaction_id);
            }
        }
        if !repaired.is_empty() {
            info!(tenant_id, repaired = repaired.len(), "Repaired denormalization drift");
        }
        Ok(repaired)
    }

    fn after_write(&self, tenant_id: i64, transaction_id: i64, outcome: ApplyOutcome) -> Result<()> {
        if outcome.is_updated() {
            self.notify_updated(tenant_id, transaction_id);
            let tx = self.db.require_transaction(tenant_id, transaction_id)?;
            self.db.refresh_statement_counts(tenant_id, tx.statement_id)?;
        }
        Ok(())
    }

    fn notify_updated(&self, tenant_id: i64, transaction_id: i64) {
        self.hooks.after_mutation(TransactionMutation::Updated {
            tenant_id,
            transaction_id,
        });
    }

    // ========== Keyword management ==========

    /// Create a keyword after checking that it compiles under the limits
    pub fn create_keyword(&self, tenant_id: i64, new: &NewKeyword) -> Result<i64> {
        validate_rule(&new.keyword, new.is_regex, &self.matching.limits)?;
        let id = self.db.create_keyword(tenant_id, new)?;
        debug!(tenant_id, keyword_id = id, keyword = %new.keyword, "Keyword created");
        Ok(id)
    }

    /// Update a keyword, validating the resulting rule
    pub fn update_keyword(
        &self,
        tenant_id: i64,
        id: i64,
        update: &KeywordUpdate,
    ) -> Result<Keyword> {
        let existing = self
            .db
            .get_keyword(tenant_id, id)?
            .ok_or_else(|| Error::NotFound(format!("keyword {}", id)))?;
        let text = update.keyword.as_deref().unwrap_or(&existing.keyword);
        let is_regex = update.is_regex.unwrap_or(existing.is_regex);
        validate_rule(text, is_regex, &self.matching.limits)?;
        self.db.update_keyword(tenant_id, id, update)
    }

    /// Create an account keyword after validating it
    pub fn create_account_keyword(
        &self,
        tenant_id: i64,
        account_id: i64,
        new: &NewAccountKeyword,
    ) -> Result<i64> {
        validate_rule(&new.keyword, new.is_regex, &self.matching.limits)?;
        self.db.create_account_keyword(tenant_id, account_id, new)
    }

    // ========== Suggestions ==========

    /// Suggest keywords from unmatched transactions
    ///
    /// `statement_id = None` looks across all of the tenant's statements.
    pub fn suggest_keywords(
        &self,
        tenant_id: i64,
        statement_id: Option<i64>,
    ) -> Result<Vec<KeywordSuggestion>> {
        if let Some(id) = statement_id {
            self.db.require_statement(tenant_id, id)?;
        }
        let unmatched = self.db.list_auto_matchable_unmatched(tenant_id, statement_id)?;
        Ok(suggestions::suggest_keywords(&unmatched, &self.suggestions))
    }

    /// Create the keyword a person accepted and match it against the tenant's
    /// unmatched transactions
    pub fn confirm_suggestion(&self, tenant_id: i64, new: &NewKeyword) -> Result<ConfirmOutcome> {
        let keyword_id = self.create_keyword(tenant_id, new)?;
        let newly_matched = self.rematch_unmatched(tenant_id)?;
        info!(tenant_id, keyword_id, newly_matched, "Suggestion confirmed");
        Ok(ConfirmOutcome {
            keyword_id,
            newly_matched,
        })
    }

    /// Re-run matching over every unmatched, auto-matchable transaction of the
    /// tenant. Returns how many became matched.
    pub fn rematch_unmatched(&self, tenant_id: i64) -> Result<usize> {
        let matcher = self.compile_rules(tenant_id)?;
        let unmatched: Vec<StatementTransaction> =
            self.db.list_auto_matchable_unmatched(tenant_id, None)?;

        let mut newly_matched = 0;
        let mut statements = BTreeSet::new();
        for tx in &unmatched {
            if let Some(m) = matcher.find(&tx.description) {
                let outcome = self
                    .db
                    .apply_primary_match(tenant_id, tx.id, &m.into_result())?;
                if outcome.is_updated() {
                    newly_matched += 1;
                    statements.insert(tx.statement_id);
                    self.notify_updated(tenant_id, tx.id);
                }
            }
        }

        for statement_id in statements {
            self.db.refresh_statement_counts(tenant_id, statement_id)?;
        }
        Ok(newly_matched)
    }
}
