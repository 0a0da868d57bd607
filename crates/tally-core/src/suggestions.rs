//! Keyword suggestions from unmatched transactions
//!
//! Descriptions are normalized into tokens (uppercased, split on anything that
//! isn't alphanumeric, tokens with digits or fewer than 3 characters dropped,
//! banking noise words dropped). The first few remaining tokens form a cluster
//! key; clusters at or above the minimum size become literal keyword
//! suggestions. Nothing here writes to the database.

use std::collections::BTreeMap;

use crate::config::SuggestionConfig;
use crate::models::{KeywordSuggestion, StatementTransaction};

/// Words that say how money moved rather than where it went
const NOISE_WORDS: &[&str] = &[
    "TRF", "TRANSFER", "PAYMENT", "DEBIT", "CREDIT", "POS", "ATM", "QRIS", "EDC", "PEMBAYARAN",
    "PEMBELIAN", "TARIKAN", "TUNAI", "SETORAN", "BIAYA", "ADM", "KARTU", "BANK", "MBANKING",
    "IBANKING", "VIA", "DARI", "FROM", "THE", "AND", "FOR", "REF",
];

/// Tokens that identify the counterparty of a description
pub fn normalize_tokens(description: &str) -> Vec<String> {
    description
        .to_uppercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .filter(|t| !t.chars().any(|c| c.is_ascii_digit()))
        .filter(|t| !NOISE_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Cluster key: the first `max_tokens` normalized tokens
///
/// Returns `None` when nothing survives normalization.
pub fn cluster_key(description: &str, max_tokens: usize) -> Option<String> {
    let tokens = normalize_tokens(description);
    if tokens.is_empty() {
        return None;
    }
    Some(
        tokens
            .into_iter()
            .take(max_tokens)
            .collect::<Vec<_>>()
            .join(" "),
    )
}

/// Propose one literal keyword per cluster of similar descriptions
///
/// Ordered by frequency (desc), then keyword (asc).
pub fn suggest_keywords(
    transactions: &[StatementTransaction],
    config: &SuggestionConfig,
) -> Vec<KeywordSuggestion> {
    let mut clusters: BTreeMap<String, Vec<&StatementTransaction>> = BTreeMap::new();
    for tx in transactions {
        if let Some(key) = cluster_key(&tx.description, config.max_tokens) {
            clusters.entry(key).or_default().push(tx);
        }
    }

    let mut suggestions: Vec<KeywordSuggestion> = clusters
        .into_iter()
        .filter(|(_, members)| members.len() >= config.min_cluster_size.max(1))
        .map(|(key, members)| {
            let total: f64 = members.iter().map(|t| t.amount().abs()).sum();
            let average = total / members.len() as f64;
            KeywordSuggestion {
                keyword: matching_keyword(&key, &members),
                sample_description: members[0].description.clone(),
                frequency: members.len(),
                average_amount: (average * 100.0).round() / 100.0,
                transaction_ids: members.iter().map(|t| t.id).collect(),
            }
        })
        .collect();

    suggestions.sort_by(|a, b| {
        b.frequency
            .cmp(&a.frequency)
            .then_with(|| a.keyword.cmp(&b.keyword))
    });
    suggestions
}

/// Longest prefix of the key that every member contains as a literal
///
/// Noise words between key tokens would otherwise produce a keyword that
/// matches none of the descriptions it came from.
fn matching_keyword(key: &str, members: &[&StatementTransaction]) -> String {
    let tokens: Vec<&str> = key.split(' ').collect();
    let uppers: Vec<String> = members.iter().map(|t| t.description.to_uppercase()).collect();

    for n in (1..=tokens.len()).rev() {
        let candidate = tokens[..n].join(" ");
        if uppers.iter().all(|d| d.contains(&candidate)) {
            return candidate;
        }
    }
    tokens[0].to_string()
}
