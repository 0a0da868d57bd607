//! Keyword matcher engine
//!
//! Compiles a prioritized rule set once and evaluates descriptions against it
//! with a first-match-wins policy: rules are ordered by priority (highest
//! first) and the tie-break policy, and the first rule that matches decides the
//! result. There is no best-score search.
//!
//! The matcher is generic over the rule target, so the same engine serves
//! category keywords (`Matcher<CategoryPath>`) and account keywords
//! (`Matcher<i64>`, the account id).
//!
//! Regex rules are untrusted input. They are compiled with size limits on the
//! program and the lazy DFA, and patterns longer than `max_pattern_len` are
//! rejected. The `regex` crate matches in linear time, so evaluation is bounded
//! by the description length. A rule that fails to compile is disabled with a
//! single warning and never matches.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::models::{AccountKeyword, CategoryPath, KeywordWithPath, MatchResult};

/// Ordering of rules that share a priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// The rule created first wins (lower id)
    #[default]
    InsertionOrder,
    /// Longer literal keywords win, then insertion order; regex rules rank
    /// after literals
    Specificity,
}

impl TieBreak {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsertionOrder => "insertion_order",
            Self::Specificity => "specificity",
        }
    }
}

impl std::str::FromStr for TieBreak {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "insertion_order" | "insertion" => Ok(Self::InsertionOrder),
            "specificity" => Ok(Self::Specificity),
            _ => Err(format!("Unknown tie-break policy: {}", s)),
        }
    }
}

/// Bounds applied when compiling regex rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchLimits {
    /// Maximum pattern length in characters
    pub max_pattern_len: usize,
    /// Size limit in bytes for the compiled program and the lazy DFA cache
    pub regex_size_limit: usize,
}

impl Default for MatchLimits {
    fn default() -> Self {
        Self {
            max_pattern_len: 256,
            regex_size_limit: 1 << 20,
        }
    }
}

/// One rule as fed to the matcher
#[derive(Debug, Clone)]
pub struct Rule<T> {
    pub id: i64,
    pub text: String,
    pub is_regex: bool,
    pub case_sensitive: bool,
    pub priority: i32,
    pub is_active: bool,
    pub target: T,
}

impl From<&KeywordWithPath> for Rule<CategoryPath> {
    fn from(k: &KeywordWithPath) -> Self {
        Rule {
            id: k.keyword.id,
            text: k.keyword.keyword.clone(),
            is_regex: k.keyword.is_regex,
            case_sensitive: k.keyword.case_sensitive,
            priority: k.keyword.priority,
            is_active: k.keyword.is_active,
            target: k.path(),
        }
    }
}

impl From<&AccountKeyword> for Rule<i64> {
    fn from(k: &AccountKeyword) -> Self {
        Rule {
            id: k.id,
            text: k.keyword.clone(),
            is_regex: k.is_regex,
            case_sensitive: k.case_sensitive,
            priority: k.priority,
            is_active: k.is_active,
            target: k.account_id,
        }
    }
}

/// Result of a successful match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match<T> {
    pub rule_id: i64,
    /// 0-100
    pub confidence: i32,
    pub target: T,
}

impl Match<CategoryPath> {
    pub fn into_result(self) -> MatchResult {
        MatchResult {
            keyword_id: self.rule_id,
            sub_category_id: self.target.sub_category_id,
            category_id: self.target.category_id,
            type_id: self.target.type_id,
            confidence_score: self.confidence,
        }
    }
}

#[derive(Debug)]
enum Pattern {
    Literal {
        text: String,
        /// Uppercased copy for case-insensitive rules
        folded: Option<String>,
    },
    Regex(Regex),
}

#[derive(Debug)]
struct CompiledRule<T> {
    id: i64,
    pattern: Pattern,
    target: T,
}

/// A rule that was disabled at compile time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisabledRule {
    pub id: i64,
    pub reason: String,
}

/// Compiled, ordered rule set
#[derive(Debug)]
pub struct Matcher<T> {
    rules: Vec<CompiledRule<T>>,
    disabled: Vec<DisabledRule>,
}

impl<T: Copy> Matcher<T> {
    /// Compile a rule set
    ///
    /// Inactive rules are dropped. Invalid rules (empty text, bad or oversized
    /// regex) are disabled with one warning each and listed by `disabled()`.
    pub fn compile(
        rules: impl IntoIterator<Item = Rule<T>>,
        tie_break: TieBreak,
        limits: &MatchLimits,
    ) -> Self {
        let mut active: Vec<Rule<T>> = rules.into_iter().filter(|r| r.is_active).collect();

        // Stable sort on a total key keeps the order deterministic
        match tie_break {
            TieBreak::InsertionOrder => {
                active.sort_by_key(|r| (std::cmp::Reverse(r.priority), r.id));
            }
            TieBreak::Specificity => {
                active.sort_by_key(|r| {
                    let literal_len = if r.is_regex {
                        0
                    } else {
                        r.text.trim().chars().count()
                    };
                    (
                        std::cmp::Reverse(r.priority),
                        std::cmp::Reverse(literal_len),
                        r.id,
                    )
                });
            }
        }

        let mut compiled = Vec::with_capacity(active.len());
        let mut disabled = Vec::new();

        for rule in active {
            match compile_pattern(&rule.text, rule.is_regex, rule.case_sensitive, limits) {
                Ok(pattern) => compiled.push(CompiledRule {
                    id: rule.id,
                    pattern,
                    target: rule.target,
                }),
                Err(e) => {
                    warn!(rule_id = rule.id, error = %e, "Keyword rule disabled");
                    disabled.push(DisabledRule {
                        id: rule.id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Self {
            rules: compiled,
            disabled,
        }
    }

    /// Evaluate a description; the first matching rule wins
    pub fn find(&self, description: &str) -> Option<Match<T>> {
        let trimmed = description.trim();
        if trimmed.is_empty() {
            return None;
        }
        let desc_chars = trimmed.chars().count();
        let mut desc_upper: Option<String> = None;

        for rule in &self.rules {
            let confidence = match &rule.pattern {
                Pattern::Regex(re) => re.is_match(trimmed).then_some(100),
                Pattern::Literal { text, folded } => {
                    let hit = match folded {
                        None => trimmed.contains(text.as_str()).then(|| trimmed == text.as_str()),
                        Some(needle) => {
                            let upper = desc_upper.get_or_insert_with(|| trimmed.to_uppercase());
                            upper.contains(needle.as_str()).then(|| upper.as_str() == needle.as_str())
                        }
                    };
                    hit.map(|whole| {
                        if whole {
                            100
                        } else {
                            literal_confidence(text.chars().count(), desc_chars)
                        }
                    })
                }
            };

            if let Some(confidence) = confidence {
                return Some(Match {
                    rule_id: rule.id,
                    confidence,
                    target: rule.target,
                });
            }
        }

        None
    }

    /// Number of usable (active, valid) rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules disabled at compile time
    pub fn disabled(&self) -> &[DisabledRule] {
        &self.disabled
    }
}

/// `round(100 * keyword / description)` clamped to 1..=99
fn literal_confidence(keyword_chars: usize, description_chars: usize) -> i32 {
    if description_chars == 0 {
        return 1;
    }
    let ratio = (100.0 * keyword_chars as f64 / description_chars as f64).round() as i32;
    ratio.clamp(1, 99)
}

/// Check that a rule would compile under `limits`
///
/// Used to reject bad rules when they are created, rather than at match time.
pub fn validate_rule(text: &str, is_regex: bool, limits: &MatchLimits) -> Result<()> {
    compile_pattern(text, is_regex, true, limits).map(|_| ())
}

fn compile_pattern(
    text: &str,
    is_regex: bool,
    case_sensitive: bool,
    limits: &MatchLimits,
) -> Result<Pattern> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::InvalidKeyword("Keyword text is empty".into()));
    }

    if !is_regex {
        return Ok(Pattern::Literal {
            text: text.to_string(),
            folded: (!case_sensitive).then(|| text.to_uppercase()),
        });
    }

    if text.chars().count() > limits.max_pattern_len {
        return Err(Error::InvalidKeyword(format!(
            "Regex longer than {} characters",
            limits.max_pattern_len
        )));
    }

    let (pattern, flags) = split_delimited(text);
    let mut builder = RegexBuilder::new(pattern);
    builder
        .case_insensitive(!case_sensitive)
        .size_limit(limits.regex_size_limit)
        .dfa_size_limit(limits.regex_size_limit);

    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            // Unicode is always on
            'u' => {}
            other => {
                return Err(Error::InvalidKeyword(format!(
                    "Unsupported regex flag '{}'",
                    other
                )))
            }
        }
    }

    let re = builder
        .build()
        .map_err(|e| Error::InvalidKeyword(format!("Invalid regex: {}", e)))?;
    Ok(Pattern::Regex(re))
}

/// Split `/pattern/flags` into its parts; anything else is a bare pattern
fn split_delimited(text: &str) -> (&str, &str) {
    if let Some(rest) = text.strip_prefix('/') {
        if let Some(end) = rest.rfind('/') {
            let flags = &rest[end + 1..];
            if flags.chars().all(|c| c.is_ascii_alphabetic()) {
                return (&rest[..end], flags);
            }
        }
    }
    (text, "")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: i64, text: &str, priority: i32) -> Rule<i64> {
        Rule {
            id,
            text: text.to_string(),
            is_regex: false,
            case_sensitive: false,
            priority,
            is_active: true,
            target: id * 10,
        }
    }

    fn regex_rule(id: i64, text: &str, case_sensitive: bool) -> Rule<i64> {
        Rule {
            is_regex: true,
            case_sensitive,
            ..rule(id, text, 0)
        }
    }

    fn matcher(rules: Vec<Rule<i64>>) -> Matcher<i64> {
        Matcher::compile(rules, TieBreak::InsertionOrder, &MatchLimits::default())
    }

    #[test]
    fn test_equal_priority_earlier_rule_wins() {
        let m = matcher(vec![rule(1, "GOJEK", 5), rule(2, "GOJEK DRIVER", 5)]);
        let hit = m.find("PAYMENT GOJEK DRIVER 123").unwrap();
        assert_eq!(hit.rule_id, 1);
        assert_eq!(hit.target, 10);
    }

    #[test]
    fn test_rule_order_in_input_does_not_matter() {
        let m = matcher(vec![rule(2, "GOJEK DRIVER", 5), rule(1, "GOJEK", 5)]);
        assert_eq!(m.find("PAYMENT GOJEK DRIVER 123").unwrap().rule_id, 1);
    }

    #[test]
    fn test_specificity_prefers_longer_literal() {
        let m = Matcher::compile(
            vec![rule(1, "GOJEK", 5), rule(2, "GOJEK DRIVER", 5)],
            TieBreak::Specificity,
            &MatchLimits::default(),
        );
        assert_eq!(m.find("PAYMENT GOJEK DRIVER 123").unwrap().rule_id, 2);
    }

    #[test]
    fn test_higher_priority_wins_over_earlier_rule() {
        let m = matcher(vec![rule(1, "GOJEK", 1), rule(2, "DRIVER", 9)]);
        assert_eq!(m.find("PAYMENT GOJEK DRIVER 123").unwrap().rule_id, 2);
    }

    #[test]
    fn test_regex_match_confidence_100() {
        let m = matcher(vec![regex_rule(1, r"/^TRX-\d+$/", true)]);
        let hit = m.find("TRX-998").unwrap();
        assert_eq!(hit.confidence, 100);
        assert!(m.find("trx-998").is_none());
    }

    #[test]
    fn test_regex_case_insensitive_flag() {
        let m = matcher(vec![regex_rule(1, r"/^TRX-\d+$/i", true)]);
        assert!(m.find("trx-998").is_some());

        let bare = matcher(vec![regex_rule(2, r"^TRX-\d+$", false)]);
        assert!(bare.find("trx-998").is_some());
    }

    #[test]
    fn test_literal_confidence() {
        let m = matcher(vec![rule(1, "GOJEK", 0)]);
        // 5 of 24 characters
        assert_eq!(m.find("PAYMENT GOJEK DRIVER 123").unwrap().confidence, 21);
        // Whole description, ignoring case and surrounding whitespace
        assert_eq!(m.find("  gojek ").unwrap().confidence, 100);
    }

    #[test]
    fn test_literal_confidence_clamped() {
        assert_eq!(literal_confidence(1, 1000), 1);
        assert_eq!(literal_confidence(999, 1000), 99);
        assert_eq!(literal_confidence(1, 2), 50);
    }

    #[test]
    fn test_case_sensitive_literal() {
        let m = matcher(vec![Rule {
            case_sensitive: true,
            ..rule(1, "Gojek", 0)
        }]);
        assert!(m.find("PAYMENT GOJEK").is_none());
        assert!(m.find("payment Gojek").is_some());
    }

    #[test]
    fn test_inactive_rules_never_match() {
        let m = matcher(vec![Rule {
            is_active: false,
            ..rule(1, "GOJEK", 0)
        }]);
        assert!(m.is_empty());
        assert!(m.find("GOJEK").is_none());
        assert!(m.disabled().is_empty());
    }

    #[test]
    fn test_bad_regex_fails_closed() {
        let m = matcher(vec![
            Rule {
                priority: 10,
                ..regex_rule(1, "(unclosed", false)
            },
            rule(2, "GOJEK", 0),
        ]);
        assert_eq!(m.len(), 1);
        assert_eq!(m.disabled().len(), 1);
        assert_eq!(m.disabled()[0].id, 1);
        assert_eq!(m.find("GOJEK (unclosed").unwrap().rule_id, 2);
    }

    #[test]
    fn test_empty_keyword_fails_closed() {
        let m = matcher(vec![rule(1, "   ", 10), rule(2, "GRAB", 0)]);
        assert_eq!(m.disabled()[0].id, 1);
        assert_eq!(m.find("GRAB FOOD").unwrap().rule_id, 2);
    }

    #[test]
    fn test_oversized_regex_rejected() {
        let limits = MatchLimits {
            max_pattern_len: 8,
            ..MatchLimits::default()
        };
        assert!(validate_rule("ABCDEFGHIJ", true, &limits).is_err());
        // Literals have no length limit
        assert!(validate_rule("ABCDEFGHIJ", false, &limits).is_ok());

        let tight = MatchLimits {
            max_pattern_len: 256,
            regex_size_limit: 100,
        };
        assert!(validate_rule(r"\w{50}\d{50}", true, &tight).is_err());
    }

    #[test]
    fn test_unknown_flag_rejected() {
        let limits = MatchLimits::default();
        assert!(validate_rule("/abc/q", true, &limits).is_err());
        assert!(validate_rule("/abc/imsx", true, &limits).is_ok());
    }

    #[test]
    fn test_split_delimited() {
        assert_eq!(split_delimited("/^a$/i"), ("^a$", "i"));
        assert_eq!(split_delimited("/a/b/"), ("a/b", ""));
        assert_eq!(split_delimited("^a$"), ("^a$", ""));
        // A trailing segment that isn't flags is part of the pattern
        assert_eq!(split_delimited("/a/1"), ("/a/1", ""));
    }

    #[test]
    fn test_match_is_deterministic() {
        let m = matcher(vec![
            rule(3, "DRIVER", 5),
            rule(1, "GOJEK", 5),
            regex_rule(2, r"\d{3}", false),
        ]);
        let first = m.find("PAYMENT GOJEK DRIVER 123");
        for _ in 0..10 {
            assert_eq!(m.find("PAYMENT GOJEK DRIVER 123"), first);
        }
    }

    #[test]
    fn test_empty_description_no_match() {
        let m = matcher(vec![regex_rule(1, ".*", false)]);
        assert!(m.find("   ").is_none());
    }
}
