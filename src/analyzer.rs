//! Keyword-based content risk analyzer.
//!
//! A deterministic, stateless scan of captured text against three term
//! sets: general risk terms, a high-risk subset (self-harm and
//! meeting/secrecy grooming language), and bullying phrases. Matching is
//! case-insensitive substring matching with no tokenization or stemming.

use crate::collector::types::{AlertEvent, AlertKind, CapturedText, Severity};
use chrono::{DateTime, Utc};

/// General risk terms. Matching only these yields a medium-severity alert.
const RISK_TERMS: &[&str] = &[
    "drugs", "weed", "vape", "alcohol", "drunk", "cigarette", "gamble", "betting", "nude",
    "sexting", "porn", "dare you", "run away", "skip school", "steal", "fight after school",
];

/// High-risk subset: self-harm and meeting/secrecy terms. Any match raises
/// the alert to high severity.
const HIGH_RISK_TERMS: &[&str] = &[
    "kill myself",
    "suicide",
    "self harm",
    "hurt myself",
    "cut myself",
    "want to die",
    "meet me alone",
    "don't tell your parents",
    "dont tell your parents",
    "our secret",
    "keep this secret",
    "send me a picture",
    "delete this message",
];

/// Bullying-specific phrases. Any match yields a high-severity bullying alert.
const BULLYING_PHRASES: &[&str] = &[
    "nobody likes you",
    "everyone hates you",
    "you're a loser",
    "youre a loser",
    "kill yourself",
    "you should disappear",
    "we all laugh at you",
    "you're so ugly",
    "youre so ugly",
    "no one wants you here",
];

/// Outcome of scanning one piece of text.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentFinding {
    pub kind: AlertKind,
    pub severity: Severity,
    /// The terms that matched, in scan order.
    pub matched_terms: Vec<String>,
}

/// Deterministic keyword matcher over captured text.
#[derive(Debug, Clone)]
pub struct ContentAnalyzer {
    risk_terms: Vec<String>,
    high_risk_terms: Vec<String>,
    bullying_phrases: Vec<String>,
}

impl Default for ContentAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentAnalyzer {
    /// Analyzer with the built-in term sets.
    pub fn new() -> Self {
        Self::with_terms(
            RISK_TERMS.iter().map(|s| s.to_string()).collect(),
            HIGH_RISK_TERMS.iter().map(|s| s.to_string()).collect(),
            BULLYING_PHRASES.iter().map(|s| s.to_string()).collect(),
        )
    }

    /// Analyzer with custom term sets (config override).
    pub fn with_terms(
        risk_terms: Vec<String>,
        high_risk_terms: Vec<String>,
        bullying_phrases: Vec<String>,
    ) -> Self {
        Self {
            risk_terms: lowercase_all(risk_terms),
            high_risk_terms: lowercase_all(high_risk_terms),
            bullying_phrases: lowercase_all(bullying_phrases),
        }
    }

    /// Extend the general risk list with extra terms from configuration.
    pub fn add_risk_terms(&mut self, terms: &[String]) {
        self.risk_terms
            .extend(terms.iter().map(|t| t.to_lowercase()));
    }

    /// Scan text. Returns `None` when nothing matched.
    pub fn analyze(&self, text: &str) -> Option<ContentFinding> {
        let haystack = text.to_lowercase();

        let bullying: Vec<String> = matches_in(&haystack, &self.bullying_phrases);
        let high: Vec<String> = matches_in(&haystack, &self.high_risk_terms);
        let general: Vec<String> = matches_in(&haystack, &self.risk_terms);

        if bullying.is_empty() && high.is_empty() && general.is_empty() {
            return None;
        }

        let kind = if !bullying.is_empty() {
            AlertKind::Bullying
        } else {
            AlertKind::ContentRisk
        };
        let severity = if !bullying.is_empty() || !high.is_empty() {
            Severity::High
        } else {
            Severity::Medium
        };

        let mut matched_terms = bullying;
        matched_terms.extend(high);
        matched_terms.extend(general);

        Some(ContentFinding {
            kind,
            severity,
            matched_terms,
        })
    }

    /// Scan a captured text and build the alert to raise, if any.
    pub fn alert_for(&self, text: &CapturedText, now: DateTime<Utc>) -> Option<AlertEvent> {
        let finding = self.analyze(&text.text)?;
        let title = match finding.kind {
            AlertKind::Bullying => "Possible bullying detected".to_string(),
            AlertKind::ContentRisk => "Risky content detected".to_string(),
            AlertKind::Tamper => unreachable!("analyzer never emits tamper alerts"),
        };
        Some(AlertEvent {
            kind: finding.kind,
            severity: finding.severity,
            title,
            detail: format!(
                "Matched in {} from {}",
                match text.channel {
                    crate::collector::types::TextChannel::Social => "social media content",
                    crate::collector::types::TextChannel::Notification => "a notification",
                },
                text.source_app
            ),
            matched_terms: finding.matched_terms,
            created_at: now,
        })
    }
}

fn lowercase_all(terms: Vec<String>) -> Vec<String> {
    terms.into_iter().map(|t| t.to_lowercase()).collect()
}

fn matches_in(haystack: &str, terms: &[String]) -> Vec<String> {
    terms
        .iter()
        .filter(|t| !t.is_empty() && haystack.contains(t.as_str()))
        .cloned()
        .collect()
}
