//! Deterministic keyword classifier.
//!
//! Each intent owns a list of weighted patterns; the best-scoring match
//! wins, ties going to the intent declared first. Ticker symbols (`AAPL`,
//! `$tsla`, known crypto tickers) raise confidence for the instrument-
//! centric intents. No match at all yields `Intent::Unknown`.
//!
//! The classifier names no layers: which layers an intent reads is the
//! budget policy's call, and that table is configuration.

use async_trait::async_trait;
use regex_lite::Regex;
use std::collections::BTreeSet;
use strata_core::classifier::{Classification, IntentClassifier};
use strata_core::error::ClassifierError;
use strata_core::layer::Intent;
use tracing::{debug, warn};

const TICKER_PATTERN: &str = r"\b([A-Z]{1,5})\b|\$([A-Za-z]{1,5})";

/// Boost applied when a ticker accompanies an instrument-centric intent.
const TICKER_BOOST: f32 = 0.1;

const CRYPTO_TICKERS: &[&str] = &[
    "BTC", "ETH", "SOL", "XRP", "ADA", "DOGE", "DOT", "AVAX", "MATIC", "LINK", "UNI", "ATOM", "LTC", "BCH", "ALGO",
];

/// Upper-case words that look like tickers but are not.
const TICKER_STOPWORDS: &[&str] = &[
    "I", "A", "THE", "AND", "OR", "IS", "IT", "TO", "IN", "ON", "FOR", "OF", "AT", "BY", "AN", "AS", "BE", "DO", "IF",
    "MY", "ME", "WE", "US", "SO", "NO", "UP", "AM", "PM", "OK", "AI", "ML", "CEO", "CFO", "CTO", "COO", "ETF", "ETFS",
    "IPO", "EPS", "PE", "GDP", "CPI", "FED", "SEC", "FOMC", "USD", "EUR", "GBP", "JPY", "API", "USA", "UK", "EU",
    "YTD", "YOY", "ATH", "NEWS", "WHAT", "HOW", "WHY", "BUY", "SELL", "HOLD",
];

const INTENT_PATTERNS: &[(Intent, &[(&str, f32)])] = &[
    (
        Intent::PriceOnly,
        &[
            (r"(?i)\b(price|quote)\b", 0.9),
            (r"(?i)\b(how much|worth)\b", 0.7),
            (r"(?i)\bcurrent\s+price\b", 0.95),
        ],
    ),
    (
        Intent::TickerInfo,
        &[
            (r"(?i)\b(info|about|details)\b", 0.8),
            (r"(?i)\btell me about\b", 0.85),
            (r"(?i)\bwhat is\s+[A-Z]{1,5}\b", 0.8),
        ],
    ),
    (
        Intent::NewsSummary,
        &[
            (r"(?i)\b(news|headlines)\b", 0.9),
            (r"(?i)\b(latest|recent)\b", 0.6),
            (r"(?i)\bwhat.+happening\b", 0.7),
        ],
    ),
    (
        Intent::TradeDecision,
        &[
            (r"(?i)\b(should i|buy|sell|hold)\b", 0.85),
            (r"(?i)\b(recommend|analysis|analyze)\b", 0.8),
            (r"(?i)\b(invest|position)\b", 0.75),
            (r"(?i)\bgood time\b", 0.7),
        ],
    ),
    (
        Intent::UserHistory,
        &[
            (r"(?i)\b(what did i|my previous)\b", 0.9),
            (r"(?i)\b(earlier|before)\b", 0.6),
            (r"(?i)\b(history|past)\s+decision", 0.85),
        ],
    ),
    (
        Intent::UserPrefs,
        &[
            (r"(?i)\b(my preference|i prefer)", 0.9),
            (r"(?i)\brisk tolerance\b", 0.95),
            (r"(?i)\b(my style|trading style)\b", 0.85),
            (r"(?i)\bwhat do i like\b", 0.8),
        ],
    ),
    (
        Intent::SemanticSearch,
        &[
            (r"(?i)\b(similar|like|find)\b", 0.7),
            (r"(?i)\b(related|compare)\b", 0.7),
            (r"(?i)\b(search|look for)\b", 0.65),
        ],
    ),
    (
        Intent::Conversation,
        &[
            (r"(?i)\b(you said|we discussed)\b", 0.85),
            (r"(?i)\b(continue|more)\b", 0.6),
            (r"(?i)\b(explain|elaborate)\b", 0.65),
        ],
    ),
];

pub struct KeywordClassifier {
    patterns: Vec<(Intent, Regex, f32)>,
    ticker: Option<Regex>,
}

impl KeywordClassifier {
    pub fn new() -> Self {
        let mut patterns = Vec::new();
        for (intent, table) in INTENT_PATTERNS {
            for (pattern, weight) in *table {
                match Regex::new(pattern) {
                    Ok(re) => patterns.push((*intent, re, *weight)),
                    Err(e) => warn!(intent = %intent, pattern, error = %e, "Invalid intent pattern skipped"),
                }
            }
        }
        let ticker = Regex::new(TICKER_PATTERN)
            .inspect_err(|e| warn!(error = %e, "Invalid ticker pattern, symbol extraction disabled"))
            .ok();
        Self { patterns, ticker }
    }

    /// Ticker symbols in `query`, upper-cased, sorted and deduplicated.
    pub fn extract_symbols(&self, query: &str) -> Vec<String> {
        let Some(ticker) = &self.ticker else {
            return Vec::new();
        };
        let symbols: BTreeSet<String> = ticker
            .captures_iter(query)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
            .map(|m| m.as_str().to_ascii_uppercase())
            .filter(|s| !TICKER_STOPWORDS.contains(&s.as_str()))
            .filter(|s| s.len() >= 2 || CRYPTO_TICKERS.contains(&s.as_str()))
            .collect();
        symbols.into_iter().collect()
    }

    /// Classify without going through the async trait.
    pub fn classify_sync(&self, query: &str) -> Classification {
        let mut best = (Intent::Unknown, 0.0_f32);
        for (intent, re, weight) in &self.patterns {
            if *weight > best.1 && re.is_match(query) {
                best = (*intent, *weight);
            }
        }

        let (intent, mut confidence) = best;
        let symbols = self.extract_symbols(query);
        if !symbols.is_empty()
            && matches!(
                intent,
                Intent::PriceOnly | Intent::TickerInfo | Intent::NewsSummary | Intent::TradeDecision
            )
        {
            confidence = (confidence + TICKER_BOOST).min(1.0);
        }

        debug!(intent = %intent, confidence, symbols = ?symbols, "Query classified");
        Classification::new(intent, confidence).with_symbols(symbols)
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn classify(&self, query: &str) -> Result<Classification, ClassifierError> {
        Ok(self.classify_sync(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(query: &str) -> Classification {
        KeywordClassifier::new().classify_sync(query)
    }

    #[test]
    fn all_patterns_compile() {
        let expected: usize = INTENT_PATTERNS.iter().map(|(_, t)| t.len()).sum();
        let classifier = KeywordClassifier::new();
        assert_eq!(classifier.patterns.len(), expected);
        assert!(classifier.ticker.is_some());
    }

    #[test]
    fn price_check_with_ticker() {
        let c = classify("What's the current price of AAPL?");
        assert_eq!(c.intent, Intent::PriceOnly);
        assert_eq!(c.symbols, vec!["AAPL"]);
        assert!((c.confidence - 1.0).abs() < f32::EPSILON);
        assert!(c.layers.is_empty());
    }

    #[test]
    fn trade_decision_with_ticker() {
        let c = classify("Should I buy TSLA right now?");
        assert_eq!(c.intent, Intent::TradeDecision);
        assert_eq!(c.symbols, vec!["TSLA"]);
    }

    #[test]
    fn dollar_and_crypto_tickers() {
        let classifier = KeywordClassifier::new();
        assert_eq!(classifier.extract_symbols("news on $nvda and BTC"), vec!["BTC", "NVDA"]);
        assert_eq!(classifier.extract_symbols("I think IT is fine"), Vec::<String>::new());
    }

    #[test]
    fn acronyms_are_not_tickers() {
        let classifier = KeywordClassifier::new();
        assert!(classifier.extract_symbols("latest AI news").is_empty());
        assert!(classifier.extract_symbols("what did the CEO say about the ETF").is_empty());
        assert_eq!(classifier.extract_symbols("CPI print and the FED, then AMD"), vec!["AMD"]);
    }

    #[test]
    fn preferences_and_history() {
        assert_eq!(classify("what is my risk tolerance").intent, Intent::UserPrefs);
        assert_eq!(classify("what did i decide last week").intent, Intent::UserHistory);
    }

    #[test]
    fn news_and_semantic() {
        assert_eq!(classify("latest headlines for MSFT").intent, Intent::NewsSummary);
        assert_eq!(classify("find filings similar to this one").intent, Intent::SemanticSearch);
    }

    #[test]
    fn conversation_follow_up() {
        let c = classify("can you elaborate on what you said");
        assert_eq!(c.intent, Intent::Conversation);
    }

    #[test]
    fn unmatched_query_is_unknown() {
        let c = classify("hmm");
        assert_eq!(c.intent, Intent::Unknown);
        assert_eq!(c.confidence, 0.0);
    }

    #[test]
    fn ticker_boost_only_for_instrument_intents() {
        let c = classify("explain AAPL");
        assert_eq!(c.intent, Intent::Conversation);
        assert!((c.confidence - 0.65).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn trait_delegates_to_sync_path() {
        let classifier = KeywordClassifier::new();
        let c = classifier.classify("price of ETH").await.unwrap();
        assert_eq!(c, classifier.classify_sync("price of ETH"));
        assert_eq!(classifier.name(), "keyword");
    }
}
