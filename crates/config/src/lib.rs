//! Configuration loading, validation, and management for Strata.
//!
//! Loads configuration from `~/.strata/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strata_core::context::LayerFallback;
use strata_core::layer::{Intent, LatencyClass, MemoryLayer};

/// The root configuration structure.
///
/// Maps directly to `~/.strata/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrataConfig {
    /// Token budget policy per intent
    #[serde(default)]
    pub budgets: BudgetsConfig,

    /// Per-layer timeouts and per-latency-class deadlines
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default)]
    pub run_cache: RunCacheConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub persistent: PersistentConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

// ── Budgets ───────────────────────────────────────────────────────────────

/// Token ceilings for each layer an intent may draw from.
/// Unset layers are not queried for that intent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerCeilings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_cache: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<usize>,
}

impl LayerCeilings {
    pub fn get(&self, layer: MemoryLayer) -> Option<usize> {
        match layer {
            MemoryLayer::RunCache => self.run_cache,
            MemoryLayer::Persistent => self.persistent,
            MemoryLayer::Session => self.session,
            MemoryLayer::Vector => self.vector,
        }
    }

    /// Configured ceilings keyed by layer, in priority order.
    pub fn to_map(&self) -> BTreeMap<MemoryLayer, usize> {
        MemoryLayer::ALL
            .into_iter()
            .filter_map(|layer| self.get(layer).map(|c| (layer, c)))
            .collect()
    }
}

/// Budget policy for a single intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetPolicy {
    pub total: usize,

    #[serde(default)]
    pub latency: LatencyClass,

    #[serde(default)]
    pub layers: LayerCeilings,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<LayerFallback>,
}

impl BudgetPolicy {
    fn new(total: usize, latency: LatencyClass, layers: LayerCeilings) -> Self {
        Self {
            total,
            latency,
            layers,
            fallback: None,
        }
    }
}

/// Budget policy table. A `[budgets.<intent>]` section replaces that
/// intent's whole default policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetsConfig {
    #[serde(default = "default_price_only")]
    pub price_only: BudgetPolicy,
    #[serde(default = "default_ticker_info")]
    pub ticker_info: BudgetPolicy,
    #[serde(default = "default_news_summary")]
    pub news_summary: BudgetPolicy,
    #[serde(default = "default_trade_decision")]
    pub trade_decision: BudgetPolicy,
    #[serde(default = "default_user_history")]
    pub user_history: BudgetPolicy,
    #[serde(default = "default_user_prefs")]
    pub user_prefs: BudgetPolicy,
    #[serde(default = "default_semantic_search")]
    pub semantic_search: BudgetPolicy,
    #[serde(default = "default_conversation")]
    pub conversation: BudgetPolicy,
}

fn default_price_only() -> BudgetPolicy {
    BudgetPolicy::new(
        600,
        LatencyClass::Fast,
        LayerCeilings {
            run_cache: Some(600),
            ..Default::default()
        },
    )
}
fn default_ticker_info() -> BudgetPolicy {
    BudgetPolicy::new(
        2000,
        LatencyClass::Standard,
        LayerCeilings {
            run_cache: Some(1000),
            vector: Some(1000),
            ..Default::default()
        },
    )
}
fn default_news_summary() -> BudgetPolicy {
    BudgetPolicy::new(
        2500,
        LatencyClass::Standard,
        LayerCeilings {
            run_cache: Some(500),
            vector: Some(2000),
            ..Default::default()
        },
    )
}
fn default_trade_decision() -> BudgetPolicy {
    BudgetPolicy::new(
        5000,
        LatencyClass::Deep,
        LayerCeilings {
            run_cache: Some(1200),
            persistent: Some(800),
            session: Some(1000),
            vector: Some(2000),
        },
    )
}
fn default_user_history() -> BudgetPolicy {
    BudgetPolicy::new(
        3000,
        LatencyClass::Standard,
        LayerCeilings {
            persistent: Some(1000),
            session: Some(2000),
            ..Default::default()
        },
    )
}
fn default_user_prefs() -> BudgetPolicy {
    BudgetPolicy {
        fallback: Some(LayerFallback {
            primary: MemoryLayer::Session,
            fallback: MemoryLayer::Persistent,
        }),
        ..BudgetPolicy::new(
            2000,
            LatencyClass::Standard,
            LayerCeilings {
                persistent: Some(1500),
                session: Some(500),
                ..Default::default()
            },
        )
    }
}
fn default_semantic_search() -> BudgetPolicy {
    BudgetPolicy::new(
        3500,
        LatencyClass::Deep,
        LayerCeilings {
            vector: Some(3000),
            ..Default::default()
        },
    )
}
fn default_conversation() -> BudgetPolicy {
    BudgetPolicy::new(
        3500,
        LatencyClass::Standard,
        LayerCeilings {
            session: Some(2500),
            ..Default::default()
        },
    )
}

impl Default for BudgetsConfig {
    fn default() -> Self {
        Self {
            price_only: default_price_only(),
            ticker_info: default_ticker_info(),
            news_summary: default_news_summary(),
            trade_decision: default_trade_decision(),
            user_history: default_user_history(),
            user_prefs: default_user_prefs(),
            semantic_search: default_semantic_search(),
            conversation: default_conversation(),
        }
    }
}

impl BudgetsConfig {
    /// The configured policy for `intent`; `Intent::Unknown` has none.
    pub fn policy(&self, intent: Intent) -> Option<&BudgetPolicy> {
        match intent {
            Intent::PriceOnly => Some(&self.price_only),
            Intent::TickerInfo => Some(&self.ticker_info),
            Intent::NewsSummary => Some(&self.news_summary),
            Intent::TradeDecision => Some(&self.trade_decision),
            Intent::UserHistory => Some(&self.user_history),
            Intent::UserPrefs => Some(&self.user_prefs),
            Intent::SemanticSearch => Some(&self.semantic_search),
            Intent::Conversation => Some(&self.conversation),
            Intent::Unknown => None,
        }
    }

    /// Every configured `(intent, policy)` pair.
    pub fn iter(&self) -> impl Iterator<Item = (Intent, &BudgetPolicy)> {
        Intent::ALL
            .into_iter()
            .filter_map(|intent| self.policy(intent).map(|p| (intent, p)))
    }

    /// The smallest configured total, used by the fail-closed path.
    pub fn smallest_total(&self) -> usize {
        self.iter().map(|(_, p)| p.total).min().unwrap_or(0)
    }
}

// ── Timeouts ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_run_cache_ms")]
    pub run_cache_ms: u64,

    #[serde(default = "default_session_ms")]
    pub session_ms: u64,

    #[serde(default = "default_persistent_ms")]
    pub persistent_ms: u64,

    #[serde(default = "default_vector_ms")]
    pub vector_ms: u64,

    /// Budget for the classifier before falling back to the fail-closed path
    #[serde(default = "default_classifier_ms")]
    pub classifier_ms: u64,

    /// Shared deadlines per latency class
    #[serde(default = "default_fast_deadline_ms")]
    pub fast_deadline_ms: u64,

    #[serde(default = "default_standard_deadline_ms")]
    pub standard_deadline_ms: u64,

    #[serde(default = "default_deep_deadline_ms")]
    pub deep_deadline_ms: u64,
}

fn default_run_cache_ms() -> u64 {
    50
}
fn default_session_ms() -> u64 {
    50
}
fn default_persistent_ms() -> u64 {
    100
}
fn default_vector_ms() -> u64 {
    150
}
fn default_classifier_ms() -> u64 {
    50
}
fn default_fast_deadline_ms() -> u64 {
    100
}
fn default_standard_deadline_ms() -> u64 {
    200
}
fn default_deep_deadline_ms() -> u64 {
    250
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            run_cache_ms: default_run_cache_ms(),
            session_ms: default_session_ms(),
            persistent_ms: default_persistent_ms(),
            vector_ms: default_vector_ms(),
            classifier_ms: default_classifier_ms(),
            fast_deadline_ms: default_fast_deadline_ms(),
            standard_deadline_ms: default_standard_deadline_ms(),
            deep_deadline_ms: default_deep_deadline_ms(),
        }
    }
}

impl TimeoutsConfig {
    pub fn layer(&self, layer: MemoryLayer) -> Duration {
        Duration::from_millis(match layer {
            MemoryLayer::RunCache => self.run_cache_ms,
            MemoryLayer::Session => self.session_ms,
            MemoryLayer::Persistent => self.persistent_ms,
            MemoryLayer::Vector => self.vector_ms,
        })
    }

    pub fn deadline(&self, latency: LatencyClass) -> Duration {
        Duration::from_millis(match latency {
            LatencyClass::Fast => self.fast_deadline_ms,
            LatencyClass::Standard => self.standard_deadline_ms,
            LatencyClass::Deep => self.deep_deadline_ms,
        })
    }

    pub fn classifier(&self) -> Duration {
        Duration::from_millis(self.classifier_ms)
    }
}

// ── Stores ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCacheConfig {
    #[serde(default = "default_run_cache_prefix")]
    pub key_prefix: String,

    /// TTL when no tool family matches
    #[serde(default = "default_run_cache_ttl")]
    pub default_ttl_secs: u64,

    /// TTL per tool family, matched as a substring of the tool name
    #[serde(default = "default_tool_ttls")]
    pub ttl_by_tool: BTreeMap<String, u64>,
}

fn default_run_cache_prefix() -> String {
    "run".into()
}
fn default_run_cache_ttl() -> u64 {
    300
}
fn default_tool_ttls() -> BTreeMap<String, u64> {
    [
        ("quote", 60),
        ("ohlcv", 300),
        ("news", 600),
        ("fundamentals", 3600),
        ("options", 120),
        ("ta", 300),
        ("crypto", 30),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

impl Default for RunCacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_run_cache_prefix(),
            default_ttl_secs: default_run_cache_ttl(),
            ttl_by_tool: default_tool_ttls(),
        }
    }
}

impl RunCacheConfig {
    /// TTL for a tool. The longest family name contained in the tool name
    /// wins, so `get_options_chain` resolves to `options` rather than `ta`.
    pub fn ttl_for(&self, tool: &str) -> Duration {
        let tool = tool.to_ascii_lowercase();
        let secs = self
            .ttl_by_tool
            .iter()
            .filter(|(family, _)| tool.contains(family.as_str()))
            .max_by_key(|(family, _)| family.len())
            .map(|(_, ttl)| *ttl)
            .unwrap_or(self.default_ttl_secs);
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_prefix")]
    pub key_prefix: String,

    /// Maximum history entries kept per user
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    #[serde(default = "default_history_ttl")]
    pub history_ttl_secs: u64,

    #[serde(default = "default_snapshot_ttl")]
    pub snapshot_ttl_secs: u64,
}

fn default_session_prefix() -> String {
    "session".into()
}
fn default_history_limit() -> usize {
    50
}
fn default_history_ttl() -> u64 {
    7200
}
fn default_snapshot_ttl() -> u64 {
    3600
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_session_prefix(),
            history_limit: default_history_limit(),
            history_ttl_secs: default_history_ttl(),
            snapshot_ttl_secs: default_snapshot_ttl(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_persistent_backend")]
    pub backend: String,

    /// Database file; defaults to `~/.strata/strata.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<PathBuf>,

    /// Decisions kept in a symbol summary's recent list
    #[serde(default = "default_summary_recent")]
    pub summary_recent: usize,
}

fn default_persistent_backend() -> String {
    "sqlite".into()
}
fn default_summary_recent() -> usize {
    5
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            backend: default_persistent_backend(),
            sqlite_path: None,
            summary_recent: default_summary_recent(),
        }
    }
}

impl PersistentConfig {
    pub fn database_path(&self) -> PathBuf {
        self.sqlite_path
            .clone()
            .unwrap_or_else(|| StrataConfig::config_dir().join("strata.db"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Reciprocal rank fusion constant
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,

    /// Candidates taken from each ranking before fusion
    #[serde(default = "default_candidate_pool")]
    pub candidate_pool: usize,

    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Per-document ceiling applied before whole documents are dropped
    #[serde(default = "default_max_doc_tokens")]
    pub max_doc_tokens: usize,

    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
}

fn default_rrf_k() -> u32 {
    60
}
fn default_candidate_pool() -> usize {
    20
}
fn default_top_k() -> usize {
    8
}
fn default_max_doc_tokens() -> usize {
    500
}
fn default_embedding_dimensions() -> usize {
    256
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            candidate_pool: default_candidate_pool(),
            default_top_k: default_top_k(),
            max_doc_tokens: default_max_doc_tokens(),
            embedding_dimensions: default_embedding_dimensions(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────

impl StrataConfig {
    /// Load configuration from the default path (~/.strata/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `STRATA_RRF_K`
    /// - `STRATA_DEADLINE_MS` (applies to every latency class)
    /// - `STRATA_SQLITE_PATH`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(raw) = lookup("STRATA_RRF_K") {
            self.retrieval.rrf_k = parse_env("STRATA_RRF_K", &raw)?;
        }

        if let Some(raw) = lookup("STRATA_DEADLINE_MS") {
            let ms: u64 = parse_env("STRATA_DEADLINE_MS", &raw)?;
            self.timeouts.fast_deadline_ms = ms;
            self.timeouts.standard_deadline_ms = ms;
            self.timeouts.deep_deadline_ms = ms;
        }

        if let Some(path) = lookup("STRATA_SQLITE_PATH") {
            self.persistent.sqlite_path = Some(PathBuf::from(path));
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".strata")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (intent, policy) in self.budgets.iter() {
            if policy.total == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "budgets.{intent}.total must be > 0"
                )));
            }
            if let Some(fb) = &policy.fallback {
                for layer in [fb.primary, fb.fallback] {
                    if policy.layers.get(layer).is_none() {
                        return Err(ConfigError::ValidationError(format!(
                            "budgets.{intent}.fallback names layer '{layer}' which has no ceiling"
                        )));
                    }
                }
                if fb.primary == fb.fallback {
                    return Err(ConfigError::ValidationError(format!(
                        "budgets.{intent}.fallback primary and fallback must differ"
                    )));
                }
            }
        }

        let t = &self.timeouts;
        let all_timeouts = [
            ("run_cache_ms", t.run_cache_ms),
            ("session_ms", t.session_ms),
            ("persistent_ms", t.persistent_ms),
            ("vector_ms", t.vector_ms),
            ("classifier_ms", t.classifier_ms),
            ("fast_deadline_ms", t.fast_deadline_ms),
            ("standard_deadline_ms", t.standard_deadline_ms),
            ("deep_deadline_ms", t.deep_deadline_ms),
        ];
        if let Some((name, _)) = all_timeouts.iter().find(|(_, ms)| *ms == 0) {
            return Err(ConfigError::ValidationError(format!("timeouts.{name} must be > 0")));
        }

        if self.retrieval.rrf_k == 0 {
            return Err(ConfigError::ValidationError("retrieval.rrf_k must be > 0".into()));
        }
        if self.retrieval.embedding_dimensions == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.embedding_dimensions must be > 0".into(),
            ));
        }
        if self.session.history_limit == 0 {
            return Err(ConfigError::ValidationError("session.history_limit must be > 0".into()));
        }
        if !matches!(self.persistent.backend.as_str(), "sqlite" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "persistent.backend must be 'sqlite' or 'memory', got '{}'",
                self.persistent.backend
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{key}: invalid value '{raw}'")))
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
