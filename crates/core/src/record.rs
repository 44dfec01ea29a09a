//! Durable records (profiles, decisions, summaries) and session state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

// ── Profile ───────────────────────────────────────────────────────────────

/// Mutable per-user profile. The durable store is its only source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_tolerance: Option<String>,

    #[serde(default)]
    pub preferred_sectors: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trading_style: Option<String>,

    /// Free-form preferences not covered by the typed fields
    #[serde(default)]
    pub preferences: Map<String, Value>,

    /// Per-user write sequence at the last mutation
    #[serde(default)]
    pub seq: u64,

    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            risk_tolerance: None,
            preferred_sectors: Vec::new(),
            trading_style: None,
            preferences: Map::new(),
            seq: 0,
            updated_at: Utc::now(),
        }
    }

    /// Flattened preference view served to the session layer.
    pub fn preference_view(&self) -> Value {
        let mut view = self.preferences.clone();
        if let Some(risk) = &self.risk_tolerance {
            view.insert("risk_tolerance".into(), Value::String(risk.clone()));
        }
        if !self.preferred_sectors.is_empty() {
            view.insert("preferred_sectors".into(), Value::from(self.preferred_sectors.clone()));
        }
        if let Some(style) = &self.trading_style {
            view.insert("trading_style".into(), Value::String(style.clone()));
        }
        Value::Object(view)
    }
}

/// A partial profile mutation. `None` fields are left untouched;
/// `preferences` entries are merged key by key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub risk_tolerance: Option<String>,
    #[serde(default)]
    pub preferred_sectors: Option<Vec<String>>,
    #[serde(default)]
    pub trading_style: Option<String>,
    #[serde(default)]
    pub preferences: Map<String, Value>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.risk_tolerance.is_none()
            && self.preferred_sectors.is_none()
            && self.trading_style.is_none()
            && self.preferences.is_empty()
    }

    pub fn apply_to(self, profile: &mut UserProfile) {
        if let Some(risk) = self.risk_tolerance {
            profile.risk_tolerance = Some(risk);
        }
        if let Some(sectors) = self.preferred_sectors {
            profile.preferred_sectors = sectors;
        }
        if let Some(style) = self.trading_style {
            profile.trading_style = Some(style);
        }
        profile.preferences.extend(self.preferences);
    }
}

// ── Decisions ─────────────────────────────────────────────────────────────

/// An append-only decision log entry.
///
/// `decision_id` is supplied by the caller and is the idempotency key:
/// recording the same id twice never creates a second record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision_id: String,
    pub user_id: String,
    pub symbol: String,
    pub action: String,

    #[serde(default)]
    pub query: String,

    #[serde(default)]
    pub payload: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<f64>,

    /// Assigned by the persistent store on append
    #[serde(default)]
    pub seq: u64,

    pub recorded_at: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn new(
        decision_id: impl Into<String>,
        user_id: impl Into<String>,
        symbol: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            decision_id: decision_id.into(),
            user_id: user_id.into(),
            symbol: symbol.into().trim().to_ascii_uppercase(),
            action: action.into(),
            query: String::new(),
            payload: Value::Null,
            sentiment: None,
            seq: 0,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_sentiment(mut self, sentiment: f64) -> Self {
        self.sentiment = Some(sentiment);
        self
    }

    /// Every summary subject this decision touches.
    pub fn subjects(&self) -> [SubjectKey; 2] {
        [
            SubjectKey::user(&self.user_id),
            SubjectKey::symbol(&self.user_id, &self.symbol),
        ]
    }
}

/// Result of appending a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum AppendOutcome {
    Appended { seq: u64 },
    /// The decision id was already recorded; the original sequence is returned.
    Duplicate { seq: u64 },
}

impl AppendOutcome {
    pub fn seq(&self) -> u64 {
        match self {
            Self::Appended { seq } | Self::Duplicate { seq } => *seq,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

// ── Summaries ─────────────────────────────────────────────────────────────

/// What a summary aggregates over.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubjectKey {
    User { user_id: String },
    Symbol { user_id: String, symbol: String },
}

impl SubjectKey {
    pub fn user(user_id: &str) -> Self {
        Self::User {
            user_id: user_id.to_string(),
        }
    }

    pub fn symbol(user_id: &str, symbol: &str) -> Self {
        Self::Symbol {
            user_id: user_id.to_string(),
            symbol: symbol.trim().to_ascii_uppercase(),
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Self::User { user_id } | Self::Symbol { user_id, .. } => user_id,
        }
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User { user_id } => write!(f, "user:{user_id}"),
            Self::Symbol { user_id, symbol } => write!(f, "user:{user_id}:symbol:{symbol}"),
        }
    }
}

impl FromStr for SubjectKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("user:")
            .ok_or_else(|| format!("invalid subject key: {s}"))?;
        match rest.split_once(":symbol:") {
            Some((user, symbol)) if !user.is_empty() && !symbol.is_empty() => Ok(Self::symbol(user, symbol)),
            Some(_) => Err(format!("invalid subject key: {s}")),
            None if !rest.is_empty() => Ok(Self::user(rest)),
            None => Err(format!("invalid subject key: {s}")),
        }
    }
}

/// A write-time aggregate. `derived_at_version` is the per-user write
/// sequence watermark the payload reflects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub subject_key: String,
    pub derived_at_version: u64,
    pub payload: SummaryPayload,
    pub derived_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SummaryPayload {
    User(UserSummary),
    Symbol(SymbolSummary),
}

impl SummaryPayload {
    /// Compact single-line rendering for prompt context.
    pub fn render(&self) -> String {
        match self {
            Self::User(u) => {
                let mut parts = vec![format!("{} decisions", u.total_decisions)];
                if let Some(risk) = &u.risk_tolerance {
                    parts.push(format!("risk tolerance {risk}"));
                }
                if let Some(style) = &u.trading_style {
                    parts.push(format!("style {style}"));
                }
                if !u.preferred_sectors.is_empty() {
                    parts.push(format!("sectors {}", u.preferred_sectors.join("/")));
                }
                if !u.symbols_analyzed.is_empty() {
                    parts.push(format!("symbols {}", u.symbols_analyzed.join(",")));
                }
                format!("User {}: {}", u.user_id, parts.join("; "))
            }
            Self::Symbol(s) => {
                let recent: Vec<&str> = s.recent.iter().map(|d| d.action.as_str()).collect();
                let mut line = format!("{}: {} analyses", s.symbol, s.total_analyses);
                if let Some(last) = &s.last_action {
                    line.push_str(&format!(", last {last}"));
                }
                if !recent.is_empty() {
                    line.push_str(&format!(", recent [{}]", recent.join(", ")));
                }
                if let Some(avg) = s.avg_sentiment {
                    line.push_str(&format!(", avg sentiment {avg:.2}"));
                }
                line
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub user_id: String,
    #[serde(default)]
    pub risk_tolerance: Option<String>,
    #[serde(default)]
    pub preferred_sectors: Vec<String>,
    #[serde(default)]
    pub trading_style: Option<String>,
    pub total_decisions: u64,
    #[serde(default)]
    pub symbols_analyzed: Vec<String>,
    #[serde(default)]
    pub last_active: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolSummary {
    pub user_id: String,
    pub symbol: String,
    pub total_analyses: u64,
    #[serde(default)]
    pub last_action: Option<String>,
    #[serde(default)]
    pub last_recorded_at: Option<DateTime<Utc>>,
    /// Most recent decisions, newest first
    #[serde(default)]
    pub recent: Vec<DecisionDigest>,
    #[serde(default)]
    pub avg_sentiment: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionDigest {
    pub action: String,
    #[serde(default)]
    pub sentiment: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

// ── Session ───────────────────────────────────────────────────────────────

/// One turn of conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Per-user sequence, assigned on append
    #[serde(default)]
    pub seq: u64,
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            seq: 0,
            role: role.into(),
            content: content.into(),
            metadata: Map::new(),
            at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// Versioned per-user session view. The version travels with the value;
/// there is no process-wide "current version".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub user_id: String,
    pub version: u64,
    /// Preference object derived from the durable profile (or `Null`)
    #[serde(default)]
    pub preferences: Value,
    /// Recent history, oldest first
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    pub built_at: DateTime<Utc>,
}

impl SessionSnapshot {
    /// The deterministic snapshot served to a first-time user.
    pub fn empty(user_id: impl Into<String>, version: u64) -> Self {
        Self {
            user_id: user_id.into(),
            version,
            preferences: Value::Null,
            history: Vec::new(),
            built_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    pub fn has_preferences(&self) -> bool {
        match &self.preferences {
            Value::Object(map) => !map.is_empty(),
            Value::Null => false,
            _ => true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.has_preferences() && self.history.is_empty()
    }
}
