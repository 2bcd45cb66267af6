use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// The closed set of autonomous shopping agents whose actions pass through the
/// guardrail engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentType {
    PersonalShopper,
    MakeupArtist,
    SizePredictor,
    ReturnsPredictor,
    CartAgent,
    SearchAgent,
}

impl AgentType {
    /// Every agent type, in declaration order.
    pub const ALL: [AgentType; 6] = [
        AgentType::PersonalShopper,
        AgentType::MakeupArtist,
        AgentType::SizePredictor,
        AgentType::ReturnsPredictor,
        AgentType::CartAgent,
        AgentType::SearchAgent,
    ];

    /// Wire identifier (e.g. `"cartAgent"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::PersonalShopper => "personalShopper",
            AgentType::MakeupArtist => "makeupArtist",
            AgentType::SizePredictor => "sizePredictor",
            AgentType::ReturnsPredictor => "returnsPredictor",
            AgentType::CartAgent => "cartAgent",
            AgentType::SearchAgent => "searchAgent",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = GuardrailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentType::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| GuardrailError::UnknownAgent(s.to_string()))
    }
}

/// Ordered severity attached to every check and violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// An action an agent proposes. The payload is opaque to the engine; only
/// individual checks inspect it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    /// e.g. `"add_item"`, `"recommend_products"`
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl AgentAction {
    pub fn new(action_type: impl Into<String>, payload: Value) -> Self {
        Self {
            action_type: action_type.into(),
            payload,
        }
    }
}

/// Membership tier of the shopper the action is performed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserTier {
    #[default]
    Free,
    Premium,
    Vip,
}

/// Caller-supplied, read-only view of the user an action targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default)]
    pub tier: UserTier,
    /// Remaining domain fields (budget, sizes, preferences, ...).
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tier: UserTier::default(),
            attributes: Map::new(),
        }
    }

    pub fn with_tier(mut self, tier: UserTier) -> Self {
        self.tier = tier;
        self
    }

    /// The user id for attribution, or `None` when the caller left it empty.
    pub fn attributed_id(&self) -> Option<String> {
        if self.user_id.is_empty() {
            None
        } else {
            Some(self.user_id.clone())
        }
    }
}

/// The engine's verdict for one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailResult {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
    /// Auto-corrected payload, present only when it differs from the original.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<Value>,
}

impl GuardrailResult {
    /// A rejection carrying whatever warnings were accumulated before it.
    pub fn rejected(reason: impl Into<String>, warnings: Vec<String>) -> Self {
        Self {
            approved: false,
            reason: Some(reason.into()),
            warnings: Some(warnings),
            modified: None,
        }
    }
}

/// Immutable record of a check rejecting an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailViolation {
    pub agent: AgentType,
    pub action_type: String,
    pub user_id: Option<String>,
    pub reason: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    pub check_name: String,
}

/// Immutable record of a completed validation decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    pub id: Uuid,
    pub agent: AgentType,
    pub action_type: String,
    pub user_id: Option<String>,
    pub result: GuardrailResult,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

/// Per-agent circuit breaker snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerState {
    pub is_open: bool,
    pub failure_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
}

/// Aggregate statistics over the violation and audit trail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationStats {
    pub total_violations: u64,
    pub by_agent: BTreeMap<AgentType, u64>,
    pub by_severity: BTreeMap<Severity, u64>,
    /// Always within `[0, 1]`.
    pub violation_rate: f64,
}

/// Everything the operator dashboard renders in one read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailDashboard {
    pub circuit_breakers: BTreeMap<AgentType, CircuitBreakerState>,
    pub stats: ViolationStats,
    /// Newest first.
    pub recent_violations: Vec<GuardrailViolation>,
}

/// Engine-level conditions that are raised to the caller instead of being
/// folded into a [`GuardrailResult`].
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GuardrailError {
    #[error("Circuit breaker open for agent {agent}")]
    CircuitBreakerOpen { agent: AgentType },

    #[error("Check '{check}' escalated for agent {agent}: {message}")]
    Escalated {
        agent: AgentType,
        check: String,
        message: String,
    },

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Invalid guardrail configuration: {0}")]
    InvalidConfig(String),
}

impl GuardrailError {
    pub fn severity(&self) -> Severity {
        match self {
            GuardrailError::CircuitBreakerOpen { .. } | GuardrailError::Escalated { .. } => {
                Severity::Critical
            }
            GuardrailError::UnknownAgent(_) | GuardrailError::InvalidConfig(_) => Severity::High,
        }
    }
}
