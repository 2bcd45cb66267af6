//! [`GuardrailCheck`] – a single named validation rule – and the
//! [`CheckRegistry`] that maps each agent to its ordered rule list.
//!
//! Agent modules implement [`GuardrailCheck`] for their domain rules (spend
//! limits, size-fit constraints, content filters) and register them on the
//! engine at startup.  The engine never looks inside a check.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use shepherd_types::{AgentType, Severity, UserProfile};
use thiserror::Error;

// ────────────────────────────────────────────────────────────────────────────
// CheckError
// ────────────────────────────────────────────────────────────────────────────

/// Failure raised by a check's `validate` or `auto_correct`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CheckError {
    /// Ordinary failure; the engine folds it into a rejected result.
    #[error("{0}")]
    Failed(String),

    /// The check demands the caller sees an error instead of a rejection.
    #[error("{0}")]
    Escalated(String),
}

impl CheckError {
    pub fn failed(message: impl Into<String>) -> Self {
        CheckError::Failed(message.into())
    }

    pub fn escalated(message: impl Into<String>) -> Self {
        CheckError::Escalated(message.into())
    }

    pub fn message(&self) -> &str {
        match self {
            CheckError::Failed(m) | CheckError::Escalated(m) => m,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// GuardrailCheck trait
// ────────────────────────────────────────────────────────────────────────────

/// A named, severity-tagged rule an agent action must satisfy.
///
/// `validate` and `auto_correct` always receive the action's original
/// payload.  A check that can repair a rejected payload overrides
/// [`supports_auto_correct`][GuardrailCheck::supports_auto_correct] and
/// [`auto_correct`][GuardrailCheck::auto_correct].
#[async_trait]
pub trait GuardrailCheck: Send + Sync {
    /// Identifier recorded on violations (e.g. `"spend_limit"`).
    fn name(&self) -> &str;

    /// Human-readable rejection message.
    fn reason(&self) -> &str;

    fn severity(&self) -> Severity;

    /// `Ok(true)` when the payload is acceptable for `user`.
    async fn validate(&self, payload: &Value, user: &UserProfile) -> Result<bool, CheckError>;

    fn supports_auto_correct(&self) -> bool {
        false
    }

    /// Produce a corrected payload for a rejected one.
    async fn auto_correct(&self, _payload: &Value, _user: &UserProfile) -> Result<Value, CheckError> {
        Err(CheckError::failed(format!(
            "check '{}' has no auto-correction",
            self.name()
        )))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CheckRegistry
// ────────────────────────────────────────────────────────────────────────────

/// Ordered check lists per agent.
#[derive(Default)]
pub struct CheckRegistry {
    checks: HashMap<AgentType, Vec<Arc<dyn GuardrailCheck>>>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the check list for `agent`.  Last write wins.
    pub fn register(&mut self, agent: AgentType, checks: Vec<Arc<dyn GuardrailCheck>>) {
        self.checks.insert(agent, checks);
    }

    /// The checks for `agent` in registration order; empty when none are
    /// registered.
    pub fn checks(&self, agent: AgentType) -> Vec<Arc<dyn GuardrailCheck>> {
        self.checks.get(&agent).cloned().unwrap_or_default()
    }

    pub fn len(&self, agent: AgentType) -> usize {
        self.checks.get(&agent).map_or(0, Vec::len)
    }
}
