//! [`EngineConfig`] – tuning knobs for the guardrail engine.
//!
//! Every field has a serde default so a partial `[guardrail]` table in the
//! operator's config file is enough.

use serde::{Deserialize, Serialize};
use shepherd_types::{AgentType, GuardrailError};

fn default_agents() -> Vec<AgentType> {
    AgentType::ALL.to_vec()
}
fn default_violation_rate_threshold() -> f64 {
    0.05
}
fn default_rate_window() -> usize {
    100
}
fn default_cooldown_secs() -> u64 {
    3600
}
fn default_history_capacity() -> usize {
    10_000
}
fn default_stats_rate_floor() -> u64 {
    1000
}

/// Configuration bundle for [`GuardrailEngine`][crate::GuardrailEngine].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Agents the engine accepts. Each gets exactly one circuit breaker.
    #[serde(default = "default_agents")]
    pub agents: Vec<AgentType>,

    /// Share of the rolling violation window above which a breaker opens.
    #[serde(default = "default_violation_rate_threshold")]
    pub violation_rate_threshold: f64,

    /// Number of most recent engine-wide violations the rate is computed over.
    #[serde(default = "default_rate_window")]
    pub rate_window: usize,

    /// How long an open breaker stays open before it may close again.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Ring-buffer capacity for in-memory violations and audit entries.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Minimum denominator for the reported violation rate.
    #[serde(default = "default_stats_rate_floor")]
    pub stats_rate_floor: u64,

    /// Also write audit entries for rejected (non-escalated) actions.
    #[serde(default)]
    pub audit_rejections: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            agents: default_agents(),
            violation_rate_threshold: default_violation_rate_threshold(),
            rate_window: default_rate_window(),
            cooldown_secs: default_cooldown_secs(),
            history_capacity: default_history_capacity(),
            stats_rate_floor: default_stats_rate_floor(),
            audit_rejections: false,
        }
    }
}

impl EngineConfig {
    /// Cool-down as a [`chrono::Duration`].
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.cooldown_secs).unwrap_or(i64::MAX))
    }

    /// Reject configurations the breaker arithmetic cannot work with.
    ///
    /// # Errors
    ///
    /// [`GuardrailError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<(), GuardrailError> {
        if !(0.0..=1.0).contains(&self.violation_rate_threshold) {
            return Err(GuardrailError::InvalidConfig(format!(
                "violation_rate_threshold {} must be within [0, 1]",
                self.violation_rate_threshold
            )));
        }
        if self.rate_window == 0 {
            return Err(GuardrailError::InvalidConfig(
                "rate_window must be greater than zero".into(),
            ));
        }
        if self.history_capacity < self.rate_window {
            return Err(GuardrailError::InvalidConfig(format!(
                "history_capacity {} must be at least rate_window {}",
                self.history_capacity, self.rate_window
            )));
        }
        if self.stats_rate_floor == 0 {
            return Err(GuardrailError::InvalidConfig(
                "stats_rate_floor must be greater than zero".into(),
            ));
        }
        if self.agents.is_empty() {
            return Err(GuardrailError::InvalidConfig(
                "at least one agent must be configured".into(),
            ));
        }
        Ok(())
    }
}
