//! [`ViolationLog`] – in-memory violation and audit trail.
//!
//! Records are kept in two bounded ring buffers; once a buffer is full the
//! oldest record is evicted.  The running totals behind
//! [`ViolationLog::stats`] are never evicted, so statistics stay monotonic
//! for the process lifetime even though only recent records are retained.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use serde_json::json;
//! use shepherd_kernel::violation_log::ViolationLog;
//! use shepherd_types::{AgentType, GuardrailViolation, Severity};
//!
//! let mut log = ViolationLog::new(100, 1000);
//! log.push_violation(GuardrailViolation {
//!     agent: AgentType::CartAgent,
//!     action_type: "add_item".into(),
//!     user_id: Some("u1".into()),
//!     reason: "over budget".into(),
//!     severity: Severity::High,
//!     timestamp: Utc::now(),
//!     payload: json!({}),
//!     check_name: "budget".into(),
//! });
//!
//! assert_eq!(log.window_count(AgentType::CartAgent, 100), 1);
//! assert_eq!(log.stats().total_violations, 1);
//! ```

use std::collections::{BTreeMap, VecDeque};

use shepherd_types::{AgentType, AuditLog, GuardrailViolation, Severity, ViolationStats};

pub struct ViolationLog {
    capacity: usize,
    rate_floor: u64,
    violations: VecDeque<GuardrailViolation>,
    audits: VecDeque<AuditLog>,
    total_violations: u64,
    total_audits: u64,
    by_agent: BTreeMap<AgentType, u64>,
    by_severity: BTreeMap<Severity, u64>,
}

impl ViolationLog {
    /// `capacity` bounds each ring buffer; `rate_floor` is the minimum
    /// denominator of the reported violation rate.
    pub fn new(capacity: usize, rate_floor: u64) -> Self {
        Self {
            capacity: capacity.max(1),
            rate_floor: rate_floor.max(1),
            violations: VecDeque::new(),
            audits: VecDeque::new(),
            total_violations: 0,
            total_audits: 0,
            by_agent: BTreeMap::new(),
            by_severity: BTreeMap::new(),
        }
    }

    pub fn push_violation(&mut self, violation: GuardrailViolation) {
        self.total_violations += 1;
        *self.by_agent.entry(violation.agent).or_default() += 1;
        *self.by_severity.entry(violation.severity).or_default() += 1;
        self.violations.push_back(violation);
        while self.violations.len() > self.capacity {
            self.violations.pop_front();
        }
    }

    pub fn push_audit(&mut self, entry: AuditLog) {
        self.total_audits += 1;
        self.audits.push_back(entry);
        while self.audits.len() > self.capacity {
            self.audits.pop_front();
        }
    }

    /// Number of `agent`'s violations among the last `window` violations
    /// recorded across all agents.
    pub fn window_count(&self, agent: AgentType, window: usize) -> usize {
        self.violations
            .iter()
            .rev()
            .take(window)
            .filter(|v| v.agent == agent)
            .count()
    }

    /// The most recent `n` violations, newest first, optionally for one agent.
    pub fn recent_violations(&self, agent: Option<AgentType>, n: usize) -> Vec<GuardrailViolation> {
        self.violations
            .iter()
            .rev()
            .filter(|v| agent.is_none_or(|a| v.agent == a))
            .take(n)
            .cloned()
            .collect()
    }

    /// The most recent `n` audit entries, newest first, optionally for one agent.
    pub fn recent_audits(&self, agent: Option<AgentType>, n: usize) -> Vec<AuditLog> {
        self.audits
            .iter()
            .rev()
            .filter(|a| agent.is_none_or(|want| a.agent == want))
            .take(n)
            .cloned()
            .collect()
    }

    pub fn total_violations(&self) -> u64 {
        self.total_violations
    }

    pub fn total_audits(&self) -> u64 {
        self.total_audits
    }

    /// Aggregate counts plus the overall violation rate, clamped to `[0, 1]`.
    pub fn stats(&self) -> ViolationStats {
        let denominator = self.total_audits.max(self.rate_floor) as f64;
        let violation_rate = (self.total_violations as f64 / denominator).clamp(0.0, 1.0);
        ViolationStats {
            total_violations: self.total_violations,
            by_agent: self.by_agent.clone(),
            by_severity: self.by_severity.clone(),
            violation_rate,
        }
    }
}
