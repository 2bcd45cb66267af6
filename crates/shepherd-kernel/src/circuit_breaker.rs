//! [`BreakerStore`] – per-agent circuit breakers.
//!
//! Each known agent owns exactly one [`CircuitBreakerState`], created closed
//! when the store is built and never removed.  A breaker opens when the
//! agent's share of the most recent engine-wide violations exceeds the
//! configured threshold, and closes again once the cool-down has elapsed.
//!
//! The cool-down is applied lazily: every query through
//! [`BreakerStore::is_open`] or [`BreakerStore::state`] first closes a
//! breaker whose cool-down has passed, so a suspension never outlives it even
//! when the agent reports no successes.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use shepherd_types::{AgentType, CircuitBreakerState};
use tracing::info;

use crate::config::EngineConfig;
use crate::violation_log::ViolationLog;

/// What a state update did to a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTransition {
    Unchanged,
    Opened,
    Closed,
}

pub struct BreakerStore {
    breakers: HashMap<AgentType, CircuitBreakerState>,
    threshold: f64,
    window: usize,
    cooldown: Duration,
}

impl BreakerStore {
    /// One closed breaker for every agent in `config.agents`.
    pub fn new(config: &EngineConfig) -> Self {
        let breakers = config
            .agents
            .iter()
            .map(|agent| (*agent, CircuitBreakerState::default()))
            .collect();
        Self {
            breakers,
            threshold: config.violation_rate_threshold,
            window: config.rate_window.max(1),
            cooldown: config.cooldown(),
        }
    }

    pub fn contains(&self, agent: AgentType) -> bool {
        self.breakers.contains_key(&agent)
    }

    /// `true` while `agent`'s breaker is open after applying the lazy
    /// cool-down.  Unknown agents report closed.
    pub fn is_open(&mut self, agent: AgentType, now: DateTime<Utc>) -> bool {
        self.expire(agent, now);
        self.breakers.get(&agent).is_some_and(|b| b.is_open)
    }

    pub fn state(&mut self, agent: AgentType, now: DateTime<Utc>) -> Option<CircuitBreakerState> {
        self.expire(agent, now);
        self.breakers.get(&agent).cloned()
    }

    /// Every breaker, cool-down applied.
    pub fn snapshot(&mut self, now: DateTime<Utc>) -> BTreeMap<AgentType, CircuitBreakerState> {
        let agents: Vec<AgentType> = self.breakers.keys().copied().collect();
        agents
            .into_iter()
            .filter_map(|agent| self.state(agent, now).map(|s| (agent, s)))
            .collect()
    }

    /// Update `agent`'s breaker after a violation has been appended to `log`.
    pub fn record_violation(
        &mut self,
        agent: AgentType,
        log: &ViolationLog,
        now: DateTime<Utc>,
    ) -> BreakerTransition {
        let rate = log.window_count(agent, self.window) as f64 / self.window as f64;
        let threshold = self.threshold;
        let Some(breaker) = self.breakers.get_mut(&agent) else {
            return BreakerTransition::Unchanged;
        };
        breaker.failure_count = breaker.failure_count.saturating_add(1);
        if rate > threshold && !breaker.is_open {
            breaker.is_open = true;
            breaker.opened_at = Some(now);
            info!(
                agent = %agent,
                violation_rate = rate,
                failure_count = breaker.failure_count,
                "circuit breaker opened"
            );
            return BreakerTransition::Opened;
        }
        BreakerTransition::Unchanged
    }

    /// Update `agent`'s breaker after an action completed without violation.
    pub fn record_success(&mut self, agent: AgentType, now: DateTime<Utc>) -> BreakerTransition {
        let cooldown = self.cooldown;
        let Some(breaker) = self.breakers.get_mut(&agent) else {
            return BreakerTransition::Unchanged;
        };
        if breaker.is_open {
            if cooled_down(breaker, now, cooldown) {
                close(breaker);
                info!(agent = %agent, "circuit breaker closed after cool-down");
                return BreakerTransition::Closed;
            }
        } else {
            breaker.failure_count = breaker.failure_count.saturating_sub(1);
        }
        BreakerTransition::Unchanged
    }

    /// Force `agent`'s breaker closed.  Returns `false` for unknown agents.
    pub fn reset(&mut self, agent: AgentType) -> bool {
        match self.breakers.get_mut(&agent) {
            Some(breaker) => {
                close(breaker);
                true
            }
            None => false,
        }
    }

    /// Force every breaker open, stamping `opened_at = now`.
    pub fn trip_all(&mut self, now: DateTime<Utc>) {
        for breaker in self.breakers.values_mut() {
            breaker.is_open = true;
            breaker.opened_at = Some(now);
        }
    }

    fn expire(&mut self, agent: AgentType, now: DateTime<Utc>) {
        let cooldown = self.cooldown;
        if let Some(breaker) = self.breakers.get_mut(&agent)
            && breaker.is_open
            && cooled_down(breaker, now, cooldown)
        {
            close(breaker);
            info!(agent = %agent, "circuit breaker cool-down elapsed; closing");
        }
    }
}

fn cooled_down(breaker: &CircuitBreakerState, now: DateTime<Utc>, cooldown: Duration) -> bool {
    breaker
        .opened_at
        .is_some_and(|opened| now - opened > cooldown)
}

fn close(breaker: &mut CircuitBreakerState) {
    breaker.is_open = false;
    breaker.failure_count = 0;
    breaker.opened_at = None;
}
