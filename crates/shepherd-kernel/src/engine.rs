//! [`GuardrailEngine`] – the single interception point every shopping agent
//! must pass an action through before it may affect a user or a transaction.
//!
//! [`GuardrailEngine::validate_agent_action`] enforces, in order:
//!
//! 1. **Circuit breaker**: a suspended agent is refused with
//!    [`GuardrailError::CircuitBreakerOpen`] before any check runs, and
//!    nothing is recorded.
//! 2. **Checks**: every [`GuardrailCheck`] registered for the agent runs in
//!    registration order against the action's original payload.  A rejected
//!    check with an auto-correction contributes a warning and a corrected
//!    payload; any other failure stops the chain with a rejected
//!    [`GuardrailResult`] and one recorded violation.
//! 3. **Audit**: an approved action is appended to the audit trail and feeds
//!    the breaker's cool-down.
//!
//! Only [`GuardrailError`] values escape as errors.  Ordinary check failures
//! are folded into `GuardrailResult { approved: false, .. }`, and persistence
//! failures never surface at all.
//!
//! # Example
//!
//! ```
//! use shepherd_kernel::{EngineConfig, GuardrailEngine};
//! use shepherd_types::{AgentAction, AgentType, UserProfile};
//! use serde_json::json;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let engine = GuardrailEngine::new(EngineConfig::default()).unwrap();
//!
//! // No checks registered: approved, one audit entry.
//! let action = AgentAction::new("predict_return", json!({ "orderId": "o-1" }));
//! let result = engine
//!     .validate_agent_action(AgentType::ReturnsPredictor, &action, &UserProfile::new("u1"))
//!     .await
//!     .unwrap();
//! assert!(result.approved);
//!
//! // The kill switch suspends every agent.
//! engine.emergency_kill_switch();
//! assert!(engine
//!     .validate_agent_action(AgentType::ReturnsPredictor, &action, &UserProfile::new("u1"))
//!     .await
//!     .is_err());
//! # });
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde_json::Value;
use shepherd_types::{
    AgentAction, AgentType, AuditLog, CircuitBreakerState, GuardrailDashboard, GuardrailError,
    GuardrailResult, GuardrailViolation, UserProfile, ViolationStats,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::check::{CheckError, CheckRegistry, GuardrailCheck};
use crate::circuit_breaker::{BreakerStore, BreakerTransition};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::persistence::{PersistHandle, PersistRecord};
use crate::violation_log::ViolationLog;

/// Breakers and the log live behind one lock so that "append violation →
/// recompute rate → maybe open" is atomic with respect to other decisions.
struct EngineState {
    breakers: BreakerStore,
    log: ViolationLog,
}

pub struct GuardrailEngine {
    registry: RwLock<CheckRegistry>,
    state: Mutex<EngineState>,
    clock: Arc<dyn Clock>,
    persistence: Option<PersistHandle>,
    audit_rejections: bool,
}

impl GuardrailEngine {
    /// Build an engine with one closed breaker per configured agent, the
    /// system clock, and no durable store.
    ///
    /// # Errors
    ///
    /// [`GuardrailError::InvalidConfig`] when `config` fails
    /// [`EngineConfig::validate`].
    pub fn new(config: EngineConfig) -> Result<Self, GuardrailError> {
        config.validate()?;
        info!(
            agents = config.agents.len(),
            threshold = config.violation_rate_threshold,
            window = config.rate_window,
            cooldown_secs = config.cooldown_secs,
            "guardrail engine initialised"
        );
        Ok(Self {
            registry: RwLock::new(CheckRegistry::new()),
            state: Mutex::new(EngineState {
                breakers: BreakerStore::new(&config),
                log: ViolationLog::new(config.history_capacity, config.stats_rate_floor),
            }),
            clock: Arc::new(SystemClock),
            persistence: None,
            audit_rejections: config.audit_rejections,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Mirror every record to the durable store behind `handle`.
    pub fn with_persistence(mut self, handle: PersistHandle) -> Self {
        self.persistence = Some(handle);
        self
    }

    // -----------------------------------------------------------------------
    // Check registry
    // -----------------------------------------------------------------------

    /// Replace the check list for `agent`.
    pub fn register_checks(&self, agent: AgentType, checks: Vec<Arc<dyn GuardrailCheck>>) {
        let count = checks.len();
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(agent, checks);
        info!(agent = %agent, checks = count, "guardrail checks registered");
    }

    pub fn check_count(&self, agent: AgentType) -> usize {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len(agent)
    }

    // -----------------------------------------------------------------------
    // Validation pipeline
    // -----------------------------------------------------------------------

    /// Decide whether `agent` may perform `action` for `user`.
    ///
    /// # Errors
    ///
    /// - [`GuardrailError::UnknownAgent`] – `agent` is not in the engine's
    ///   configured agent set.
    /// - [`GuardrailError::CircuitBreakerOpen`] – the agent is suspended.
    /// - [`GuardrailError::Escalated`] – a check raised
    ///   [`CheckError::Escalated`]; the violation is recorded first.
    pub async fn validate_agent_action(
        &self,
        agent: AgentType,
        action: &AgentAction,
        user: &UserProfile,
    ) -> Result<GuardrailResult, GuardrailError> {
        {
            let mut state = self.lock_state();
            if !state.breakers.contains(agent) {
                return Err(GuardrailError::UnknownAgent(agent.to_string()));
            }
            if state.breakers.is_open(agent, self.clock.now()) {
                warn!(agent = %agent, action = %action.action_type, "action refused: circuit breaker open");
                return Err(GuardrailError::CircuitBreakerOpen { agent });
            }
        }

        let checks = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .checks(agent);

        let mut warnings: Vec<String> = Vec::new();
        let mut candidate: Option<Value> = None;

        for check in &checks {
            match check.validate(&action.payload, user).await {
                Ok(true) => {
                    debug!(agent = %agent, check = check.name(), "check passed");
                }
                Ok(false) if check.supports_auto_correct() => {
                    match check.auto_correct(&action.payload, user).await {
                        Ok(corrected) => {
                            debug!(agent = %agent, check = check.name(), "check auto-corrected payload");
                            warnings.push(format!("Auto-corrected: {}", check.reason()));
                            candidate = Some(corrected);
                        }
                        Err(e) => {
                            debug!(agent = %agent, check = check.name(), error = %e, "auto-correction failed");
                            self.record_violation(agent, action, user, check.as_ref(), check.reason());
                            return Ok(self.reject(agent, action, user, check.reason(), warnings));
                        }
                    }
                }
                Ok(false) => {
                    self.record_violation(agent, action, user, check.as_ref(), check.reason());
                    return Ok(self.reject(agent, action, user, check.reason(), warnings));
                }
                Err(CheckError::Escalated(message)) => {
                    let reason = format!("Validation error: {message}");
                    self.record_violation(agent, action, user, check.as_ref(), &reason);
                    error!(agent = %agent, check = check.name(), %message, "check escalated");
                    return Err(GuardrailError::Escalated {
                        agent,
                        check: check.name().to_string(),
                        message,
                    });
                }
                Err(CheckError::Failed(message)) => {
                    let reason = format!("Validation error: {message}");
                    self.record_violation(agent, action, user, check.as_ref(), &reason);
                    return Ok(self.reject(agent, action, user, &reason, warnings));
                }
            }
        }

        let result = GuardrailResult {
            approved: true,
            reason: None,
            warnings: (!warnings.is_empty()).then_some(warnings),
            modified: candidate.filter(|corrected| corrected != &action.payload),
        };
        self.record_audit(agent, action, user, &result, true);
        Ok(result)
    }

    fn reject(
        &self,
        agent: AgentType,
        action: &AgentAction,
        user: &UserProfile,
        reason: &str,
        warnings: Vec<String>,
    ) -> GuardrailResult {
        let result = GuardrailResult::rejected(reason, warnings);
        if self.audit_rejections {
            self.record_audit(agent, action, user, &result, false);
        }
        result
    }

    fn record_violation(
        &self,
        agent: AgentType,
        action: &AgentAction,
        user: &UserProfile,
        check: &dyn GuardrailCheck,
        reason: &str,
    ) {
        let now = self.clock.now();
        let violation = GuardrailViolation {
            agent,
            action_type: action.action_type.clone(),
            user_id: user.attributed_id(),
            reason: reason.to_string(),
            severity: check.severity(),
            timestamp: now,
            payload: action.payload.clone(),
            check_name: check.name().to_string(),
        };
        warn!(
            agent = %agent,
            action = %action.action_type,
            check = check.name(),
            severity = %violation.severity,
            reason,
            "guardrail violation"
        );

        let transition = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            state.log.push_violation(violation.clone());
            state.breakers.record_violation(agent, &state.log, now)
        };
        if transition == BreakerTransition::Opened {
            warn!(agent = %agent, "agent suspended by circuit breaker");
        }
        self.persist(PersistRecord::Violation(violation));
    }

    fn record_audit(
        &self,
        agent: AgentType,
        action: &AgentAction,
        user: &UserProfile,
        result: &GuardrailResult,
        success: bool,
    ) {
        let now = self.clock.now();
        let entry = AuditLog {
            id: Uuid::new_v4(),
            agent,
            action_type: action.action_type.clone(),
            user_id: user.attributed_id(),
            result: result.clone(),
            timestamp: now,
            payload: action.payload.clone(),
        };
        {
            let mut state = self.lock_state();
            state.log.push_audit(entry.clone());
            if success {
                state.breakers.record_success(agent, now);
            }
        }
        self.persist(PersistRecord::Audit(entry));
    }

    fn persist(&self, record: PersistRecord) {
        if let Some(handle) = &self.persistence {
            handle.submit(record);
        }
    }

    // -----------------------------------------------------------------------
    // Admin controls
    // -----------------------------------------------------------------------

    /// Open every breaker unconditionally.
    pub fn emergency_kill_switch(&self) {
        let now = self.clock.now();
        self.lock_state().breakers.trip_all(now);
        error!("EMERGENCY KILL SWITCH: all agent circuit breakers opened");
    }

    /// Close `agent`'s breaker and clear its failure count.
    ///
    /// # Errors
    ///
    /// [`GuardrailError::UnknownAgent`] for agents outside the configured set.
    pub fn reset_circuit_breaker(&self, agent: AgentType) -> Result<(), GuardrailError> {
        if self.lock_state().breakers.reset(agent) {
            info!(agent = %agent, "circuit breaker reset by operator");
            Ok(())
        } else {
            Err(GuardrailError::UnknownAgent(agent.to_string()))
        }
    }

    pub fn get_violation_stats(&self) -> ViolationStats {
        self.lock_state().log.stats()
    }

    /// # Errors
    ///
    /// [`GuardrailError::UnknownAgent`] for agents outside the configured set.
    pub fn circuit_breaker(&self, agent: AgentType) -> Result<CircuitBreakerState, GuardrailError> {
        let now = self.clock.now();
        self.lock_state()
            .breakers
            .state(agent, now)
            .ok_or_else(|| GuardrailError::UnknownAgent(agent.to_string()))
    }

    pub fn circuit_breakers(&self) -> BTreeMap<AgentType, CircuitBreakerState> {
        let now = self.clock.now();
        self.lock_state().breakers.snapshot(now)
    }

    /// Most recent `n` violations for `agent`, newest first.
    pub fn recent_violations(&self, agent: AgentType, n: usize) -> Vec<GuardrailViolation> {
        self.lock_state().log.recent_violations(Some(agent), n)
    }

    /// Most recent `n` audit entries for `agent`, newest first.
    pub fn recent_audit_logs(&self, agent: AgentType, n: usize) -> Vec<AuditLog> {
        self.lock_state().log.recent_audits(Some(agent), n)
    }

    pub fn audit_log_count(&self) -> u64 {
        self.lock_state().log.total_audits()
    }

    /// Breakers, statistics, and the newest `recent` violations across all
    /// agents in one consistent read.
    pub fn dashboard(&self, recent: usize) -> GuardrailDashboard {
        let now = self.clock.now();
        let mut state = self.lock_state();
        GuardrailDashboard {
            circuit_breakers: state.breakers.snapshot(now),
            stats: state.log.stats(),
            recent_violations: state.log.recent_violations(None, recent),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::persistence::PersistenceWriter;
    use crate::testing::{MissingTableStore, RecordingStore, StaticCheck};
    use chrono::{Duration, Utc};
    use serde_json::json;
    use shepherd_types::Severity;

    fn engine() -> GuardrailEngine {
        GuardrailEngine::new(EngineConfig::default()).unwrap()
    }

    fn engine_with_clock() -> (GuardrailEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = engine().with_clock(clock.clone());
        (engine, clock)
    }

    fn action(kind: &str) -> AgentAction {
        AgentAction::new(kind, json!({}))
    }

    fn user() -> UserProfile {
        UserProfile::new("u1")
    }

    async fn drive_violations(engine: &GuardrailEngine, agent: AgentType, n: usize) {
        for _ in 0..n {
            let result = engine
                .validate_agent_action(agent, &action("query"), &user())
                .await
                .unwrap();
            assert!(!result.approved);
        }
    }

    // ------------------------------------------------------------------ scenarios

    #[tokio::test]
    async fn rejecting_check_without_correction_records_violation_only() {
        let engine = engine();
        engine.register_checks(
            AgentType::CartAgent,
            vec![StaticCheck::rejecting("budget", "blocked").into_arc()],
        );

        let result = engine
            .validate_agent_action(
                AgentType::CartAgent,
                &AgentAction::new("add_item", json!({})),
                &user(),
            )
            .await
            .unwrap();

        assert!(!result.approved);
        assert_eq!(result.reason.as_deref(), Some("blocked"));
        assert_eq!(engine.get_violation_stats().total_violations, 1);
        assert_eq!(engine.audit_log_count(), 0);

        let recorded = engine.recent_violations(AgentType::CartAgent, 10);
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].check_name, "budget");
        assert_eq!(recorded[0].action_type, "add_item");
        assert_eq!(recorded[0].user_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn auto_correction_approves_with_modified_payload() {
        let engine = engine();
        engine.register_checks(
            AgentType::SizePredictor,
            vec![
                StaticCheck::rejecting("fit", "size out of range")
                    .correcting(json!({ "fixed": true }))
                    .into_arc(),
            ],
        );

        let original = AgentAction::new("predict_size", json!({ "size": "XXL" }));
        let result = engine
            .validate_agent_action(AgentType::SizePredictor, &original, &user())
            .await
            .unwrap();

        assert!(result.approved);
        assert_eq!(
            result.warnings,
            Some(vec!["Auto-corrected: size out of range".to_string()])
        );
        assert_eq!(result.modified, Some(json!({ "size": "XXL", "fixed": true })));
        assert_eq!(engine.get_violation_stats().total_violations, 0);
        assert_eq!(engine.audit_log_count(), 1);
    }

    #[tokio::test]
    async fn breaker_opens_after_sixth_violation() {
        let engine = engine();
        engine.register_checks(
            AgentType::SearchAgent,
            vec![StaticCheck::rejecting("content", "unsafe query").into_arc()],
        );

        drive_violations(&engine, AgentType::SearchAgent, 6).await;

        let err = engine
            .validate_agent_action(AgentType::SearchAgent, &action("query"), &user())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GuardrailError::CircuitBreakerOpen {
                agent: AgentType::SearchAgent
            }
        );
    }

    #[tokio::test]
    async fn thrown_check_error_becomes_rejection() {
        let engine = engine();
        engine.register_checks(
            AgentType::PersonalShopper,
            vec![StaticCheck::failing("catalog", CheckError::failed("catalog unavailable")).into_arc()],
        );

        let result = engine
            .validate_agent_action(AgentType::PersonalShopper, &action("recommend"), &user())
            .await
            .unwrap();

        assert!(!result.approved);
        assert_eq!(
            result.reason.as_deref(),
            Some("Validation error: catalog unavailable")
        );
        let recorded = engine.recent_violations(AgentType::PersonalShopper, 10);
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].reason, "Validation error: catalog unavailable");
    }

    #[tokio::test]
    async fn agent_without_checks_is_approved_and_audited() {
        let engine = engine();
        let result = engine
            .validate_agent_action(AgentType::ReturnsPredictor, &action("predict"), &user())
            .await
            .unwrap();

        assert!(result.approved);
        assert_eq!(result.warnings, None);
        assert_eq!(result.modified, None);
        assert_eq!(engine.audit_log_count(), 1);
        let audits = engine.recent_audit_logs(AgentType::ReturnsPredictor, 10);
        assert_eq!(audits[0].result, result);
    }

    // ------------------------------------------------------------------ properties

    #[tokio::test]
    async fn open_breaker_runs_no_checks_and_records_nothing() {
        let engine = engine();
        let check = Arc::new(StaticCheck::rejecting("content", "blocked"));
        engine.register_checks(AgentType::SearchAgent, vec![check.clone()]);
        drive_violations(&engine, AgentType::SearchAgent, 6).await;

        let calls_before = check.calls();
        let violations_before = engine.get_violation_stats().total_violations;
        let audits_before = engine.audit_log_count();

        for _ in 0..3 {
            assert!(engine
                .validate_agent_action(AgentType::SearchAgent, &action("query"), &user())
                .await
                .is_err());
        }

        assert_eq!(check.calls(), calls_before);
        assert_eq!(engine.get_violation_stats().total_violations, violations_before);
        assert_eq!(engine.audit_log_count(), audits_before);
    }

    #[tokio::test]
    async fn kill_switch_blocks_every_agent() {
        let engine = engine();
        engine.emergency_kill_switch();
        for agent in AgentType::ALL {
            let err = engine
                .validate_agent_action(agent, &action("anything"), &user())
                .await
                .unwrap_err();
            assert_eq!(err, GuardrailError::CircuitBreakerOpen { agent });
        }
    }

    #[tokio::test]
    async fn reset_reopens_the_gate() {
        let engine = engine();
        engine.emergency_kill_switch();
        engine.reset_circuit_breaker(AgentType::CartAgent).unwrap();

        let result = engine
            .validate_agent_action(AgentType::CartAgent, &action("add_item"), &user())
            .await
            .unwrap();
        assert!(result.approved);
        assert_eq!(
            engine.circuit_breaker(AgentType::CartAgent).unwrap(),
            CircuitBreakerState::default()
        );
        // Other agents stay suspended.
        assert!(engine.circuit_breaker(AgentType::SearchAgent).unwrap().is_open);
    }

    #[tokio::test]
    async fn violation_rate_stays_within_unit_interval() {
        let config = EngineConfig {
            stats_rate_floor: 1,
            violation_rate_threshold: 1.0,
            ..Default::default()
        };
        let engine = GuardrailEngine::new(config).unwrap();
        engine.register_checks(
            AgentType::CartAgent,
            vec![StaticCheck::rejecting("budget", "blocked").into_arc()],
        );
        drive_violations(&engine, AgentType::CartAgent, 50).await;
        let rate = engine.get_violation_stats().violation_rate;
        assert!((0.0..=1.0).contains(&rate));
        assert_eq!(rate, 1.0);
    }

    // ------------------------------------------------------------------ pipeline details

    #[tokio::test]
    async fn later_checks_see_original_payload_and_last_correction_wins() {
        let engine = engine();
        let observer = Arc::new(StaticCheck::passing("observer"));
        engine.register_checks(
            AgentType::MakeupArtist,
            vec![
                StaticCheck::rejecting("shade", "shade unavailable")
                    .correcting(json!({ "shade": "ivory" }))
                    .into_arc(),
                observer.clone(),
                StaticCheck::rejecting("finish", "finish unavailable")
                    .correcting(json!({ "finish": "matte" }))
                    .into_arc(),
            ],
        );

        let original = AgentAction::new("apply_look", json!({ "shade": "neon" }));
        let result = engine
            .validate_agent_action(AgentType::MakeupArtist, &original, &user())
            .await
            .unwrap();

        assert_eq!(observer.seen_payloads(), vec![json!({ "shade": "neon" })]);
        assert_eq!(
            result.warnings,
            Some(vec![
                "Auto-corrected: shade unavailable".to_string(),
                "Auto-corrected: finish unavailable".to_string(),
            ])
        );
        assert_eq!(result.modified, Some(json!({ "shade": "neon", "finish": "matte" })));
    }

    #[tokio::test]
    async fn failed_correction_rejects_and_stops_the_chain() {
        let engine = engine();
        let after = Arc::new(StaticCheck::passing("after"));
        engine.register_checks(
            AgentType::CartAgent,
            vec![
                StaticCheck::rejecting("qty", "quantity too high")
                    .correcting(json!({ "qty": 1 }))
                    .into_arc(),
                StaticCheck::rejecting("budget", "over budget")
                    .correction_failing(CheckError::failed("cannot fit budget"))
                    .into_arc(),
                after.clone(),
            ],
        );

        let result = engine
            .validate_agent_action(AgentType::CartAgent, &action("add_item"), &user())
            .await
            .unwrap();

        assert!(!result.approved);
        assert_eq!(result.reason.as_deref(), Some("over budget"));
        assert_eq!(
            result.warnings,
            Some(vec!["Auto-corrected: quantity too high".to_string()])
        );
        assert_eq!(after.calls(), 0);
        assert_eq!(engine.recent_violations(AgentType::CartAgent, 10)[0].check_name, "budget");
    }

    #[tokio::test]
    async fn correction_identical_to_original_is_not_reported_as_modified() {
        let engine = engine();
        engine.register_checks(
            AgentType::CartAgent,
            vec![
                StaticCheck::rejecting("qty", "quantity adjusted")
                    .correcting(json!({ "qty": 2 }))
                    .into_arc(),
            ],
        );
        let result = engine
            .validate_agent_action(
                AgentType::CartAgent,
                &AgentAction::new("add_item", json!({ "qty": 2 })),
                &user(),
            )
            .await
            .unwrap();
        assert!(result.approved);
        assert!(result.warnings.is_some());
        assert_eq!(result.modified, None);
    }

    #[tokio::test]
    async fn escalated_error_propagates_after_recording_violation() {
        let engine = engine();
        engine.register_checks(
            AgentType::CartAgent,
            vec![
                StaticCheck::failing("fraud", CheckError::escalated("card testing detected"))
                    .with_severity(Severity::Critical)
                    .into_arc(),
            ],
        );

        let err = engine
            .validate_agent_action(AgentType::CartAgent, &action("checkout"), &user())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GuardrailError::Escalated { ref check, ref message, .. }
                if check == "fraud" && message == "card testing detected"
        ));
        let stats = engine.get_violation_stats();
        assert_eq!(stats.total_violations, 1);
        assert_eq!(stats.by_severity[&Severity::Critical], 1);
        assert_eq!(engine.audit_log_count(), 0);
    }

    #[tokio::test]
    async fn first_rejection_short_circuits() {
        let engine = engine();
        let later = Arc::new(StaticCheck::passing("later"));
        engine.register_checks(
            AgentType::SearchAgent,
            vec![StaticCheck::rejecting("first", "nope").into_arc(), later.clone()],
        );
        engine
            .validate_agent_action(AgentType::SearchAgent, &action("query"), &user())
            .await
            .unwrap();
        assert_eq!(later.calls(), 0);
    }

    #[tokio::test]
    async fn re_registration_replaces_checks() {
        let engine = engine();
        engine.register_checks(
            AgentType::CartAgent,
            vec![StaticCheck::rejecting("old", "old rule").into_arc()],
        );
        engine.register_checks(AgentType::CartAgent, vec![StaticCheck::passing("new").into_arc()]);
        assert_eq!(engine.check_count(AgentType::CartAgent), 1);
        assert!(engine
            .validate_agent_action(AgentType::CartAgent, &action("add_item"), &user())
            .await
            .unwrap()
            .approved);
    }

    #[tokio::test]
    async fn audit_rejections_flag_audits_rejected_actions() {
        let config = EngineConfig {
            audit_rejections: true,
            ..Default::default()
        };
        let engine = GuardrailEngine::new(config).unwrap();
        engine.register_checks(
            AgentType::CartAgent,
            vec![StaticCheck::rejecting("budget", "blocked").into_arc()],
        );
        engine
            .validate_agent_action(AgentType::CartAgent, &action("add_item"), &user())
            .await
            .unwrap();
        let audits = engine.recent_audit_logs(AgentType::CartAgent, 10);
        assert_eq!(audits.len(), 1);
        assert!(!audits[0].result.approved);
        // A rejection is not a success signal for the breaker.
        assert_eq!(engine.circuit_breaker(AgentType::CartAgent).unwrap().failure_count, 1);
    }

    #[tokio::test]
    async fn unknown_agent_is_refused() {
        let config = EngineConfig {
            agents: vec![AgentType::CartAgent],
            ..Default::default()
        };
        let engine = GuardrailEngine::new(config).unwrap();
        let err = engine
            .validate_agent_action(AgentType::SearchAgent, &action("query"), &user())
            .await
            .unwrap_err();
        assert_eq!(err, GuardrailError::UnknownAgent("searchAgent".into()));
        assert!(engine.reset_circuit_breaker(AgentType::SearchAgent).is_err());
        assert!(engine.circuit_breaker(AgentType::SearchAgent).is_err());
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let config = EngineConfig {
            rate_window: 0,
            ..Default::default()
        };
        assert!(matches!(
            GuardrailEngine::new(config),
            Err(GuardrailError::InvalidConfig(_))
        ));
    }

    // ------------------------------------------------------------------ cool-down

    #[tokio::test]
    async fn suspension_lifts_lazily_after_cooldown() {
        let (engine, clock) = engine_with_clock();
        engine.register_checks(
            AgentType::SearchAgent,
            vec![StaticCheck::rejecting("content", "blocked").into_arc()],
        );
        drive_violations(&engine, AgentType::SearchAgent, 6).await;
        assert!(engine.circuit_breaker(AgentType::SearchAgent).unwrap().is_open);

        clock.advance(Duration::minutes(59));
        assert!(engine
            .validate_agent_action(AgentType::SearchAgent, &action("query"), &user())
            .await
            .is_err());

        clock.advance(Duration::minutes(2));
        let state = engine.circuit_breaker(AgentType::SearchAgent).unwrap();
        assert!(!state.is_open);
        assert_eq!(state.failure_count, 0);
        // Back past the breaker; the check itself still rejects.
        let result = engine
            .validate_agent_action(AgentType::SearchAgent, &action("query"), &user())
            .await
            .unwrap();
        assert!(!result.approved);
    }

    #[tokio::test]
    async fn kill_switch_also_expires_after_cooldown() {
        let (engine, clock) = engine_with_clock();
        engine.emergency_kill_switch();
        clock.advance(Duration::hours(2));
        assert!(engine
            .validate_agent_action(AgentType::CartAgent, &action("add_item"), &user())
            .await
            .unwrap()
            .approved);
    }

    #[tokio::test]
    async fn approvals_cool_down_failure_count() {
        let engine = engine();
        let gate = Arc::new(StaticCheck::rejecting("budget", "blocked"));
        engine.register_checks(AgentType::CartAgent, vec![gate.clone()]);
        drive_violations(&engine, AgentType::CartAgent, 3).await;
        assert_eq!(engine.circuit_breaker(AgentType::CartAgent).unwrap().failure_count, 3);

        engine.register_checks(AgentType::CartAgent, vec![]);
        for _ in 0..5 {
            engine
                .validate_agent_action(AgentType::CartAgent, &action("add_item"), &user())
                .await
                .unwrap();
        }
        assert_eq!(engine.circuit_breaker(AgentType::CartAgent).unwrap().failure_count, 0);
    }

    // ------------------------------------------------------------------ admin reads

    #[tokio::test]
    async fn dashboard_reports_breakers_stats_and_recent_violations() {
        let engine = engine();
        engine.register_checks(
            AgentType::CartAgent,
            vec![StaticCheck::rejecting("budget", "blocked").with_severity(Severity::High).into_arc()],
        );
        engine.register_checks(
            AgentType::SearchAgent,
            vec![StaticCheck::rejecting("content", "unsafe").into_arc()],
        );
        drive_violations(&engine, AgentType::CartAgent, 2).await;
        drive_violations(&engine, AgentType::SearchAgent, 1).await;

        let dashboard = engine.dashboard(2);
        assert_eq!(dashboard.circuit_breakers.len(), AgentType::ALL.len());
        assert_eq!(dashboard.stats.total_violations, 3);
        assert_eq!(dashboard.stats.by_agent[&AgentType::CartAgent], 2);
        assert_eq!(dashboard.stats.by_severity[&Severity::High], 2);
        assert_eq!(dashboard.recent_violations.len(), 2);
        assert_eq!(dashboard.recent_violations[0].agent, AgentType::SearchAgent);
        assert_eq!(engine.circuit_breakers().len(), AgentType::ALL.len());
    }

    #[test]
    fn stats_on_fresh_engine_are_empty() {
        let stats = engine().get_violation_stats();
        assert_eq!(stats, ViolationStats::default());
    }

    // ------------------------------------------------------------------ persistence

    #[tokio::test]
    async fn records_are_mirrored_to_the_store() {
        let store = RecordingStore::default();
        let writer = PersistenceWriter::spawn(Box::new(store.clone())).unwrap();
        let engine = engine().with_persistence(writer.handle());
        engine.register_checks(
            AgentType::CartAgent,
            vec![StaticCheck::rejecting("budget", "blocked").into_arc()],
        );

        engine
            .validate_agent_action(AgentType::CartAgent, &action("add_item"), &user())
            .await
            .unwrap();
        engine
            .validate_agent_action(AgentType::SearchAgent, &action("query"), &user())
            .await
            .unwrap();

        drop(engine);
        assert!(writer.shutdown().is_some());
        assert_eq!(store.violations(), 1);
        assert_eq!(store.audits(), 1);
    }

    #[tokio::test]
    async fn missing_tables_do_not_change_decisions() {
        let writer = PersistenceWriter::spawn(Box::new(MissingTableStore::default())).unwrap();
        let engine = engine().with_persistence(writer.handle());
        engine.register_checks(
            AgentType::CartAgent,
            vec![StaticCheck::rejecting("budget", "blocked").into_arc()],
        );

        let rejected = engine
            .validate_agent_action(AgentType::CartAgent, &action("add_item"), &user())
            .await
            .unwrap();
        let approved = engine
            .validate_agent_action(AgentType::SearchAgent, &action("query"), &user())
            .await
            .unwrap();

        assert!(!rejected.approved);
        assert!(approved.approved);
        drop(engine);
        writer.shutdown();
    }

    #[tokio::test]
    async fn engine_is_shareable_across_tasks() {
        let engine = Arc::new(engine());
        engine.register_checks(
            AgentType::CartAgent,
            vec![StaticCheck::passing("budget").into_arc()],
        );
        let mut handles = Vec::new();
        for i in 0..8 {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                engine
                    .validate_agent_action(
                        AgentType::CartAgent,
                        &AgentAction::new("add_item", json!({ "n": i })),
                        &UserProfile::new(format!("u{i}")),
                    )
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().approved);
        }
        assert_eq!(engine.audit_log_count(), 8);
    }
}
