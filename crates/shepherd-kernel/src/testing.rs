//! Test doubles shared by the kernel's unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use shepherd_types::{Severity, UserProfile};

use crate::check::{CheckError, GuardrailCheck};
use crate::persistence::{GuardrailStore, PersistRecord, StoreError};
use shepherd_types::{AuditLog, GuardrailViolation};

pub(crate) enum Outcome {
    Pass,
    Reject,
    Fail(CheckError),
}

pub(crate) enum Correction {
    /// Copy the keys of this object over the payload.
    Merge(Value),
    Fail(CheckError),
}

/// A check whose verdict is fixed at construction.
pub(crate) struct StaticCheck {
    name: String,
    reason: String,
    severity: Severity,
    outcome: Outcome,
    correction: Option<Correction>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Value>>,
}

impl StaticCheck {
    fn new(name: &str, reason: &str, outcome: Outcome) -> Self {
        Self {
            name: name.to_string(),
            reason: reason.to_string(),
            severity: Severity::Medium,
            outcome,
            correction: None,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn passing(name: &str) -> Self {
        Self::new(name, "never rejects", Outcome::Pass)
    }

    pub(crate) fn rejecting(name: &str, reason: &str) -> Self {
        Self::new(name, reason, Outcome::Reject)
    }

    pub(crate) fn failing(name: &str, error: CheckError) -> Self {
        Self::new(name, "validation failed", Outcome::Fail(error))
    }

    pub(crate) fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub(crate) fn correcting(mut self, merge: Value) -> Self {
        self.correction = Some(Correction::Merge(merge));
        self
    }

    pub(crate) fn correction_failing(mut self, error: CheckError) -> Self {
        self.correction = Some(Correction::Fail(error));
        self
    }

    pub(crate) fn into_arc(self) -> Arc<dyn GuardrailCheck> {
        Arc::new(self)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn seen_payloads(&self) -> Vec<Value> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl GuardrailCheck for StaticCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn reason(&self) -> &str {
        &self.reason
    }

    fn severity(&self) -> Severity {
        self.severity
    }

    async fn validate(&self, payload: &Value, _user: &UserProfile) -> Result<bool, CheckError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(payload.clone());
        match &self.outcome {
            Outcome::Pass => Ok(true),
            Outcome::Reject => Ok(false),
            Outcome::Fail(e) => Err(e.clone()),
        }
    }

    fn supports_auto_correct(&self) -> bool {
        self.correction.is_some()
    }

    async fn auto_correct(&self, payload: &Value, _user: &UserProfile) -> Result<Value, CheckError> {
        match &self.correction {
            Some(Correction::Merge(patch)) => {
                let mut corrected = payload.clone();
                if let (Some(target), Some(fields)) = (corrected.as_object_mut(), patch.as_object()) {
                    for (k, v) in fields {
                        target.insert(k.clone(), v.clone());
                    }
                }
                Ok(corrected)
            }
            Some(Correction::Fail(e)) => Err(e.clone()),
            None => Err(CheckError::failed("no correction configured")),
        }
    }
}

/// Store that keeps every record it is handed.
#[derive(Clone, Default)]
pub(crate) struct RecordingStore {
    pub(crate) records: Arc<Mutex<Vec<PersistRecord>>>,
}

impl RecordingStore {
    pub(crate) fn violations(&self) -> usize {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| matches!(r, PersistRecord::Violation(_)))
            .count()
    }

    pub(crate) fn audits(&self) -> usize {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| matches!(r, PersistRecord::Audit(_)))
            .count()
    }
}

impl GuardrailStore for RecordingStore {
    fn insert_violation(&mut self, violation: &GuardrailViolation) -> Result<(), StoreError> {
        self.records
            .lock()
            .unwrap()
            .push(PersistRecord::Violation(violation.clone()));
        Ok(())
    }

    fn insert_audit(&mut self, entry: &AuditLog) -> Result<(), StoreError> {
        self.records
            .lock()
            .unwrap()
            .push(PersistRecord::Audit(entry.clone()));
        Ok(())
    }
}

/// Store whose tables were never created.
#[derive(Default)]
pub(crate) struct MissingTableStore {
    pub(crate) attempts: Arc<AtomicUsize>,
}

impl GuardrailStore for MissingTableStore {
    fn insert_violation(&mut self, _violation: &GuardrailViolation) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::MissingTable("guardrail_violations".into()))
    }

    fn insert_audit(&mut self, _entry: &AuditLog) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::MissingTable("guardrail_audit_logs".into()))
    }
}
