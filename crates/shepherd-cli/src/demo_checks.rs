//! Built-in demonstration checks registered by the console so `/validate`
//! exercises the whole pipeline.
//!
//! - [`CartQuantityCheck`] – caps units per line item by membership tier and
//!   auto-corrects oversized quantities down to the cap.
//! - [`SpendLimitCheck`] – rejects carts whose line total exceeds the tier's
//!   spend limit (or the user's own `budget`), escalating absurd totals.
//! - [`SearchContentCheck`] – rejects search queries containing blocked terms.
//! - [`SizeConfidenceCheck`] – flags low-confidence size predictions for
//!   shopper confirmation instead of presenting them as certain.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use shepherd_kernel::{CheckError, GuardrailCheck, GuardrailEngine};
use shepherd_types::{AgentType, Severity, UserProfile, UserTier};

/// Register every demonstration check on `engine`.
pub fn register_demo_checks(engine: &GuardrailEngine) {
    engine.register_checks(
        AgentType::CartAgent,
        vec![
            Arc::new(CartQuantityCheck::default()),
            Arc::new(SpendLimitCheck::default()),
        ],
    );
    engine.register_checks(
        AgentType::SearchAgent,
        vec![Arc::new(SearchContentCheck::default())],
    );
    engine.register_checks(
        AgentType::SizePredictor,
        vec![Arc::new(SizeConfidenceCheck { min_confidence: 0.6 })],
    );
}

fn required_u64(payload: &Value, field: &str) -> Result<u64, CheckError> {
    payload
        .get(field)
        .and_then(Value::as_u64)
        .ok_or_else(|| CheckError::failed(format!("payload field '{field}' must be a non-negative integer")))
}

fn required_f64(payload: &Value, field: &str) -> Result<f64, CheckError> {
    payload
        .get(field)
        .and_then(Value::as_f64)
        .ok_or_else(|| CheckError::failed(format!("payload field '{field}' must be a number")))
}

// ────────────────────────────────────────────────────────────────────────────
// Cart
// ────────────────────────────────────────────────────────────────────────────

/// Maximum `quantity` per line item, by tier.
pub struct CartQuantityCheck {
    pub free: u64,
    pub premium: u64,
    pub vip: u64,
}

impl Default for CartQuantityCheck {
    fn default() -> Self {
        Self {
            free: 5,
            premium: 10,
            vip: 25,
        }
    }
}

impl CartQuantityCheck {
    fn cap(&self, tier: UserTier) -> u64 {
        match tier {
            UserTier::Free => self.free,
            UserTier::Premium => self.premium,
            UserTier::Vip => self.vip,
        }
    }
}

#[async_trait]
impl GuardrailCheck for CartQuantityCheck {
    fn name(&self) -> &str {
        "cart_quantity"
    }

    fn reason(&self) -> &str {
        "quantity exceeds the per-item limit for this membership tier"
    }

    fn severity(&self) -> Severity {
        Severity::Medium
    }

    async fn validate(&self, payload: &Value, user: &UserProfile) -> Result<bool, CheckError> {
        Ok(required_u64(payload, "quantity")? <= self.cap(user.tier))
    }

    fn supports_auto_correct(&self) -> bool {
        true
    }

    async fn auto_correct(&self, payload: &Value, user: &UserProfile) -> Result<Value, CheckError> {
        let mut corrected = payload.clone();
        let Some(fields) = corrected.as_object_mut() else {
            return Err(CheckError::failed("cart payload must be an object"));
        };
        fields.insert("quantity".to_string(), Value::from(self.cap(user.tier)));
        Ok(corrected)
    }
}

/// Line-total (`quantity * unitPrice`) limit, by tier.  A numeric `budget`
/// attribute on the user lowers the limit further.
pub struct SpendLimitCheck {
    pub free: f64,
    pub premium: f64,
    pub vip: f64,
    /// Totals beyond `limit * escalation_factor` are escalated, not rejected.
    pub escalation_factor: f64,
}

impl Default for SpendLimitCheck {
    fn default() -> Self {
        Self {
            free: 500.0,
            premium: 2_000.0,
            vip: 10_000.0,
            escalation_factor: 10.0,
        }
    }
}

impl SpendLimitCheck {
    fn limit(&self, user: &UserProfile) -> f64 {
        let tier_limit = match user.tier {
            UserTier::Free => self.free,
            UserTier::Premium => self.premium,
            UserTier::Vip => self.vip,
        };
        match user.attributes.get("budget").and_then(Value::as_f64) {
            Some(budget) => tier_limit.min(budget),
            None => tier_limit,
        }
    }
}

#[async_trait]
impl GuardrailCheck for SpendLimitCheck {
    fn name(&self) -> &str {
        "spend_limit"
    }

    fn reason(&self) -> &str {
        "line total exceeds the shopper's spend limit"
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    async fn validate(&self, payload: &Value, user: &UserProfile) -> Result<bool, CheckError> {
        let total = required_u64(payload, "quantity")? as f64 * required_f64(payload, "unitPrice")?;
        let limit = self.limit(user);
        if total > limit * self.escalation_factor {
            return Err(CheckError::escalated(format!(
                "line total {total:.2} is more than {}x the limit {limit:.2}",
                self.escalation_factor
            )));
        }
        Ok(total <= limit)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Search
// ────────────────────────────────────────────────────────────────────────────

/// Case-insensitive blocklist over the `query` field.
pub struct SearchContentCheck {
    pub blocked_terms: Vec<String>,
}

impl Default for SearchContentCheck {
    fn default() -> Self {
        Self {
            blocked_terms: ["counterfeit", "replica", "knockoff", "fake designer"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[async_trait]
impl GuardrailCheck for SearchContentCheck {
    fn name(&self) -> &str {
        "search_content"
    }

    fn reason(&self) -> &str {
        "search query contains blocked terms"
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    async fn validate(&self, payload: &Value, _user: &UserProfile) -> Result<bool, CheckError> {
        let query = payload
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| CheckError::failed("search payload has no 'query' string"))?
            .to_lowercase();
        Ok(!self.blocked_terms.iter().any(|term| query.contains(term.as_str())))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Size
// ────────────────────────────────────────────────────────────────────────────

pub struct SizeConfidenceCheck {
    pub min_confidence: f64,
}

#[async_trait]
impl GuardrailCheck for SizeConfidenceCheck {
    fn name(&self) -> &str {
        "size_confidence"
    }

    fn reason(&self) -> &str {
        "size prediction confidence is below the presentation threshold"
    }

    fn severity(&self) -> Severity {
        Severity::Low
    }

    async fn validate(&self, payload: &Value, _user: &UserProfile) -> Result<bool, CheckError> {
        Ok(required_f64(payload, "confidence")? >= self.min_confidence)
    }

    fn supports_auto_correct(&self) -> bool {
        true
    }

    async fn auto_correct(&self, payload: &Value, _user: &UserProfile) -> Result<Value, CheckError> {
        let mut corrected = payload.clone();
        let Some(fields) = corrected.as_object_mut() else {
            return Err(CheckError::failed("size payload must be an object"));
        };
        fields.insert("requiresConfirmation".to_string(), Value::Bool(true));
        Ok(corrected)
    }
}
