//! `shepherd-kernel` – Guardrail Policy Engine
//!
//! Sits between every shopping agent and the user.  It does not recommend or
//! predict anything; it decides whether an agent's proposed action may go
//! ahead, and suspends agents that misbehave too often.
//!
//! # Modules
//!
//! - [`engine`] – [`GuardrailEngine`][engine::GuardrailEngine]: the single
//!   interception point.  Runs the agent's checks, applies auto-corrections,
//!   records violations and audit entries, and exposes the admin controls.
//! - [`check`] – the [`GuardrailCheck`][check::GuardrailCheck] trait and the
//!   per-agent [`CheckRegistry`][check::CheckRegistry].
//! - [`circuit_breaker`] – [`BreakerStore`][circuit_breaker::BreakerStore]:
//!   one breaker per agent, opened on a high violation rate and closed after
//!   a cool-down.
//! - [`violation_log`] – [`ViolationLog`][violation_log::ViolationLog]:
//!   bounded in-memory violation and audit history with running statistics.
//! - [`persistence`] – fire-and-forget mirroring of records to a
//!   [`GuardrailStore`][persistence::GuardrailStore] on a writer thread.
//! - [`config`] – [`EngineConfig`][config::EngineConfig] thresholds and limits.
//! - [`clock`] – injectable time source.

pub mod check;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod engine;
pub mod persistence;
pub mod violation_log;

#[cfg(test)]
mod testing;

pub use check::{CheckError, CheckRegistry, GuardrailCheck};
pub use circuit_breaker::{BreakerStore, BreakerTransition};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::GuardrailEngine;
pub use persistence::{GuardrailStore, PersistHandle, PersistRecord, PersistenceWriter, StoreError};
pub use violation_log::ViolationLog;
