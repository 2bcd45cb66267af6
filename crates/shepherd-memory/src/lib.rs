//! `shepherd-memory` – Durable guardrail records.
//!
//! Mirrors the engine's violation and audit history into a local SQLite
//! database so that it outlives the process.
//!
//! # Modules
//!
//! - [`guardrail_store`] – [`SqliteGuardrailStore`][guardrail_store::SqliteGuardrailStore]:
//!   implements [`GuardrailStore`][shepherd_kernel::GuardrailStore] on top of
//!   two tables, `guardrail_violations` and `guardrail_audit_logs`, and offers
//!   read-back queries for operators.

pub mod guardrail_store;

pub use guardrail_store::{SqliteGuardrailStore, SqliteStoreError};
