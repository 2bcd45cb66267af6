//! Best-effort write-through of violations and audit entries.
//!
//! The engine never talks to the durable store directly.  It hands records to
//! a [`PersistHandle`], which pushes them onto an unbounded queue and returns
//! immediately.  A [`PersistenceWriter`] drains the queue on its own thread
//! and calls the [`GuardrailStore`]; any [`StoreError`] is logged and the
//! record is dropped.  Nothing is retried.

use std::thread::JoinHandle;

use shepherd_types::{AuditLog, GuardrailViolation};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Errors a durable store may report.  The engine only ever logs them.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("table {0} does not exist")]
    MissingTable(String),

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("record serialization error: {0}")]
    Serialization(String),
}

/// A record queued for the durable store.
#[derive(Debug, Clone)]
pub enum PersistRecord {
    Violation(GuardrailViolation),
    Audit(AuditLog),
}

/// The durable store behind the in-memory log.
pub trait GuardrailStore: Send + 'static {
    fn insert_violation(&mut self, violation: &GuardrailViolation) -> Result<(), StoreError>;

    fn insert_audit(&mut self, entry: &AuditLog) -> Result<(), StoreError>;

    fn persist(&mut self, record: &PersistRecord) -> Result<(), StoreError> {
        match record {
            PersistRecord::Violation(v) => self.insert_violation(v),
            PersistRecord::Audit(a) => self.insert_audit(a),
        }
    }
}

/// Cheap, cloneable sending side of the persistence queue.
#[derive(Clone, Debug)]
pub struct PersistHandle {
    tx: mpsc::UnboundedSender<PersistRecord>,
}

impl PersistHandle {
    /// Queue `record` without waiting.  A stopped writer only produces a
    /// warning.
    pub fn submit(&self, record: PersistRecord) {
        if self.tx.send(record).is_err() {
            warn!("persistence writer has stopped; dropping guardrail record");
        }
    }
}

/// Owns the writer thread that drains the queue into a [`GuardrailStore`].
///
/// ```
/// use shepherd_kernel::persistence::{GuardrailStore, PersistenceWriter, StoreError};
/// use shepherd_types::{AuditLog, GuardrailViolation};
///
/// struct Discard;
///
/// impl GuardrailStore for Discard {
///     fn insert_violation(&mut self, _: &GuardrailViolation) -> Result<(), StoreError> { Ok(()) }
///     fn insert_audit(&mut self, _: &AuditLog) -> Result<(), StoreError> { Ok(()) }
/// }
///
/// let writer = PersistenceWriter::spawn(Box::new(Discard)).unwrap();
/// let handle = writer.handle();
/// drop(handle);
/// assert!(writer.shutdown().is_some());
/// ```
pub struct PersistenceWriter {
    tx: mpsc::UnboundedSender<PersistRecord>,
    worker: JoinHandle<Box<dyn GuardrailStore>>,
}

impl PersistenceWriter {
    /// Start the writer thread.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] when the OS refuses to spawn the thread.
    pub fn spawn(mut store: Box<dyn GuardrailStore>) -> Result<Self, StoreError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<PersistRecord>();
        let worker = std::thread::Builder::new()
            .name("guardrail-persist".to_string())
            .spawn(move || {
                while let Some(record) = rx.blocking_recv() {
                    match store.persist(&record) {
                        Ok(()) => debug!("guardrail record persisted"),
                        Err(e) => warn!(error = %e, "failed to persist guardrail record"),
                    }
                }
                store
            })
            .map_err(|e| StoreError::Backend(format!("failed to spawn writer thread: {e}")))?;
        Ok(Self { tx, worker })
    }

    pub fn handle(&self) -> PersistHandle {
        PersistHandle {
            tx: self.tx.clone(),
        }
    }

    /// Flush everything queued and stop the thread, handing the store back.
    ///
    /// Blocks until every [`PersistHandle`] (including the one held by the
    /// engine) has been dropped.  Returns `None` if the writer thread
    /// panicked.
    pub fn shutdown(self) -> Option<Box<dyn GuardrailStore>> {
        drop(self.tx);
        self.worker.join().ok()
    }
}
