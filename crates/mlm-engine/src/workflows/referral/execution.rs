//! Execution strategies for the approval sequence.
//!
//! The sequence first runs inside a store transaction. When that attempt fails for an
//! infrastructure reason it may be rerun without atomicity; that path keeps none of the
//! all-or-nothing guarantees, so it is a separate strategy that callers can see in the
//! returned [`Executed::mode`].

use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use super::error::EngineError;
use super::repository::{ReferralStore, TransactionError, TransactionalStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Atomic,
    BestEffort,
}

pub trait ExecutionStrategy<S: TransactionalStore> {
    fn mode(&self) -> ExecutionMode;

    fn execute<T, F>(&self, store: &S, work: F) -> Result<T, TransactionError>
    where
        F: FnOnce(&dyn ReferralStore) -> Result<T, EngineError>;
}

/// All-or-nothing run bounded by `timeout`.
#[derive(Debug, Clone, Copy)]
pub struct AtomicExecution {
    pub timeout: Duration,
}

impl<S: TransactionalStore> ExecutionStrategy<S> for AtomicExecution {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Atomic
    }

    fn execute<T, F>(&self, store: &S, work: F) -> Result<T, TransactionError>
    where
        F: FnOnce(&dyn ReferralStore) -> Result<T, EngineError>,
    {
        store.run_in_transaction(self.timeout, work)
    }
}

/// Direct writes against the store; a failure part-way leaves earlier writes in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct BestEffortExecution;

impl<S: TransactionalStore> ExecutionStrategy<S> for BestEffortExecution {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::BestEffort
    }

    fn execute<T, F>(&self, store: &S, work: F) -> Result<T, TransactionError>
    where
        F: FnOnce(&dyn ReferralStore) -> Result<T, EngineError>,
    {
        work(store as &dyn ReferralStore).map_err(TransactionError::Aborted)
    }
}

/// Value produced by a successful run and the strategy that produced it.
#[derive(Debug)]
pub struct Executed<T> {
    pub value: T,
    pub mode: ExecutionMode,
    /// Why the atomic attempt was abandoned, when the fallback ran.
    pub atomic_failure: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionFailure {
    #[error(transparent)]
    Business(EngineError),
    #[error("atomic execution failed: {0}")]
    Infrastructure(TransactionError),
    #[error("atomic attempt failed ({atomic}); best-effort fallback also failed: {fallback}")]
    FallbackFailed {
        atomic: TransactionError,
        fallback: TransactionError,
    },
}

/// Atomic first, then an optional non-atomic rerun on infrastructure failure.
#[derive(Debug, Clone, Copy)]
pub struct FallbackPolicy {
    pub atomic: AtomicExecution,
    pub fallback: Option<BestEffortExecution>,
}

impl FallbackPolicy {
    pub fn new(timeout: Duration, fallback_enabled: bool) -> Self {
        Self {
            atomic: AtomicExecution { timeout },
            fallback: fallback_enabled.then_some(BestEffortExecution),
        }
    }

    pub fn run<S, T, F>(&self, store: &S, work: F) -> Result<Executed<T>, ExecutionFailure>
    where
        S: TransactionalStore,
        F: Fn(&dyn ReferralStore) -> Result<T, EngineError>,
    {
        let atomic_error = match self.atomic.execute(store, &work) {
            Ok(value) => {
                return Ok(Executed {
                    value,
                    mode: ExecutionStrategy::<S>::mode(&self.atomic),
                    atomic_failure: None,
                })
            }
            Err(TransactionError::Aborted(err)) if !err.is_infrastructure() => {
                return Err(ExecutionFailure::Business(err))
            }
            Err(err) => err,
        };

        let Some(fallback) = self.fallback else {
            return Err(ExecutionFailure::Infrastructure(atomic_error));
        };

        warn!(
            error = %atomic_error,
            "atomic execution failed; rerunning without transactional guarantees"
        );

        match fallback.execute(store, &work) {
            Ok(value) => Ok(Executed {
                value,
                mode: ExecutionStrategy::<S>::mode(&fallback),
                atomic_failure: Some(atomic_error.to_string()),
            }),
            Err(fallback_error) => Err(ExecutionFailure::FallbackFailed {
                atomic: atomic_error,
                fallback: fallback_error,
            }),
        }
    }
}
