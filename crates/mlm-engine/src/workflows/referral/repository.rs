use std::time::Duration;

use super::domain::{
    ApprovalRequest, ApprovalStatus, EarningsEntry, Handle, NewEarningsEntry, Package, PackageId,
    Participant, ParticipantId, ParticipantUpdate, Rank, RankId, RequestId,
};
use super::error::EngineError;

/// Storage abstraction so the engine can be exercised against any backend.
///
/// Every numeric field in [`ParticipantUpdate`] is an increment and must be applied as an
/// atomic add-and-store by the implementation; read-then-write would lose updates when two
/// approvals credit the same upline participant.
pub trait ReferralStore: Send + Sync {
    fn participant(&self, id: &ParticipantId) -> Result<Option<Participant>, StoreError>;
    fn participant_by_handle(&self, handle: &Handle) -> Result<Option<Participant>, StoreError>;
    fn direct_children(&self, handle: &Handle) -> Result<Vec<Participant>, StoreError>;

    /// Apply increments (and optional field sets) and return the stored result.
    fn apply(
        &self,
        id: &ParticipantId,
        update: ParticipantUpdate,
    ) -> Result<Participant, StoreError>;

    /// Last-writer-wins rank assignment.
    fn assign_rank(&self, id: &ParticipantId, rank: Option<RankId>) -> Result<(), StoreError>;

    /// All ranks, ascending by required points.
    fn ranks_by_threshold(&self) -> Result<Vec<Rank>, StoreError>;
    fn package(&self, id: &PackageId) -> Result<Option<Package>, StoreError>;

    fn insert_earnings(&self, entry: NewEarningsEntry) -> Result<EarningsEntry, StoreError>;
    fn earnings_for_request(&self, id: &RequestId) -> Result<Vec<EarningsEntry>, StoreError>;
    fn earnings_for_participant(
        &self,
        id: &ParticipantId,
    ) -> Result<Vec<EarningsEntry>, StoreError>;

    fn approval_request(&self, id: &RequestId) -> Result<Option<ApprovalRequest>, StoreError>;

    /// Unconditional transition. Implementations reject writes to terminal requests.
    fn set_request_status(
        &self,
        id: &RequestId,
        status: ApprovalStatus,
        note: Option<String>,
    ) -> Result<(), StoreError>;

    /// Transition only if the current status equals `expected`. Returns whether it swapped.
    fn compare_and_set_request_status(
        &self,
        id: &RequestId,
        expected: ApprovalStatus,
        next: ApprovalStatus,
    ) -> Result<bool, StoreError>;
}

/// Stores able to run a unit of work all-or-nothing.
pub trait TransactionalStore: ReferralStore {
    /// Run `work` against a transactional view. Any error from `work` rolls back every
    /// write it made; exceeding `timeout` also rolls back and reports an infrastructure
    /// failure.
    fn run_in_transaction<T, F>(&self, timeout: Duration, work: F) -> Result<T, TransactionError>
    where
        F: FnOnce(&dyn ReferralStore) -> Result<T, EngineError>;
}

/// Error enumeration for storage failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record already exists or was modified concurrently: {0}")]
    Conflict(String),
    #[error("record not found")]
    NotFound,
    #[error("insufficient balance (available {available}, required {required})")]
    InsufficientFunds { available: u64, required: u64 },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Failures of the backing resource rather than of the data.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Outcome of a failed transactional attempt.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("transaction exceeded its {limit:?} budget after {elapsed:?}")]
    TimedOut { elapsed: Duration, limit: Duration },
    #[error("transactional resource unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Aborted(EngineError),
}

impl TransactionError {
    /// Whether a non-atomic rerun is worth attempting.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            TransactionError::TimedOut { .. } | TransactionError::Unavailable(_) => true,
            TransactionError::Aborted(err) => err.is_infrastructure(),
        }
    }
}
