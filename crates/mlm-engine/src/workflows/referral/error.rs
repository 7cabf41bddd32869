use super::domain::{
    Amount, AmountOverflow, ApprovalStatus, Handle, PackageId, ParticipantId, RequestId,
};
use super::repository::StoreError;

/// A record the engine needed and could not find.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotFoundError {
    #[error("approval request {0} not found")]
    Request(RequestId),
    #[error("participant {0} not found")]
    Participant(ParticipantId),
    #[error("participant with handle {0} not found")]
    Handle(Handle),
    #[error("package {0} not found")]
    Package(PackageId),
}

/// Business-rule rejection raised before any mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("request is {0}, expected pending")]
    NotPending(ApprovalStatus),
    #[error("request was claimed by a concurrent approval")]
    AlreadyClaimed,
    #[error("participant {0} is inactive")]
    InactiveParticipant(ParticipantId),
    #[error("package {0} is inactive")]
    InactivePackage(PackageId),
    #[error("balance pool {available} does not cover package amount {required}")]
    InsufficientFunds { available: Amount, required: Amount },
}

/// The configured rank hierarchy cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LadderError {
    #[error("ranks {lower} and {upper} share the threshold {points}")]
    DuplicateThreshold {
        lower: String,
        upper: String,
        points: u64,
    },
    #[error("rank {rank} references unknown rank title {title}")]
    UnknownTitle { rank: String, title: String },
    #[error("rank {0} requires zero lines in a downline requirement")]
    EmptyRequirement(String),
}

/// Error shared by every engine component.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Ladder(#[from] LadderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Overflow(#[from] AmountOverflow),
}

impl EngineError {
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, EngineError::Store(err) if err.is_infrastructure())
    }
}
