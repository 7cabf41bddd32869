//! Package approval pipeline: points propagation, commission distribution, and rank
//! qualification over a referral forest.

pub mod commission;
pub mod domain;
pub mod error;
pub mod events;
pub mod execution;
pub mod graph;
pub mod ledger;
pub mod memory;
pub mod points;
pub mod ranks;
pub mod repository;
pub mod service;

#[cfg(test)]
mod tests;

pub use commission::{
    plan_tier_fill, CommissionDistributor, CommissionSummary, DirectPayout, PayoutContext,
    TierFillPlan, TierPayout, UnclaimedCommission,
};
pub use domain::{
    Amount, AmountOverflow, ApprovalRequest, ApprovalStatus, EarningsEntry, EarningsKind, EntryId,
    Funding, Handle, LineRequirement, MemberCriterion, Package, PackageAssignment, PackageId,
    Participant, ParticipantId, ParticipantUpdate, Rank, RankId, RequestId,
};
pub use error::{EngineError, LadderError, NotFoundError, ValidationError};
pub use events::{EventError, PayoutEvent, PayoutEventSink, TracingEventSink};
pub use execution::{ExecutionFailure, ExecutionMode, FallbackPolicy};
pub use graph::{AncestorChain, ChainEnd, DownlineSnapshot, ReferralGraph};
pub use ledger::{export_csv, EarningsLedger, LedgerExportError};
pub use memory::{MemoryStore, StoreSeed};
pub use points::{PointsCredit, PointsPropagator};
pub use ranks::{QualificationReport, RankChange, RankLadder, RankQualificationEngine};
pub use repository::{ReferralStore, StoreError, TransactionError, TransactionalStore};
pub use service::{
    ApprovalAmounts, ApprovalError, ApprovalFailure, ApprovalFlags, ApprovalOrchestrator,
    ApprovalOutcome,
};
