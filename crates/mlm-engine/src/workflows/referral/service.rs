use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use super::commission::{CommissionDistributor, CommissionSummary, PayoutContext};
use super::domain::{
    Amount, ApprovalRequest, ApprovalStatus, Funding, Handle, Package, PackageAssignment,
    PackageId, Participant, ParticipantId, ParticipantUpdate, RequestId,
};
use super::error::{EngineError, NotFoundError, ValidationError};
use super::events::{PayoutEvent, PayoutEventSink};
use super::execution::{ExecutionFailure, ExecutionMode, FallbackPolicy};
use super::ledger::EarningsLedger;
use super::points::{PointsCredit, PointsPropagator};
use super::ranks::{QualificationReport, RankChange, RankLadder, RankQualificationEngine};
use super::repository::{ReferralStore, StoreError, TransactionalStore};
use crate::config::EngineSettings;

/// Money and points moved by one approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalAmounts {
    pub package_amount: Amount,
    pub debited: Amount,
    pub points_awarded: u64,
    pub direct_commission: Amount,
    pub indirect_commission: Amount,
    pub unclaimed: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApprovalFlags {
    pub is_renewal: bool,
    pub is_upgrade: bool,
    pub used_fallback: bool,
}

/// Result of a successful approval.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalOutcome {
    pub request_id: RequestId,
    pub participant_id: ParticipantId,
    pub handle: Handle,
    pub package_id: PackageId,
    pub valid_until: DateTime<Utc>,
    pub amounts: ApprovalAmounts,
    pub flags: ApprovalFlags,
    pub credited: Vec<ParticipantId>,
    pub commissions: CommissionSummary,
    pub rank_changes: Vec<RankChange>,
}

/// Error raised by the orchestrator, always tagged with the originating request.
#[derive(Debug, thiserror::Error)]
#[error("approval request {request_id}: {failure}")]
pub struct ApprovalError {
    pub request_id: RequestId,
    #[source]
    pub failure: ApprovalFailure,
}

#[derive(Debug, thiserror::Error)]
pub enum ApprovalFailure {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Execution(#[from] ExecutionFailure),
}

impl ApprovalError {
    fn new(request_id: &RequestId, failure: impl Into<ApprovalFailure>) -> Self {
        Self {
            request_id: request_id.clone(),
            failure: failure.into(),
        }
    }

    fn engine(&self) -> Option<&EngineError> {
        match &self.failure {
            ApprovalFailure::Engine(err)
            | ApprovalFailure::Execution(ExecutionFailure::Business(err)) => Some(err),
            ApprovalFailure::Execution(_) => None,
        }
    }

    pub fn validation(&self) -> Option<&ValidationError> {
        match self.engine() {
            Some(EngineError::Validation(err)) => Some(err),
            _ => None,
        }
    }

    pub fn not_found(&self) -> Option<&NotFoundError> {
        match self.engine() {
            Some(EngineError::NotFound(err)) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for ApprovalFailure {
    fn from(value: StoreError) -> Self {
        Self::Engine(value.into())
    }
}

impl From<ValidationError> for ApprovalFailure {
    fn from(value: ValidationError) -> Self {
        Self::Engine(value.into())
    }
}

impl From<NotFoundError> for ApprovalFailure {
    fn from(value: NotFoundError) -> Self {
        Self::Engine(value.into())
    }
}

/// Participant and package that passed validation.
#[derive(Debug, Clone)]
struct ValidatedPurchase {
    request: ApprovalRequest,
    participant: Participant,
    package: Package,
    is_renewal: bool,
    is_upgrade: bool,
}

struct SequenceResult {
    debited: Amount,
    valid_until: DateTime<Utc>,
    credit: PointsCredit,
    commissions: CommissionSummary,
    rank_changes: Vec<RankChange>,
}

/// Sequences validation, points, commissions and rank recomputation for one request.
pub struct ApprovalOrchestrator<S, E> {
    store: Arc<S>,
    events: Arc<E>,
    settings: EngineSettings,
    policy: FallbackPolicy,
    points: PointsPropagator,
    commissions: CommissionDistributor,
    ranks: RankQualificationEngine,
}

impl<S, E> ApprovalOrchestrator<S, E>
where
    S: TransactionalStore + 'static,
    E: PayoutEventSink + 'static,
{
    pub fn new(store: Arc<S>, events: Arc<E>, settings: EngineSettings) -> Self {
        let depth = settings.max_traversal_depth;
        Self {
            store,
            events,
            policy: FallbackPolicy::new(settings.transaction_timeout, settings.fallback_enabled),
            points: PointsPropagator::new(depth),
            commissions: CommissionDistributor::new(depth),
            ranks: RankQualificationEngine::new(depth),
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn ledger(&self) -> EarningsLedger<'_> {
        EarningsLedger::new(&*self.store)
    }

    pub fn approve_request(
        &self,
        request_id: &RequestId,
    ) -> Result<ApprovalOutcome, ApprovalError> {
        self.approve_request_at(request_id, Utc::now())
    }

    /// Approve a pending request as of `now`.
    ///
    /// The request is claimed with a compare-and-swap before anything else is read, so
    /// concurrent calls for the same request pay out at most once.
    pub fn approve_request_at(
        &self,
        request_id: &RequestId,
        now: DateTime<Utc>,
    ) -> Result<ApprovalOutcome, ApprovalError> {
        let request = self
            .store
            .approval_request(request_id)
            .map_err(|err| ApprovalError::new(request_id, err))?
            .ok_or_else(|| {
                ApprovalError::new(request_id, NotFoundError::Request(request_id.clone()))
            })?;

        self.claim(&request)?;

        let purchase = match self.validate(request) {
            Ok(purchase) => purchase,
            Err(err) => {
                let status = match err {
                    EngineError::Validation(_) => ApprovalStatus::Rejected,
                    _ => ApprovalStatus::Failed,
                };
                self.mark_terminal(request_id, status, &err.to_string());
                return Err(ApprovalError::new(request_id, err));
            }
        };

        let ladder = match RankLadder::load(&*self.store) {
            Ok(ladder) => ladder,
            Err(err) => {
                self.mark_terminal(request_id, ApprovalStatus::Failed, &err.to_string());
                return Err(ApprovalError::new(request_id, err));
            }
        };

        let context = PayoutContext {
            request_id: request_id.clone(),
            recorded_at: now,
        };

        let executed = self.policy.run(&*self.store, |store| {
            self.execute_sequence(store, &ladder, &context, &purchase, now)
        });

        let executed = match executed {
            Ok(executed) => executed,
            Err(failure) => {
                self.mark_terminal(request_id, ApprovalStatus::Failed, &failure.to_string());
                error!(%request_id, error = %failure, "approval failed");
                return Err(ApprovalError::new(request_id, failure));
            }
        };

        let used_fallback = executed.mode == ExecutionMode::BestEffort;
        if let Some(reason) = executed.atomic_failure {
            warn!(%request_id, %reason, "approval completed through best-effort fallback");
            self.publish(PayoutEvent::FallbackExecuted {
                request_id: request_id.clone(),
                reason,
            });
        }

        let result = executed.value;
        if let Some(unclaimed) = &result.commissions.indirect.unclaimed {
            self.publish(PayoutEvent::UnclaimedCommission {
                request_id: request_id.clone(),
                amount: unclaimed.amount,
                tiers: unclaimed.tiers.clone(),
            });
        }

        let outcome = ApprovalOutcome {
            request_id: request_id.clone(),
            participant_id: purchase.participant.id.clone(),
            handle: purchase.participant.handle.clone(),
            package_id: purchase.package.id.clone(),
            valid_until: result.valid_until,
            amounts: ApprovalAmounts {
                package_amount: purchase.package.amount,
                debited: result.debited,
                points_awarded: result.credit.amount,
                direct_commission: result.commissions.direct_paid(),
                indirect_commission: result.commissions.indirect_paid(),
                unclaimed: result.commissions.unclaimed(),
            },
            flags: ApprovalFlags {
                is_renewal: purchase.is_renewal,
                is_upgrade: purchase.is_upgrade,
                used_fallback,
            },
            credited: result.credit.credited,
            commissions: result.commissions,
            rank_changes: result.rank_changes,
        };

        info!(
            %request_id,
            participant = %outcome.participant_id,
            package = %outcome.package_id,
            direct = outcome.amounts.direct_commission,
            indirect = outcome.amounts.indirect_commission,
            used_fallback,
            "approval completed"
        );

        Ok(outcome)
    }

    /// Operator rejection of a pending request. Nothing is paid.
    pub fn reject_request(&self, request_id: &RequestId, note: &str) -> Result<(), ApprovalError> {
        let request = self
            .store
            .approval_request(request_id)
            .map_err(|err| ApprovalError::new(request_id, err))?
            .ok_or_else(|| {
                ApprovalError::new(request_id, NotFoundError::Request(request_id.clone()))
            })?;

        self.claim(&request)?;
        self.store
            .set_request_status(request_id, ApprovalStatus::Rejected, Some(note.to_string()))
            .map_err(|err| ApprovalError::new(request_id, err))?;
        info!(%request_id, note, "approval request rejected");
        Ok(())
    }

    /// Recompute one participant's rank. `None` when the participant does not exist or
    /// no tier qualifies.
    pub fn recompute_rank(
        &self,
        participant_id: &ParticipantId,
    ) -> Result<Option<String>, EngineError> {
        let ladder = RankLadder::load(&*self.store)?;
        let change = self.ranks.recompute(&*self.store, &ladder, participant_id)?;
        Ok(change.and_then(|change| change.title))
    }

    /// Read-only qualification preview, evaluated exactly as recomputation would.
    pub fn qualification_report(
        &self,
        participant_id: &ParticipantId,
    ) -> Result<Option<QualificationReport>, EngineError> {
        let Some(participant) = self.store.participant(participant_id)? else {
            return Ok(None);
        };
        let ladder = RankLadder::load(&*self.store)?;
        self.ranks
            .assess(&*self.store, &ladder, &participant)
            .map(Some)
    }

    fn claim(&self, request: &ApprovalRequest) -> Result<(), ApprovalError> {
        if request.status != ApprovalStatus::Pending {
            return Err(ApprovalError::new(
                &request.id,
                ValidationError::NotPending(request.status),
            ));
        }

        let claimed = self
            .store
            .compare_and_set_request_status(
                &request.id,
                ApprovalStatus::Pending,
                ApprovalStatus::Processing,
            )
            .map_err(|err| ApprovalError::new(&request.id, err))?;

        if !claimed {
            warn!(request_id = %request.id, "approval request already claimed");
            return Err(ApprovalError::new(&request.id, ValidationError::AlreadyClaimed));
        }
        Ok(())
    }

    fn validate(&self, request: ApprovalRequest) -> Result<ValidatedPurchase, EngineError> {
        let participant = self
            .store
            .participant(&request.participant_id)?
            .ok_or_else(|| NotFoundError::Participant(request.participant_id.clone()))?;
        if !participant.active {
            return Err(ValidationError::InactiveParticipant(participant.id).into());
        }

        let package = self
            .store
            .package(&request.package_id)?
            .ok_or_else(|| NotFoundError::Package(request.package_id.clone()))?;
        if !package.active {
            return Err(ValidationError::InactivePackage(package.id).into());
        }

        if request.funding == Funding::BalancePool && participant.balance < package.amount {
            return Err(ValidationError::InsufficientFunds {
                available: participant.balance,
                required: package.amount,
            }
            .into());
        }

        let current = participant.package.as_ref();
        let is_renewal = current.is_some_and(|held| held.package_id == package.id);
        let is_upgrade = current
            .is_some_and(|held| held.package_id != package.id && held.amount < package.amount);

        Ok(ValidatedPurchase {
            request,
            participant,
            package,
            is_renewal,
            is_upgrade,
        })
    }

    fn execute_sequence(
        &self,
        store: &dyn ReferralStore,
        ladder: &RankLadder,
        context: &PayoutContext,
        purchase: &ValidatedPurchase,
        now: DateTime<Utc>,
    ) -> Result<SequenceResult, EngineError> {
        let ValidatedPurchase {
            request,
            participant,
            package,
            ..
        } = purchase;

        let debited = match request.funding {
            Funding::BalancePool => {
                store
                    .apply(&participant.id, ParticipantUpdate::debit(package.amount)?)
                    .map_err(|err| match err {
                        StoreError::InsufficientFunds {
                            available,
                            required,
                        } => EngineError::from(ValidationError::InsufficientFunds {
                            available,
                            required,
                        }),
                        other => other.into(),
                    })?;
                package.amount
            }
            Funding::External => 0,
        };

        let valid_until = now + Duration::days(self.settings.package_validity_days);
        store.apply(
            &participant.id,
            ParticipantUpdate::assign_package(PackageAssignment {
                package_id: package.id.clone(),
                amount: package.amount,
                activated_at: now,
                valid_until,
            }),
        )?;

        let credit = self
            .points
            .add_points(store, &participant.handle, package.reward_points)?;

        let commissions = self
            .commissions
            .distribute(store, ladder, context, participant, package)?;

        let rank_changes = self.ranks.recompute_many(store, ladder, &credit.credited)?;

        store.set_request_status(&request.id, ApprovalStatus::Approved, None)?;

        Ok(SequenceResult {
            debited,
            valid_until,
            credit,
            commissions,
            rank_changes,
        })
    }

    fn mark_terminal(&self, request_id: &RequestId, status: ApprovalStatus, note: &str) {
        if let Err(err) = self
            .store
            .set_request_status(request_id, status, Some(note.to_string()))
        {
            error!(%request_id, %status, error = %err, "unable to record approval failure");
        }
    }

    fn publish(&self, event: PayoutEvent) {
        let request_id = event.request_id().clone();
        if let Err(err) = self.events.publish(event) {
            warn!(%request_id, error = %err, "payout event not delivered");
        }
    }
}
