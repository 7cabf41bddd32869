mod tier_fill;

pub use tier_fill::{plan_tier_fill, TierFillPlan, TierPayout, UnclaimedCommission};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::domain::{
    Amount, AmountOverflow, EarningsKind, NewEarningsEntry, Package, Participant, ParticipantId,
    ParticipantUpdate, RequestId,
};
use super::error::EngineError;
use super::graph::ReferralGraph;
use super::ledger::EarningsLedger;
use super::ranks::RankLadder;
use super::repository::ReferralStore;

/// Request-scoped data stamped on every ledger entry.
#[derive(Debug, Clone)]
pub struct PayoutContext {
    pub request_id: RequestId,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectPayout {
    pub participant_id: ParticipantId,
    pub amount: Amount,
}

/// Everything one approval paid out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommissionSummary {
    pub direct: Option<DirectPayout>,
    pub indirect: TierFillPlan,
}

impl CommissionSummary {
    pub fn direct_paid(&self) -> Amount {
        self.direct.as_ref().map(|payout| payout.amount).unwrap_or(0)
    }

    pub fn indirect_paid(&self) -> Amount {
        self.indirect.total_paid()
    }

    pub fn total_paid(&self) -> Amount {
        self.direct_paid().saturating_add(self.indirect_paid())
    }

    pub fn unclaimed(&self) -> Amount {
        self.indirect
            .unclaimed
            .as_ref()
            .map(|unclaimed| unclaimed.amount)
            .unwrap_or(0)
    }
}

/// Pays the direct referrer and the rank-selected ancestors above them.
#[derive(Debug, Clone, Copy)]
pub struct CommissionDistributor {
    max_depth: usize,
}

impl CommissionDistributor {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn distribute(
        &self,
        store: &dyn ReferralStore,
        ladder: &RankLadder,
        context: &PayoutContext,
        buyer: &Participant,
        package: &Package,
    ) -> Result<CommissionSummary, EngineError> {
        let direct = self.pay_direct(store, context, buyer, package)?;
        let indirect = self.pay_indirect(store, ladder, context, buyer, package)?;
        let summary = CommissionSummary { direct, indirect };
        summary
            .direct_paid()
            .checked_add(summary.indirect_paid())
            .ok_or(AmountOverflow(package.direct_commission))?;
        Ok(summary)
    }

    /// Credit the buyer's immediate parent. A missing referrer record skips the payout.
    pub fn pay_direct(
        &self,
        store: &dyn ReferralStore,
        context: &PayoutContext,
        buyer: &Participant,
        package: &Package,
    ) -> Result<Option<DirectPayout>, EngineError> {
        let Some(parent_handle) = &buyer.parent_handle else {
            return Ok(None);
        };

        let Some(referrer) = store.participant_by_handle(parent_handle)? else {
            warn!(
                request_id = %context.request_id,
                referrer = %parent_handle,
                "direct referrer record missing; direct commission skipped"
            );
            return Ok(None);
        };

        if package.direct_commission == 0 {
            return Ok(None);
        }

        let description = format!(
            "Direct commission for {} purchase by {}",
            package.name, buyer.handle
        );
        credit(
            store,
            context,
            &referrer.id,
            package.direct_commission,
            EarningsKind::Direct,
            description,
        )?;

        Ok(Some(DirectPayout {
            participant_id: referrer.id,
            amount: package.direct_commission,
        }))
    }

    /// Run the tier fill over ancestors strictly above the direct referrer.
    pub fn pay_indirect(
        &self,
        store: &dyn ReferralStore,
        ladder: &RankLadder,
        context: &PayoutContext,
        buyer: &Participant,
        package: &Package,
    ) -> Result<TierFillPlan, EngineError> {
        let graph = ReferralGraph::new(store, self.max_depth);
        let ancestors = graph
            .ancestor_chain(&buyer.handle)
            .skip(2)
            .collect::<Result<Vec<_>, _>>()?;

        let plan = plan_tier_fill(
            ladder.commission_tiers(),
            &ancestors,
            package.indirect_commission,
        )?;

        for payout in &plan.payouts {
            debug!(
                request_id = %context.request_id,
                tier = %payout.title,
                participant = %payout.participant_id,
                carried = payout.carried,
                "indirect tier paid"
            );
            credit(
                store,
                context,
                &payout.participant_id,
                payout.amount(),
                EarningsKind::Indirect,
                payout.description(),
            )?;
        }

        if let Some(unclaimed) = &plan.unclaimed {
            warn!(
                request_id = %context.request_id,
                amount = unclaimed.amount,
                tiers = ?unclaimed.tiers,
                "indirect commission left unclaimed"
            );
        }

        Ok(plan)
    }
}

fn credit(
    store: &dyn ReferralStore,
    context: &PayoutContext,
    participant_id: &ParticipantId,
    amount: Amount,
    kind: EarningsKind,
    description: String,
) -> Result<(), EngineError> {
    EarningsLedger::new(store).record(NewEarningsEntry {
        participant_id: participant_id.clone(),
        amount,
        kind,
        description,
        request_id: context.request_id.clone(),
        recorded_at: context.recorded_at,
    })?;
    store.apply(participant_id, ParticipantUpdate::credit(amount)?)?;
    Ok(())
}
