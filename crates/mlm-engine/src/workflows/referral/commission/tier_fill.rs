//! Indirect commission planning.
//!
//! Tiers are scanned from the lowest commission tier upward. An unoccupied tier's share
//! is carried forward and folded into the payout of the next occupied tier; whatever is
//! still carried after the highest tier is reported as unclaimed. Planning is pure so the
//! amounts can be checked before anything is written.

use serde::Serialize;

use super::super::domain::{Amount, AmountOverflow, Participant, ParticipantId, Rank, RankId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierPayout {
    pub rank_id: RankId,
    pub title: String,
    pub participant_id: ParticipantId,
    pub own_share: Amount,
    pub carried: Amount,
    /// Labels of lower tiers whose share was folded into this payout.
    pub folded_tiers: Vec<String>,
}

impl TierPayout {
    pub fn amount(&self) -> Amount {
        self.own_share.saturating_add(self.carried)
    }

    pub fn description(&self) -> String {
        if self.folded_tiers.is_empty() {
            format!("Indirect commission ({} tier)", self.title)
        } else {
            format!(
                "Indirect commission ({} tier) including carry-forward from {}",
                self.title,
                self.folded_tiers.join(", ")
            )
        }
    }
}

/// Commission no ancestor qualified for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnclaimedCommission {
    pub amount: Amount,
    pub tiers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TierFillPlan {
    pub payouts: Vec<TierPayout>,
    pub unclaimed: Option<UnclaimedCommission>,
}

impl TierFillPlan {
    /// Plans built by [`plan_tier_fill`] never saturate.
    pub fn total_paid(&self) -> Amount {
        self.payouts
            .iter()
            .map(TierPayout::amount)
            .fold(0, Amount::saturating_add)
    }
}

/// Plan the distribution of `share` per tier across `ancestors`.
///
/// `tiers` must be the commission tiers in ascending order and `ancestors` must already
/// exclude the buyer and the direct referrer, nearest first. When several ancestors hold
/// the same tier the nearest one is paid. Fails when the tier budget does not fit in an
/// [`Amount`].
pub fn plan_tier_fill(
    tiers: &[Rank],
    ancestors: &[Participant],
    share: Amount,
) -> Result<TierFillPlan, AmountOverflow> {
    let mut plan = TierFillPlan::default();
    let mut carried: Amount = 0;
    // Carry, payouts and their total are all bounded by the budget.
    let mut budget: Amount = 0;
    let mut skipped: Vec<String> = Vec::new();

    for tier in tiers {
        budget = budget.checked_add(share).ok_or(AmountOverflow(share))?;
        let occupant = ancestors
            .iter()
            .find(|ancestor| ancestor.rank.as_ref() == Some(&tier.id));

        match occupant {
            Some(occupant) => {
                let payout = TierPayout {
                    rank_id: tier.id.clone(),
                    title: tier.title.clone(),
                    participant_id: occupant.id.clone(),
                    own_share: share,
                    carried,
                    folded_tiers: std::mem::take(&mut skipped),
                };
                carried = 0;
                if payout.amount() > 0 {
                    plan.payouts.push(payout);
                }
            }
            None => {
                carried += share;
                skipped.push(tier.title.clone());
            }
        }
    }

    if carried > 0 {
        plan.unclaimed = Some(UnclaimedCommission {
            amount: carried,
            tiers: skipped,
        });
    }

    Ok(plan)
}
