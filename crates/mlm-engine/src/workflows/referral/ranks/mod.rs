//! Rank qualification.
//!
//! A participant holds the highest tier whose points threshold is met and, for tiers with
//! downline requirements, for which at least one alternative `(N, C)` holds: `N` distinct
//! root-to-leaf lines of the descendant subtree each contain, at any depth within the
//! traversal cap, a member satisfying `C`. Lines are enumerated exhaustively; both
//! [`RankQualificationEngine::assess`] and [`RankQualificationEngine::recompute`] run
//! through the same evaluation.
//!
//! Recomputation is a pure function of stored points and downline state. It does not
//! make ranks monotone over time: tooling that writes ranks directly must resynchronize
//! through `recompute` itself.

mod ladder;
mod rules;

pub use ladder::RankLadder;
pub use rules::RequirementCheck;

use serde::Serialize;
use tracing::{debug, info};

use super::domain::{Participant, ParticipantId, RankId};
use super::error::EngineError;
use super::graph::{DownlineSnapshot, ReferralGraph};
use super::repository::ReferralStore;

/// Per-tier verdict used for audits and previews.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierAssessment {
    pub rank_id: RankId,
    pub title: String,
    pub required_points: u64,
    pub points_met: bool,
    pub requirements: Vec<RequirementCheck>,
    pub qualified: bool,
}

/// Full qualification picture for one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualificationReport {
    pub participant_id: ParticipantId,
    pub points: u64,
    pub current_rank: Option<RankId>,
    pub qualified_rank: Option<RankId>,
    pub qualified_title: Option<String>,
    pub tiers: Vec<TierAssessment>,
}

impl QualificationReport {
    pub fn is_stale(&self) -> bool {
        self.current_rank != self.qualified_rank
    }
}

/// Rank written (or confirmed) by a recomputation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankChange {
    pub participant_id: ParticipantId,
    pub previous: Option<RankId>,
    pub current: Option<RankId>,
    pub title: Option<String>,
}

impl RankChange {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RankQualificationEngine {
    max_depth: usize,
}

impl RankQualificationEngine {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Evaluate every tier without writing anything.
    pub fn assess(
        &self,
        store: &dyn ReferralStore,
        ladder: &RankLadder,
        participant: &Participant,
    ) -> Result<QualificationReport, EngineError> {
        let graph = ReferralGraph::new(store, self.max_depth);
        let mut snapshot: Option<DownlineSnapshot> = None;
        let mut tiers = Vec::with_capacity(ladder.len());

        for rank in ladder.ascending() {
            let points_met = participant.points >= rank.required_points;

            let requirements = if points_met && rank.has_downline_requirements() {
                let downline: &DownlineSnapshot = match &mut snapshot {
                    Some(downline) => downline,
                    empty => empty.insert(graph.downline(&participant.handle)?),
                };
                rules::check_downline(rank, downline, ladder)
            } else {
                Vec::new()
            };

            let downline_met = !rank.has_downline_requirements()
                || requirements.iter().any(|check| check.satisfied);

            tiers.push(TierAssessment {
                rank_id: rank.id.clone(),
                title: rank.title.clone(),
                required_points: rank.required_points,
                points_met,
                requirements,
                qualified: points_met && downline_met,
            });
        }

        let qualified = tiers.iter().rev().find(|tier| tier.qualified);

        Ok(QualificationReport {
            participant_id: participant.id.clone(),
            points: participant.points,
            current_rank: participant.rank.clone(),
            qualified_rank: qualified.map(|tier| tier.rank_id.clone()),
            qualified_title: qualified.map(|tier| tier.title.clone()),
            tiers,
        })
    }

    /// Recompute and store the rank. `Ok(None)` when the participant does not exist.
    pub fn recompute(
        &self,
        store: &dyn ReferralStore,
        ladder: &RankLadder,
        participant_id: &ParticipantId,
    ) -> Result<Option<RankChange>, EngineError> {
        let Some(participant) = store.participant(participant_id)? else {
            debug!(%participant_id, "rank recompute skipped for unknown participant");
            return Ok(None);
        };

        let report = self.assess(store, ladder, &participant)?;
        if report.is_stale() {
            store.assign_rank(participant_id, report.qualified_rank.clone())?;
            info!(
                %participant_id,
                from = ?participant.rank,
                to = ?report.qualified_title,
                "rank reassigned"
            );
        }

        Ok(Some(RankChange {
            participant_id: participant.id,
            previous: participant.rank,
            current: report.qualified_rank,
            title: report.qualified_title,
        }))
    }

    /// Recompute in the given order; callers pass buyer-first chains so each upline
    /// participant sees already-updated downline ranks.
    pub fn recompute_many(
        &self,
        store: &dyn ReferralStore,
        ladder: &RankLadder,
        participant_ids: &[ParticipantId],
    ) -> Result<Vec<RankChange>, EngineError> {
        let mut changes = Vec::with_capacity(participant_ids.len());
        for participant_id in participant_ids {
            if let Some(change) = self.recompute(store, ladder, participant_id)? {
                changes.push(change);
            }
        }
        Ok(changes)
    }
}
