use super::super::domain::{MemberCriterion, Rank, RankId};
use super::super::error::{EngineError, LadderError};
use super::super::repository::ReferralStore;

/// Rank hierarchy ordered ascending by required points.
///
/// Loaded once per operation and passed explicitly; nothing caches it across calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankLadder {
    ranks: Vec<Rank>,
}

impl RankLadder {
    pub fn new(mut ranks: Vec<Rank>) -> Result<Self, LadderError> {
        ranks.sort_by_key(|rank| rank.required_points);

        for pair in ranks.windows(2) {
            if pair[0].required_points == pair[1].required_points {
                return Err(LadderError::DuplicateThreshold {
                    lower: pair[0].title.clone(),
                    upper: pair[1].title.clone(),
                    points: pair[0].required_points,
                });
            }
        }

        for rank in &ranks {
            for requirement in &rank.downline {
                if requirement.lines == 0 {
                    return Err(LadderError::EmptyRequirement(rank.title.clone()));
                }
                let referenced = match &requirement.criterion {
                    MemberCriterion::PointsAtLeast(_) => continue,
                    MemberCriterion::RankIs(title) | MemberCriterion::RankAtLeast(title) => title,
                };
                if !ranks.iter().any(|candidate| &candidate.title == referenced) {
                    return Err(LadderError::UnknownTitle {
                        rank: rank.title.clone(),
                        title: referenced.clone(),
                    });
                }
            }
        }

        Ok(Self { ranks })
    }

    pub fn load(store: &dyn ReferralStore) -> Result<Self, EngineError> {
        Ok(Self::new(store.ranks_by_threshold()?)?)
    }

    pub fn ascending(&self) -> &[Rank] {
        &self.ranks
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    pub fn lowest(&self) -> Option<&Rank> {
        self.ranks.first()
    }

    /// Tiers that take part in indirect commission: everything above the base tier.
    pub fn commission_tiers(&self) -> &[Rank] {
        self.ranks.get(1..).unwrap_or_default()
    }

    pub fn get(&self, id: &RankId) -> Option<&Rank> {
        self.ranks.iter().find(|rank| &rank.id == id)
    }

    pub fn by_title(&self, title: &str) -> Option<&Rank> {
        self.ranks.iter().find(|rank| rank.title == title)
    }

    pub fn position(&self, id: &RankId) -> Option<usize> {
        self.ranks.iter().position(|rank| &rank.id == id)
    }

    pub fn position_of_title(&self, title: &str) -> Option<usize> {
        self.ranks.iter().position(|rank| rank.title == title)
    }
}
