use serde::Serialize;

use super::super::domain::{LineRequirement, MemberCriterion, Participant, Rank};
use super::super::graph::DownlineSnapshot;
use super::ladder::RankLadder;

/// Result of checking one downline requirement against a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequirementCheck {
    pub criterion: MemberCriterion,
    pub lines_required: usize,
    /// Counting stops at `lines_required`, so this never exceeds it.
    pub lines_found: usize,
    pub satisfied: bool,
}

pub(crate) fn member_matches(
    member: &Participant,
    criterion: &MemberCriterion,
    ladder: &RankLadder,
) -> bool {
    match criterion {
        MemberCriterion::PointsAtLeast(threshold) => member.points >= *threshold,
        MemberCriterion::RankIs(title) => match (ladder.by_title(title), &member.rank) {
            (Some(rank), Some(held)) => &rank.id == held,
            _ => false,
        },
        MemberCriterion::RankAtLeast(title) => {
            let required = ladder.position_of_title(title);
            let held = member.rank.as_ref().and_then(|id| ladder.position(id));
            matches!((required, held), (Some(required), Some(held)) if held >= required)
        }
    }
}

pub(crate) fn check_requirement(
    requirement: &LineRequirement,
    snapshot: &DownlineSnapshot,
    ladder: &RankLadder,
) -> RequirementCheck {
    let lines_found = snapshot.count_lines_matching(requirement.lines, |member| {
        member_matches(member, &requirement.criterion, ladder)
    });

    RequirementCheck {
        criterion: requirement.criterion.clone(),
        lines_required: requirement.lines,
        lines_found,
        satisfied: lines_found >= requirement.lines,
    }
}

/// Evaluate every alternative of a tier; the tier holds if any alternative does.
pub(crate) fn check_downline(
    rank: &Rank,
    snapshot: &DownlineSnapshot,
    ladder: &RankLadder,
) -> Vec<RequirementCheck> {
    rank.downline
        .iter()
        .map(|requirement| check_requirement(requirement, snapshot, ladder))
        .collect()
}
