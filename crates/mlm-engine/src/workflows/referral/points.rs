use serde::Serialize;
use tracing::debug;

use super::domain::{Handle, ParticipantId, ParticipantUpdate};
use super::error::{EngineError, NotFoundError};
use super::graph::{ChainEnd, ReferralGraph};
use super::repository::ReferralStore;

/// Credits reward points to a buyer and every reachable ancestor.
#[derive(Debug, Clone, Copy)]
pub struct PointsPropagator {
    max_depth: usize,
}

/// Participants credited by one propagation, buyer first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointsCredit {
    pub amount: u64,
    pub credited: Vec<ParticipantId>,
    #[serde(skip)]
    pub end: Option<ChainEnd>,
}

impl PointsPropagator {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn add_points(
        &self,
        store: &dyn ReferralStore,
        buyer: &Handle,
        amount: u64,
    ) -> Result<PointsCredit, EngineError> {
        let graph = ReferralGraph::new(store, self.max_depth);
        let mut chain = graph.ancestor_chain(buyer);
        let mut credited = Vec::new();

        while let Some(participant) = chain.next() {
            let participant = participant?;
            if amount > 0 {
                store.apply(&participant.id, ParticipantUpdate::points(amount))?;
            }
            credited.push(participant.id);
        }

        if credited.is_empty() {
            return Err(NotFoundError::Handle(buyer.clone()).into());
        }

        let end = chain.end().cloned();
        debug!(%buyer, amount, credited = credited.len(), ?end, "reward points propagated");

        if amount == 0 {
            credited.clear();
        }

        Ok(PointsCredit {
            amount,
            credited,
            end,
        })
    }
}
