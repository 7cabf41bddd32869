//! In-process reference store.
//!
//! Every mutation happens under one lock, so increments are atomic add-and-store.
//! Transactions keep an undo log instead of a snapshot: rolling back subtracts exactly
//! what the transaction added, which leaves concurrent increments from other approvals
//! intact. Field assignments (rank, package, request status) are restored to the value
//! the transaction overwrote.
//!
//! Transactions run one at a time, so no transaction reads another's uncommitted writes.
//! Writes made outside a transaction (best-effort reruns, direct calls) are not gated:
//! they land immediately and can observe an in-flight transaction's writes.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::domain::{
    ApprovalRequest, ApprovalStatus, EarningsEntry, EntryId, Handle, NewEarningsEntry, Package,
    PackageAssignment, PackageId, Participant, ParticipantId, ParticipantUpdate, Rank, RankId,
    RequestId,
};
use super::error::EngineError;
use super::repository::{ReferralStore, StoreError, TransactionError, TransactionalStore};

/// Serializable seed data for a [`MemoryStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSeed {
    #[serde(default)]
    pub ranks: Vec<Rank>,
    #[serde(default)]
    pub packages: Vec<Package>,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub requests: Vec<ApprovalRequest>,
}

#[derive(Debug, Default)]
struct MemoryState {
    participants: BTreeMap<ParticipantId, Participant>,
    handles: HashMap<Handle, ParticipantId>,
    ranks: Vec<Rank>,
    packages: HashMap<PackageId, Package>,
    requests: HashMap<RequestId, ApprovalRequest>,
    earnings: Vec<EarningsEntry>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    /// Held for the whole of a transaction.
    transactions: Mutex<()>,
    entry_sequence: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: StoreSeed) -> Result<Self, StoreError> {
        let store = Self::new();
        for rank in seed.ranks {
            store.insert_rank(rank)?;
        }
        for package in seed.packages {
            store.insert_package(package)?;
        }
        for participant in seed.participants {
            store.insert_participant(participant)?;
        }
        for request in seed.requests {
            store.insert_request(request)?;
        }
        Ok(store)
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    pub fn insert_participant(&self, participant: Participant) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if state.participants.contains_key(&participant.id)
            || state.handles.contains_key(&participant.handle)
        {
            return Err(StoreError::Conflict(format!(
                "participant {} / {}",
                participant.id, participant.handle
            )));
        }
        state
            .handles
            .insert(participant.handle.clone(), participant.id.clone());
        state
            .participants
            .insert(participant.id.clone(), participant);
        Ok(())
    }

    pub fn insert_rank(&self, rank: Rank) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if state.ranks.iter().any(|existing| existing.id == rank.id) {
            return Err(StoreError::Conflict(format!("rank {}", rank.id)));
        }
        state.ranks.push(rank);
        state.ranks.sort_by_key(|rank| rank.required_points);
        Ok(())
    }

    pub fn insert_package(&self, package: Package) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if state.packages.contains_key(&package.id) {
            return Err(StoreError::Conflict(format!("package {}", package.id)));
        }
        state.packages.insert(package.id.clone(), package);
        Ok(())
    }

    pub fn insert_request(&self, request: ApprovalRequest) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if state.requests.contains_key(&request.id) {
            return Err(StoreError::Conflict(format!("request {}", request.id)));
        }
        state.requests.insert(request.id.clone(), request);
        Ok(())
    }

    /// Overwrite a rank outside the engine, as maintenance tooling does.
    pub fn force_rank(&self, id: &ParticipantId, rank: Option<RankId>) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let participant = state.participants.get_mut(id).ok_or(StoreError::NotFound)?;
        participant.rank = rank;
        Ok(())
    }

    pub fn participants(&self) -> Result<Vec<Participant>, StoreError> {
        Ok(self.state()?.participants.values().cloned().collect())
    }

    pub fn requests(&self) -> Result<Vec<ApprovalRequest>, StoreError> {
        let mut requests: Vec<_> = self.state()?.requests.values().cloned().collect();
        requests.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(requests)
    }

    pub fn earnings(&self) -> Result<Vec<EarningsEntry>, StoreError> {
        Ok(self.state()?.earnings.clone())
    }

    fn next_entry_id(&self) -> EntryId {
        let id = self.entry_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        EntryId(format!("earn-{id:06}"))
    }

    fn apply_tracked(
        &self,
        id: &ParticipantId,
        update: ParticipantUpdate,
    ) -> Result<(Participant, Option<PackageAssignment>), StoreError> {
        let mut state = self.state()?;
        let participant = state.participants.get_mut(id).ok_or(StoreError::NotFound)?;

        let balance = if update.balance >= 0 {
            participant.balance.saturating_add(update.balance.unsigned_abs())
        } else {
            let debit = update.balance.unsigned_abs();
            participant
                .balance
                .checked_sub(debit)
                .ok_or(StoreError::InsufficientFunds {
                    available: participant.balance,
                    required: debit,
                })?
        };

        participant.balance = balance;
        participant.points = participant.points.saturating_add(update.points);
        participant.total_earnings = participant
            .total_earnings
            .saturating_add(update.total_earnings);

        let previous_package = participant.package.clone();
        if let Some(package) = update.package {
            participant.package = Some(package);
        }

        Ok((participant.clone(), previous_package))
    }

    fn assign_rank_tracked(
        &self,
        id: &ParticipantId,
        rank: Option<RankId>,
    ) -> Result<Option<RankId>, StoreError> {
        let mut state = self.state()?;
        let participant = state.participants.get_mut(id).ok_or(StoreError::NotFound)?;
        Ok(std::mem::replace(&mut participant.rank, rank))
    }

    fn set_status_tracked(
        &self,
        id: &RequestId,
        status: ApprovalStatus,
        note: Option<String>,
    ) -> Result<(ApprovalStatus, Option<String>), StoreError> {
        let mut state = self.state()?;
        let request = state.requests.get_mut(id).ok_or(StoreError::NotFound)?;
        if request.status.is_terminal() {
            return Err(StoreError::Conflict(format!(
                "request {id} is already {}",
                request.status
            )));
        }
        let previous = (request.status, request.note.clone());
        request.status = status;
        request.note = note;
        Ok(previous)
    }

    fn rollback(&self, undo: Vec<Undo>) -> Result<(), StoreError> {
        let mut state = self.state()?;
        for step in undo.into_iter().rev() {
            match step {
                Undo::Participant {
                    id,
                    update,
                    previous_package,
                } => {
                    if let Some(participant) = state.participants.get_mut(&id) {
                        participant.points = participant.points.saturating_sub(update.points);
                        participant.total_earnings = participant
                            .total_earnings
                            .saturating_sub(update.total_earnings);
                        participant.balance = if update.balance >= 0 {
                            participant
                                .balance
                                .saturating_sub(update.balance.unsigned_abs())
                        } else {
                            participant
                                .balance
                                .saturating_add(update.balance.unsigned_abs())
                        };
                        if update.package.is_some() {
                            participant.package = previous_package;
                        }
                    }
                }
                Undo::Rank { id, previous } => {
                    if let Some(participant) = state.participants.get_mut(&id) {
                        participant.rank = previous;
                    }
                }
                Undo::Earnings { id } => state.earnings.retain(|entry| entry.id != id),
                Undo::Status { id, status, note } => {
                    if let Some(request) = state.requests.get_mut(&id) {
                        request.status = status;
                        request.note = note;
                    }
                }
            }
        }
        Ok(())
    }
}

impl ReferralStore for MemoryStore {
    fn participant(&self, id: &ParticipantId) -> Result<Option<Participant>, StoreError> {
        Ok(self.state()?.participants.get(id).cloned())
    }

    fn participant_by_handle(&self, handle: &Handle) -> Result<Option<Participant>, StoreError> {
        let state = self.state()?;
        Ok(state
            .handles
            .get(handle)
            .and_then(|id| state.participants.get(id))
            .cloned())
    }

    fn direct_children(&self, handle: &Handle) -> Result<Vec<Participant>, StoreError> {
        Ok(self
            .state()?
            .participants
            .values()
            .filter(|participant| participant.parent_handle.as_ref() == Some(handle))
            .cloned()
            .collect())
    }

    fn apply(
        &self,
        id: &ParticipantId,
        update: ParticipantUpdate,
    ) -> Result<Participant, StoreError> {
        self.apply_tracked(id, update).map(|(participant, _)| participant)
    }

    fn assign_rank(&self, id: &ParticipantId, rank: Option<RankId>) -> Result<(), StoreError> {
        self.assign_rank_tracked(id, rank).map(|_| ())
    }

    fn ranks_by_threshold(&self) -> Result<Vec<Rank>, StoreError> {
        Ok(self.state()?.ranks.clone())
    }

    fn package(&self, id: &PackageId) -> Result<Option<Package>, StoreError> {
        Ok(self.state()?.packages.get(id).cloned())
    }

    fn insert_earnings(&self, entry: NewEarningsEntry) -> Result<EarningsEntry, StoreError> {
        let entry = EarningsEntry {
            id: self.next_entry_id(),
            participant_id: entry.participant_id,
            amount: entry.amount,
            kind: entry.kind,
            description: entry.description,
            request_id: entry.request_id,
            recorded_at: entry.recorded_at,
        };
        self.state()?.earnings.push(entry.clone());
        Ok(entry)
    }

    fn earnings_for_request(&self, id: &RequestId) -> Result<Vec<EarningsEntry>, StoreError> {
        Ok(self
            .state()?
            .earnings
            .iter()
            .filter(|entry| &entry.request_id == id)
            .cloned()
            .collect())
    }

    fn earnings_for_participant(
        &self,
        id: &ParticipantId,
    ) -> Result<Vec<EarningsEntry>, StoreError> {
        Ok(self
            .state()?
            .earnings
            .iter()
            .filter(|entry| &entry.participant_id == id)
            .cloned()
            .collect())
    }

    fn approval_request(&self, id: &RequestId) -> Result<Option<ApprovalRequest>, StoreError> {
        Ok(self.state()?.requests.get(id).cloned())
    }

    fn set_request_status(
        &self,
        id: &RequestId,
        status: ApprovalStatus,
        note: Option<String>,
    ) -> Result<(), StoreError> {
        self.set_status_tracked(id, status, note).map(|_| ())
    }

    fn compare_and_set_request_status(
        &self,
        id: &RequestId,
        expected: ApprovalStatus,
        next: ApprovalStatus,
    ) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let request = state.requests.get_mut(id).ok_or(StoreError::NotFound)?;
        if request.status != expected {
            return Ok(false);
        }
        request.status = next;
        Ok(true)
    }
}

impl TransactionalStore for MemoryStore {
    fn run_in_transaction<T, F>(&self, timeout: Duration, work: F) -> Result<T, TransactionError>
    where
        F: FnOnce(&dyn ReferralStore) -> Result<T, EngineError>,
    {
        let _serialized = self
            .transactions
            .lock()
            .map_err(|_| TransactionError::Unavailable("transaction gate poisoned".to_string()))?;
        let started = Instant::now();
        let transaction = MemoryTransaction {
            store: self,
            undo: Mutex::new(Vec::new()),
        };

        let result = work(&transaction as &dyn ReferralStore);
        let undo = transaction.into_undo()?;

        let failure = match result {
            Ok(value) => {
                let elapsed = started.elapsed();
                if elapsed <= timeout {
                    return Ok(value);
                }
                TransactionError::TimedOut {
                    elapsed,
                    limit: timeout,
                }
            }
            Err(err) => TransactionError::Aborted(err),
        };

        self.rollback(undo)
            .map_err(|err| TransactionError::Unavailable(err.to_string()))?;
        Err(failure)
    }
}

#[derive(Debug)]
enum Undo {
    Participant {
        id: ParticipantId,
        update: ParticipantUpdate,
        previous_package: Option<PackageAssignment>,
    },
    Rank {
        id: ParticipantId,
        previous: Option<RankId>,
    },
    Earnings {
        id: EntryId,
    },
    Status {
        id: RequestId,
        status: ApprovalStatus,
        note: Option<String>,
    },
}

/// Store view handed to transactional work; records how to undo each write.
struct MemoryTransaction<'s> {
    store: &'s MemoryStore,
    undo: Mutex<Vec<Undo>>,
}

impl MemoryTransaction<'_> {
    fn record(&self, step: Undo) -> Result<(), StoreError> {
        self.undo
            .lock()
            .map_err(|_| StoreError::Unavailable("transaction log poisoned".to_string()))?
            .push(step);
        Ok(())
    }

    fn into_undo(self) -> Result<Vec<Undo>, TransactionError> {
        self.undo
            .into_inner()
            .map_err(|_| TransactionError::Unavailable("transaction log poisoned".to_string()))
    }
}

impl ReferralStore for MemoryTransaction<'_> {
    fn participant(&self, id: &ParticipantId) -> Result<Option<Participant>, StoreError> {
        self.store.participant(id)
    }

    fn participant_by_handle(&self, handle: &Handle) -> Result<Option<Participant>, StoreError> {
        self.store.participant_by_handle(handle)
    }

    fn direct_children(&self, handle: &Handle) -> Result<Vec<Participant>, StoreError> {
        self.store.direct_children(handle)
    }

    fn apply(
        &self,
        id: &ParticipantId,
        update: ParticipantUpdate,
    ) -> Result<Participant, StoreError> {
        let (participant, previous_package) = self.store.apply_tracked(id, update.clone())?;
        self.record(Undo::Participant {
            id: id.clone(),
            update,
            previous_package,
        })?;
        Ok(participant)
    }

    fn assign_rank(&self, id: &ParticipantId, rank: Option<RankId>) -> Result<(), StoreError> {
        let previous = self.store.assign_rank_tracked(id, rank)?;
        self.record(Undo::Rank {
            id: id.clone(),
            previous,
        })
    }

    fn ranks_by_threshold(&self) -> Result<Vec<Rank>, StoreError> {
        self.store.ranks_by_threshold()
    }

    fn package(&self, id: &PackageId) -> Result<Option<Package>, StoreError> {
        self.store.package(id)
    }

    fn insert_earnings(&self, entry: NewEarningsEntry) -> Result<EarningsEntry, StoreError> {
        let entry = self.store.insert_earnings(entry)?;
        self.record(Undo::Earnings {
            id: entry.id.clone(),
        })?;
        Ok(entry)
    }

    fn earnings_for_request(&self, id: &RequestId) -> Result<Vec<EarningsEntry>, StoreError> {
        self.store.earnings_for_request(id)
    }

    fn earnings_for_participant(
        &self,
        id: &ParticipantId,
    ) -> Result<Vec<EarningsEntry>, StoreError> {
        self.store.earnings_for_participant(id)
    }

    fn approval_request(&self, id: &RequestId) -> Result<Option<ApprovalRequest>, StoreError> {
        self.store.approval_request(id)
    }

    fn set_request_status(
        &self,
        id: &RequestId,
        status: ApprovalStatus,
        note: Option<String>,
    ) -> Result<(), StoreError> {
        let (previous, previous_note) = self.store.set_status_tracked(id, status, note)?;
        self.record(Undo::Status {
            id: id.clone(),
            status: previous,
            note: previous_note,
        })
    }

    fn compare_and_set_request_status(
        &self,
        id: &RequestId,
        expected: ApprovalStatus,
        next: ApprovalStatus,
    ) -> Result<bool, StoreError> {
        let swapped = self
            .store
            .compare_and_set_request_status(id, expected, next)?;
        if swapped {
            self.record(Undo::Status {
                id: id.clone(),
                status: expected,
                note: self.store.approval_request(id)?.and_then(|request| request.note),
            })?;
        }
        Ok(swapped)
    }
}
