use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use crate::config::EngineSettings;
use crate::workflows::referral::domain::{
    ApprovalRequest, ApprovalStatus, EarningsEntry, Funding, Handle, LineRequirement,
    MemberCriterion, NewEarningsEntry, Package, PackageId, Participant, ParticipantId,
    ParticipantUpdate, Rank, RankId, RequestId,
};
use crate::workflows::referral::error::EngineError;
use crate::workflows::referral::events::{EventError, PayoutEvent, PayoutEventSink};
use crate::workflows::referral::memory::MemoryStore;
use crate::workflows::referral::ranks::RankLadder;
use crate::workflows::referral::repository::{
    ReferralStore, StoreError, TransactionError, TransactionalStore,
};
use crate::workflows::referral::service::ApprovalOrchestrator;

pub(super) const STARTER: &str = "starter";

pub(super) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn settings() -> EngineSettings {
    EngineSettings {
        max_traversal_depth: 10,
        transaction_timeout: Duration::from_secs(300),
        package_validity_days: 365,
        fallback_enabled: true,
    }
}

pub(super) fn pid(id: &str) -> ParticipantId {
    ParticipantId(id.to_string())
}

pub(super) fn handle(id: &str) -> Handle {
    Handle(id.to_string())
}

pub(super) fn rid(id: &str) -> RequestId {
    RequestId(id.to_string())
}

pub(super) fn rank_id(id: &str) -> RankId {
    RankId(id.to_string())
}

/// Participant whose id and handle are both `id`.
pub(super) fn participant(id: &str, parent: Option<&str>) -> Participant {
    Participant {
        id: pid(id),
        handle: handle(id),
        parent_handle: parent.map(handle),
        points: 0,
        balance: 0,
        total_earnings: 0,
        rank: None,
        active: true,
        package: None,
    }
}

pub(super) fn ranked(id: &str, parent: Option<&str>, rank: &str, points: u64) -> Participant {
    Participant {
        rank: Some(rank_id(rank)),
        points,
        ..participant(id, parent)
    }
}

pub(super) fn rank(id: &str, title: &str, required_points: u64) -> Rank {
    Rank {
        id: rank_id(id),
        title: title.to_string(),
        required_points,
        downline: Vec::new(),
    }
}

/// Member (0) < Bronze (100) < Silver (300) < Gold (1000, downline gated).
pub(super) fn standard_ranks() -> Vec<Rank> {
    vec![
        rank("member", "Member", 0),
        rank("bronze", "Bronze", 100),
        rank("silver", "Silver", 300),
        Rank {
            downline: vec![
                LineRequirement {
                    lines: 2,
                    criterion: MemberCriterion::RankAtLeast("Silver".to_string()),
                },
                LineRequirement {
                    lines: 3,
                    criterion: MemberCriterion::PointsAtLeast(500),
                },
            ],
            ..rank("gold", "Gold", 1000)
        },
    ]
}

pub(super) fn standard_ladder() -> RankLadder {
    RankLadder::new(standard_ranks()).expect("standard ladder is valid")
}

pub(super) fn starter_package() -> Package {
    Package {
        id: PackageId(STARTER.to_string()),
        name: "Starter".to_string(),
        amount: 10_000,
        direct_commission: 1_000,
        indirect_commission: 20,
        reward_points: 100,
        active: true,
    }
}

pub(super) fn request(id: &str, participant: &str) -> ApprovalRequest {
    ApprovalRequest {
        id: rid(id),
        participant_id: pid(participant),
        package_id: PackageId(STARTER.to_string()),
        funding: Funding::External,
        status: ApprovalStatus::Pending,
        note: None,
    }
}

pub(super) fn store_with(participants: Vec<Participant>) -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    for rank in standard_ranks() {
        store.insert_rank(rank).expect("rank inserts");
    }
    store
        .insert_package(starter_package())
        .expect("package inserts");
    for participant in participants {
        store
            .insert_participant(participant)
            .expect("participant inserts");
    }
    Arc::new(store)
}

/// Linear chain `p0 <- p1 <- ... <- p{len-1}`; `p{len-1}` is the deepest.
pub(super) fn linear_chain(len: usize) -> Vec<Participant> {
    (0..len)
        .map(|index| {
            let id = format!("p{index}");
            let parent = index.checked_sub(1).map(|parent| format!("p{parent}"));
            participant(&id, parent.as_deref())
        })
        .collect()
}

/// `buyer -> sponsor -> up1 (Silver) -> up2 -> up3`.
pub(super) fn sponsor_chain() -> Vec<Participant> {
    vec![
        participant("up3", None),
        participant("up2", Some("up3")),
        ranked("up1", Some("up2"), "silver", 300),
        participant("sponsor", Some("up1")),
        participant("buyer", Some("sponsor")),
    ]
}

pub(super) fn fetch(store: &dyn ReferralStore, id: &str) -> Participant {
    store
        .participant(&pid(id))
        .expect("fetch succeeds")
        .expect("participant present")
}

pub(super) fn orchestrator<S: TransactionalStore + 'static>(
    store: Arc<S>,
) -> (ApprovalOrchestrator<S, MemoryEvents>, Arc<MemoryEvents>) {
    let events = Arc::new(MemoryEvents::default());
    let orchestrator = ApprovalOrchestrator::new(store, events.clone(), settings());
    (orchestrator, events)
}

#[derive(Default)]
pub(super) struct MemoryEvents {
    events: Mutex<Vec<PayoutEvent>>,
}

impl MemoryEvents {
    pub(super) fn events(&self) -> Vec<PayoutEvent> {
        self.events.lock().expect("event mutex poisoned").clone()
    }
}

impl PayoutEventSink for MemoryEvents {
    fn publish(&self, event: PayoutEvent) -> Result<(), EventError> {
        self.events
            .lock()
            .expect("event mutex poisoned")
            .push(event);
        Ok(())
    }
}

/// Memory store whose transactions fail with an infrastructure error a set number of
/// times; `broken_writes` additionally fails every participant update.
pub(super) struct FlakyStore {
    pub(super) inner: Arc<MemoryStore>,
    failing_transactions: AtomicUsize,
    pub(super) attempts: AtomicUsize,
    pub(super) broken_writes: AtomicBool,
}

impl FlakyStore {
    pub(super) fn new(inner: Arc<MemoryStore>, failing_transactions: usize) -> Self {
        Self {
            inner,
            failing_transactions: AtomicUsize::new(failing_transactions),
            attempts: AtomicUsize::new(0),
            broken_writes: AtomicBool::new(false),
        }
    }
}

impl ReferralStore for FlakyStore {
    fn participant(&self, id: &ParticipantId) -> Result<Option<Participant>, StoreError> {
        self.inner.participant(id)
    }

    fn participant_by_handle(&self, handle: &Handle) -> Result<Option<Participant>, StoreError> {
        self.inner.participant_by_handle(handle)
    }

    fn direct_children(&self, handle: &Handle) -> Result<Vec<Participant>, StoreError> {
        self.inner.direct_children(handle)
    }

    fn apply(
        &self,
        id: &ParticipantId,
        update: ParticipantUpdate,
    ) -> Result<Participant, StoreError> {
        if self.broken_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("primary offline".to_string()));
        }
        self.inner.apply(id, update)
    }

    fn assign_rank(&self, id: &ParticipantId, rank: Option<RankId>) -> Result<(), StoreError> {
        self.inner.assign_rank(id, rank)
    }

    fn ranks_by_threshold(&self) -> Result<Vec<Rank>, StoreError> {
        self.inner.ranks_by_threshold()
    }

    fn package(&self, id: &PackageId) -> Result<Option<Package>, StoreError> {
        self.inner.package(id)
    }

    fn insert_earnings(&self, entry: NewEarningsEntry) -> Result<EarningsEntry, StoreError> {
        self.inner.insert_earnings(entry)
    }

    fn earnings_for_request(&self, id: &RequestId) -> Result<Vec<EarningsEntry>, StoreError> {
        self.inner.earnings_for_request(id)
    }

    fn earnings_for_participant(
        &self,
        id: &ParticipantId,
    ) -> Result<Vec<EarningsEntry>, StoreError> {
        self.inner.earnings_for_participant(id)
    }

    fn approval_request(&self, id: &RequestId) -> Result<Option<ApprovalRequest>, StoreError> {
        self.inner.approval_request(id)
    }

    fn set_request_status(
        &self,
        id: &RequestId,
        status: ApprovalStatus,
        note: Option<String>,
    ) -> Result<(), StoreError> {
        self.inner.set_request_status(id, status, note)
    }

    fn compare_and_set_request_status(
        &self,
        id: &RequestId,
        expected: ApprovalStatus,
        next: ApprovalStatus,
    ) -> Result<bool, StoreError> {
        self.inner.compare_and_set_request_status(id, expected, next)
    }
}

impl TransactionalStore for FlakyStore {
    fn run_in_transaction<T, F>(&self, timeout: Duration, work: F) -> Result<T, TransactionError>
    where
        F: FnOnce(&dyn ReferralStore) -> Result<T, EngineError>,
    {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_transactions.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_transactions
                .store(remaining - 1, Ordering::SeqCst);
            return Err(TransactionError::TimedOut {
                elapsed: timeout + Duration::from_secs(1),
                limit: timeout,
            });
        }
        self.inner.run_in_transaction(timeout, work)
    }
}
