use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Duration;

use super::common::*;
use crate::config::EngineSettings;
use crate::workflows::referral::domain::{
    ApprovalRequest, ApprovalStatus, Funding, Package, PackageAssignment, PackageId, Participant,
};
use crate::workflows::referral::error::{EngineError, NotFoundError, ValidationError};
use crate::workflows::referral::events::PayoutEvent;
use crate::workflows::referral::execution::{ExecutionFailure, ExecutionMode, FallbackPolicy};
use crate::workflows::referral::memory::MemoryStore;
use crate::workflows::referral::repository::ReferralStore;
use crate::workflows::referral::service::{ApprovalFailure, ApprovalOrchestrator};

fn with_requests(store: Arc<MemoryStore>, requests: Vec<ApprovalRequest>) -> Arc<MemoryStore> {
    for request in requests {
        store.insert_request(request).expect("request inserts");
    }
    store
}

fn status_of(store: &dyn ReferralStore, id: &str) -> ApprovalStatus {
    store
        .approval_request(&rid(id))
        .expect("request readable")
        .expect("request present")
        .status
}

fn holding(id: &str, parent: Option<&str>, package: &str, amount: u64) -> Participant {
    Participant {
        package: Some(PackageAssignment {
            package_id: PackageId(package.to_string()),
            amount,
            activated_at: now() - Duration::days(400),
            valid_until: now() - Duration::days(35),
        }),
        ..participant(id, parent)
    }
}

#[test]
fn approval_credits_points_pays_commissions_and_marks_approved() {
    let store = with_requests(store_with(sponsor_chain()), vec![request("req-1", "buyer")]);
    let (orchestrator, events) = orchestrator(store.clone());

    let outcome = orchestrator
        .approve_request_at(&rid("req-1"), now())
        .expect("approval succeeds");

    assert_eq!(outcome.amounts.package_amount, 10_000);
    assert_eq!(outcome.amounts.debited, 0);
    assert_eq!(outcome.amounts.points_awarded, 100);
    assert_eq!(outcome.amounts.direct_commission, 1_000);
    assert_eq!(outcome.amounts.indirect_commission, 40);
    assert_eq!(outcome.amounts.unclaimed, 20);
    assert_eq!(
        outcome.credited,
        vec![pid("buyer"), pid("sponsor"), pid("up1"), pid("up2"), pid("up3")]
    );
    assert_eq!(outcome.valid_until, now() + Duration::days(365));
    assert!(!outcome.flags.used_fallback);
    assert!(!outcome.flags.is_renewal);

    assert_eq!(status_of(&*store, "req-1"), ApprovalStatus::Approved);
    let buyer = fetch(&*store, "buyer");
    assert_eq!(buyer.points, 100);
    assert_eq!(buyer.rank, Some(rank_id("bronze")));
    assert_eq!(
        buyer.package.map(|held| held.package_id),
        Some(PackageId(STARTER.to_string()))
    );
    let up1 = fetch(&*store, "up1");
    assert_eq!((up1.points, up1.balance), (400, 40));
    assert_eq!(up1.rank, Some(rank_id("silver")));

    assert_eq!(
        orchestrator
            .ledger()
            .total_for_request(&rid("req-1"))
            .expect("ledger readable"),
        1_040
    );
    assert_eq!(
        events.events(),
        vec![PayoutEvent::UnclaimedCommission {
            request_id: rid("req-1"),
            amount: 20,
            tiers: vec!["Gold".to_string()],
        }]
    );
}

#[test]
fn approving_twice_pays_once() {
    let store = with_requests(store_with(sponsor_chain()), vec![request("req-1", "buyer")]);
    let (orchestrator, _) = orchestrator(store.clone());

    orchestrator
        .approve_request_at(&rid("req-1"), now())
        .expect("first approval succeeds");
    let err = orchestrator
        .approve_request_at(&rid("req-1"), now())
        .expect_err("second approval is refused");

    assert_eq!(err.request_id, rid("req-1"));
    assert_eq!(
        err.validation(),
        Some(&ValidationError::NotPending(ApprovalStatus::Approved))
    );
    assert_eq!(fetch(&*store, "sponsor").balance, 1_000);
    assert_eq!(fetch(&*store, "buyer").points, 100);
    assert_eq!(store.earnings().expect("earnings readable").len(), 2);
}

#[test]
fn inactive_participant_is_rejected_without_mutation() {
    let mut participants = sponsor_chain();
    if let Some(buyer) = participants.iter_mut().find(|p| p.id == pid("buyer")) {
        buyer.active = false;
    }
    let store = with_requests(store_with(participants), vec![request("req-1", "buyer")]);
    let (orchestrator, events) = orchestrator(store.clone());

    let err = orchestrator
        .approve_request_at(&rid("req-1"), now())
        .expect_err("inactive buyer is rejected");

    assert_eq!(
        err.validation(),
        Some(&ValidationError::InactiveParticipant(pid("buyer")))
    );
    assert_eq!(status_of(&*store, "req-1"), ApprovalStatus::Rejected);
    assert_eq!(fetch(&*store, "buyer").points, 0);
    assert_eq!(fetch(&*store, "sponsor").balance, 0);
    assert!(events.events().is_empty());
}

#[test]
fn inactive_package_is_rejected() {
    let store = store_with(sponsor_chain());
    store
        .insert_package(Package {
            id: PackageId("retired".to_string()),
            active: false,
            ..starter_package()
        })
        .expect("package inserts");
    let store = with_requests(
        store,
        vec![ApprovalRequest {
            package_id: PackageId("retired".to_string()),
            ..request("req-1", "buyer")
        }],
    );
    let (orchestrator, _) = orchestrator(store.clone());

    let err = orchestrator
        .approve_request_at(&rid("req-1"), now())
        .expect_err("inactive package is rejected");

    assert!(matches!(
        err.validation(),
        Some(ValidationError::InactivePackage(_))
    ));
    assert_eq!(status_of(&*store, "req-1"), ApprovalStatus::Rejected);
}

#[test]
fn balance_pool_shortfall_is_rejected() {
    let mut participants = sponsor_chain();
    if let Some(buyer) = participants.iter_mut().find(|p| p.id == pid("buyer")) {
        buyer.balance = 500;
    }
    let store = with_requests(
        store_with(participants),
        vec![ApprovalRequest {
            funding: Funding::BalancePool,
            ..request("req-1", "buyer")
        }],
    );
    let (orchestrator, _) = orchestrator(store.clone());

    let err = orchestrator
        .approve_request_at(&rid("req-1"), now())
        .expect_err("balance does not cover the package");

    assert_eq!(
        err.validation(),
        Some(&ValidationError::InsufficientFunds {
            available: 500,
            required: 10_000,
        })
    );
    assert_eq!(status_of(&*store, "req-1"), ApprovalStatus::Rejected);
    assert_eq!(fetch(&*store, "buyer").balance, 500);
}

#[test]
fn balance_pool_purchase_debits_the_buyer() {
    let mut participants = sponsor_chain();
    if let Some(buyer) = participants.iter_mut().find(|p| p.id == pid("buyer")) {
        buyer.balance = 12_000;
    }
    let store = with_requests(
        store_with(participants),
        vec![ApprovalRequest {
            funding: Funding::BalancePool,
            ..request("req-1", "buyer")
        }],
    );
    let (orchestrator, _) = orchestrator(store.clone());

    let outcome = orchestrator
        .approve_request_at(&rid("req-1"), now())
        .expect("approval succeeds");

    assert_eq!(outcome.amounts.debited, 10_000);
    let buyer = fetch(&*store, "buyer");
    assert_eq!(buyer.balance, 2_000);
    assert_eq!(buyer.total_earnings, 0);
}

#[test]
fn missing_participant_fails_the_request() {
    let store = with_requests(store_with(sponsor_chain()), vec![request("req-1", "nobody")]);
    let (orchestrator, _) = orchestrator(store.clone());

    let err = orchestrator
        .approve_request_at(&rid("req-1"), now())
        .expect_err("participant must exist");

    assert_eq!(
        err.not_found(),
        Some(&NotFoundError::Participant(pid("nobody")))
    );
    assert_eq!(status_of(&*store, "req-1"), ApprovalStatus::Failed);
}

#[test]
fn missing_package_fails_the_request() {
    let store = with_requests(
        store_with(sponsor_chain()),
        vec![ApprovalRequest {
            package_id: PackageId("ghost".to_string()),
            ..request("req-1", "buyer")
        }],
    );
    let (orchestrator, _) = orchestrator(store.clone());

    let err = orchestrator
        .approve_request_at(&rid("req-1"), now())
        .expect_err("package must exist");

    assert!(matches!(err.not_found(), Some(NotFoundError::Package(_))));
    assert_eq!(status_of(&*store, "req-1"), ApprovalStatus::Failed);
}

#[test]
fn unknown_request_is_not_found() {
    let store = store_with(sponsor_chain());
    let (orchestrator, _) = orchestrator(store);

    let err = orchestrator
        .approve_request_at(&rid("req-404"), now())
        .expect_err("request must exist");

    assert_eq!(err.not_found(), Some(&NotFoundError::Request(rid("req-404"))));
}

#[test]
fn repeat_purchase_is_flagged_as_renewal() {
    let store = with_requests(
        store_with(vec![
            participant("sponsor", None),
            holding("buyer", Some("sponsor"), STARTER, 10_000),
        ]),
        vec![request("req-1", "buyer")],
    );
    let (orchestrator, _) = orchestrator(store.clone());

    let outcome = orchestrator
        .approve_request_at(&rid("req-1"), now())
        .expect("approval succeeds");

    assert!(outcome.flags.is_renewal);
    assert!(!outcome.flags.is_upgrade);
    let held = fetch(&*store, "buyer").package.expect("package assigned");
    assert_eq!(held.activated_at, now());
}

#[test]
fn larger_package_is_flagged_as_upgrade() {
    let store = with_requests(
        store_with(vec![
            participant("sponsor", None),
            holding("buyer", Some("sponsor"), "mini", 5_000),
        ]),
        vec![request("req-1", "buyer")],
    );
    let (orchestrator, _) = orchestrator(store);

    let outcome = orchestrator
        .approve_request_at(&rid("req-1"), now())
        .expect("approval succeeds");

    assert!(outcome.flags.is_upgrade);
    assert!(!outcome.flags.is_renewal);
}

#[test]
fn infrastructure_failure_falls_back_to_best_effort() {
    let inner = with_requests(store_with(sponsor_chain()), vec![request("req-1", "buyer")]);
    let store = Arc::new(FlakyStore::new(inner.clone(), 1));
    let (orchestrator, events) = orchestrator(store.clone());

    let outcome = orchestrator
        .approve_request_at(&rid("req-1"), now())
        .expect("fallback completes the approval");

    assert!(outcome.flags.used_fallback);
    assert_eq!(store.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(status_of(&*inner, "req-1"), ApprovalStatus::Approved);
    assert_eq!(fetch(&*inner, "sponsor").balance, 1_000);
    assert!(events
        .events()
        .iter()
        .any(|event| matches!(event, PayoutEvent::FallbackExecuted { .. })));
}

#[test]
fn fallback_policy_reports_the_strategy_that_ran() {
    let inner = store_with(vec![participant("a", None)]);
    let flaky = FlakyStore::new(inner.clone(), 1);
    let policy = FallbackPolicy::new(std::time::Duration::from_secs(5), true);

    let atomic = policy.run(&*inner, |_| Ok(())).expect("atomic run");
    let rerun = policy.run(&flaky, |_| Ok(())).expect("fallback run");

    assert_eq!(atomic.mode, ExecutionMode::Atomic);
    assert!(atomic.atomic_failure.is_none());
    assert_eq!(rerun.mode, ExecutionMode::BestEffort);
    assert!(rerun.atomic_failure.is_some());
}

#[test]
fn timed_out_atomic_attempt_rolls_back_before_rerun() {
    let store = with_requests(store_with(sponsor_chain()), vec![request("req-1", "buyer")]);
    let orchestrator = ApprovalOrchestrator::new(
        store.clone(),
        Arc::new(MemoryEvents::default()),
        EngineSettings {
            transaction_timeout: std::time::Duration::from_nanos(1),
            ..settings()
        },
    );

    let outcome = orchestrator
        .approve_request_at(&rid("req-1"), now())
        .expect("rerun completes the approval");

    assert!(outcome.flags.used_fallback);
    assert_eq!(status_of(&*store, "req-1"), ApprovalStatus::Approved);
    assert_eq!(fetch(&*store, "sponsor").balance, 1_000);
    assert_eq!(fetch(&*store, "buyer").points, 100);
    let up1 = fetch(&*store, "up1");
    assert_eq!((up1.points, up1.balance), (400, 40));
    assert_eq!(store.earnings().expect("earnings readable").len(), 2);
}

#[test]
fn oversized_commission_fails_and_rolls_back() {
    let store = store_with(sponsor_chain());
    store
        .insert_package(Package {
            id: PackageId("jumbo".to_string()),
            direct_commission: i64::MAX as u64 + 1,
            ..starter_package()
        })
        .expect("package inserts");
    let store = with_requests(
        store,
        vec![ApprovalRequest {
            package_id: PackageId("jumbo".to_string()),
            ..request("req-1", "buyer")
        }],
    );
    let (orchestrator, _) = orchestrator(store.clone());

    let err = orchestrator
        .approve_request_at(&rid("req-1"), now())
        .expect_err("commission cannot be represented");

    assert!(matches!(
        err.failure,
        ApprovalFailure::Execution(ExecutionFailure::Business(EngineError::Overflow(_)))
    ));
    assert_eq!(status_of(&*store, "req-1"), ApprovalStatus::Failed);
    assert_eq!(fetch(&*store, "buyer").points, 0);
    assert_eq!(fetch(&*store, "sponsor").balance, 0);
    assert!(store.earnings().expect("earnings readable").is_empty());
}

#[test]
fn disabled_fallback_fails_the_request() {
    let inner = with_requests(store_with(sponsor_chain()), vec![request("req-1", "buyer")]);
    let store = Arc::new(FlakyStore::new(inner.clone(), 1));
    let orchestrator = ApprovalOrchestrator::new(
        store,
        Arc::new(MemoryEvents::default()),
        EngineSettings {
            fallback_enabled: false,
            ..settings()
        },
    );

    let err = orchestrator
        .approve_request_at(&rid("req-1"), now())
        .expect_err("no fallback configured");

    assert!(matches!(
        err.failure,
        ApprovalFailure::Execution(ExecutionFailure::Infrastructure(_))
    ));
    assert_eq!(status_of(&*inner, "req-1"), ApprovalStatus::Failed);
    assert!(inner.earnings().expect("earnings readable").is_empty());
}

#[test]
fn failing_fallback_reports_both_attempts() {
    let inner = with_requests(store_with(sponsor_chain()), vec![request("req-1", "buyer")]);
    let store = Arc::new(FlakyStore::new(inner.clone(), 1));
    store.broken_writes.store(true, Ordering::SeqCst);
    let (orchestrator, events) = orchestrator(store);

    let err = orchestrator
        .approve_request_at(&rid("req-1"), now())
        .expect_err("both attempts fail");

    assert!(matches!(
        err.failure,
        ApprovalFailure::Execution(ExecutionFailure::FallbackFailed { .. })
    ));
    assert_eq!(status_of(&*inner, "req-1"), ApprovalStatus::Failed);
    assert!(events.events().is_empty());
}

#[test]
fn operator_rejection_pays_nothing() {
    let store = with_requests(store_with(sponsor_chain()), vec![request("req-1", "buyer")]);
    let (orchestrator, _) = orchestrator(store.clone());

    orchestrator
        .reject_request(&rid("req-1"), "payment proof unreadable")
        .expect("rejection succeeds");
    let err = orchestrator
        .approve_request_at(&rid("req-1"), now())
        .expect_err("rejected request cannot be approved");

    let request = store
        .approval_request(&rid("req-1"))
        .expect("request readable")
        .expect("request present");
    assert_eq!(request.status, ApprovalStatus::Rejected);
    assert_eq!(request.note.as_deref(), Some("payment proof unreadable"));
    assert_eq!(
        err.validation(),
        Some(&ValidationError::NotPending(ApprovalStatus::Rejected))
    );
    assert!(store.earnings().expect("earnings readable").is_empty());
}

#[test]
fn recompute_rank_returns_new_title() {
    let store = store_with(vec![ranked("p", None, "member", 350)]);
    let (orchestrator, _) = orchestrator(store);

    assert_eq!(
        orchestrator.recompute_rank(&pid("p")).expect("recompute"),
        Some("Silver".to_string())
    );
    assert_eq!(orchestrator.recompute_rank(&pid("ghost")).expect("recompute"), None);
}

#[test]
fn qualification_report_previews_without_writing() {
    let store = store_with(vec![ranked("p", None, "member", 350)]);
    let (orchestrator, _) = orchestrator(store.clone());

    let report = orchestrator
        .qualification_report(&pid("p"))
        .expect("report builds")
        .expect("participant exists");

    assert_eq!(report.qualified_title.as_deref(), Some("Silver"));
    assert!(report.is_stale());
    assert_eq!(fetch(&*store, "p").rank, Some(rank_id("member")));
    assert!(orchestrator
        .qualification_report(&pid("ghost"))
        .expect("report builds")
        .is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_approvals_of_one_request_pay_once() {
    let store = with_requests(store_with(sponsor_chain()), vec![request("req-1", "buyer")]);
    let (orchestrator, _) = orchestrator(store.clone());
    let orchestrator = Arc::new(orchestrator);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let orchestrator = orchestrator.clone();
        tasks.push(tokio::task::spawn_blocking(move || {
            orchestrator.approve_request_at(&rid("req-1"), now())
        }));
    }

    let mut approved = 0;
    for task in tasks {
        match task.await.expect("task joins") {
            Ok(_) => approved += 1,
            Err(err) => assert!(matches!(
                err.validation(),
                Some(ValidationError::NotPending(_)) | Some(ValidationError::AlreadyClaimed)
            )),
        }
    }

    assert_eq!(approved, 1);
    assert_eq!(fetch(&*store, "sponsor").balance, 1_000);
    assert_eq!(fetch(&*store, "up1").points, 400);
}
