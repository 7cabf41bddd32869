use crate::cli::{ApproveArgs, RecomputeArgs, SimulateArgs};
use crate::infra::{build_orchestrator, print_json, write_ledger};
use chrono::Utc;
use mlm_engine::config::AppConfig;
use mlm_engine::error::AppError;
use mlm_engine::workflows::referral::{
    Amount, ApprovalError, ApprovalOutcome, ApprovalStatus, MemoryStore, Participant,
    ParticipantId, ReferralGraph, ReferralStore, RequestId,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Serialize)]
struct RankRow {
    participant_id: ParticipantId,
    rank: Option<String>,
}

#[derive(Debug, Serialize)]
struct SimulationRow {
    request_id: RequestId,
    status: ApprovalStatus,
    direct_commission: Amount,
    indirect_commission: Amount,
    unclaimed: Amount,
    used_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct SimulationSummary {
    approved: usize,
    not_approved: usize,
    total_paid: Amount,
    total_unclaimed: Amount,
    requests: Vec<SimulationRow>,
    participants: Vec<Participant>,
}

pub(crate) fn run_approve(args: ApproveArgs, config: &AppConfig) -> Result<(), AppError> {
    let ApproveArgs {
        fixture,
        request,
        at,
        ledger_csv,
    } = args;

    let (_, orchestrator) = build_orchestrator(&fixture.fixture, config.engine.clone())?;
    let request_id = RequestId(request);
    let outcome = orchestrator.approve_request_at(&request_id, at.unwrap_or_else(Utc::now))?;
    print_json(&outcome)?;

    if let Some(path) = ledger_csv {
        let entries = orchestrator.ledger().entries_for_request(&request_id)?;
        write_ledger(&path, &entries)?;
        info!(path = %path.display(), entries = entries.len(), "ledger exported");
    }
    Ok(())
}

pub(crate) fn run_recompute(args: RecomputeArgs, config: &AppConfig) -> Result<(), AppError> {
    let RecomputeArgs {
        fixture,
        participant,
        dry_run,
    } = args;

    let (store, orchestrator) = build_orchestrator(&fixture.fixture, config.engine.clone())?;
    let targets = match participant {
        Some(id) => vec![ParticipantId(id)],
        None => deepest_first(&store, config.engine.max_traversal_depth)?,
    };

    if dry_run {
        let mut reports = Vec::with_capacity(targets.len());
        for participant_id in &targets {
            if let Some(report) = orchestrator.qualification_report(participant_id)? {
                reports.push(report);
            }
        }
        return print_json(&reports);
    }

    let mut rows = Vec::with_capacity(targets.len());
    for participant_id in targets {
        let rank = orchestrator.recompute_rank(&participant_id)?;
        rows.push(RankRow {
            participant_id,
            rank,
        });
    }
    print_json(&rows)
}

pub(crate) async fn run_simulate(args: SimulateArgs, config: &AppConfig) -> Result<(), AppError> {
    let SimulateArgs {
        fixture,
        at,
        parallel,
        ledger_csv,
    } = args;

    let (store, orchestrator) = build_orchestrator(&fixture.fixture, config.engine.clone())?;
    let orchestrator = Arc::new(orchestrator);
    let now = at.unwrap_or_else(Utc::now);
    let pending: Vec<RequestId> = store
        .requests()?
        .into_iter()
        .filter(|request| request.status == ApprovalStatus::Pending)
        .map(|request| request.id)
        .collect();

    let results = if parallel {
        let mut tasks = Vec::with_capacity(pending.len());
        for request_id in pending {
            let orchestrator = orchestrator.clone();
            tasks.push(tokio::task::spawn_blocking(move || {
                let result = orchestrator.approve_request_at(&request_id, now);
                (request_id, result)
            }));
        }
        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            results.push(task.await.map_err(std::io::Error::other)?);
        }
        results
    } else {
        pending
            .into_iter()
            .map(|request_id| {
                let result = orchestrator.approve_request_at(&request_id, now);
                (request_id, result)
            })
            .collect::<Vec<_>>()
    };

    let mut requests = Vec::with_capacity(results.len());
    for (request_id, result) in results {
        requests.push(summarize(&store, request_id, result)?);
    }

    let approved = requests
        .iter()
        .filter(|row| row.status == ApprovalStatus::Approved)
        .count();
    let summary = SimulationSummary {
        approved,
        not_approved: requests.len() - approved,
        total_paid: requests
            .iter()
            .map(|row| row.direct_commission + row.indirect_commission)
            .sum(),
        total_unclaimed: requests.iter().map(|row| row.unclaimed).sum(),
        requests,
        participants: store.participants()?,
    };
    info!(
        approved = summary.approved,
        not_approved = summary.not_approved,
        total_paid = summary.total_paid,
        "simulation finished"
    );
    print_json(&summary)?;

    if let Some(path) = ledger_csv {
        write_ledger(&path, &store.earnings()?)?;
    }
    Ok(())
}

fn summarize(
    store: &MemoryStore,
    request_id: RequestId,
    result: Result<ApprovalOutcome, ApprovalError>,
) -> Result<SimulationRow, AppError> {
    match result {
        Ok(outcome) => Ok(SimulationRow {
            request_id,
            status: ApprovalStatus::Approved,
            direct_commission: outcome.amounts.direct_commission,
            indirect_commission: outcome.amounts.indirect_commission,
            unclaimed: outcome.amounts.unclaimed,
            used_fallback: outcome.flags.used_fallback,
            error: None,
        }),
        Err(err) => {
            let status = store
                .approval_request(&request_id)?
                .map(|request| request.status)
                .unwrap_or(ApprovalStatus::Failed);
            Ok(SimulationRow {
                request_id,
                status,
                direct_commission: 0,
                indirect_commission: 0,
                unclaimed: 0,
                used_fallback: false,
                error: Some(err.to_string()),
            })
        }
    }
}

/// Participants ordered deepest first so downline ranks settle before their upline is
/// evaluated.
fn deepest_first(store: &MemoryStore, max_depth: usize) -> Result<Vec<ParticipantId>, AppError> {
    let graph = ReferralGraph::new(store, max_depth);
    let mut depths: Vec<(usize, ParticipantId)> = store
        .participants()?
        .into_iter()
        .map(|participant| {
            let depth = graph.ancestor_chain(&participant.handle).count();
            (depth, participant.id)
        })
        .collect();
    depths.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    Ok(depths.into_iter().map(|(_, id)| id).collect())
}
