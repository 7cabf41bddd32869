use serde::Serialize;
use tracing::{info, warn};

use super::domain::{Amount, RequestId};

/// Observable conditions an approval produces besides its ledger entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PayoutEvent {
    UnclaimedCommission {
        request_id: RequestId,
        amount: Amount,
        tiers: Vec<String>,
    },
    FallbackExecuted {
        request_id: RequestId,
        reason: String,
    },
}

impl PayoutEvent {
    pub fn request_id(&self) -> &RequestId {
        match self {
            PayoutEvent::UnclaimedCommission { request_id, .. }
            | PayoutEvent::FallbackExecuted { request_id, .. } => request_id,
        }
    }
}

/// Outbound hook for payout events (audit queue, operator alerts).
pub trait PayoutEventSink: Send + Sync {
    fn publish(&self, event: PayoutEvent) -> Result<(), EventError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("event transport unavailable: {0}")]
    Transport(String),
}

/// Sink that only emits tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl PayoutEventSink for TracingEventSink {
    fn publish(&self, event: PayoutEvent) -> Result<(), EventError> {
        match &event {
            PayoutEvent::UnclaimedCommission {
                request_id,
                amount,
                tiers,
            } => info!(%request_id, amount, ?tiers, "payout event: unclaimed commission"),
            PayoutEvent::FallbackExecuted { request_id, reason } => {
                warn!(%request_id, %reason, "payout event: fallback execution")
            }
        }
        Ok(())
    }
}
