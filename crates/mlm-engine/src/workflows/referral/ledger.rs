use std::io;

use serde::Serialize;

use super::domain::{Amount, EarningsEntry, NewEarningsEntry, ParticipantId, RequestId};
use super::repository::{ReferralStore, StoreError};

/// Append-only view over payout records.
#[derive(Clone, Copy)]
pub struct EarningsLedger<'a> {
    store: &'a dyn ReferralStore,
}

impl<'a> EarningsLedger<'a> {
    pub fn new(store: &'a dyn ReferralStore) -> Self {
        Self { store }
    }

    pub fn record(&self, entry: NewEarningsEntry) -> Result<EarningsEntry, StoreError> {
        self.store.insert_earnings(entry)
    }

    pub fn entries_for_request(&self, id: &RequestId) -> Result<Vec<EarningsEntry>, StoreError> {
        self.store.earnings_for_request(id)
    }

    pub fn entries_for_participant(
        &self,
        id: &ParticipantId,
    ) -> Result<Vec<EarningsEntry>, StoreError> {
        self.store.earnings_for_participant(id)
    }

    /// Whether anything was ever paid out for the request.
    pub fn has_payouts(&self, id: &RequestId) -> Result<bool, StoreError> {
        Ok(!self.store.earnings_for_request(id)?.is_empty())
    }

    pub fn total_for_request(&self, id: &RequestId) -> Result<Amount, StoreError> {
        Ok(self
            .store
            .earnings_for_request(id)?
            .iter()
            .map(|entry| entry.amount)
            .sum())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerExportError {
    #[error("failed to encode ledger row: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to flush ledger export: {0}")]
    Io(#[from] io::Error),
}

#[derive(Serialize)]
struct LedgerRow<'e> {
    entry_id: &'e str,
    request_id: &'e str,
    participant_id: &'e str,
    kind: &'static str,
    amount: Amount,
    description: &'e str,
    recorded_at: String,
}

/// Write entries as CSV with a header row.
pub fn export_csv<W: io::Write>(
    entries: &[EarningsEntry],
    writer: W,
) -> Result<(), LedgerExportError> {
    let mut csv = csv::Writer::from_writer(writer);
    for entry in entries {
        csv.serialize(LedgerRow {
            entry_id: &entry.id.0,
            request_id: &entry.request_id.0,
            participant_id: &entry.participant_id.0,
            kind: entry.kind.label(),
            amount: entry.amount,
            description: &entry.description,
            recorded_at: entry.recorded_at.to_rfc3339(),
        })?;
    }
    csv.flush()?;
    Ok(())
}
