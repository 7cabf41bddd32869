use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Money in integer minor units (cents).
pub type Amount = u64;

/// An amount, or a sum of amounts, outside the range the ledger can represent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("amount {0} exceeds the representable money range")]
pub struct AmountOverflow(pub Amount);

/// Identifier wrapper for participants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub String);

/// Public referral handle; `parent_handle` links point at these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RankId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub String);

macro_rules! display_inner {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        })*
    };
}

display_inner!(ParticipantId, Handle, RankId, PackageId, RequestId, EntryId);

/// A member of the referral forest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub handle: Handle,
    #[serde(default)]
    pub parent_handle: Option<Handle>,
    #[serde(default)]
    pub points: u64,
    #[serde(default)]
    pub balance: Amount,
    #[serde(default)]
    pub total_earnings: Amount,
    #[serde(default)]
    pub rank: Option<RankId>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub package: Option<PackageAssignment>,
}

fn default_active() -> bool {
    true
}

/// Package currently held by a participant together with its validity window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageAssignment {
    pub package_id: PackageId,
    pub amount: Amount,
    pub activated_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

/// Ordered qualification tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rank {
    pub id: RankId,
    pub title: String,
    pub required_points: u64,
    /// Alternative downline requirements; any one satisfies the tier. Empty means points only.
    #[serde(default)]
    pub downline: Vec<LineRequirement>,
}

impl Rank {
    pub fn has_downline_requirements(&self) -> bool {
        !self.downline.is_empty()
    }
}

/// "At least `lines` lines each containing, at any depth, a member matching `criterion`."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRequirement {
    pub lines: usize,
    pub criterion: MemberCriterion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MemberCriterion {
    PointsAtLeast(u64),
    RankIs(String),
    RankAtLeast(String),
}

impl fmt::Display for MemberCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberCriterion::PointsAtLeast(threshold) => write!(f, "points >= {threshold}"),
            MemberCriterion::RankIs(title) => write!(f, "rank == {title}"),
            MemberCriterion::RankAtLeast(title) => write!(f, "rank >= {title}"),
        }
    }
}

/// Purchasable offering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,
    pub name: String,
    pub amount: Amount,
    pub direct_commission: Amount,
    pub indirect_commission: Amount,
    pub reward_points: u64,
    #[serde(default = "default_active")]
    pub active: bool,
}

/// How the purchase is paid for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Funding {
    /// Validated upstream (payment proof, gateway); nothing to debit here.
    #[default]
    External,
    /// Debited from the participant's own balance.
    BalancePool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    /// Claimed by an orchestrator run; only reachable from `Pending` via compare-and-swap.
    Processing,
    Approved,
    Rejected,
    Failed,
}

impl ApprovalStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Processing => "processing",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Failed => "failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            ApprovalStatus::Approved | ApprovalStatus::Rejected | ApprovalStatus::Failed
        )
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One purchase intent, created upstream and consumed once by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: RequestId,
    pub participant_id: ParticipantId,
    pub package_id: PackageId,
    #[serde(default)]
    pub funding: Funding,
    #[serde(default = "default_pending")]
    pub status: ApprovalStatus,
    #[serde(default)]
    pub note: Option<String>,
}

fn default_pending() -> ApprovalStatus {
    ApprovalStatus::Pending
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarningsKind {
    Direct,
    Indirect,
}

impl EarningsKind {
    pub const fn label(self) -> &'static str {
        match self {
            EarningsKind::Direct => "direct",
            EarningsKind::Indirect => "indirect",
        }
    }
}

/// Immutable payout record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningsEntry {
    pub id: EntryId,
    pub participant_id: ParticipantId,
    pub amount: Amount,
    pub kind: EarningsKind,
    pub description: String,
    pub request_id: RequestId,
    pub recorded_at: DateTime<Utc>,
}

/// Fields of an entry before the store assigns its identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEarningsEntry {
    pub participant_id: ParticipantId,
    pub amount: Amount,
    pub kind: EarningsKind,
    pub description: String,
    pub request_id: RequestId,
    pub recorded_at: DateTime<Utc>,
}

/// Additive deltas plus optional field assignments applied atomically by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantUpdate {
    pub points: u64,
    /// Signed so a balance-pool debit shares the increment path with commission credits.
    pub balance: i64,
    pub total_earnings: Amount,
    pub package: Option<PackageAssignment>,
}

impl ParticipantUpdate {
    pub fn points(amount: u64) -> Self {
        Self {
            points: amount,
            ..Self::default()
        }
    }

    pub fn credit(amount: Amount) -> Result<Self, AmountOverflow> {
        let balance = i64::try_from(amount).map_err(|_| AmountOverflow(amount))?;
        Ok(Self {
            balance,
            total_earnings: amount,
            ..Self::default()
        })
    }

    pub fn debit(amount: Amount) -> Result<Self, AmountOverflow> {
        let balance = i64::try_from(amount).map_err(|_| AmountOverflow(amount))?;
        Ok(Self {
            balance: -balance,
            ..Self::default()
        })
    }

    pub fn assign_package(assignment: PackageAssignment) -> Self {
        Self {
            package: Some(assignment),
            ..Self::default()
        }
    }
}
