//! Transfer lifecycle states.
//!
//! Terminal states: `completed`, `rejected`, `expired`. Transitions only ever
//! move forward along the lifecycle; a transfer never regresses.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transfer lifecycle state.
///
/// ```text
/// (new) ──► proposed ──► prepared ──► completed
///              │  │          │
///              │  └──────────┼──────► completed   (no condition)
///              │             ├──────► expired
///              │             └──────► rejected
///              ├──► expired
///              └──► rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    /// Recorded, but not every source fund is authorized yet.
    Proposed,
    /// Fully authorized with an execution condition; source funds are held.
    Prepared,
    /// Terminal: balances applied.
    Completed,
    /// Terminal: explicitly rejected; any hold released.
    Rejected,
    /// Terminal: deadline passed; any hold released.
    Expired,
}

impl TransferState {
    /// No further transitions are possible from a terminal state.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Rejected | TransferState::Expired
        )
    }

    /// Source funds are parked in `held` while in this state.
    #[inline]
    pub fn holds_funds(&self) -> bool {
        matches!(self, TransferState::Prepared)
    }

    /// Whether `next` is reachable from this state in one step.
    pub fn can_advance_to(&self, next: TransferState) -> bool {
        match self {
            TransferState::Proposed => matches!(
                next,
                TransferState::Prepared
                    | TransferState::Completed
                    | TransferState::Rejected
                    | TransferState::Expired
            ),
            TransferState::Prepared => matches!(
                next,
                TransferState::Completed | TransferState::Rejected | TransferState::Expired
            ),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Proposed => "proposed",
            TransferState::Prepared => "prepared",
            TransferState::Completed => "completed",
            TransferState::Rejected => "rejected",
            TransferState::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "proposed" => Some(TransferState::Proposed),
            "prepared" => Some(TransferState::Prepared),
            "completed" => Some(TransferState::Completed),
            "rejected" => Some(TransferState::Rejected),
            "expired" => Some(TransferState::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
