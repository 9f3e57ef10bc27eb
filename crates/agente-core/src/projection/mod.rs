//! Projection module: the locally held view of the user's tasks.
//!
//! `TaskProjection` is plain synchronous state. The store loop in `app::store`
//! owns exactly one and is the only place it is mutated.

mod state;
mod ticket;

pub use state::TaskProjection;
pub use ticket::{FetchOutcome, FetchTicket};

use serde::{Deserialize, Serialize};

/// How to resolve an incoming row whose status is behind the held one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePolicy {
    /// Pure overwrite in arrival order (mirrors upstream exactly).
    #[default]
    LastWriteWins,

    /// Ignore rows that would move a task back along scheduled -> running -> terminal.
    HighestStatus,
}

/// Result of applying one change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Replaced,
    Updated,
    Deleted,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Update or delete for an id the projection does not hold.
    UnknownId,
    /// Row owned by a different user than the bound session.
    ForeignUser,
    /// No session bound.
    Unbound,
    /// Rejected by `ReconcilePolicy::HighestStatus`.
    StaleStatus,
    /// Missing or undecodable required fields.
    Malformed,
}

impl Applied {
    pub fn changed(self) -> bool {
        !matches!(self, Applied::Dropped(_))
    }
}
