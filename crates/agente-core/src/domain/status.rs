//! Task status as written by the automation backend.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task status.
///
/// State transitions (enforced upstream, mirrored here read-only):
/// - Scheduled -> Running -> Completed
/// - Scheduled -> Running -> Failed
///
/// The projection never rejects an observed backward transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for `scheduled_time` to elapse.
    Scheduled,

    /// Picked up by the automation backend.
    Running,

    /// Finished; `result` is populated.
    Completed,

    /// Finished; `error` is populated.
    Failed,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Position along the forward progression. Both terminal states share the top rank.
    pub fn rank(self) -> u8 {
        match self {
            TaskStatus::Scheduled => 0,
            TaskStatus::Running => 1,
            TaskStatus::Completed | TaskStatus::Failed => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Scheduled => "scheduled",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
