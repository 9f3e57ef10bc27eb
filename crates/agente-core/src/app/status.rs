//! Status - スナップショットの集計

use serde::{Deserialize, Serialize};

use crate::domain::{Task, TaskStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub scheduled: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn tally<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut counts = StatusCounts::default();
        for task in tasks {
            match task.status {
                TaskStatus::Scheduled => counts.scheduled += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.scheduled + self.running + self.completed + self.failed
    }

    /// Nothing left for the automation backend to do.
    pub fn all_terminal(&self) -> bool {
        self.scheduled == 0 && self.running == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskId, UserId};
    use chrono::Utc;

    fn task(status: TaskStatus) -> Task {
        Task {
            id: TaskId::new(format!("{status}")),
            user_id: UserId::new("u"),
            task: "t".into(),
            scheduled_time: Utc::now(),
            timezone: "UTC".into(),
            status,
            result: None,
            error: None,
        }
    }

    #[test]
    fn tally_counts_each_status() {
        let tasks = vec![
            task(TaskStatus::Scheduled),
            task(TaskStatus::Running),
            task(TaskStatus::Running),
            task(TaskStatus::Failed),
        ];
        let counts = StatusCounts::tally(&tasks);
        assert_eq!(counts.scheduled, 1);
        assert_eq!(counts.running, 2);
        assert_eq!(counts.completed, 0);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.total(), 4);
        assert!(!counts.all_terminal());
    }

    #[test]
    fn empty_is_all_terminal() {
        assert!(StatusCounts::default().all_terminal());
    }
}
