use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::ValidationError;
use super::ids::{TaskId, UserId};
use super::status::TaskStatus;

pub const DEFAULT_TIMEZONE: &str = "UTC";

/// A scheduled browser-agent task, in the shape of the persisted row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub user_id: UserId,

    /// Free-text instruction for the agent.
    pub task: String,

    /// Earliest execution time (absolute).
    pub scheduled_time: DateTime<Utc>,

    /// IANA name or `UTC`. Advisory only.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    pub status: TaskStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    /// Attach a server-assigned id to an insert payload.
    pub fn from_new(id: TaskId, new: NewTask) -> Self {
        Self {
            id,
            user_id: new.user_id,
            task: new.task,
            scheduled_time: new.scheduled_time,
            timezone: new.timezone,
            status: new.status,
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Only tasks that have not been picked up yet can be edited.
    pub fn is_editable(&self) -> bool {
        self.status == TaskStatus::Scheduled
    }
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

/// Insert payload: a task without an `id` (the server assigns it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub user_id: UserId,
    pub task: String,
    pub scheduled_time: DateTime<Utc>,
    pub timezone: String,
    pub status: TaskStatus,
}

/// Raw form input before validation.
#[derive(Debug, Clone, Default)]
pub struct TaskDraft {
    pub task: String,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub timezone: Option<String>,
}

impl TaskDraft {
    pub fn new(task: impl Into<String>, scheduled_time: DateTime<Utc>) -> Self {
        Self {
            task: task.into(),
            scheduled_time: Some(scheduled_time),
            timezone: None,
        }
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    /// Validate the draft for `user` at `now`.
    ///
    /// Checks run in the order the form reports them: time, API key, text, then "in the future".
    pub fn validate(
        &self,
        user: &UserId,
        now: DateTime<Utc>,
        has_api_key: bool,
    ) -> Result<NewTask, ValidationError> {
        let scheduled_time = self
            .scheduled_time
            .ok_or(ValidationError::MissingScheduledTime)?;
        if !has_api_key {
            return Err(ValidationError::MissingApiKey);
        }
        let text = self.task.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyTask);
        }
        if scheduled_time <= now {
            return Err(ValidationError::ScheduledTimeInPast);
        }

        let timezone = self
            .timezone
            .as_deref()
            .map(str::trim)
            .filter(|tz| !tz.is_empty())
            .unwrap_or(DEFAULT_TIMEZONE)
            .to_string();

        Ok(NewTask {
            user_id: user.clone(),
            task: text.to_string(),
            scheduled_time,
            timezone,
            status: TaskStatus::Scheduled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rstest::rstest;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn deserializes_backend_row() {
        let row = serde_json::json!({
            "id": "0b6c",
            "user_id": "u1",
            "task": "check the weather in Lisbon",
            "scheduled_time": "2025-03-01T13:00:00+00:00",
            "timezone": "Europe/Lisbon",
            "status": "completed",
            "result": "18C and sunny",
        });
        let task: Task = serde_json::from_value(row).unwrap();
        assert_eq!(task.id.as_str(), "0b6c");
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.as_deref(), Some("18C and sunny"));
        assert_eq!(task.error, None);
        assert!(task.is_terminal());
        assert!(!task.is_editable());
    }

    #[test]
    fn missing_timezone_defaults_to_utc() {
        let row = serde_json::json!({
            "id": "1",
            "user_id": "u1",
            "task": "x",
            "scheduled_time": "2025-03-01T13:00:00Z",
            "status": "scheduled",
        });
        let task: Task = serde_json::from_value(row).unwrap();
        assert_eq!(task.timezone, "UTC");
    }

    #[test]
    fn absent_outcome_fields_are_not_serialized() {
        let task = Task::from_new(
            TaskId::new("t"),
            TaskDraft::new("book a table", now() + Duration::hours(1))
                .validate(&UserId::new("u1"), now(), true)
                .unwrap(),
        );
        let json = serde_json::to_value(&task).unwrap();
        assert!(json.get("result").is_none());
        assert!(json.get("error").is_none());
        assert_eq!(json["status"], "scheduled");
    }

    #[test]
    fn valid_draft_becomes_scheduled_new_task() {
        let draft = TaskDraft::new("  compare flight prices  ", now() + Duration::minutes(5))
            .with_timezone("Europe/Madrid");
        let new = draft.validate(&UserId::new("u1"), now(), true).unwrap();
        assert_eq!(new.task, "compare flight prices");
        assert_eq!(new.timezone, "Europe/Madrid");
        assert_eq!(new.status, TaskStatus::Scheduled);
        assert_eq!(new.user_id, UserId::new("u1"));
    }

    #[rstest]
    #[case::no_time(TaskDraft { task: "x".into(), ..Default::default() }, true, ValidationError::MissingScheduledTime)]
    #[case::no_api_key(TaskDraft::new("x", now() + Duration::minutes(1)), false, ValidationError::MissingApiKey)]
    #[case::blank_text(TaskDraft::new("   ", now() + Duration::minutes(1)), true, ValidationError::EmptyTask)]
    #[case::past(TaskDraft::new("x", now() - Duration::minutes(1)), true, ValidationError::ScheduledTimeInPast)]
    #[case::exactly_now(TaskDraft::new("x", now()), true, ValidationError::ScheduledTimeInPast)]
    fn invalid_drafts_are_rejected(
        #[case] draft: TaskDraft,
        #[case] has_api_key: bool,
        #[case] expected: ValidationError,
    ) {
        let err = draft
            .validate(&UserId::new("u1"), now(), has_api_key)
            .unwrap_err();
        assert_eq!(err, expected);
    }
}
