//! Task projection state.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::ticket::{FetchGate, FetchOutcome, FetchTicket};
use super::{Applied, DropReason, ReconcilePolicy};
use crate::domain::{ChangeEvent, RawChange, Task, TaskId, UserId};

/// Tasks of one user, keyed by id.
///
/// Design:
/// - A map, not a list: an id can never appear twice.
/// - Events are applied in arrival order, no reordering by timestamp.
/// - Fetch responses go through tickets so a slow, older response cannot regress state.
/// - Rows touched by an event after a fetch was issued keep their event state
///   when that fetch answers (deleted rows stay deleted).
#[derive(Debug)]
pub struct TaskProjection {
    user: Option<UserId>,
    tasks: HashMap<TaskId, Task>,
    policy: ReconcilePolicy,
    gate: FetchGate,
    /// id -> `next_seq` of the gate when an event last touched the row
    touched: HashMap<TaskId, u64>,
}

impl TaskProjection {
    pub fn new(policy: ReconcilePolicy) -> Self {
        Self {
            user: None,
            tasks: HashMap::new(),
            policy,
            gate: FetchGate::default(),
            touched: HashMap::new(),
        }
    }

    pub fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    pub fn policy(&self) -> ReconcilePolicy {
        self.policy
    }

    /// Changes on every teardown and user switch.
    pub fn epoch(&self) -> u64 {
        self.gate.epoch()
    }

    /// Bind to `user`. Returns `true` if this was a change of user, in which
    /// case the held tasks are dropped and outstanding fetches cancelled.
    pub fn bind(&mut self, user: UserId) -> bool {
        if self.user.as_ref() == Some(&user) {
            return false;
        }
        debug!(user_id = %user, "binding projection to user");
        self.tasks.clear();
        self.touched.clear();
        self.gate.invalidate();
        self.user = Some(user);
        true
    }

    /// Forget the user and the held tasks; cancel outstanding fetches. Idempotent.
    pub fn teardown(&mut self) {
        self.tasks.clear();
        self.touched.clear();
        self.gate.invalidate();
        self.user = None;
    }

    /// Validate a raw feed payload at the boundary, then apply it.
    pub fn apply_raw(&mut self, raw: RawChange) -> Applied {
        match ChangeEvent::try_from(raw) {
            Ok(event) => self.apply(event),
            Err(e) => {
                warn!(error = %e, "dropping malformed change event");
                Applied::Dropped(DropReason::Malformed)
            }
        }
    }

    pub fn apply(&mut self, event: ChangeEvent) -> Applied {
        let Some(user) = self.user.clone() else {
            debug!(task_id = %event.task_id(), "no session bound, dropping event");
            return Applied::Dropped(DropReason::Unbound);
        };

        let applied = match event {
            ChangeEvent::Insert(task) => {
                if task.user_id != user {
                    warn!(task_id = %task.id, owner = %task.user_id, "dropping insert for another user");
                    return Applied::Dropped(DropReason::ForeignUser);
                }
                match self.tasks.get(&task.id) {
                    Some(held) if self.is_regression(held, &task) => {
                        Applied::Dropped(DropReason::StaleStatus)
                    }
                    Some(_) => {
                        self.hold(task);
                        Applied::Replaced
                    }
                    None => {
                        self.hold(task);
                        Applied::Inserted
                    }
                }
            }
            ChangeEvent::Update(task) => {
                if task.user_id != user {
                    warn!(task_id = %task.id, owner = %task.user_id, "dropping update for another user");
                    return Applied::Dropped(DropReason::ForeignUser);
                }
                match self.tasks.get(&task.id) {
                    // update before insert: accepted eventual-consistency gap
                    None => Applied::Dropped(DropReason::UnknownId),
                    Some(held) if self.is_regression(held, &task) => {
                        Applied::Dropped(DropReason::StaleStatus)
                    }
                    Some(_) => {
                        self.hold(task);
                        Applied::Updated
                    }
                }
            }
            ChangeEvent::Delete(id) => {
                let removed = self.tasks.remove(&id).is_some();
                // tombstone: an in-flight fetch must not bring the row back
                self.touched.insert(id, self.gate.next_seq());
                if removed {
                    Applied::Deleted
                } else {
                    Applied::Dropped(DropReason::UnknownId)
                }
            }
        };

        debug!(?applied, "change event applied");
        applied
    }

    fn hold(&mut self, task: Task) {
        self.touched.insert(task.id.clone(), self.gate.next_seq());
        self.tasks.insert(task.id.clone(), task);
    }

    fn is_regression(&self, held: &Task, incoming: &Task) -> bool {
        match self.policy {
            ReconcilePolicy::LastWriteWins => false,
            ReconcilePolicy::HighestStatus => incoming.status.rank() < held.status.rank(),
        }
    }

    /// Issue a ticket for a bulk fetch that is about to start.
    pub fn begin_fetch(&mut self) -> FetchTicket {
        self.gate.issue()
    }

    /// Hand back a fetch response. The held tasks are replaced only if the
    /// ticket is still current; a failed fetch should simply not call this.
    pub fn complete_fetch(&mut self, ticket: FetchTicket, tasks: Vec<Task>) -> FetchOutcome {
        let outcome = self.gate.check(ticket);
        if outcome != FetchOutcome::Applied {
            debug!(seq = ticket.seq(), ?outcome, "discarding fetch response");
            return outcome;
        }
        let Some(user) = self.user.clone() else {
            return FetchOutcome::Cancelled;
        };

        self.gate.mark_applied(ticket);
        let mut fresh = HashMap::with_capacity(tasks.len());
        for task in tasks {
            if task.user_id != user {
                warn!(task_id = %task.id, owner = %task.user_id, "fetch returned a task of another user");
                continue;
            }
            fresh.insert(task.id.clone(), task);
        }

        // events that landed after this ticket was issued are newer than the response
        for (id, stamp) in &self.touched {
            if *stamp <= ticket.seq() {
                continue;
            }
            match self.tasks.get(id) {
                Some(held) => {
                    fresh.insert(id.clone(), held.clone());
                }
                None => {
                    fresh.remove(id);
                }
            }
        }
        self.touched.retain(|_, stamp| *stamp > ticket.seq());
        self.tasks = fresh;
        FetchOutcome::Applied
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks in render order: `scheduled_time` ascending, then id.
    pub fn snapshot(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| {
            a.scheduled_time
                .cmp(&b.scheduled_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        tasks
    }
}

impl Default for TaskProjection {
    fn default() -> Self {
        Self::new(ReconcilePolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskStatus;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;

    fn task(id: &str, hour: u32, status: TaskStatus) -> Task {
        Task {
            id: TaskId::new(id),
            user_id: UserId::new("u1"),
            task: format!("task {id}"),
            scheduled_time: Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap(),
            timezone: "UTC".into(),
            status,
            result: None,
            error: None,
        }
    }

    fn bound() -> TaskProjection {
        let mut p = TaskProjection::default();
        p.bind(UserId::new("u1"));
        p
    }

    fn ids(p: &TaskProjection) -> Vec<String> {
        p.snapshot().iter().map(|t| t.id.to_string()).collect()
    }

    #[rstest]
    #[case::same_row(TaskStatus::Scheduled, TaskStatus::Scheduled)]
    #[case::newer_row(TaskStatus::Scheduled, TaskStatus::Running)]
    #[case::older_row(TaskStatus::Running, TaskStatus::Scheduled)]
    fn insert_twice_keeps_one(#[case] first: TaskStatus, #[case] second: TaskStatus) {
        let mut p = bound();
        assert_eq!(p.apply(ChangeEvent::Insert(task("a", 9, first))), Applied::Inserted);
        assert_eq!(p.apply(ChangeEvent::Insert(task("a", 9, second))), Applied::Replaced);

        assert_eq!(p.len(), 1);
        assert_eq!(p.get(&TaskId::new("a")).unwrap().status, second);
    }

    #[test]
    fn update_for_unknown_id_is_dropped() {
        let mut p = bound();
        p.apply(ChangeEvent::Insert(task("a", 9, TaskStatus::Scheduled)));
        let before = p.snapshot();

        let applied = p.apply(ChangeEvent::Update(task("zzz", 9, TaskStatus::Running)));
        assert_eq!(applied, Applied::Dropped(DropReason::UnknownId));
        assert_eq!(p.snapshot(), before);
    }

    #[test]
    fn delete_for_unknown_id_is_noop() {
        let mut p = bound();
        p.apply(ChangeEvent::Insert(task("a", 9, TaskStatus::Scheduled)));

        let applied = p.apply(ChangeEvent::Delete(TaskId::new("missing")));
        assert_eq!(applied, Applied::Dropped(DropReason::UnknownId));
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn n_inserts_then_one_delete() {
        let mut p = bound();
        let n = 7;
        for i in 0..n {
            p.apply(ChangeEvent::Insert(task(&format!("t{i}"), 8, TaskStatus::Scheduled)));
        }
        p.apply(ChangeEvent::Delete(TaskId::new("t3")));

        assert_eq!(p.len(), n - 1);
        assert!(p.get(&TaskId::new("t3")).is_none());
    }

    #[test]
    fn snapshot_is_ordered_by_scheduled_time() {
        let mut p = bound();
        let ticket = p.begin_fetch();
        let outcome = p.complete_fetch(
            ticket,
            vec![task("T1", 10, TaskStatus::Scheduled), task("T2", 9, TaskStatus::Scheduled)],
        );
        assert_eq!(outcome, FetchOutcome::Applied);
        assert_eq!(ids(&p), vec!["T2", "T1"]);
    }

    #[test]
    fn lifecycle_scenario_ends_completed() {
        let mut p = bound();
        p.apply(ChangeEvent::Insert(task("a", 9, TaskStatus::Scheduled)));
        p.apply(ChangeEvent::Update(task("a", 9, TaskStatus::Running)));
        let mut done = task("a", 9, TaskStatus::Completed);
        done.result = Some("done".into());
        p.apply(ChangeEvent::Update(done));

        let snapshot = p.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status, TaskStatus::Completed);
        assert_eq!(snapshot[0].result.as_deref(), Some("done"));
        assert_eq!(snapshot[0].error, None);
    }

    #[test]
    fn late_older_poll_response_is_discarded() {
        let mut p = bound();
        let t0 = p.begin_fetch();
        let t1 = p.begin_fetch();

        let newer = vec![task("a", 9, TaskStatus::Completed)];
        let older = vec![task("a", 9, TaskStatus::Scheduled)];

        assert_eq!(p.complete_fetch(t1, newer), FetchOutcome::Applied);
        assert_eq!(p.complete_fetch(t0, older), FetchOutcome::Stale);
        assert_eq!(p.get(&TaskId::new("a")).unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn feed_update_during_fetch_survives_late_response() {
        let mut p = bound();
        let t0 = p.begin_fetch();
        p.complete_fetch(t0, vec![task("a", 9, TaskStatus::Scheduled)]);

        let slow = p.begin_fetch();
        p.apply(ChangeEvent::Update(task("a", 9, TaskStatus::Completed)));

        let outcome = p.complete_fetch(slow, vec![task("a", 9, TaskStatus::Scheduled)]);
        assert_eq!(outcome, FetchOutcome::Applied);
        assert_eq!(p.get(&TaskId::new("a")).unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn delete_and_insert_during_fetch_survive_late_response() {
        let mut p = bound();
        let t0 = p.begin_fetch();
        p.complete_fetch(t0, vec![task("a", 9, TaskStatus::Scheduled)]);

        let slow = p.begin_fetch();
        p.apply(ChangeEvent::Delete(TaskId::new("a")));
        p.apply(ChangeEvent::Insert(task("b", 10, TaskStatus::Scheduled)));

        p.complete_fetch(slow, vec![task("a", 9, TaskStatus::Scheduled)]);
        assert_eq!(ids(&p), vec!["b"]);
    }

    #[test]
    fn fetch_issued_after_an_event_wins() {
        let mut p = bound();
        p.apply(ChangeEvent::Insert(task("a", 9, TaskStatus::Completed)));

        let ticket = p.begin_fetch();
        p.complete_fetch(ticket, vec![task("a", 9, TaskStatus::Running)]);
        assert_eq!(p.get(&TaskId::new("a")).unwrap().status, TaskStatus::Running);

        // tombstones older than an applied fetch are forgotten
        p.apply(ChangeEvent::Delete(TaskId::new("a")));
        let ticket = p.begin_fetch();
        p.complete_fetch(ticket, vec![task("a", 9, TaskStatus::Running)]);
        assert_eq!(ids(&p), vec!["a"]);
    }

    #[test]
    fn fetch_after_teardown_is_ignored() {
        let mut p = bound();
        let ticket = p.begin_fetch();
        p.teardown();

        let outcome = p.complete_fetch(ticket, vec![task("a", 9, TaskStatus::Scheduled)]);
        assert_eq!(outcome, FetchOutcome::Cancelled);
        assert!(p.is_empty());
        assert!(p.user().is_none());
    }

    #[test]
    fn teardown_twice_is_safe() {
        let mut p = bound();
        p.teardown();
        p.teardown();
        assert!(p.is_empty());
    }

    #[test]
    fn rebinding_other_user_clears_tasks() {
        let mut p = bound();
        p.apply(ChangeEvent::Insert(task("a", 9, TaskStatus::Scheduled)));
        let stale = p.begin_fetch();

        assert!(!p.bind(UserId::new("u1")));
        assert_eq!(p.len(), 1);

        assert!(p.bind(UserId::new("u2")));
        assert!(p.is_empty());
        assert_eq!(p.complete_fetch(stale, vec![]), FetchOutcome::Cancelled);
    }

    #[test]
    fn events_for_other_users_are_dropped() {
        let mut p = bound();
        let mut foreign = task("x", 9, TaskStatus::Scheduled);
        foreign.user_id = UserId::new("intruder");
        assert_eq!(
            p.apply(ChangeEvent::Insert(foreign.clone())),
            Applied::Dropped(DropReason::ForeignUser)
        );

        let ticket = p.begin_fetch();
        p.complete_fetch(ticket, vec![foreign, task("a", 9, TaskStatus::Scheduled)]);
        assert_eq!(ids(&p), vec!["a"]);
    }

    #[test]
    fn unbound_projection_ignores_events() {
        let mut p = TaskProjection::default();
        let applied = p.apply(ChangeEvent::Insert(task("a", 9, TaskStatus::Scheduled)));
        assert_eq!(applied, Applied::Dropped(DropReason::Unbound));
        assert!(p.is_empty());
    }

    #[test]
    fn malformed_raw_event_is_dropped() {
        let mut p = bound();
        let raw = RawChange {
            kind: crate::domain::ChangeKind::Insert,
            new: serde_json::json!({ "task": "no id here" }),
            old: serde_json::Value::Null,
        };
        assert_eq!(p.apply_raw(raw), Applied::Dropped(DropReason::Malformed));
        assert!(p.is_empty());
    }

    #[test]
    fn last_write_wins_accepts_backward_status() {
        let mut p = bound();
        p.apply(ChangeEvent::Insert(task("a", 9, TaskStatus::Completed)));
        p.apply(ChangeEvent::Update(task("a", 9, TaskStatus::Running)));
        assert_eq!(p.get(&TaskId::new("a")).unwrap().status, TaskStatus::Running);
    }

    #[test]
    fn highest_status_ignores_backward_status() {
        let mut p = TaskProjection::new(ReconcilePolicy::HighestStatus);
        p.bind(UserId::new("u1"));
        p.apply(ChangeEvent::Insert(task("a", 9, TaskStatus::Completed)));

        let applied = p.apply(ChangeEvent::Update(task("a", 9, TaskStatus::Running)));
        assert_eq!(applied, Applied::Dropped(DropReason::StaleStatus));
        assert_eq!(p.get(&TaskId::new("a")).unwrap().status, TaskStatus::Completed);
    }
}
