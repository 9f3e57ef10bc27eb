//! InMemoryTaskRepository - 開発用・テスト用のバックエンド
//!
//! # 振る舞い
//! - 行はユーザーごとに絞り込まれる（RLS 相当）
//! - 書き込みのたびに、その行の持ち主の購読者へ変更を配信
//! - `list` は呼び出し時点の行を返す。遅延を入れると「遅れて届く古い応答」を再現できる
//! - 自動化バックエンドの代わりに `write_status` でステータスを書き換えられる

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::{
    AgenteError, NewTask, RawChange, Session, Task, TaskId, TaskStatus, UserId,
};
use crate::ports::{ChangeFeed, IdGenerator, SystemClock, TaskRepository, UlidGenerator};

struct Inner {
    rows: HashMap<TaskId, Task>,
    subscribers: Vec<(UserId, mpsc::UnboundedSender<RawChange>)>,
    realtime: bool,
    list_delays: VecDeque<Duration>,
    list_delay: Duration,
    failing_lists: usize,
    last_token: Option<String>,
}

impl Inner {
    fn broadcast(&mut self, owner: &UserId, raw: RawChange) {
        // closed subscriptions are pruned here
        self.subscribers
            .retain(|(user, tx)| user != owner || tx.send(raw.clone()).is_ok());
    }

    fn seen(&mut self, session: &Session) {
        self.last_token = Some(session.access_token.clone());
    }

    fn owned(&self, session: &Session, id: &TaskId) -> bool {
        self.rows
            .get(id)
            .is_some_and(|row| row.user_id == session.user_id)
    }
}

/// In-memory stand-in for the hosted backend. Clones share state.
#[derive(Clone)]
pub struct InMemoryTaskRepository {
    inner: Arc<Mutex<Inner>>,
    ids: Arc<dyn IdGenerator>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::with_id_generator(Arc::new(UlidGenerator::new(SystemClock)))
    }

    pub fn with_id_generator(ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                rows: HashMap::new(),
                subscribers: Vec::new(),
                realtime: true,
                list_delays: VecDeque::new(),
                list_delay: Duration::ZERO,
                failing_lists: 0,
                last_token: None,
            })),
            ids,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Turn the change feed on or off. Existing subscriptions are unaffected.
    pub fn set_realtime(&self, enabled: bool) {
        self.lock().realtime = enabled;
    }

    /// Delay applied to every `list` call without a queued delay.
    pub fn set_list_delay(&self, delay: Duration) {
        self.lock().list_delay = delay;
    }

    /// Delay for the next `list` call only. Queued delays are consumed in order.
    pub fn push_list_delay(&self, delay: Duration) {
        self.lock().list_delays.push_back(delay);
    }

    /// Make the next `list` call fail with a network error.
    pub fn fail_next_list(&self) {
        self.lock().failing_lists += 1;
    }

    /// Drop every open subscription, as a realtime disconnect would.
    pub fn close_feeds(&self) {
        self.lock().subscribers.clear();
    }

    /// Deliver an arbitrary payload to a user's subscribers.
    pub fn inject_raw(&self, user: &UserId, raw: RawChange) {
        self.lock().broadcast(user, raw);
    }

    /// Access token of the most recent call through `TaskRepository`.
    pub fn last_access_token(&self) -> Option<String> {
        self.lock().last_token.clone()
    }

    /// Every stored row of a user, regardless of sessions.
    pub fn rows(&self, user: &UserId) -> Vec<Task> {
        let mut rows: Vec<Task> = self
            .lock()
            .rows
            .values()
            .filter(|row| &row.user_id == user)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.scheduled_time, &a.id).cmp(&(b.scheduled_time, &b.id)));
        rows
    }

    /// Scheduled tasks whose time has come, across all users.
    pub fn due_tasks(&self, now: DateTime<Utc>) -> Vec<Task> {
        let mut due: Vec<Task> = self
            .lock()
            .rows
            .values()
            .filter(|row| row.status == TaskStatus::Scheduled && row.scheduled_time <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| (a.scheduled_time, &a.id).cmp(&(b.scheduled_time, &b.id)));
        due
    }

    /// Status write from the automation side. Broadcasts an update to the owner.
    pub fn write_status(
        &self,
        id: &TaskId,
        status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<Task, AgenteError> {
        let mut inner = self.lock();
        let row = inner
            .rows
            .get_mut(id)
            .ok_or_else(|| AgenteError::NotFound(id.clone()))?;
        row.status = status;
        row.result = result;
        row.error = error;
        let row = row.clone();
        debug!(task_id = %id, status = %status, "status written");
        inner.broadcast(&row.user_id, RawChange::update(&row));
        Ok(row)
    }
}

impl Default for InMemoryTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn list(&self, session: &Session) -> Result<Vec<Task>, AgenteError> {
        let (rows, delay, fail) = {
            let mut inner = self.lock();
            inner.seen(session);
            let delay = inner.list_delays.pop_front().unwrap_or(inner.list_delay);
            let fail = inner.failing_lists > 0;
            if fail {
                inner.failing_lists -= 1;
            }
            drop(inner);
            (self.rows(&session.user_id), delay, fail)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(AgenteError::Network("connection reset".into()));
        }
        Ok(rows)
    }

    async fn insert(&self, session: &Session, task: NewTask) -> Result<Task, AgenteError> {
        let mut row = Task::from_new(self.ids.generate_task_id(), task);
        row.user_id = session.user_id.clone();

        let mut inner = self.lock();
        inner.seen(session);
        inner.rows.insert(row.id.clone(), row.clone());
        inner.broadcast(&row.user_id, RawChange::insert(&row));
        Ok(row)
    }

    async fn update(&self, session: &Session, task: Task) -> Result<Task, AgenteError> {
        let mut inner = self.lock();
        inner.seen(session);
        if !inner.owned(session, &task.id) {
            return Err(AgenteError::NotFound(task.id));
        }
        let row = Task {
            user_id: session.user_id.clone(),
            ..task
        };
        inner.rows.insert(row.id.clone(), row.clone());
        inner.broadcast(&row.user_id, RawChange::update(&row));
        Ok(row)
    }

    async fn delete(&self, session: &Session, id: &TaskId) -> Result<(), AgenteError> {
        let mut inner = self.lock();
        inner.seen(session);
        // deleting a missing row is not an error
        if inner.owned(session, id) {
            inner.rows.remove(id);
            inner.broadcast(&session.user_id, RawChange::delete(id));
        }
        Ok(())
    }

    async fn subscribe(&self, session: &Session) -> Result<ChangeFeed, AgenteError> {
        let mut inner = self.lock();
        inner.seen(session);
        if !inner.realtime {
            return Err(AgenteError::FeedUnavailable("realtime disabled".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.subscribers.push((session.user_id.clone(), tx));
        Ok(ChangeFeed::new(rx))
    }
}
