//! ProjectionStore - 射影を保持する単一コンシューマのイベントループ
//!
//! # フロー
//! 1. `StoreHandle` がコマンドを mpsc で送る
//! 2. フェッチ・購読・ミューテーションは spawn したタスクで実行し、結果を inbox に戻す
//! 3. `TaskProjection` を書き換えるのはループ本体だけ（ロック不要）
//! 4. 変更のたびに watch でスナップショットを配信
//!
//! # キャンセル
//! teardown やユーザー切り替えで epoch が進み、古いフェッチ結果・フィードイベントは無視されます。
//! ネットワーク要求そのものは中断しません。

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::status::StatusCounts;
use crate::config::{SyncConfig, SyncMode};
use crate::domain::{
    AgenteError, ChangeEvent, NewTask, RawChange, Session, Task, TaskDraft, TaskId,
};
use crate::ports::{ApiKeyDirectory, Clock, TaskRepository};
use crate::projection::{Applied, FetchOutcome, FetchTicket, TaskProjection};

type Reply<T> = oneshot::Sender<Result<T, AgenteError>>;

enum Command {
    Initialize {
        session: Option<Session>,
        reply: Reply<Vec<Task>>,
    },
    ApplyChange {
        raw: RawChange,
        reply: oneshot::Sender<Applied>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<Task>>,
    },
    Refresh {
        reply: Reply<Vec<Task>>,
    },
    Teardown {
        reply: oneshot::Sender<()>,
    },
    Schedule {
        draft: TaskDraft,
        reply: Reply<Task>,
    },
    Reschedule {
        id: TaskId,
        draft: TaskDraft,
        reply: Reply<Task>,
    },
    Delete {
        id: TaskId,
        reply: Reply<()>,
    },
}

/// Messages from tasks spawned by the loop back into the loop.
enum Inbox {
    Fetched {
        ticket: FetchTicket,
        result: Result<Vec<Task>, AgenteError>,
        reply: Option<Reply<Vec<Task>>>,
    },
    Feed {
        epoch: u64,
        raw: RawChange,
    },
    FeedUnavailable {
        epoch: u64,
        error: AgenteError,
    },
    FeedClosed {
        epoch: u64,
    },
    Mutated {
        epoch: u64,
        event: ChangeEvent,
        ack: oneshot::Sender<()>,
    },
}

/// Cloneable client side of the projection store.
#[derive(Clone)]
pub struct StoreHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Vec<Task>>,
}

impl StoreHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, AgenteError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| AgenteError::StoreClosed)?;
        rx.await.map_err(|_| AgenteError::StoreClosed)
    }

    /// Bind to the session user, start syncing and return the fetched snapshot.
    ///
    /// Fails with `AuthRequired` if `session` is `None` or expired.
    pub async fn initialize(&self, session: Option<Session>) -> Result<Vec<Task>, AgenteError> {
        self.request(|reply| Command::Initialize { session, reply })
            .await?
    }

    /// Integrate one change-feed payload. Malformed payloads are dropped, never returned as errors.
    pub async fn apply_change(&self, raw: RawChange) -> Result<Applied, AgenteError> {
        self.request(|reply| Command::ApplyChange { raw, reply })
            .await
    }

    /// Current tasks, ordered by `scheduled_time`.
    pub async fn snapshot(&self) -> Result<Vec<Task>, AgenteError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn counts(&self) -> Result<StatusCounts, AgenteError> {
        let tasks = self.snapshot().await?;
        Ok(StatusCounts::tally(&tasks))
    }

    /// Last published snapshot, without a round trip through the loop.
    pub fn latest(&self) -> Vec<Task> {
        self.snapshots.borrow().clone()
    }

    /// Push-based view for renderers; updated after every change.
    pub fn watch(&self) -> watch::Receiver<Vec<Task>> {
        self.snapshots.clone()
    }

    /// Refetch now. On failure the held snapshot is kept.
    pub async fn refresh(&self) -> Result<Vec<Task>, AgenteError> {
        self.request(|reply| Command::Refresh { reply }).await?
    }

    /// Unsubscribe, stop polling, drop in-flight fetches. Safe to repeat.
    pub async fn teardown(&self) -> Result<(), AgenteError> {
        self.request(|reply| Command::Teardown { reply }).await
    }

    pub async fn schedule(&self, draft: TaskDraft) -> Result<Task, AgenteError> {
        self.request(|reply| Command::Schedule { draft, reply })
            .await?
    }

    /// Edit a task that has not been picked up yet.
    pub async fn reschedule(&self, id: TaskId, draft: TaskDraft) -> Result<Task, AgenteError> {
        self.request(|reply| Command::Reschedule { id, draft, reply })
            .await?
    }

    pub async fn delete(&self, id: TaskId) -> Result<(), AgenteError> {
        self.request(|reply| Command::Delete { id, reply })
            .await?
    }
}

pub(crate) struct StoreLoop {
    repository: Arc<dyn TaskRepository>,
    api_keys: Arc<dyn ApiKeyDirectory>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,

    projection: TaskProjection,
    session: Option<Session>,

    feed_task: Option<JoinHandle<()>>,
    poll_timer: Option<Interval>,

    inbox_tx: mpsc::UnboundedSender<Inbox>,
    snapshots: watch::Sender<Vec<Task>>,
}

impl StoreLoop {
    /// Spawn the loop on the current tokio runtime.
    pub(crate) fn spawn(
        repository: Arc<dyn TaskRepository>,
        api_keys: Arc<dyn ApiKeyDirectory>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> StoreHandle {
        let (commands_tx, commands_rx) = mpsc::channel(config.command_buffer);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (snapshots_tx, snapshots_rx) = watch::channel(Vec::new());

        let store = StoreLoop {
            repository,
            api_keys,
            clock,
            projection: TaskProjection::new(config.reconcile),
            config,
            session: None,
            feed_task: None,
            poll_timer: None,
            inbox_tx,
            snapshots: snapshots_tx,
        };
        tokio::spawn(store.run(commands_rx, inbox_rx));

        StoreHandle {
            commands: commands_tx,
            snapshots: snapshots_rx,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut inbox: mpsc::UnboundedReceiver<Inbox>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    // every handle dropped
                    None => break,
                },
                Some(message) = inbox.recv() => self.handle_inbox(message),
                _ = next_tick(&mut self.poll_timer) => self.poll(),
            }
        }
        self.stop_sync();
        debug!("projection store loop exited");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Initialize { session, reply } => self.initialize(session, reply),
            Command::ApplyChange { raw, reply } => {
                let applied = self.apply_raw(raw);
                let _ = reply.send(applied);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.projection.snapshot());
            }
            Command::Refresh { reply } => self.spawn_fetch(Some(reply)),
            Command::Teardown { reply } => {
                self.teardown();
                let _ = reply.send(());
            }
            Command::Schedule { draft, reply } => self.schedule(draft, reply),
            Command::Reschedule { id, draft, reply } => self.reschedule(id, draft, reply),
            Command::Delete { id, reply } => self.delete(id, reply),
        }
    }

    fn handle_inbox(&mut self, message: Inbox) {
        match message {
            Inbox::Fetched {
                ticket,
                result,
                reply,
            } => self.fetched(ticket, result, reply),
            Inbox::Feed { epoch, raw } => {
                if epoch != self.projection.epoch() {
                    debug!(epoch, "dropping feed event from a previous session");
                    return;
                }
                self.apply_raw(raw);
            }
            Inbox::FeedUnavailable { epoch, error } => {
                if epoch != self.projection.epoch() {
                    return;
                }
                warn!(error = %error, "realtime feed unavailable, falling back to polling");
                self.feed_task = None;
                self.start_polling();
            }
            Inbox::FeedClosed { epoch } => {
                if epoch != self.projection.epoch() {
                    return;
                }
                warn!("realtime feed closed, falling back to polling");
                self.feed_task = None;
                self.start_polling();
            }
            Inbox::Mutated { epoch, event, ack } => {
                if epoch == self.projection.epoch() {
                    let applied = self.projection.apply(event);
                    if applied.changed() {
                        self.publish();
                    }
                }
                let _ = ack.send(());
            }
        }
    }

    fn initialize(&mut self, session: Option<Session>, reply: Reply<Vec<Task>>) {
        let now = self.clock.now();
        let Some(session) = session.filter(|s| s.is_active(now)) else {
            let _ = reply.send(Err(AgenteError::AuthRequired));
            return;
        };

        let user_id = session.user_id.clone();
        let user_changed = self.projection.bind(user_id.clone());
        let token_changed = self
            .session
            .as_ref()
            .is_some_and(|held| held.access_token != session.access_token);
        self.session = Some(session);
        if user_changed {
            info!(user_id = %user_id, "initializing projection");
            self.stop_sync();
            self.publish();
        } else if token_changed {
            // the feed task holds the old session
            debug!(user_id = %user_id, "access token refreshed, resubscribing");
            self.stop_sync();
        }
        if !self.is_syncing() {
            self.start_sync();
        }
        self.spawn_fetch(Some(reply));
    }

    fn teardown(&mut self) {
        self.stop_sync();
        let had_session = self.session.take().is_some();
        self.projection.teardown();
        self.publish();
        if had_session {
            info!("projection torn down");
        }
    }

    fn apply_raw(&mut self, raw: RawChange) -> Applied {
        let applied = self.projection.apply_raw(raw);
        if applied.changed() {
            self.publish();
        }
        applied
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.projection.snapshot());
    }

    fn is_syncing(&self) -> bool {
        self.feed_task.is_some() || self.poll_timer.is_some()
    }

    fn start_sync(&mut self) {
        match self.config.mode {
            SyncMode::Realtime => self.start_feed(),
            SyncMode::Polling => self.start_polling(),
        }
    }

    fn stop_sync(&mut self) {
        if let Some(task) = self.feed_task.take() {
            task.abort();
        }
        self.poll_timer = None;
    }

    fn start_feed(&mut self) {
        let Some(session) = self.session.clone() else {
            return;
        };
        let epoch = self.projection.epoch();
        let repository = Arc::clone(&self.repository);
        let inbox = self.inbox_tx.clone();

        self.feed_task = Some(tokio::spawn(async move {
            let mut feed = match repository.subscribe(&session).await {
                Ok(feed) => feed,
                Err(error) => {
                    let _ = inbox.send(Inbox::FeedUnavailable { epoch, error });
                    return;
                }
            };
            info!(user_id = %session.user_id, "subscribed to task changes");
            while let Some(raw) = feed.recv().await {
                if inbox.send(Inbox::Feed { epoch, raw }).is_err() {
                    return;
                }
            }
            let _ = inbox.send(Inbox::FeedClosed { epoch });
        }));
    }

    fn start_polling(&mut self) {
        if self.poll_timer.is_some() {
            return;
        }
        let period = self.config.poll_interval();
        // the first tick is one period out; initialize has just fetched
        let mut timer = tokio::time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.poll_timer = Some(timer);
        debug!(?period, "polling started");
    }

    fn poll(&mut self) {
        if self.session.is_none() {
            self.poll_timer = None;
            return;
        }
        self.spawn_fetch(None);
    }

    /// Issue a ticket and fetch in the background. Overlapping fetches are
    /// allowed; the ticket decides which response survives.
    fn spawn_fetch(&mut self, reply: Option<Reply<Vec<Task>>>) {
        let Some(session) = self.session.clone() else {
            if let Some(reply) = reply {
                let _ = reply.send(Err(AgenteError::AuthRequired));
            }
            return;
        };
        let ticket = self.projection.begin_fetch();
        let repository = Arc::clone(&self.repository);
        let timeout = self.config.fetch_timeout();
        let inbox = self.inbox_tx.clone();

        debug!(seq = ticket.seq(), "fetch issued");
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, repository.list(&session)).await {
                Ok(result) => result,
                Err(_) => Err(AgenteError::Network(format!(
                    "fetch timed out after {timeout:?}"
                ))),
            };
            let _ = inbox.send(Inbox::Fetched {
                ticket,
                result,
                reply,
            });
        });
    }

    fn fetched(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<Task>, AgenteError>,
        reply: Option<Reply<Vec<Task>>>,
    ) {
        let response = match result {
            Ok(tasks) => match self.projection.complete_fetch(ticket, tasks) {
                FetchOutcome::Applied => {
                    self.publish();
                    Ok(self.projection.snapshot())
                }
                // a newer response is already held
                FetchOutcome::Stale => Ok(self.projection.snapshot()),
                FetchOutcome::Cancelled => Err(AgenteError::Superseded),
            },
            Err(error) => {
                if reply.is_none() {
                    warn!(error = %error, "background fetch failed, keeping current snapshot");
                }
                Err(error)
            }
        };
        if let Some(reply) = reply {
            let _ = reply.send(response);
        }
    }

    fn schedule(&mut self, draft: TaskDraft, reply: Reply<Task>) {
        let Some(session) = self.session.clone() else {
            let _ = reply.send(Err(AgenteError::AuthRequired));
            return;
        };
        let repository = Arc::clone(&self.repository);
        let api_keys = Arc::clone(&self.api_keys);
        let clock = Arc::clone(&self.clock);

        self.spawn_mutation(reply, async move {
            let new = validate(api_keys.as_ref(), clock.as_ref(), &session, &draft).await?;
            let task = repository.insert(&session, new).await?;
            info!(task_id = %task.id, scheduled_time = %task.scheduled_time, "task scheduled");
            Ok::<_, AgenteError>((task.clone(), ChangeEvent::Insert(task)))
        });
    }

    fn reschedule(&mut self, id: TaskId, draft: TaskDraft, reply: Reply<Task>) {
        let Some(session) = self.session.clone() else {
            let _ = reply.send(Err(AgenteError::AuthRequired));
            return;
        };
        let Some(held) = self.projection.get(&id).cloned() else {
            let _ = reply.send(Err(AgenteError::NotFound(id)));
            return;
        };
        if !held.is_editable() {
            let _ = reply.send(Err(AgenteError::NotEditable {
                id,
                status: held.status,
            }));
            return;
        }
        let repository = Arc::clone(&self.repository);
        let api_keys = Arc::clone(&self.api_keys);
        let clock = Arc::clone(&self.clock);

        self.spawn_mutation(reply, async move {
            let new = validate(api_keys.as_ref(), clock.as_ref(), &session, &draft).await?;
            let edited = Task {
                task: new.task,
                scheduled_time: new.scheduled_time,
                timezone: new.timezone,
                ..held
            };
            let task = repository.update(&session, edited).await?;
            info!(task_id = %task.id, "task rescheduled");
            Ok::<_, AgenteError>((task.clone(), ChangeEvent::Update(task)))
        });
    }

    fn delete(&mut self, id: TaskId, reply: Reply<()>) {
        let Some(session) = self.session.clone() else {
            let _ = reply.send(Err(AgenteError::AuthRequired));
            return;
        };
        let repository = Arc::clone(&self.repository);

        self.spawn_mutation(reply, async move {
            repository.delete(&session, &id).await?;
            info!(task_id = %id, "task deleted");
            Ok::<_, AgenteError>(((), ChangeEvent::Delete(id)))
        });
    }

    /// Run a persistence call off the loop. On success the local event is
    /// applied by the loop before the caller gets its reply; on failure the
    /// projection is not touched.
    fn spawn_mutation<T, F>(&self, reply: Reply<T>, op: F)
    where
        T: Send + 'static,
        F: Future<Output = Result<(T, ChangeEvent), AgenteError>> + Send + 'static,
    {
        let epoch = self.projection.epoch();
        let inbox = self.inbox_tx.clone();

        tokio::spawn(async move {
            match op.await {
                Ok((value, event)) => {
                    let (ack_tx, ack_rx) = oneshot::channel();
                    if inbox
                        .send(Inbox::Mutated {
                            epoch,
                            event,
                            ack: ack_tx,
                        })
                        .is_ok()
                    {
                        let _ = ack_rx.await;
                    }
                    let _ = reply.send(Ok(value));
                }
                Err(error) => {
                    debug!(error = %error, "mutation failed");
                    let _ = reply.send(Err(error));
                }
            }
        });
    }
}

/// Validate a draft for the session user. Local checks are never masked by a
/// failing key lookup: if the directory errors, a local validation error wins.
async fn validate(
    api_keys: &dyn ApiKeyDirectory,
    clock: &dyn Clock,
    session: &Session,
    draft: &TaskDraft,
) -> Result<NewTask, AgenteError> {
    let now = clock.now();
    let has_api_key = match api_keys.has_api_key(&session.user_id).await {
        Ok(has_api_key) => has_api_key,
        Err(lookup) => {
            draft.validate(&session.user_id, now, true)?;
            return Err(lookup);
        }
    };
    Ok(draft.validate(&session.user_id, now, has_api_key)?)
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
