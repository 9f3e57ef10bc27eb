//! TaskRepository port - タスクの正本（source of truth）
//!
//! ホスト型バックエンド（auth + Postgres + realtime）が実装します。
//! サーバー側で認証ユーザーに絞り込まれる前提です（RLS 相当）。
//!
//! # 設計原則
//! - クライアントが持つのは射影（projection）だけ。正本は常にここ
//! - 変更フィードは「少なくとも 1 回・順序保証なし」
//! - `ChangeFeed` を drop すると購読解除

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{AgenteError, NewTask, RawChange, Session, Task, TaskId};

/// Receiving half of a change-feed subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct ChangeFeed {
    rx: mpsc::UnboundedReceiver<RawChange>,
}

impl ChangeFeed {
    pub fn new(rx: mpsc::UnboundedReceiver<RawChange>) -> Self {
        Self { rx }
    }

    /// Next payload, or `None` once the backend closes the subscription.
    pub async fn recv(&mut self) -> Option<RawChange> {
        self.rx.recv().await
    }
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// All tasks of the session user, ordered by `scheduled_time` ascending.
    async fn list(&self, session: &Session) -> Result<Vec<Task>, AgenteError>;

    /// Persist a new task; the server assigns and echoes the `id`.
    async fn insert(&self, session: &Session, task: NewTask) -> Result<Task, AgenteError>;

    /// Replace the row with the same `id`.
    async fn update(&self, session: &Session, task: Task) -> Result<Task, AgenteError>;

    async fn delete(&self, session: &Session, id: &TaskId) -> Result<(), AgenteError>;

    /// Subscribe to row-level changes visible to the session user.
    ///
    /// Returns `AgenteError::FeedUnavailable` when realtime is not offered;
    /// callers fall back to polling.
    async fn subscribe(&self, session: &Session) -> Result<ChangeFeed, AgenteError>;
}
