use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::store::StoreHandle;
use crate::domain::Session;
use crate::ports::AuthGateway;

/// Delay before a failed, retryable `initialize` is attempted again.
pub const INITIALIZE_RETRY: Duration = Duration::from_millis(500);

/// Keeps a store in step with the auth gateway.
/// - サインイン / ユーザー切り替え / トークン更新で `initialize`
/// - `initialize` が一時的な理由で失敗したら再試行
/// - サインアウトで必ず `teardown`
/// - `shutdown_tx` を drop するとループが止まる
pub struct SessionFollower {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SessionFollower {
    pub fn spawn(auth: Arc<dyn AuthGateway>, store: StoreHandle) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sessions = auth.watch();
        let join = tokio::spawn(follow(sessions, store, shutdown_rx));
        Self { shutdown_tx, join }
    }

    pub fn request_shutdown(&self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}

/// What the follower last handed to the store.
#[derive(Default)]
struct Forwarded {
    /// Last session passed to `initialize`, successful or not.
    session: Option<Session>,
    initialized: bool,
}

impl Forwarded {
    /// Returns `true` when the attempt failed and should be retried.
    async fn sync(&mut self, store: &StoreHandle, session: Option<Session>) -> bool {
        let Some(session) = session else {
            // the store may be bound even if initialize failed
            if let Err(e) = store.teardown().await {
                warn!(error = %e, "teardown failed");
            }
            if self.session.take().is_some() {
                info!("session ended");
            }
            self.initialized = false;
            return false;
        };

        if self.initialized && self.session.as_ref() == Some(&session) {
            return false;
        }
        let user_id = session.user_id.clone();
        self.session = Some(session.clone());
        match store.initialize(Some(session)).await {
            Ok(tasks) => {
                info!(user_id = %user_id, tasks = tasks.len(), "session started");
                self.initialized = true;
                false
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "initialize failed");
                self.initialized = false;
                e.is_retryable()
            }
        }
    }
}

async fn follow(
    mut sessions: watch::Receiver<Option<Session>>,
    store: StoreHandle,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut forwarded = Forwarded::default();
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let session = sessions.borrow_and_update().clone();
        let retry_at = forwarded
            .sync(&store, session)
            .await
            .then(|| Instant::now() + INITIALIZE_RETRY);

        tokio::select! {
            // shutdown requested, or the follower handle is gone
            _ = shutdown_rx.changed() => break,
            changed = sessions.changed() => {
                if changed.is_err() {
                    // gateway dropped
                    break;
                }
            }
            _ = sleep_until(retry_at) => debug!("retrying initialize"),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
