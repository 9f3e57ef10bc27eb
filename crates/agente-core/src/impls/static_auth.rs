//! StaticAuthGateway - 手動でサインイン/サインアウトする認証ゲートウェイ
//!
//! CLI デモとテスト用。セッションは watch チャネルで配信します。

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use crate::domain::{AgenteError, Session};
use crate::ports::AuthGateway;

pub struct StaticAuthGateway {
    sessions: watch::Sender<Option<Session>>,
}

impl StaticAuthGateway {
    pub fn new() -> Self {
        let (sessions, _) = watch::channel(None);
        Self { sessions }
    }

    /// Replace the current session. Signing in as another user is a user switch.
    pub fn sign_in(&self, session: Session) {
        info!(user_id = %session.user_id, "signed in");
        self.sessions.send_replace(Some(session));
    }
}

impl Default for StaticAuthGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthGateway for StaticAuthGateway {
    async fn session(&self) -> Result<Option<Session>, AgenteError> {
        Ok(self.sessions.borrow().clone())
    }

    fn watch(&self) -> watch::Receiver<Option<Session>> {
        self.sessions.subscribe()
    }

    async fn sign_out(&self) -> Result<(), AgenteError> {
        if self.sessions.send_replace(None).is_some() {
            info!("signed out");
        }
        Ok(())
    }
}
