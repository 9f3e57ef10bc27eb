//! AuthGateway port - 認証の抽象化
//!
//! サインイン/サインアップ/OAuth/パスワードリセットは外部の責務。
//! ここではストアが必要とする「現在のセッション」と「セッション変化の通知」だけを定義します。

use async_trait::async_trait;
use tokio::sync::watch;

use crate::domain::{AgenteError, Session};

#[async_trait]
pub trait AuthGateway: Send + Sync {
    /// Current session, `None` when signed out.
    async fn session(&self) -> Result<Option<Session>, AgenteError>;

    /// Session changes (sign-in, sign-out, token refresh, user switch).
    fn watch(&self) -> watch::Receiver<Option<Session>>;

    async fn sign_out(&self) -> Result<(), AgenteError>;
}
