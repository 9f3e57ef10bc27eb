//! ApiKeyDirectory port - 自動化バックエンド用 API キーの有無
//!
//! キー本体はクライアントに持たせません。スケジュール前の検証で「登録済みか」だけを見ます。

use async_trait::async_trait;

use crate::domain::{AgenteError, UserId};

#[async_trait]
pub trait ApiKeyDirectory: Send + Sync {
    async fn has_api_key(&self, user: &UserId) -> Result<bool, AgenteError>;
}
