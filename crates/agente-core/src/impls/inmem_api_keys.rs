//! InMemoryApiKeys - ユーザーごとの暗号化済み API キー
//!
//! 平文は保持しません。ストアは「登録済みか」だけを見ます。

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::crypto::EncryptedApiKey;
use crate::domain::{AgenteError, UserId};
use crate::ports::ApiKeyDirectory;

#[derive(Default)]
pub struct InMemoryApiKeys {
    keys: Mutex<HashMap<UserId, EncryptedApiKey>>,
}

impl InMemoryApiKeys {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, EncryptedApiKey>> {
        self.keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store (or replace) the sealed key of `user`.
    pub fn store(&self, user: &UserId, sealed: EncryptedApiKey) {
        self.lock().insert(user.clone(), sealed);
    }

    pub fn sealed(&self, user: &UserId) -> Option<EncryptedApiKey> {
        self.lock().get(user).cloned()
    }

    pub fn clear(&self, user: &UserId) {
        self.lock().remove(user);
    }
}

#[async_trait]
impl ApiKeyDirectory for InMemoryApiKeys {
    async fn has_api_key(&self, user: &UserId) -> Result<bool, AgenteError> {
        Ok(self.lock().contains_key(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{decrypt_api_key, encrypt_api_key};

    #[tokio::test]
    async fn store_and_clear() {
        let keys = InMemoryApiKeys::new();
        let alice = UserId::new("alice");
        assert!(!keys.has_api_key(&alice).await.unwrap());

        keys.store(&alice, encrypt_api_key("sk-alice", "pw").unwrap());
        assert!(keys.has_api_key(&alice).await.unwrap());
        assert!(!keys.has_api_key(&UserId::new("bob")).await.unwrap());

        let sealed = keys.sealed(&alice).unwrap();
        assert_eq!(decrypt_api_key(&sealed, "pw").unwrap(), "sk-alice");

        keys.clear(&alice);
        assert!(!keys.has_api_key(&alice).await.unwrap());
        assert!(keys.sealed(&alice).is_none());
    }
}
