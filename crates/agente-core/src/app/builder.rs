//! StoreBuilder - ポートのワイヤリングとストアの起動
//!
//! # Fail-fast 設計
//! - 必須ポート（TaskRepository, ApiKeyDirectory）が未設定なら build() で BuildError
//! - 設定値の検証も build() 時に行う

use std::sync::Arc;

use super::store::{StoreHandle, StoreLoop};
use crate::config::{ConfigError, SyncConfig};
use crate::ports::{ApiKeyDirectory, Clock, SystemClock, TaskRepository};

/// StoreBuilder はプロジェクションストアを構築
///
/// # 使用例
/// ```ignore
/// let store = StoreBuilder::new()
///     .repository(Arc::new(repo))
///     .api_keys(Arc::new(keys))
///     .config(SyncConfig::default())
///     .build()?;
/// let tasks = store.initialize(auth.session().await?).await?;
/// ```
pub struct StoreBuilder {
    repository: Option<Arc<dyn TaskRepository>>,
    api_keys: Option<Arc<dyn ApiKeyDirectory>>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
}

/// BuildError はストア構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no task repository configured")]
    MissingRepository,

    #[error("no API key directory configured")]
    MissingApiKeys,

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self {
            repository: None,
            api_keys: None,
            clock: Arc::new(SystemClock),
            config: SyncConfig::default(),
        }
    }

    pub fn repository(mut self, repository: Arc<dyn TaskRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn api_keys(mut self, api_keys: Arc<dyn ApiKeyDirectory>) -> Self {
        self.api_keys = Some(api_keys);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the wiring and spawn the store loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<StoreHandle, BuildError> {
        let repository = self.repository.ok_or(BuildError::MissingRepository)?;
        let api_keys = self.api_keys.ok_or(BuildError::MissingApiKeys)?;
        self.config.validate()?;

        Ok(StoreLoop::spawn(repository, api_keys, self.clock, self.config))
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
