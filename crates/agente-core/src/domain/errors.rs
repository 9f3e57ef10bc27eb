//! Errors - エラー型と分類
//!
//! 呼び出し側が「リダイレクトするか」「再試行するか」「その場で表示するか」を
//! 決められるように、`ErrorKind` で運用上の分類を提供します。

use thiserror::Error;

use super::ids::TaskId;
use super::status::TaskStatus;

/// ErrorKind は実行エラーの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// セッションなし。サインイン画面へ（ローカルでは再試行しない）
    Auth,
    /// 一時的なエラー（呼び出し側で再試行可能）
    Transient,
    /// 送信前のローカル検証エラー
    Validation,
    /// 変更フィードのペイロード不正（境界で破棄）
    Malformed,
    /// 再試行しても結果が変わらないエラー
    Permanent,
}

/// Local, pre-submission validation failures. Never sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("please select a scheduled time")]
    MissingScheduledTime,

    #[error("please configure your API key in settings")]
    MissingApiKey,

    #[error("please enter a task description")]
    EmptyTask,

    #[error("scheduled time must be in the future")]
    ScheduledTimeInPast,
}

#[derive(Debug, Error)]
pub enum AgenteError {
    #[error("authentication required")]
    AuthRequired,

    #[error("network failure: {0}")]
    Network(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("malformed change event: {0}")]
    MalformedEvent(String),

    #[error("realtime feed unavailable: {0}")]
    FeedUnavailable(String),

    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("task {id} cannot be edited while {status}")]
    NotEditable { id: TaskId, status: TaskStatus },

    #[error("fetch was superseded by a newer request or teardown")]
    Superseded,

    #[error("projection store is closed")]
    StoreClosed,
}

impl AgenteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgenteError::AuthRequired => ErrorKind::Auth,
            AgenteError::Network(_)
            | AgenteError::FeedUnavailable(_)
            | AgenteError::Superseded => ErrorKind::Transient,
            AgenteError::Validation(_) => ErrorKind::Validation,
            AgenteError::MalformedEvent(_) => ErrorKind::Malformed,
            AgenteError::NotFound(_) | AgenteError::NotEditable { .. } | AgenteError::StoreClosed => {
                ErrorKind::Permanent
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}
