//! Events - 変更フィードのイベント
//!
//! バックエンドの realtime フィードは緩い JSON（`eventType` / `new` / `old`）を送ってきます。
//! 境界で `RawChange` → `ChangeEvent` に変換し、必須フィールドが欠けたものは破棄します。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::AgenteError;
use super::ids::TaskId;
use super::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Feed payload as delivered: `new` for insert/update, `old` (at least `id`) for delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    #[serde(rename = "eventType")]
    pub kind: ChangeKind,

    #[serde(default)]
    pub new: Value,

    #[serde(default)]
    pub old: Value,
}

impl RawChange {
    pub fn insert(task: &Task) -> Self {
        Self {
            kind: ChangeKind::Insert,
            new: serde_json::to_value(task).unwrap_or(Value::Null),
            old: Value::Null,
        }
    }

    pub fn update(task: &Task) -> Self {
        Self {
            kind: ChangeKind::Update,
            new: serde_json::to_value(task).unwrap_or(Value::Null),
            old: Value::Null,
        }
    }

    pub fn delete(id: &TaskId) -> Self {
        Self {
            kind: ChangeKind::Delete,
            new: Value::Null,
            old: serde_json::json!({ "id": id.as_str() }),
        }
    }
}

/// A validated change-feed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Insert(Task),
    Update(Task),
    Delete(TaskId),
}

impl ChangeEvent {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Insert(_) => ChangeKind::Insert,
            ChangeEvent::Update(_) => ChangeKind::Update,
            ChangeEvent::Delete(_) => ChangeKind::Delete,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        match self {
            ChangeEvent::Insert(task) | ChangeEvent::Update(task) => &task.id,
            ChangeEvent::Delete(id) => id,
        }
    }
}

fn row_id(row: &Value) -> Option<&str> {
    row.get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

fn decode_row(kind: ChangeKind, row: Value) -> Result<Task, AgenteError> {
    let Some(id) = row_id(&row).map(str::to_owned) else {
        return Err(AgenteError::MalformedEvent(format!(
            "{kind:?} row without id"
        )));
    };
    serde_json::from_value(row)
        .map_err(|e| AgenteError::MalformedEvent(format!("{kind:?} row {id}: {e}")))
}

impl TryFrom<RawChange> for ChangeEvent {
    type Error = AgenteError;

    fn try_from(raw: RawChange) -> Result<Self, Self::Error> {
        match raw.kind {
            ChangeKind::Insert => decode_row(raw.kind, raw.new).map(ChangeEvent::Insert),
            ChangeKind::Update => decode_row(raw.kind, raw.new).map(ChangeEvent::Update),
            ChangeKind::Delete => row_id(&raw.old)
                .map(|id| ChangeEvent::Delete(TaskId::new(id)))
                .ok_or_else(|| AgenteError::MalformedEvent("Delete row without id".into())),
        }
    }
}
