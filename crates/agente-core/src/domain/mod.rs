//! Domain model (IDs, tasks, sessions, change events, errors).

pub mod errors;
pub mod events;
pub mod ids;
pub mod session;
pub mod status;
pub mod task;

pub use self::errors::{AgenteError, ErrorKind, ValidationError};
pub use self::events::{ChangeEvent, ChangeKind, RawChange};
pub use self::ids::{TaskId, UserId};
pub use self::session::Session;
pub use self::status::TaskStatus;
pub use self::task::{NewTask, Task, TaskDraft, DEFAULT_TIMEZONE};
