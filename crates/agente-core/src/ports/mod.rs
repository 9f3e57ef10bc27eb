//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（ホスト型バックエンドの DB / auth / realtime）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - バックエンドが source of truth（正本）
//! - クライアントは射影を保持し、フィードとフェッチで追従するだけ

pub mod api_keys;
pub mod auth;
pub mod clock;
pub mod id_generator;
pub mod task_repository;

pub use self::api_keys::ApiKeyDirectory;
pub use self::auth::AuthGateway;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_repository::{ChangeFeed, TaskRepository};
