//! App - アプリケーション層
//!
//! ports を組み合わせて射影ストアを動かします。
//!
//! # 主要コンポーネント
//! - **StoreBuilder**: ポートのワイヤリングと起動
//! - **StoreHandle**: ストアへのコマンド送信とスナップショット購読
//! - **SessionFollower**: 認証状態に合わせて initialize / teardown
//! - **StatusCounts**: スナップショットの集計

pub mod builder;
pub mod session;
pub mod status;
pub mod store;

pub use self::builder::{BuildError, StoreBuilder};
pub use self::session::SessionFollower;
pub use self::status::StatusCounts;
pub use self::store::StoreHandle;
