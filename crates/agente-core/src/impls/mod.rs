//! Impls - 実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryTaskRepository**: 変更フィード付きのインメモリ正本
//! - **StaticAuthGateway**: 手動サインインの認証ゲートウェイ
//! - **InMemoryApiKeys**: API キー登録状況
//!
//! 本番用（ホスト型バックエンド向け）の実装は別クレートに置く想定です。

pub mod inmem_api_keys;
pub mod inmem_tasks;
pub mod static_auth;

pub use self::inmem_api_keys::InMemoryApiKeys;
pub use self::inmem_tasks::InMemoryTaskRepository;
pub use self::static_auth::StaticAuthGateway;
