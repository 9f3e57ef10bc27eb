//! agente-core
//!
//! Client-side projection of scheduled browser-agent tasks.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, status, session, events, errors）
//! - **ports**: 抽象化レイヤー（TaskRepository, AuthGateway, ApiKeyDirectory, Clock, IdGenerator）
//! - **projection**: 射影の状態とフェッチチケット（同期・純粋ロジック）
//! - **app**: ストアのイベントループ、builder、セッション追従
//! - **impls**: インメモリ実装（開発用・テスト用）
//! - **config**: 同期設定（TOML）
//! - **crypto**: API キーのパスフレーズ暗号化（PBKDF2 + AES-GCM）

pub mod app;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod projection;
