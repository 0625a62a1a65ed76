//! relay-core
//!
//! 専門 handler へのタスク委譲と、その応答の検証・回復を行うコアライブラリ。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, envelope, attempt, decision, state, outcome, errors）
//! - **schema**: handler ごとの output スキーマ（SchemaRegistry, Constraint）
//! - **ports**: 抽象化レイヤー（Handler, TaskSplitter, Clock, IdGenerator）
//! - **app**: validator, router, dispatcher, service, builder
//! - **impls**: 実装（CommandHandler, FnHandler, ScriptedHandler, ParagraphSplitter）
//! - **config**: TOML 構成

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod schema;

pub use app::{DispatchService, Dispatcher, RelayBuilder};
pub use config::{ConfigError, RelayConfig};
