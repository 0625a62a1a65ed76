//! App - アプリケーション層
//!
//! domain と ports を組み合わせて dispatch の流れを実装します。
//!
//! # 主要コンポーネント
//! - **EnvelopeValidator**: handler の応答を検証
//! - **Router**: problem_type → 候補 handler
//! - **Dispatcher**: 1 タスクの状態機械（retry / fallback / split / escalate）
//! - **DispatchService**: submit / await / cancel
//! - **RelayBuilder**: 構築とワイヤリング

pub mod builder;
pub mod dispatcher;
pub mod router;
pub mod service;
pub mod validator;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, RelayBuilder};
pub use self::dispatcher::{DEFAULT_HANDLER_TIMEOUT, DEFAULT_MAX_SPLIT_DEPTH, Dispatcher};
pub use self::router::Router;
pub use self::service::DispatchService;
pub use self::validator::EnvelopeValidator;
