//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **CommandHandler**: 外部コマンドを handler として使う
//! - **FnHandler**: クロージャを handler として使う
//! - **ScriptedHandler**: 決まった応答を返す（開発用・テスト用）
//! - **ParagraphSplitter**: 空行区切りの TaskSplitter

pub mod command;
pub mod fn_handler;
pub mod scripted;
pub mod splitter;

// 主要な型を再エクスポート
pub use self::command::CommandHandler;
pub use self::fn_handler::FnHandler;
pub use self::scripted::ScriptedHandler;
pub use self::splitter::ParagraphSplitter;
