//! Handler port - 専門タスクを処理する handler の境界
//!
//! handler の実装方法（モデル呼び出し、サブプロセス、HTTP など）は
//! この trait の外側の話です。dispatcher はこの 1 メソッドしか知りません。

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::errors::HandlerError;

/// Handler は task の description を受け取り、envelope を返す
///
/// # 使用例
/// ```ignore
/// struct Analyzer;
///
/// #[async_trait]
/// impl Handler for Analyzer {
///     fn name(&self) -> &str { "code-analyzer" }
///
///     async fn invoke(&self, description: &str, _deadline: Duration)
///         -> Result<serde_json::Value, HandlerError>
///     {
///         Ok(serde_json::json!({ "handler_name": "code-analyzer", ... }))
///     }
/// }
/// ```
///
/// # 返り値
/// 生の JSON を返します（パース済みの Envelope ではない）。
/// 形が正しいかどうかは EnvelopeValidator が判断します。
///
/// # キャンセル
/// dispatcher は期限切れやキャンセル時に `invoke` の future を drop します。
/// 子プロセスなどを持つ実装は drop 時に後始末をしてください。
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    /// `deadline` is how long the dispatcher will wait; handlers may use it
    /// to bound their own work.
    async fn invoke(
        &self,
        description: &str,
        deadline: Duration,
    ) -> Result<serde_json::Value, HandlerError>;
}
