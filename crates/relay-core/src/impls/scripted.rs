//! ScriptedHandler - 決められた応答を順番に返す handler（開発用・テスト用）
//!
//! # 使用例
//! ```ignore
//! let analyzer = ScriptedHandler::new("code-analyzer")
//!     .respond(ScriptedHandler::completed("code-analyzer", json!({})))
//!     .respond(ScriptedHandler::completed("code-analyzer", json!({"recommendations": []})));
//! ```

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::domain::errors::HandlerError;
use crate::ports::Handler;

#[derive(Debug, Clone)]
enum Step {
    Respond(Value),
    Fail(String),
    Hang,
}

/// Replays a fixed script of responses and records every description it was
/// invoked with.
///
/// Once the script runs out, each further call fails with
/// `HandlerError::Exhausted`.
#[derive(Debug)]
pub struct ScriptedHandler {
    name: String,
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(self, raw: Value) -> Self {
        self.push(Step::Respond(raw))
    }

    /// Next call raises a handler error instead of answering.
    pub fn fail(self, message: impl Into<String>) -> Self {
        self.push(Step::Fail(message.into()))
    }

    /// Next call never answers.
    pub fn hang(self) -> Self {
        self.push(Step::Hang)
    }

    fn push(self, step: Step) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(step);
        }
        self
    }

    /// Descriptions received so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// A `completed` envelope from `handler_name` carrying `output`.
    pub fn completed(handler_name: &str, output: Value) -> Value {
        Self::envelope(handler_name, "completed", output)
    }

    pub fn envelope(handler_name: &str, status: &str, output: Value) -> Value {
        json!({
            "handler_name": handler_name,
            "timestamp": "2024-01-01T00:00:00Z",
            "execution_status": status,
            "output": output,
        })
    }
}

#[async_trait]
impl Handler for ScriptedHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, description: &str, _deadline: Duration) -> Result<Value, HandlerError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(description.to_string());
        }
        let step = self.script.lock().ok().and_then(|mut s| s.pop_front());

        match step {
            Some(Step::Respond(raw)) => Ok(raw),
            Some(Step::Fail(message)) => Err(HandlerError::Other(message)),
            Some(Step::Hang) => std::future::pending().await,
            None => Err(HandlerError::Exhausted {
                handler: self.name.clone(),
            }),
        }
    }
}
