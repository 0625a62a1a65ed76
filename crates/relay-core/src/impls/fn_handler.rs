//! FnHandler - クロージャを handler として使う

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::HandlerError;
use crate::ports::Handler;

/// Synchronous closure-backed handler.
///
/// ```ignore
/// let echo = FnHandler::new("echo", |description| {
///     Ok(json!({ "handler_name": "echo", ... }))
/// });
/// ```
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&str) -> Result<Value, HandlerError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&str) -> Result<Value, HandlerError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, description: &str, _deadline: Duration) -> Result<Value, HandlerError> {
        (self.f)(description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn closure_sees_the_description() {
        let h = FnHandler::new("echo", |d: &str| Ok(json!({ "len": d.len() })));
        assert_eq!(h.name(), "echo");
        assert_eq!(
            h.invoke("four", Duration::from_secs(1)).await.unwrap(),
            json!({"len": 4})
        );
    }
}
