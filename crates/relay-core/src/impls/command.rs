//! CommandHandler - 外部コマンドを handler として呼び出す
//!
//! description を stdin に書き込み、stdout を envelope として読みます。
//! JSON として読めない stdout は文字列のまま返すので、validator 側で
//! malformed_envelope として扱われます。

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::domain::errors::HandlerError;
use crate::ports::Handler;

/// Environment variable carrying the handler name into the child process.
pub const ENV_HANDLER_NAME: &str = "RELAY_HANDLER_NAME";

/// Environment variable carrying the deadline in whole seconds.
pub const ENV_DEADLINE_SECS: &str = "RELAY_DEADLINE_SECS";

#[derive(Debug, Clone)]
pub struct CommandHandler {
    name: String,
    program: String,
    args: Vec<String>,
}

impl CommandHandler {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Build from a `[program, args...]` vector as written in config.
    pub fn from_argv(name: impl Into<String>, argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(name, program.clone()).args(args.iter().cloned()))
    }
}

#[async_trait]
impl Handler for CommandHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, description: &str, deadline: Duration) -> Result<Value, HandlerError> {
        let spawn_err = |source| HandlerError::Spawn {
            handler: self.name.clone(),
            source,
        };

        // the dispatcher drops this future on timeout or cancel
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(ENV_HANDLER_NAME, &self.name)
            .env(ENV_DEADLINE_SECS, deadline.as_secs().to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_err)?;
        debug!(handler = %self.name, program = %self.program, pid = ?child.id(), "handler process started");

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(description.as_bytes())
                .await
                .map_err(spawn_err)?;
        }

        let output = child.wait_with_output().await.map_err(spawn_err)?;
        if !output.status.success() {
            return Err(HandlerError::Exit {
                handler: self.name.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(serde_json::from_str(stdout.trim()).unwrap_or_else(|_| Value::String(stdout.into_owned())))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    fn sh(name: &str, script: &str) -> CommandHandler {
        CommandHandler::new(name, "sh").args(["-c", script])
    }

    #[tokio::test]
    async fn stdout_json_becomes_the_response() {
        let h = sh(
            "echo-analyzer",
            r#"read line; printf '{"handler_name":"%s","desc":"%s"}' "$RELAY_HANDLER_NAME" "$line""#,
        );
        let raw = h
            .invoke("find hotspots\n", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            raw,
            json!({"handler_name": "echo-analyzer", "desc": "find hotspots"})
        );
    }

    #[tokio::test]
    async fn plain_text_stdout_is_returned_as_a_string() {
        let h = sh("chatty", "cat > /dev/null; echo 'here is my analysis'");
        let raw = h.invoke("x", Duration::from_secs(5)).await.unwrap();
        assert_eq!(raw, json!("here is my analysis\n"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let h = sh("broken", "cat > /dev/null; echo oops >&2; exit 3");
        let err = h.invoke("x", Duration::from_secs(5)).await.unwrap_err();
        match err {
            HandlerError::Exit { stderr, .. } => assert_eq!(stderr, "oops"),
            other => panic!("expected Exit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let h = CommandHandler::new("ghost", "/nonexistent/relay-handler");
        assert!(matches!(
            h.invoke("x", Duration::from_secs(1)).await,
            Err(HandlerError::Spawn { .. })
        ));
    }

    #[test]
    fn from_argv_needs_a_program() {
        assert!(CommandHandler::from_argv("h", &[]).is_none());
        let h = CommandHandler::from_argv("h", &["sh".into(), "-c".into(), "true".into()]).unwrap();
        assert_eq!(h.program, "sh");
        assert_eq!(h.args, vec!["-c", "true"]);
    }
}
