use crate::tool::builtin::risks::command_risks;
use crate::tool::builtin::{require_str, value_type_name};
use crate::tool::{
    ErrorKind, Invocation, ProgressSink, Tool, ToolKind, ToolOutput, ValidationError,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Maximum captured output in bytes (100KB).
const MAX_OUTPUT_SIZE: usize = 100_000;

/// Longest command prefix used as the permission signature.
const SIGNATURE_PREFIX_LEN: usize = 80;

pub struct ShellTool;

impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Execute
    }

    // Commands serialize through their own processes; the coordinator has
    // no single path to key on.
    fn is_concurrency_safe(&self) -> bool {
        true
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command to execute"
                },
                "directory": {
                    "type": "string",
                    "description": "Absolute path to run the command in (default: process cwd)"
                }
            },
            "required": ["command"]
        })
    }

    fn build(&self, params: Value) -> Result<Arc<dyn Invocation>, ValidationError> {
        let command = require_str(&params, "command")?;
        if command.trim().is_empty() {
            return Err(ValidationError::invalid(
                "command",
                "non-empty string",
                "\"\"",
                "command cannot be empty",
            ));
        }
        let directory = match params.get("directory") {
            None | Some(Value::Null) => None,
            Some(Value::String(dir)) => {
                let dir = PathBuf::from(dir);
                if !dir.is_absolute() {
                    return Err(ValidationError::invalid(
                        "directory",
                        "absolute path",
                        dir.display().to_string(),
                        "directory must be an absolute path",
                    ));
                }
                Some(dir)
            }
            Some(other) => {
                return Err(ValidationError::invalid(
                    "directory",
                    "string",
                    value_type_name(other),
                    "directory must be a string",
                ));
            }
        };
        Ok(Arc::new(ShellInvocation { command, directory }))
    }

    fn signature_content(&self, params: &Value) -> String {
        sanitize_command(params.get("command").and_then(Value::as_str).unwrap_or_default())
    }

    fn permission_pattern(&self, params: &Value) -> String {
        let command = params.get("command").and_then(Value::as_str).unwrap_or_default();
        let sanitized = sanitize_command(command);
        match sanitized.split_once(' ') {
            Some((head, _)) => format!("{head} *"),
            None => sanitized,
        }
    }
}

/// Collapse whitespace, strip control characters, and cap the length so
/// signatures stay matchable against rule patterns.
fn sanitize_command(command: &str) -> String {
    let collapsed = command
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>();
    collapsed.chars().take(SIGNATURE_PREFIX_LEN).collect()
}

/// Absolute-path-looking tokens in the command line.
fn extract_paths(command: &str) -> Vec<PathBuf> {
    command
        .split_whitespace()
        .map(|token| token.trim_matches(|c| matches!(c, '"' | '\'' | ';' | ')' | '(')))
        .filter(|token| token.starts_with('/'))
        .map(PathBuf::from)
        .collect()
}

struct ShellInvocation {
    command: String,
    directory: Option<PathBuf>,
}

#[async_trait]
impl Invocation for ShellInvocation {
    fn describe(&self) -> String {
        format!("Run `{}`", self.command)
    }

    fn affected_paths(&self) -> Vec<PathBuf> {
        extract_paths(&self.command)
    }

    fn risks(&self) -> Vec<String> {
        command_risks(&self.command)
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        progress: Option<ProgressSink>,
    ) -> ToolOutput {
        if let Some(progress) = &progress {
            progress(format!("$ {}", self.command));
        }

        let mut command = Command::new("bash");
        command
            .arg("-c")
            .arg(&self.command)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(directory) = &self.directory {
            command.current_dir(directory);
        }

        let child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                return ToolOutput::failure(
                    ErrorKind::ExecutionError,
                    format!("Failed to spawn command: {err}"),
                );
            }
        };

        // kill_on_drop reaps the child if the user cancels mid-run.
        let output = tokio::select! {
            result = child.wait_with_output() => match result {
                Ok(output) => output,
                Err(err) => {
                    return ToolOutput::failure(
                        ErrorKind::ExecutionError,
                        format!("Failed to read command output: {err}"),
                    );
                }
            },
            () = cancel.cancelled() => {
                return ToolOutput::failure(ErrorKind::Cancelled, "Command cancelled");
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        let mut content = stdout;
        if !stderr.is_empty() {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(&stderr);
        }
        if content.len() > MAX_OUTPUT_SIZE {
            content.truncate(MAX_OUTPUT_SIZE);
            content.push_str("\n[output truncated]");
        }

        let exit_code = output.status.code().unwrap_or(-1);
        if output.status.success() {
            ToolOutput::success(content)
                .with_display(format!("`{}` finished", self.command))
                .with_metadata("exit_code", exit_code)
        } else {
            ToolOutput::failure(
                ErrorKind::ExecutionError,
                format!("Command exited with status {exit_code}"),
            )
            .with_details(json!({"exitCode": exit_code, "output": content}))
            .with_metadata("exit_code", exit_code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_rejects_empty_command() {
        assert!(ShellTool.build(json!({"command": "  "})).is_err());
        assert!(ShellTool.build(json!({})).is_err());
    }

    #[test]
    fn test_signature_is_sanitized_prefix() {
        let params = json!({"command": "git   status\t--short"});
        assert_eq!(ShellTool.signature_content(&params), "git status --short");

        let long = "x".repeat(500);
        let params = json!({"command": long});
        assert_eq!(ShellTool.signature_content(&params).len(), 80);
    }

    #[test]
    fn test_pattern_generalizes_to_program() {
        assert_eq!(
            ShellTool.permission_pattern(&json!({"command": "git push origin main"})),
            "git *"
        );
        assert_eq!(ShellTool.permission_pattern(&json!({"command": "ls"})), "ls");
    }

    #[test]
    fn test_affected_paths_extracts_absolute_tokens() {
        let invocation = ShellTool
            .build(json!({"command": "rm -rf / && cat '/etc/passwd'"}))
            .unwrap();
        let paths = invocation.affected_paths();
        assert!(paths.contains(&PathBuf::from("/")));
        assert!(paths.contains(&PathBuf::from("/etc/passwd")));
    }

    #[test]
    fn test_risks_surface_destructive_commands() {
        let invocation = ShellTool.build(json!({"command": "rm -rf /tmp/x"})).unwrap();
        assert!(!invocation.risks().is_empty());

        let invocation = ShellTool.build(json!({"command": "ls"})).unwrap();
        assert!(invocation.risks().is_empty());
    }

    #[tokio::test]
    async fn test_execute_captures_output_and_exit_code() {
        let invocation = ShellTool.build(json!({"command": "echo hello"})).unwrap();
        let output = invocation.execute(CancellationToken::new(), None).await;
        assert!(output.success);
        assert_eq!(output.llm_content, Value::String("hello\n".into()));
        assert_eq!(output.metadata["exit_code"], 0);
    }

    #[tokio::test]
    async fn test_execute_nonzero_exit_is_failure() {
        let invocation = ShellTool.build(json!({"command": "exit 3"})).unwrap();
        let output = invocation.execute(CancellationToken::new(), None).await;
        assert!(!output.success);
        assert_eq!(output.error_kind(), Some(ErrorKind::ExecutionError));
        assert_eq!(output.metadata["exit_code"], 3);
    }

    #[tokio::test]
    async fn test_execute_observes_cancellation() {
        let invocation = ShellTool.build(json!({"command": "sleep 30"})).unwrap();
        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { invocation.execute(cancel, None).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
        let output = tokio::time::timeout(std::time::Duration::from_secs(2), task)
            .await
            .expect("cancellation should be prompt")
            .unwrap();
        assert_eq!(output.error_kind(), Some(ErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn test_execute_respects_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let invocation = ShellTool
            .build(json!({
                "command": "pwd",
                "directory": dir.path().to_str().unwrap()
            }))
            .unwrap();
        let output = invocation.execute(CancellationToken::new(), None).await;
        assert!(output.success);
        let printed = output.llm_content.as_str().unwrap_or_default().trim().to_string();
        // Compare canonicalized paths to survive /tmp symlinks.
        assert_eq!(
            std::fs::canonicalize(&printed).unwrap(),
            std::fs::canonicalize(dir.path()).unwrap()
        );
    }
}
