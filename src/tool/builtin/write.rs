use crate::tool::builtin::{extension_pattern, require_absolute_path, require_str};
use crate::tool::{
    ErrorKind, Invocation, ProgressSink, Tool, ToolKind, ToolOutput, ValidationError,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct WriteTool;

impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Edit
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The absolute path to the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write to the file"
                }
            },
            "required": ["file_path", "content"]
        })
    }

    fn build(&self, params: Value) -> Result<Arc<dyn Invocation>, ValidationError> {
        let file_path = require_absolute_path(&params, "file_path")?;
        let content = require_str(&params, "content")?;
        Ok(Arc::new(WriteInvocation { file_path, content }))
    }

    fn signature_content(&self, params: &Value) -> String {
        params
            .get("file_path")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    fn permission_pattern(&self, params: &Value) -> String {
        extension_pattern(
            params
                .get("file_path")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        )
    }
}

struct WriteInvocation {
    file_path: PathBuf,
    content: String,
}

#[async_trait]
impl Invocation for WriteInvocation {
    fn describe(&self) -> String {
        format!(
            "Write {} bytes to {}",
            self.content.len(),
            self.file_path.display()
        )
    }

    fn affected_paths(&self) -> Vec<PathBuf> {
        vec![self.file_path.clone()]
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        _progress: Option<ProgressSink>,
    ) -> ToolOutput {
        let path_str = self.file_path.display().to_string();

        // Old content, if any, for diffing.
        let old_content = if self.file_path.exists() {
            tokio::fs::read_to_string(&self.file_path).await.ok()
        } else {
            None
        };

        if let Some(parent) = self.file_path.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                return ToolOutput::failure(
                    ErrorKind::ExecutionError,
                    format!("Failed to create directories for {path_str}: {err}"),
                );
            }
        }

        if let Err(err) = tokio::fs::write(&self.file_path, &self.content).await {
            return ToolOutput::failure(
                ErrorKind::ExecutionError,
                format!("Failed to write {path_str}: {err}"),
            );
        }

        let message = match old_content {
            Some(old) => {
                let diff = similar::TextDiff::from_lines(old.as_str(), self.content.as_str());
                let mut diff_output = String::new();
                for hunk in diff
                    .unified_diff()
                    .header(&path_str, &path_str)
                    .iter_hunks()
                {
                    diff_output.push_str(&format!("{hunk}"));
                }
                if diff_output.is_empty() {
                    format!("Wrote {path_str} (no changes)")
                } else {
                    format!("Wrote {path_str}:\n\n```diff\n{diff_output}```")
                }
            }
            None => format!("Created {path_str}"),
        };

        ToolOutput::success(message.clone())
            .with_display(message)
            .with_metadata("bytes_written", self.content.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_build_requires_both_fields() {
        assert!(WriteTool.build(json!({"file_path": "/tmp/f"})).is_err());
        assert!(WriteTool.build(json!({"content": "x"})).is_err());
        assert!(
            WriteTool
                .build(json!({"file_path": "/tmp/f", "content": "x"}))
                .is_ok()
        );
    }

    #[test]
    fn test_pattern_generalizes_by_extension() {
        let params = json!({"file_path": "/workspace/src/main.rs", "content": ""});
        assert_eq!(WriteTool.permission_pattern(&params), "**/*.rs");
    }

    #[tokio::test]
    async fn test_write_creates_file_and_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/deep/out.txt");

        let invocation = WriteTool
            .build(json!({
                "file_path": path.to_str().unwrap(),
                "content": "hello"
            }))
            .unwrap();
        let output = invocation.execute(CancellationToken::new(), None).await;
        assert!(output.success);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
        assert_eq!(output.metadata["bytes_written"], 5);
    }

    #[tokio::test]
    async fn test_overwrite_includes_diff() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "old line\n").unwrap();

        let invocation = WriteTool
            .build(json!({
                "file_path": path.to_str().unwrap(),
                "content": "new line\n"
            }))
            .unwrap();
        let output = invocation.execute(CancellationToken::new(), None).await;
        assert!(output.success);
        let text = output.display_content;
        assert!(text.contains("-old line"));
        assert!(text.contains("+new line"));
    }
}
