use crate::tool::builtin::{dir_pattern, optional_u64, require_absolute_path};
use crate::tool::{
    ErrorKind, Invocation, ProgressSink, Tool, ToolKind, ToolOutput, ValidationError,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct ReadTool;

impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Read
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The absolute path to the file to read"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-based line number to start reading from"
                },
                "limit": {
                    "type": "integer",
                    "description": "Number of lines to read"
                }
            },
            "required": ["file_path"]
        })
    }

    fn build(&self, params: Value) -> Result<Arc<dyn Invocation>, ValidationError> {
        let file_path = require_absolute_path(&params, "file_path")?;
        let offset = optional_u64(&params, "offset")?.unwrap_or(1);
        if offset == 0 {
            return Err(ValidationError::invalid(
                "offset",
                "integer >= 1",
                "0",
                "offset is 1-based",
            ));
        }
        let limit = optional_u64(&params, "limit")?;
        Ok(Arc::new(ReadInvocation {
            file_path,
            offset,
            limit,
        }))
    }

    fn signature_content(&self, params: &Value) -> String {
        params
            .get("file_path")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    fn permission_pattern(&self, params: &Value) -> String {
        dir_pattern(
            params
                .get("file_path")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        )
    }
}

struct ReadInvocation {
    file_path: PathBuf,
    offset: u64,
    limit: Option<u64>,
}

#[async_trait]
impl Invocation for ReadInvocation {
    fn describe(&self) -> String {
        format!("Read {}", self.file_path.display())
    }

    fn affected_paths(&self) -> Vec<PathBuf> {
        vec![self.file_path.clone()]
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        _progress: Option<ProgressSink>,
    ) -> ToolOutput {
        let content = match tokio::fs::read_to_string(&self.file_path).await {
            Ok(content) => content,
            Err(err) => {
                return ToolOutput::failure(
                    ErrorKind::ExecutionError,
                    format!("Failed to read {}: {err}", self.file_path.display()),
                );
            }
        };

        let skip = usize::try_from(self.offset - 1).unwrap_or(usize::MAX);
        let selected: Vec<&str> = match self.limit {
            Some(limit) => content
                .lines()
                .skip(skip)
                .take(usize::try_from(limit).unwrap_or(usize::MAX))
                .collect(),
            None => content.lines().skip(skip).collect(),
        };
        let body = selected.join("\n");

        ToolOutput::success(body).with_display(format!(
            "Read {} lines from {}",
            selected.len(),
            self.file_path.display()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_build_requires_absolute_path() {
        let err = ReadTool.build(json!({"file_path": "notes.txt"})).unwrap_err();
        assert_eq!(err.field_path, "file_path");

        let err = ReadTool.build(json!({})).unwrap_err();
        assert_eq!(err.actual, "missing");
    }

    #[test]
    fn test_build_rejects_zero_offset() {
        let err = ReadTool
            .build(json!({"file_path": "/tmp/f.txt", "offset": 0}))
            .unwrap_err();
        assert_eq!(err.field_path, "offset");
    }

    #[test]
    fn test_signature_and_pattern() {
        let params = json!({"file_path": "/workspace/src/lib.rs"});
        assert_eq!(ReadTool.signature_content(&params), "/workspace/src/lib.rs");
        assert_eq!(ReadTool.permission_pattern(&params), "/workspace/src/**");
    }

    #[tokio::test]
    async fn test_read_full_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "one\ntwo\nthree\n").unwrap();

        let invocation = ReadTool
            .build(json!({"file_path": path.to_str().unwrap()}))
            .unwrap();
        let output = invocation.execute(CancellationToken::new(), None).await;
        assert!(output.success);
        assert_eq!(output.llm_content, Value::String("one\ntwo\nthree".into()));
    }

    #[tokio::test]
    async fn test_read_with_offset_and_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "one\ntwo\nthree\nfour\n").unwrap();

        let invocation = ReadTool
            .build(json!({
                "file_path": path.to_str().unwrap(),
                "offset": 2,
                "limit": 2
            }))
            .unwrap();
        let output = invocation.execute(CancellationToken::new(), None).await;
        assert_eq!(output.llm_content, Value::String("two\nthree".into()));
    }

    #[tokio::test]
    async fn test_read_missing_file_is_failure_envelope() {
        let invocation = ReadTool
            .build(json!({"file_path": "/tmp/definitely-not-here-axon.txt"}))
            .unwrap();
        let output = invocation.execute(CancellationToken::new(), None).await;
        assert!(!output.success);
        assert_eq!(output.error_kind(), Some(ErrorKind::ExecutionError));
    }
}
