use crate::tool::builtin::{
    extension_pattern, optional_bool, require_absolute_path, require_str,
};
use crate::tool::{
    ErrorKind, Invocation, ProgressSink, Tool, ToolKind, ToolOutput, ValidationError,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct EditTool;

impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
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
                    "description": "The absolute path to the file to modify"
                },
                "old_string": {
                    "type": "string",
                    "description": "The exact text to replace (must exist in file)"
                },
                "new_string": {
                    "type": "string",
                    "description": "The replacement text (must differ from old_string)"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace all occurrences (default: false, requires unique match)"
                }
            },
            "required": ["file_path", "old_string", "new_string"]
        })
    }

    fn build(&self, params: Value) -> Result<Arc<dyn Invocation>, ValidationError> {
        let file_path = require_absolute_path(&params, "file_path")?;
        let old_string = require_str(&params, "old_string")?;
        let new_string = require_str(&params, "new_string")?;
        let replace_all = optional_bool(&params, "replace_all", false)?;

        if old_string.is_empty() {
            return Err(ValidationError::invalid(
                "old_string",
                "non-empty string",
                "\"\"",
                "old_string cannot be empty; use the write tool to create new files",
            ));
        }
        if old_string == new_string {
            return Err(ValidationError::invalid(
                "new_string",
                "text different from old_string",
                new_string,
                "old_string and new_string must be different",
            ));
        }

        Ok(Arc::new(EditInvocation {
            file_path,
            old_string,
            new_string,
            replace_all,
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
        extension_pattern(
            params
                .get("file_path")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        )
    }
}

struct EditInvocation {
    file_path: PathBuf,
    old_string: String,
    new_string: String,
    replace_all: bool,
}

#[async_trait]
impl Invocation for EditInvocation {
    fn describe(&self) -> String {
        format!("Edit {}", self.file_path.display())
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

        if !self.file_path.exists() {
            return ToolOutput::failure(
                ErrorKind::ExecutionError,
                format!("File not found: {path_str}. Use the write tool to create new files."),
            );
        }

        let content = match tokio::fs::read_to_string(&self.file_path).await {
            Ok(content) => content,
            Err(err) => {
                return ToolOutput::failure(
                    ErrorKind::ExecutionError,
                    format!("Failed to read {path_str}: {err}"),
                );
            }
        };

        let count = content.matches(&self.old_string).count();
        if count == 0 {
            let preview: String = self.old_string.chars().take(100).collect();
            let suffix = if self.old_string.len() > 100 { "..." } else { "" };
            return ToolOutput::failure(
                ErrorKind::ExecutionError,
                format!("Text not found in file: \"{preview}{suffix}\""),
            );
        }
        if count > 1 && !self.replace_all {
            return ToolOutput::failure(
                ErrorKind::ExecutionError,
                format!(
                    "Text appears {count} times. Use replace_all: true or provide more surrounding context for uniqueness."
                ),
            );
        }

        let new_content = if self.replace_all {
            content.replace(&self.old_string, &self.new_string)
        } else {
            content.replacen(&self.old_string, &self.new_string, 1)
        };

        if let Err(err) = tokio::fs::write(&self.file_path, &new_content).await {
            return ToolOutput::failure(
                ErrorKind::ExecutionError,
                format!("Failed to write {path_str}: {err}"),
            );
        }

        let diff = similar::TextDiff::from_lines(content.as_str(), new_content.as_str());
        let mut diff_output = String::new();
        for hunk in diff
            .unified_diff()
            .header(&path_str, &path_str)
            .iter_hunks()
        {
            diff_output.push_str(&format!("{hunk}"));
        }

        let occurrences = if self.replace_all && count > 1 {
            format!(" ({count} occurrences)")
        } else {
            String::new()
        };
        let message = format!("Edited {path_str}{occurrences}:\n\n```diff\n{diff_output}```");

        ToolOutput::success(message.clone())
            .with_display(message)
            .with_metadata("replacements", count as u64)
    }
}
