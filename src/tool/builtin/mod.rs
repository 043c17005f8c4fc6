//! Built-in tool set exercising every corner of the execution core.

mod edit;
mod fetch;
mod read;
mod risks;
mod shell;
mod write;

pub use edit::EditTool;
pub use fetch::FetchTool;
pub use read::ReadTool;
pub use shell::ShellTool;
pub use write::WriteTool;

use crate::tool::ValidationError;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Extract a required string field.
pub(crate) fn require_str(params: &Value, field: &str) -> Result<String, ValidationError> {
    match params.get(field) {
        None | Some(Value::Null) => Err(ValidationError::missing(field, "string")),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ValidationError::invalid(
            field,
            "string",
            value_type_name(other),
            format!("{field} must be a string"),
        )),
    }
}

/// Extract a required absolute path field.
pub(crate) fn require_absolute_path(
    params: &Value,
    field: &str,
) -> Result<PathBuf, ValidationError> {
    let raw = require_str(params, field)?;
    let path = PathBuf::from(&raw);
    if !path.is_absolute() {
        return Err(ValidationError::invalid(
            field,
            "absolute path",
            raw,
            format!("{field} must be an absolute path"),
        ));
    }
    Ok(path)
}

/// Extract an optional boolean field, injecting the default when absent.
pub(crate) fn optional_bool(
    params: &Value,
    field: &str,
    default: bool,
) -> Result<bool, ValidationError> {
    match params.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(ValidationError::invalid(
            field,
            "boolean",
            value_type_name(other),
            format!("{field} must be a boolean"),
        )),
    }
}

/// Extract an optional non-negative integer field.
pub(crate) fn optional_u64(params: &Value, field: &str) -> Result<Option<u64>, ValidationError> {
    match params.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            ValidationError::invalid(
                field,
                "non-negative integer",
                value.to_string(),
                format!("{field} must be a non-negative integer"),
            )
        }),
    }
}

pub(crate) fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Broaden a concrete path to its directory: `/a/b/f.txt` → `/a/b/**`.
pub(crate) fn dir_pattern(path: &str) -> String {
    match Path::new(path).parent() {
        Some(parent) if parent != Path::new("") => format!("{}/**", parent.display()),
        _ => path.to_string(),
    }
}

/// Broaden a concrete path by extension: `/a/b/f.rs` → `**/*.rs`, falling
/// back to the parent directory when there is no extension.
pub(crate) fn extension_pattern(path: &str) -> String {
    match Path::new(path).extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("**/*.{ext}"),
        None => dir_pattern(path),
    }
}
