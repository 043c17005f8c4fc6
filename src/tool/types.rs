use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Fire-and-forget progress callback handed to invocations.
pub type ProgressSink = Arc<dyn Fn(String) + Send + Sync>;

/// Broad classification of what a tool touches. Drives the permission
/// mode overrides and the concurrency-safety default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolKind {
    Read,
    Search,
    Edit,
    Execute,
    Network,
    ReadOnly,
    Other,
}

impl ToolKind {
    /// Kinds that cannot mutate state and are auto-allowed in Default mode.
    #[must_use]
    pub fn is_read_only(self) -> bool {
        matches!(self, Self::Read | Self::Search | Self::ReadOnly)
    }
}

/// Global dial biasing the Ask/Allow boundary for broad tool categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    #[default]
    Default,
    AutoEdit,
    Yolo,
    Plan,
}

impl PermissionMode {
    /// Parse a mode name from config, defaulting to `Default` on unknown input.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "default" => Self::Default,
            "autoedit" | "auto_edit" | "auto-edit" => Self::AutoEdit,
            "yolo" => Self::Yolo,
            "plan" => Self::Plan,
            other => {
                tracing::warn!("Unknown permission mode '{other}', defaulting to default");
                Self::Default
            }
        }
    }
}

/// Schema rejection produced by `Tool::build`. The pipeline surfaces this
/// without running later stages.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("invalid parameter '{field_path}': {message} (expected {expected}, got {actual})")]
pub struct ValidationError {
    pub field_path: String,
    pub expected: String,
    pub actual: String,
    pub message: String,
}

impl ValidationError {
    #[must_use]
    pub fn missing(field: &str, expected: &str) -> Self {
        Self {
            field_path: field.to_string(),
            expected: expected.to_string(),
            actual: "missing".to_string(),
            message: format!("{field} is required"),
        }
    }

    #[must_use]
    pub fn invalid(
        field: &str,
        expected: &str,
        actual: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field_path: field.to_string(),
            expected: expected.to_string(),
            actual: actual.into(),
            message: message.into(),
        }
    }
}

/// Failure taxonomy for the result envelope. Every pipeline terminus maps
/// onto one of these; no error escapes as a Rust error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    ToolNotFound,
    ValidationError,
    PermissionDenied,
    UserRejected,
    ExecutionError,
    Cancelled,
    HookBlock,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ToolNotFound => "toolNotFound",
            Self::ValidationError => "validationError",
            Self::PermissionDenied => "permissionDenied",
            Self::UserRejected => "userRejected",
            Self::ExecutionError => "executionError",
            Self::Cancelled => "cancelled",
            Self::HookBlock => "hookBlock",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Uniform result envelope every stage can produce and the pipeline returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    pub success: bool,
    /// Content fed back to the model. String or structured.
    pub llm_content: Value,
    /// Content shown to the user.
    pub display_content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,
}

impl ToolOutput {
    #[must_use]
    pub fn success(llm_content: impl Into<Value>) -> Self {
        Self {
            success: true,
            llm_content: llm_content.into(),
            display_content: String::new(),
            metadata: Map::new(),
            error: None,
        }
    }

    #[must_use]
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            llm_content: Value::String(message.clone()),
            display_content: message.clone(),
            metadata: Map::new(),
            error: Some(ToolFailure {
                kind,
                message,
                details: None,
            }),
        }
    }

    #[must_use]
    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display_content = display.into();
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        if let Some(error) = self.error.as_mut() {
            error.details = Some(details);
        }
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// The error kind, if this is a failure envelope.
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.error_kind() == Some(ErrorKind::Cancelled)
    }
}

/// Validated, execution-ready handle produced by `Tool::build`. The only
/// object the execution stage may invoke.
#[async_trait]
pub trait Invocation: Send + Sync {
    /// Human-readable summary of what this call will do.
    fn describe(&self) -> String;

    /// Paths this call may touch. Stable across calls on the same
    /// invocation and independent of execution side effects.
    fn affected_paths(&self) -> Vec<PathBuf>;

    /// Risk notes surfaced in the confirmation dialog.
    fn risks(&self) -> Vec<String> {
        Vec::new()
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        progress: Option<ProgressSink>,
    ) -> ToolOutput;
}

impl std::fmt::Debug for dyn Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invocation({})", self.describe())
    }
}

/// The uniform contract every tool exposes to the execution core.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn display_name(&self) -> &str {
        self.name()
    }

    fn kind(&self) -> ToolKind;

    /// Tools that are not concurrency-safe are serialized per affected path
    /// by the file lock coordinator.
    fn is_concurrency_safe(&self) -> bool {
        self.kind().is_read_only()
    }

    /// JSON-schema-shaped parameter contract sent to the model.
    fn schema(&self) -> Value;

    /// Validate raw parameters, inject defaults, and construct the
    /// invocation in one atomic step. Deterministic and total.
    fn build(&self, params: Value) -> Result<Arc<dyn Invocation>, ValidationError>;

    /// Tool-specific content identifying this exact call for session memory
    /// and allow/deny matching (e.g. the absolute file path).
    fn signature_content(&self, params: &Value) -> String;

    /// Broader pattern suitable for persistence (e.g. `**/*.rs` rather than
    /// one specific file).
    fn permission_pattern(&self, params: &Value) -> String;
}

/// How long an approval should be remembered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalScope {
    Once,
    Session,
    Persistent,
}

/// Details shown to the user when a call needs confirmation.
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub title: String,
    pub message: String,
    pub risks: Vec<String>,
    pub affected_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ConfirmationResponse {
    pub approved: bool,
    pub scope: ApprovalScope,
    pub reason: Option<String>,
}

impl ConfirmationResponse {
    #[must_use]
    pub fn approve(scope: ApprovalScope) -> Self {
        Self {
            approved: true,
            scope,
            reason: None,
        }
    }

    #[must_use]
    pub fn reject(reason: Option<String>) -> Self {
        Self {
            approved: false,
            scope: ApprovalScope::Once,
            reason,
        }
    }
}

/// Interface for handling confirmations. Usually implemented by the TUI.
#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    async fn request_confirmation(&self, request: ConfirmationRequest) -> ConfirmationResponse;
}

/// Request-scoped context supplied by the caller of the pipeline.
#[derive(Clone)]
pub struct ExecutionContext {
    pub session_id: String,
    pub message_id: Option<String>,
    pub working_dir: PathBuf,
    pub cancel_token: CancellationToken,
    pub progress: Option<ProgressSink>,
    pub confirmation: Option<Arc<dyn ConfirmationHandler>>,
    pub mode: PermissionMode,
    /// Free-form request-scoped data.
    pub extra: HashMap<String, Value>,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(session_id: impl Into<String>, working_dir: PathBuf) -> Self {
        Self {
            session_id: session_id.into(),
            message_id: None,
            working_dir,
            cancel_token: CancellationToken::new(),
            progress: None,
            confirmation: None,
            mode: PermissionMode::Default,
            extra: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: PermissionMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_confirmation(mut self, handler: Arc<dyn ConfirmationHandler>) -> Self {
        self.confirmation = Some(handler);
        self
    }

    #[must_use]
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("session_id", &self.session_id)
            .field("message_id", &self.message_id)
            .field("working_dir", &self.working_dir)
            .field("mode", &self.mode)
            .field("progress", &self.progress.as_ref().map(|_| "Fn(String)"))
            .field(
                "confirmation",
                &self.confirmation.as_ref().map(|_| "ConfirmationHandler"),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_envelope_carries_kind_and_message() {
        let out = ToolOutput::failure(ErrorKind::PermissionDenied, "blocked by rule");
        assert!(!out.success);
        assert_eq!(out.error_kind(), Some(ErrorKind::PermissionDenied));
        assert_eq!(out.display_content, "blocked by rule");
        assert_eq!(out.llm_content, Value::String("blocked by rule".into()));
    }

    #[test]
    fn test_envelope_serializes_camel_case() {
        let out = ToolOutput::success("done").with_metadata("toolName", "read");
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["llmContent"], "done");
        assert_eq!(json["displayContent"], "");
        assert_eq!(json["metadata"]["toolName"], "read");
    }

    #[test]
    fn test_mode_parsing_defaults_on_unknown() {
        assert_eq!(PermissionMode::from_name("yolo"), PermissionMode::Yolo);
        assert_eq!(
            PermissionMode::from_name("autoEdit"),
            PermissionMode::AutoEdit
        );
        assert_eq!(PermissionMode::from_name("bogus"), PermissionMode::Default);
    }

    #[test]
    fn test_read_only_kinds() {
        assert!(ToolKind::Read.is_read_only());
        assert!(ToolKind::Search.is_read_only());
        assert!(ToolKind::ReadOnly.is_read_only());
        assert!(!ToolKind::Edit.is_read_only());
        assert!(!ToolKind::Execute.is_read_only());
    }
}
