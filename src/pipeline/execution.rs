//! Per-call execution state.
//!
//! One `Execution` is created at pipeline entry, mutated only by stages in
//! order, and destroyed after history records it. Stage slots fill as the
//! call advances; setting a result stops the walk.

use crate::config::PermissionConfig;
use crate::permission::PermissionDecision;
use crate::tool::{ErrorKind, Invocation, Tool, ToolOutput};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

pub struct Execution {
    pub execution_id: String,
    pub tool_name: String,
    pub params: Value,
    pub started_at: DateTime<Utc>,
    pub(crate) begun: Instant,
    /// Policy snapshot for this call; hot reloads never affect it.
    pub(crate) config: Arc<PermissionConfig>,

    // Stage slots, filled in order.
    pub tool: Option<Arc<dyn Tool>>,
    pub invocation: Option<Arc<dyn Invocation>>,
    pub signature: Option<String>,
    pub decision: Option<PermissionDecision>,
    pub needs_confirmation: bool,
    pub confirmation_reason: Option<String>,

    /// Context strings injected by pre-hooks.
    pub notes: Vec<String>,
    /// Warnings accumulated by hooks and the confirmation stage.
    pub warnings: Vec<String>,

    /// True once the execution stage actually ran the invocation; gates
    /// the post-hook stage.
    pub(crate) executed: bool,
    pub aborted: bool,
    pub result: Option<ToolOutput>,
}

impl Execution {
    #[must_use]
    pub fn new(tool_name: &str, params: Value, config: Arc<PermissionConfig>) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            tool_name: tool_name.to_string(),
            params,
            started_at: Utc::now(),
            begun: Instant::now(),
            config,
            tool: None,
            invocation: None,
            signature: None,
            decision: None,
            needs_confirmation: false,
            confirmation_reason: None,
            notes: Vec::new(),
            warnings: Vec::new(),
            executed: false,
            aborted: false,
            result: None,
        }
    }

    /// Stop the walk with a failure envelope.
    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.aborted = true;
        self.result = Some(ToolOutput::failure(kind, message));
    }

    pub fn fail_with(&mut self, output: ToolOutput) {
        self.aborted = true;
        self.result = Some(output);
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.result.is_some()
    }

    /// Elapsed wall-clock time since pipeline entry, in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        u64::try_from(self.begun.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
