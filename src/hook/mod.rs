//! Hook system for extensible behavior at the pipeline's fire-points.
//!
//! The pipeline knows three fire-points (pre-tool, post-tool-success,
//! post-tool-failure) and a uniform reply shape. Hooks receive an immutable
//! event snapshot plus a cancel token; their effect on the call is bounded
//! to blocking it (pre only), injecting context, and recording warnings.
//! A hook failure never surfaces as the call's failure.

use crate::tool::ToolOutput;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Fire-points in the execution pipeline where hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    /// Before the tool executes. May block the call.
    PreToolUse,
    /// After the tool returned a success envelope.
    PostToolUseSuccess,
    /// After the tool returned a failure envelope.
    PostToolUseFailure,
}

/// Immutable snapshot handed to hooks.
#[derive(Debug, Clone)]
pub struct HookEvent {
    pub tool_name: String,
    pub params: Value,
    pub affected_paths: Vec<PathBuf>,
    /// The current result, present for post-stages only.
    pub result: Option<ToolOutput>,
}

/// What a hook wants to happen next.
#[derive(Debug, Clone, Default)]
pub enum HookDecision {
    #[default]
    Continue,
    /// Stop the call with a message the model can react to (pre-stage only).
    Block { message: String },
    /// Append a string to the invocation's runtime notes.
    InjectContext { text: String },
}

#[derive(Debug, Clone, Default)]
pub struct HookReply {
    pub decision: HookDecision,
    pub warning: Option<String>,
}

impl HookReply {
    #[must_use]
    pub fn proceed() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn block(message: impl Into<String>) -> Self {
        Self {
            decision: HookDecision::Block {
                message: message.into(),
            },
            warning: None,
        }
    }

    #[must_use]
    pub fn inject(text: impl Into<String>) -> Self {
        Self {
            decision: HookDecision::InjectContext { text: text.into() },
            warning: None,
        }
    }

    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }
}

/// Trait for implementing hooks.
#[async_trait]
pub trait Hook: Send + Sync {
    /// The fire-point this hook responds to.
    fn stage(&self) -> HookStage;

    async fn run(&self, event: &HookEvent, cancel: &CancellationToken)
    -> anyhow::Result<HookReply>;

    /// Name for logging and block attribution.
    fn name(&self) -> &str {
        "unnamed_hook"
    }
}

/// Collected effects of one fire-point run.
#[derive(Debug, Default)]
pub struct HookStageOutcome {
    /// Set when a pre-stage hook blocked the call: (hook name, message).
    pub block: Option<(String, String)>,
    pub injected: Vec<String>,
    pub warnings: Vec<String>,
}

const DEFAULT_GROUP_DEADLINE: Duration = Duration::from_secs(30);

/// Runs registered hooks serially, in registration order, within a
/// per-group deadline.
pub struct HookManager {
    hooks: Vec<Arc<dyn Hook>>,
    group_deadline: Duration,
}

impl Default for HookManager {
    fn default() -> Self {
        Self::new()
    }
}

impl HookManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            hooks: Vec::new(),
            group_deadline: DEFAULT_GROUP_DEADLINE,
        }
    }

    #[must_use]
    pub fn with_group_deadline(mut self, deadline: Duration) -> Self {
        self.group_deadline = deadline;
        self
    }

    pub fn register(&mut self, hook: Arc<dyn Hook>) {
        self.hooks.push(hook);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run all hooks registered for `stage`.
    ///
    /// Hook errors and deadline overruns are logged and treated as
    /// Continue. Cancellation stops the remaining hooks without effect.
    /// `Block` from a post-stage hook is demoted to a warning; post hooks
    /// cannot change the call's polarity.
    pub async fn run(
        &self,
        stage: HookStage,
        event: &HookEvent,
        cancel: &CancellationToken,
    ) -> HookStageOutcome {
        let mut outcome = HookStageOutcome::default();
        let deadline = Instant::now() + self.group_deadline;

        for hook in self.hooks.iter().filter(|h| h.stage() == stage) {
            if cancel.is_cancelled() {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(
                    "Hook group deadline exceeded at '{}'; skipping remaining hooks",
                    hook.name()
                );
                break;
            }

            let reply = match tokio::time::timeout(remaining, hook.run(event, cancel)).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(err)) => {
                    warn!("Hook '{}' failed: {err}; continuing", hook.name());
                    continue;
                }
                Err(_) => {
                    warn!("Hook '{}' timed out; skipping remaining hooks", hook.name());
                    break;
                }
            };

            if let Some(warning) = reply.warning {
                outcome.warnings.push(warning);
            }
            match reply.decision {
                HookDecision::Continue => {}
                HookDecision::InjectContext { text } => outcome.injected.push(text),
                HookDecision::Block { message } => {
                    if stage == HookStage::PreToolUse {
                        outcome.block = Some((hook.name().to_string(), message));
                        break;
                    }
                    warn!(
                        "Hook '{}' attempted to block in a post stage; recorded as warning",
                        hook.name()
                    );
                    outcome.warnings.push(message);
                }
            }
        }

        outcome
    }
}
