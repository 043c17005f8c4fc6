//! The seven stages of the execution pipeline.
//!
//! Each stage observes the `Execution`, may fill its stage slots, and may
//! set a result, which stops the walk. Stages are trait objects so hosts
//! can splice their own between the built-in ones.

use crate::hook::{HookEvent, HookStage};
use crate::permission::{self, PermissionRequest, Verdict};
use crate::pipeline::StageServices;
use crate::pipeline::execution::Execution;
use crate::tool::{
    ApprovalScope, ConfirmationRequest, ErrorKind, ExecutionContext, ToolOutput,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::warn;

pub const STAGE_DISCOVERY: &str = "discovery";
pub const STAGE_PERMISSION: &str = "permission";
pub const STAGE_PRE_HOOKS: &str = "pre_hooks";
pub const STAGE_CONFIRMATION: &str = "confirmation";
pub const STAGE_EXECUTION: &str = "execution";
pub const STAGE_POST_HOOKS: &str = "post_hooks";
pub const STAGE_FORMAT: &str = "format";

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, exec: &mut Execution, services: &StageServices, ctx: &ExecutionContext);
}

pub(crate) fn default_stages() -> Vec<Arc<dyn Stage>> {
    vec![
        Arc::new(DiscoveryStage),
        Arc::new(PermissionStage),
        Arc::new(PreHookStage),
        Arc::new(ConfirmationStage),
        Arc::new(ExecutionStage),
        Arc::new(PostHookStage),
        Arc::new(FormatStage),
    ]
}

/// Look the tool up in the registry.
pub struct DiscoveryStage;

#[async_trait]
impl Stage for DiscoveryStage {
    fn name(&self) -> &str {
        STAGE_DISCOVERY
    }

    async fn run(&self, exec: &mut Execution, services: &StageServices, _ctx: &ExecutionContext) {
        match services.registry.get(&exec.tool_name) {
            Some(tool) => exec.tool = Some(tool),
            None => exec.fail(
                ErrorKind::ToolNotFound,
                format!("Tool not found: {}", exec.tool_name),
            ),
        }
    }
}

/// Validate parameters into an invocation and evaluate policy.
pub struct PermissionStage;

#[async_trait]
impl Stage for PermissionStage {
    fn name(&self) -> &str {
        STAGE_PERMISSION
    }

    async fn run(&self, exec: &mut Execution, services: &StageServices, ctx: &ExecutionContext) {
        let Some(tool) = exec.tool.clone() else {
            exec.fail(ErrorKind::ExecutionError, "discovery stage did not run");
            return;
        };

        let invocation = match tool.build(exec.params.clone()) {
            Ok(invocation) => invocation,
            Err(err) => {
                let details = serde_json::to_value(&err).unwrap_or(Value::Null);
                exec.fail_with(
                    ToolOutput::failure(ErrorKind::ValidationError, err.to_string())
                        .with_details(details),
                );
                return;
            }
        };

        let affected_paths = invocation.affected_paths();
        exec.invocation = Some(invocation);

        let signature = format!("{}:{}", tool.name(), tool.signature_content(&exec.params));
        exec.signature = Some(signature.clone());

        let decision = permission::evaluate(
            &PermissionRequest {
                tool_name: tool.name(),
                kind: tool.kind(),
                signature: &signature,
                affected_paths: &affected_paths,
            },
            &exec.config,
            &services.approvals,
            ctx.mode,
        );

        match decision.verdict {
            Verdict::Deny => {
                let mut output = ToolOutput::failure(
                    ErrorKind::PermissionDenied,
                    format!("Permission denied: {}", decision.reason),
                )
                .with_details(json!({
                    "matchedRule": decision.matched_rule,
                    "reason": decision.reason,
                }));
                if let Some(rule) = &decision.matched_rule {
                    output = output.with_metadata("matched_rule", rule.clone());
                }
                exec.decision = Some(decision);
                exec.fail_with(output);
            }
            Verdict::Allow => {
                exec.decision = Some(decision);
            }
            Verdict::Ask => {
                exec.needs_confirmation = true;
                exec.confirmation_reason = Some(decision.reason.clone());
                exec.decision = Some(decision);
            }
        }
    }
}

fn hook_event(exec: &Execution, result: Option<ToolOutput>) -> HookEvent {
    HookEvent {
        tool_name: exec.tool_name.clone(),
        params: exec.params.clone(),
        affected_paths: exec
            .invocation
            .as_ref()
            .map(|invocation| invocation.affected_paths())
            .unwrap_or_default(),
        result,
    }
}

/// Fire the pre-tool hook group. A blocking hook stops the call with
/// an error the model can react to.
pub struct PreHookStage;

#[async_trait]
impl Stage for PreHookStage {
    fn name(&self) -> &str {
        STAGE_PRE_HOOKS
    }

    async fn run(&self, exec: &mut Execution, services: &StageServices, ctx: &ExecutionContext) {
        if services.hooks.is_empty() {
            return;
        }
        let event = hook_event(exec, None);
        let outcome = services
            .hooks
            .run(HookStage::PreToolUse, &event, &ctx.cancel_token)
            .await;

        exec.warnings.extend(outcome.warnings);
        exec.notes.extend(outcome.injected);

        if let Some((hook, message)) = outcome.block {
            exec.fail_with(
                ToolOutput::failure(
                    ErrorKind::HookBlock,
                    format!("Blocked by hook '{hook}': {message}"),
                )
                .with_details(json!({"hook": hook, "message": message})),
            );
        }
    }
}

/// Ask the user when the permission check said Ask.
pub struct ConfirmationStage;

#[async_trait]
impl Stage for ConfirmationStage {
    fn name(&self) -> &str {
        STAGE_CONFIRMATION
    }

    async fn run(&self, exec: &mut Execution, services: &StageServices, ctx: &ExecutionContext) {
        if !exec.needs_confirmation {
            return;
        }
        let (Some(tool), Some(invocation), Some(signature)) =
            (exec.tool.clone(), exec.invocation.clone(), exec.signature.clone())
        else {
            exec.fail(ErrorKind::ExecutionError, "permission stage did not run");
            return;
        };

        // Headless operation: no handler means auto-approve with a visible
        // warning. Deployments that want hard gating must supply a handler.
        let Some(handler) = ctx.confirmation.as_ref() else {
            exec.warnings
                .push("confirmation auto-approved: no confirmation handler registered".to_string());
            return;
        };

        let mut message = invocation.describe();
        if let Some(reason) = &exec.confirmation_reason {
            message.push_str(&format!(" ({reason})"));
        }
        let response = handler
            .request_confirmation(ConfirmationRequest {
                title: format!("Allow {}?", tool.display_name()),
                message,
                risks: invocation.risks(),
                affected_paths: invocation.affected_paths(),
            })
            .await;

        if !response.approved {
            let reason = response
                .reason
                .unwrap_or_else(|| "User rejected the operation".to_string());
            exec.fail_with(
                ToolOutput::failure(ErrorKind::UserRejected, reason.clone())
                    .with_details(json!({"reason": reason})),
            );
            return;
        }

        match response.scope {
            ApprovalScope::Once => {}
            ApprovalScope::Session => services.approvals.remember(&signature),
            ApprovalScope::Persistent => {
                services.approvals.remember(&signature);
                if let Some(persister) = &services.persister {
                    let rule =
                        format!("{}:{}", tool.name(), tool.permission_pattern(&exec.params));
                    if let Err(err) = persister.append_allow_rule(&rule) {
                        warn!("Failed to persist allow rule '{rule}': {err}");
                    }
                }
            }
        }
    }
}

/// Run the invocation in its own task so panics and cancellation
/// never escape the pipeline.
pub struct ExecutionStage;

#[async_trait]
impl Stage for ExecutionStage {
    fn name(&self) -> &str {
        STAGE_EXECUTION
    }

    async fn run(&self, exec: &mut Execution, _services: &StageServices, ctx: &ExecutionContext) {
        let Some(invocation) = exec.invocation.clone() else {
            exec.fail(ErrorKind::ExecutionError, "no invocation to execute");
            return;
        };

        let cancel = ctx.cancel_token.clone();
        let progress = ctx.progress.clone();
        let mut handle =
            tokio::spawn(async move { invocation.execute(cancel, progress).await });

        let output = tokio::select! {
            () = ctx.cancel_token.cancelled() => {
                handle.abort();
                exec.fail(ErrorKind::Cancelled, "Cancelled during execution");
                return;
            }
            joined = &mut handle => match joined {
                Ok(output) => output,
                Err(err) if err.is_panic() => {
                    let panic = err.into_panic();
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "tool panicked".to_string());
                    exec.executed = true;
                    exec.fail(ErrorKind::ExecutionError, format!("Tool panicked: {message}"));
                    return;
                }
                Err(_) => {
                    exec.fail(ErrorKind::Cancelled, "Tool task cancelled");
                    return;
                }
            }
        };

        // A cancelled invocation skips the post hooks; everything else,
        // success or failure, reaches them.
        exec.executed = !output.is_cancelled();
        exec.result = Some(output);
    }
}

/// Fire the post-tool hook group matching the result's polarity.
/// Runs on failure too, so failure hooks can enrich the error.
pub struct PostHookStage;

#[async_trait]
impl Stage for PostHookStage {
    fn name(&self) -> &str {
        STAGE_POST_HOOKS
    }

    async fn run(&self, exec: &mut Execution, services: &StageServices, ctx: &ExecutionContext) {
        if services.hooks.is_empty() {
            return;
        }
        let Some(result) = exec.result.clone() else {
            return;
        };
        let stage = if result.success {
            HookStage::PostToolUseSuccess
        } else {
            HookStage::PostToolUseFailure
        };
        let event = hook_event(exec, Some(result));
        let outcome = services.hooks.run(stage, &event, &ctx.cancel_token).await;

        exec.warnings.extend(outcome.warnings);
        if outcome.injected.is_empty() {
            return;
        }
        if let Some(result) = exec.result.as_mut() {
            for text in outcome.injected {
                match &mut result.llm_content {
                    Value::String(content) => {
                        content.push_str("\n\n");
                        content.push_str(&text);
                    }
                    _ => {
                        let extra = result
                            .metadata
                            .entry("additional_context".to_string())
                            .or_insert_with(|| Value::Array(Vec::new()));
                        if let Value::Array(items) = extra {
                            items.push(Value::String(text));
                        }
                    }
                }
            }
        }
    }
}

/// Guarantee envelope completeness and stamp call metadata.
pub struct FormatStage;

#[async_trait]
impl Stage for FormatStage {
    fn name(&self) -> &str {
        STAGE_FORMAT
    }

    async fn run(&self, exec: &mut Execution, _services: &StageServices, _ctx: &ExecutionContext) {
        let mut output = exec.result.take().unwrap_or_else(|| {
            ToolOutput::success(format!("{} completed", exec.tool_name))
        });

        let llm_is_empty = match &output.llm_content {
            Value::Null => true,
            Value::String(content) => content.is_empty(),
            _ => false,
        };
        if llm_is_empty {
            output.llm_content = if !output.display_content.is_empty() {
                Value::String(output.display_content.clone())
            } else if output.success {
                Value::String(format!("{} completed successfully", exec.tool_name))
            } else {
                Value::String(format!("{} failed", exec.tool_name))
            };
        }
        if output.display_content.is_empty() {
            output.display_content = match &output.llm_content {
                Value::String(content) => content.clone(),
                other => other.to_string(),
            };
        }

        output
            .metadata
            .insert("execution_id".to_string(), json!(exec.execution_id));
        output
            .metadata
            .insert("tool_name".to_string(), json!(exec.tool_name));
        output
            .metadata
            .insert("timestamp".to_string(), json!(chrono::Utc::now().to_rfc3339()));
        output
            .metadata
            .insert("duration_ms".to_string(), json!(exec.duration_ms()));
        if let Some(decision) = &exec.decision {
            output.metadata.insert(
                "permission".to_string(),
                json!({
                    "reason": decision.reason,
                    "matchedRule": decision.matched_rule,
                }),
            );
        }
        if !exec.warnings.is_empty() {
            output
                .metadata
                .insert("warnings".to_string(), json!(exec.warnings));
        }
        if !exec.notes.is_empty() {
            output
                .metadata
                .insert("hook_context".to_string(), json!(exec.notes));
        }

        exec.result = Some(output);
    }
}
