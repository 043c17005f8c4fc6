//! The execution pipeline: a seven-stage state machine per tool call.
//!
//! Each call walks Discovery → Permission → Pre-hooks → Confirmation →
//! Execution → Post-hooks → Formatting. The walk stops at the first stage
//! that sets a result; post-hooks still run after an execution failure so
//! failure hooks can enrich the error, and formatting always runs so every
//! returned envelope is complete. Calls against the same path by tools
//! that are not concurrency-safe are serialized by the file lock
//! coordinator; everything else runs in parallel.

pub mod events;
pub mod execution;
pub mod history;
pub mod stages;

pub use events::{EventReceiver, EventSender, PipelineEvent};
pub use execution::Execution;
pub use history::{ExecutionStats, HistoryEntry};
pub use stages::Stage;

use crate::config::{PermissionConfig, RulePersister};
use crate::hook::HookManager;
use crate::lock::{FileLockCoordinator, FileLockGuard};
use crate::permission::SessionApprovals;
use crate::pipeline::events::emit;
use crate::pipeline::history::ExecutionHistory;
use crate::tool::{ErrorKind, ExecutionContext, ToolOutput, ToolRegistry};
use chrono::Utc;
use serde_json::Value;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use tokio::sync::Semaphore;

/// One entry in a batch submission.
#[derive(Debug)]
pub struct ToolRequest {
    pub tool_name: String,
    pub params: Value,
    pub context: ExecutionContext,
}

/// Shared collaborators the stages draw on. Owned by the pipeline; the
/// host constructs exactly one pipeline, which gives the lock coordinator
/// and session approvals their process-wide semantics.
pub struct StageServices {
    pub(crate) registry: ToolRegistry,
    pub(crate) config: StdRwLock<Arc<PermissionConfig>>,
    pub(crate) approvals: SessionApprovals,
    pub(crate) hooks: HookManager,
    pub(crate) locks: FileLockCoordinator,
    pub(crate) history: StdMutex<ExecutionHistory>,
    pub(crate) persister: Option<Arc<dyn RulePersister>>,
    pub(crate) events: Option<EventSender>,
}

pub struct ExecutionPipeline {
    services: StageServices,
    stages: StdRwLock<Vec<Arc<dyn Stage>>>,
}

impl ExecutionPipeline {
    #[must_use]
    pub fn new(registry: ToolRegistry, config: PermissionConfig) -> Self {
        Self {
            services: StageServices {
                registry,
                config: StdRwLock::new(Arc::new(config)),
                approvals: SessionApprovals::new(),
                hooks: HookManager::new(),
                locks: FileLockCoordinator::new(),
                history: StdMutex::new(ExecutionHistory::default()),
                persister: None,
                events: None,
            },
            stages: StdRwLock::new(stages::default_stages()),
        }
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: HookManager) -> Self {
        self.services.hooks = hooks;
        self
    }

    #[must_use]
    pub fn with_persister(mut self, persister: Arc<dyn RulePersister>) -> Self {
        self.services.persister = Some(persister);
        self
    }

    #[must_use]
    pub fn with_history_cap(mut self, cap: usize) -> Self {
        self.services.history = StdMutex::new(ExecutionHistory::new(cap));
        self
    }

    #[must_use]
    pub fn with_event_sender(mut self, sender: EventSender) -> Self {
        self.services.events = Some(sender);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.services.registry
    }

    #[must_use]
    pub fn approvals(&self) -> &SessionApprovals {
        &self.services.approvals
    }

    /// Re-bind the policy snapshot. In-flight calls keep the snapshot they
    /// started with; history is preserved.
    pub fn reload_config(&self, config: PermissionConfig) {
        *self
            .services
            .config
            .write()
            .expect("config lock poisoned") = Arc::new(config);
    }

    /// Splice a custom stage into the walk at `position`. Without a
    /// position the stage is appended after formatting, where it is
    /// skipped once an earlier stage has set a result.
    pub fn add_stage(&self, stage: Arc<dyn Stage>, position: Option<usize>) {
        let mut stages = self.stages.write().expect("stage list lock poisoned");
        match position {
            Some(position) if position <= stages.len() => stages.insert(position, stage),
            _ => stages.push(stage),
        }
    }

    pub fn remove_stage(&self, name: &str) -> bool {
        let mut stages = self.stages.write().expect("stage list lock poisoned");
        let before = stages.len();
        stages.retain(|stage| stage.name() != name);
        stages.len() != before
    }

    /// Run one tool call through the pipeline. Never returns an error;
    /// every failure mode is a failure envelope.
    pub async fn execute(
        &self,
        tool_name: &str,
        params: Value,
        ctx: ExecutionContext,
    ) -> ToolOutput {
        let config = self
            .services
            .config
            .read()
            .expect("config lock poisoned")
            .clone();
        let mut exec = Execution::new(tool_name, params, config);
        let stage_list = self
            .stages
            .read()
            .expect("stage list lock poisoned")
            .clone();

        emit(
            self.services.events.as_ref(),
            PipelineEvent::ExecutionStarted {
                execution_id: exec.execution_id.clone(),
                tool_name: exec.tool_name.clone(),
            },
        );

        let mut lock_guard: Option<FileLockGuard> = None;
        for stage in &stage_list {
            // Cancellation boundary: a pending cancel beats the next stage.
            if !exec.is_finished() && ctx.cancel_token.is_cancelled() {
                exec.fail(ErrorKind::Cancelled, "Cancelled");
            }

            let run_it = match stage.name() {
                stages::STAGE_POST_HOOKS => exec.executed,
                stages::STAGE_FORMAT => true,
                _ => !exec.is_finished(),
            };
            if !run_it {
                continue;
            }

            emit(
                self.services.events.as_ref(),
                PipelineEvent::StageStarted {
                    execution_id: exec.execution_id.clone(),
                    stage: stage.name().to_string(),
                },
            );
            stage.run(&mut exec, &self.services, &ctx).await;
            emit(
                self.services.events.as_ref(),
                PipelineEvent::StageCompleted {
                    execution_id: exec.execution_id.clone(),
                    stage: stage.name().to_string(),
                },
            );

            // Engage the file lock as soon as the validated primary path is
            // known; it is held for the remainder of the walk.
            if lock_guard.is_none() && !exec.is_finished() {
                if let (Some(tool), Some(invocation)) = (&exec.tool, &exec.invocation) {
                    if !tool.is_concurrency_safe() {
                        if let Some(path) = invocation.affected_paths().into_iter().next() {
                            let acquired = tokio::select! {
                                () = ctx.cancel_token.cancelled() => None,
                                guard = self.services.locks.acquire(&path) => Some(guard),
                            };
                            match acquired {
                                Some(guard) => lock_guard = Some(guard),
                                None => exec.fail(
                                    ErrorKind::Cancelled,
                                    "Cancelled while waiting for file lock",
                                ),
                            }
                        }
                    }
                }
            }
        }
        drop(lock_guard);

        let output = exec.result.take().unwrap_or_else(|| {
            ToolOutput::failure(
                ErrorKind::ExecutionError,
                format!("{tool_name} produced no result"),
            )
        });

        self.services
            .history
            .lock()
            .expect("history lock poisoned")
            .record(HistoryEntry {
                execution_id: exec.execution_id.clone(),
                tool_name: exec.tool_name.clone(),
                params: exec.params.clone(),
                result: output.clone(),
                started_at: exec.started_at,
                ended_at: Utc::now(),
            });

        let duration_ms = exec.duration_ms();
        if output.success {
            emit(
                self.services.events.as_ref(),
                PipelineEvent::ExecutionCompleted {
                    execution_id: exec.execution_id.clone(),
                    duration_ms,
                },
            );
        } else {
            emit(
                self.services.events.as_ref(),
                PipelineEvent::ExecutionFailed {
                    execution_id: exec.execution_id.clone(),
                    duration_ms,
                    error: output
                        .error
                        .as_ref()
                        .map(|e| e.message.clone())
                        .unwrap_or_default(),
                },
            );
        }

        output
    }

    /// Run every request concurrently with no bound.
    pub async fn execute_all(&self, requests: Vec<ToolRequest>) -> Vec<ToolOutput> {
        futures::future::join_all(
            requests
                .into_iter()
                .map(|request| self.execute_request(request)),
        )
        .await
    }

    /// Run the requests through a bounded pool.
    pub async fn execute_parallel(
        &self,
        requests: Vec<ToolRequest>,
        max_concurrency: usize,
    ) -> Vec<ToolOutput> {
        let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
        futures::future::join_all(requests.into_iter().map(|request| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("execution semaphore closed");
                self.execute_request(request).await
            }
        }))
        .await
    }

    async fn execute_request(&self, request: ToolRequest) -> ToolOutput {
        self.execute(&request.tool_name, request.params, request.context)
            .await
    }

    /// Most recent history entries, newest first.
    #[must_use]
    pub fn history(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        let history = self.services.history.lock().expect("history lock poisoned");
        history.recent(limit.unwrap_or(usize::MAX))
    }

    #[must_use]
    pub fn stats(&self) -> ExecutionStats {
        self.services
            .history
            .lock()
            .expect("history lock poisoned")
            .stats()
    }

    pub fn clear_history(&self) {
        self.services
            .history
            .lock()
            .expect("history lock poisoned")
            .clear();
        emit(self.services.events.as_ref(), PipelineEvent::HistoryCleared);
    }

    /// Drop idle file-lock entries.
    pub fn evict_idle_locks(&self) {
        self.services.locks.evict_idle();
    }
}
