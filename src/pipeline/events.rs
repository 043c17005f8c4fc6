use tokio::sync::mpsc;

/// Observable lifecycle notifications. Emission is fire-and-forget and
/// never suspends the pipeline; correctness does not depend on a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    ExecutionStarted {
        execution_id: String,
        tool_name: String,
    },
    StageStarted {
        execution_id: String,
        stage: String,
    },
    StageCompleted {
        execution_id: String,
        stage: String,
    },
    ExecutionCompleted {
        execution_id: String,
        duration_ms: u64,
    },
    ExecutionFailed {
        execution_id: String,
        duration_ms: u64,
        error: String,
    },
    HistoryCleared,
}

pub type EventSender = mpsc::UnboundedSender<PipelineEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<PipelineEvent>;

pub(crate) fn emit(sender: Option<&EventSender>, event: PipelineEvent) {
    if let Some(sender) = sender {
        let _ = sender.send(event);
    }
}
