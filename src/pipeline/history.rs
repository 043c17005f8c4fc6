//! Execution history with bounded memory usage.
//!
//! Keeps a ring buffer of completed calls plus running aggregates so
//! `stats()` stays cheap regardless of how much history has been evicted.

use crate::tool::{ErrorKind, ToolOutput};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

pub const DEFAULT_HISTORY_CAP: usize = 256;

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub execution_id: String,
    pub tool_name: String,
    pub params: Value,
    pub result: ToolOutput,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Aggregate view over everything ever recorded, evicted entries included.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionStats {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    /// Cancelled calls are tracked separately, not as failures.
    pub cancelled: u64,
    pub avg_duration_ms: f64,
    pub per_tool_counts: HashMap<String, u64>,
}

#[derive(Debug)]
pub struct ExecutionHistory {
    entries: VecDeque<HistoryEntry>,
    cap: usize,
    total: u64,
    success: u64,
    failure: u64,
    cancelled: u64,
    total_duration_ms: u64,
    per_tool: HashMap<String, u64>,
}

impl Default for ExecutionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP)
    }
}

impl ExecutionHistory {
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(cap.min(64)),
            cap,
            total: 0,
            success: 0,
            failure: 0,
            cancelled: 0,
            total_duration_ms: 0,
            per_tool: HashMap::new(),
        }
    }

    pub fn record(&mut self, entry: HistoryEntry) {
        self.total += 1;
        if entry.result.success {
            self.success += 1;
        } else if entry.result.error_kind() == Some(ErrorKind::Cancelled) {
            self.cancelled += 1;
        } else {
            self.failure += 1;
        }
        let duration = entry
            .ended_at
            .signed_duration_since(entry.started_at)
            .num_milliseconds()
            .max(0) as u64;
        self.total_duration_ms += duration;
        *self.per_tool.entry(entry.tool_name.clone()).or_insert(0) += 1;

        self.entries.push_back(entry);
        if self.entries.len() > self.cap {
            self.entries.pop_front();
        }
    }

    /// Most recent entries, newest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> ExecutionStats {
        let avg_duration_ms = if self.total == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.total as f64
        };
        ExecutionStats {
            total: self.total,
            success: self.success,
            failure: self.failure,
            cancelled: self.cancelled,
            avg_duration_ms,
            per_tool_counts: self.per_tool.clone(),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total = 0;
        self.success = 0;
        self.failure = 0;
        self.cancelled = 0;
        self.total_duration_ms = 0;
        self.per_tool.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolOutput;
    use chrono::TimeDelta;

    fn entry(tool: &str, result: ToolOutput, duration_ms: i64) -> HistoryEntry {
        let started_at = Utc::now();
        HistoryEntry {
            execution_id: format!("exec-{tool}"),
            tool_name: tool.to_string(),
            params: serde_json::json!({}),
            result,
            started_at,
            ended_at: started_at + TimeDelta::milliseconds(duration_ms),
        }
    }

    #[test]
    fn test_history_is_bounded_but_stats_are_not() {
        let mut history = ExecutionHistory::new(5);
        for _ in 0..10 {
            history.record(entry("read", ToolOutput::success("ok"), 100));
        }
        assert_eq!(history.len(), 5);
        let stats = history.stats();
        assert_eq!(stats.total, 10);
        assert_eq!(stats.success, 10);
        assert_eq!(stats.per_tool_counts["read"], 10);
    }

    #[test]
    fn test_cancelled_is_not_a_failure() {
        let mut history = ExecutionHistory::new(10);
        history.record(entry("shell", ToolOutput::success("ok"), 50));
        history.record(entry(
            "shell",
            ToolOutput::failure(ErrorKind::ExecutionError, "boom"),
            50,
        ));
        history.record(entry(
            "shell",
            ToolOutput::failure(ErrorKind::Cancelled, "cancelled"),
            50,
        ));

        let stats = history.stats();
        assert_eq!(stats.success, 1);
        assert_eq!(stats.failure, 1);
        assert_eq!(stats.cancelled, 1);
    }

    #[test]
    fn test_avg_duration() {
        let mut history = ExecutionHistory::new(10);
        history.record(entry("read", ToolOutput::success("ok"), 100));
        history.record(entry("read", ToolOutput::success("ok"), 300));
        assert!((history.stats().avg_duration_ms - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_recent_is_newest_first() {
        let mut history = ExecutionHistory::new(10);
        history.record(entry("first", ToolOutput::success("ok"), 10));
        history.record(entry("second", ToolOutput::success("ok"), 10));
        let recent = history.recent(1);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].tool_name, "second");
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut history = ExecutionHistory::new(10);
        history.record(entry("read", ToolOutput::success("ok"), 10));
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.stats(), ExecutionStats::default());
    }
}
