//! Rule-based permission evaluation for tool calls.
//!
//! The evaluator is a pure function of the call descriptor, the config
//! snapshot, the session-approval set, and the active permission mode.
//! Deny rules always win; mode overrides apply after the allow list and
//! never override a deny.

pub mod pattern;

use crate::config::PermissionConfig;
use crate::tool::{PermissionMode, ToolKind};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

/// Synthetic rule id reported when session memory produced the allow.
pub const REMEMBERED_SESSION: &str = "remembered:session";

/// Outcome of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Ask,
    Deny,
}

#[derive(Debug, Clone)]
pub struct PermissionDecision {
    pub verdict: Verdict,
    /// The rule (or synthetic id) that produced the verdict, if any.
    pub matched_rule: Option<String>,
    pub reason: String,
}

impl PermissionDecision {
    fn allow(matched_rule: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Allow,
            matched_rule: matched_rule.map(str::to_string),
            reason: reason.into(),
        }
    }

    fn ask(matched_rule: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Ask,
            matched_rule: matched_rule.map(str::to_string),
            reason: reason.into(),
        }
    }

    fn deny(matched_rule: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Deny,
            matched_rule: matched_rule.map(str::to_string),
            reason: reason.into(),
        }
    }
}

/// Descriptor for the call being checked.
#[derive(Debug)]
pub struct PermissionRequest<'a> {
    pub tool_name: &'a str,
    pub kind: ToolKind,
    pub signature: &'a str,
    pub affected_paths: &'a [PathBuf],
}

/// Signatures approved for the current session. Lives only in memory;
/// writes are rare (Session-scoped confirmations only).
#[derive(Debug, Default)]
pub struct SessionApprovals {
    inner: Mutex<HashSet<String>>,
}

impl SessionApprovals {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&self, signature: &str) {
        self.inner
            .lock()
            .expect("session approvals lock poisoned")
            .insert(signature.to_string());
    }

    #[must_use]
    pub fn contains(&self, signature: &str) -> bool {
        self.inner
            .lock()
            .expect("session approvals lock poisoned")
            .contains(signature)
    }

    pub fn clear(&self) {
        self.inner
            .lock()
            .expect("session approvals lock poisoned")
            .clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("session approvals lock poisoned")
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Directories no tool call may touch, regardless of rules.
const CRITICAL_PREFIXES: &[&str] = &["/etc", "/sys", "/proc", "/dev", "/boot", "/System"];

/// Resolve `.` and `..` components lexically, without touching the
/// filesystem. A `..` that would climb above the root is kept, which the
/// guard then rejects.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                // "/.." is "/".
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Reason a path is refused, or `None` when all paths are acceptable.
#[must_use]
pub fn dangerous_path(paths: &[PathBuf]) -> Option<String> {
    for path in paths {
        let normalized = normalize_path(path);
        if normalized
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Some(format!(
                "path '{}' escapes its base directory",
                path.display()
            ));
        }
        if normalized == Path::new("/") {
            return Some("operation targets the filesystem root".to_string());
        }
        let lossy = normalized.to_string_lossy();
        if CRITICAL_PREFIXES
            .iter()
            .any(|prefix| normalized.starts_with(prefix))
            || lossy.to_ascii_lowercase().contains("system32")
        {
            return Some(format!(
                "path '{}' is under an OS-critical directory",
                path.display()
            ));
        }
    }
    None
}

/// Classify a call as Allow / Ask / Deny.
///
/// Evaluation order: dangerous-path guard, deny rules, allow rules,
/// session memory, mode override, ask rules, default Ask. A matched allow
/// rule is honored in every mode, Plan included; Plan only biases the
/// default for non-read tools toward Ask.
#[must_use]
pub fn evaluate(
    request: &PermissionRequest<'_>,
    config: &PermissionConfig,
    approvals: &SessionApprovals,
    mode: PermissionMode,
) -> PermissionDecision {
    if let Some(reason) = dangerous_path(request.affected_paths) {
        return PermissionDecision::deny(None, reason);
    }

    if let Some(rule) = pattern::first_match(&config.deny, request.signature) {
        return PermissionDecision::deny(Some(rule), format!("denied by rule '{rule}'"));
    }

    if let Some(rule) = pattern::first_match(&config.allow, request.signature) {
        return PermissionDecision::allow(Some(rule), format!("allowed by rule '{rule}'"));
    }

    if approvals.contains(request.signature) {
        return PermissionDecision::allow(
            Some(REMEMBERED_SESSION),
            "approved earlier this session",
        );
    }

    match mode {
        PermissionMode::Yolo => {
            return PermissionDecision::allow(None, "mode:yolo");
        }
        PermissionMode::Default if request.kind.is_read_only() => {
            return PermissionDecision::allow(None, "mode:default:readonly");
        }
        PermissionMode::AutoEdit if request.kind.is_read_only() => {
            return PermissionDecision::allow(None, "mode:default:readonly");
        }
        PermissionMode::AutoEdit if request.kind == ToolKind::Edit => {
            return PermissionDecision::allow(None, "mode:autoEdit:edit");
        }
        PermissionMode::Plan if request.kind.is_read_only() => {
            return PermissionDecision::allow(None, "mode:plan:readonly");
        }
        _ => {}
    }

    if let Some(rule) = pattern::first_match(&config.ask, request.signature) {
        return PermissionDecision::ask(Some(rule), format!("rule '{rule}' requires confirmation"));
    }

    PermissionDecision::ask(None, "no rule matched; confirmation required")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(allow: &[&str], ask: &[&str], deny: &[&str]) -> PermissionConfig {
        PermissionConfig {
            allow: allow.iter().map(|s| (*s).to_string()).collect(),
            ask: ask.iter().map(|s| (*s).to_string()).collect(),
            deny: deny.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    fn request<'a>(
        tool_name: &'a str,
        kind: ToolKind,
        signature: &'a str,
        paths: &'a [PathBuf],
    ) -> PermissionRequest<'a> {
        PermissionRequest {
            tool_name,
            kind,
            signature,
            affected_paths: paths,
        }
    }

    #[test]
    fn test_deny_beats_allow() {
        let cfg = config(&["write:/tmp/**"], &[], &["write:/tmp/secrets/**"]);
        let approvals = SessionApprovals::new();
        let decision = evaluate(
            &request("write", ToolKind::Edit, "write:/tmp/secrets/key", &[]),
            &cfg,
            &approvals,
            PermissionMode::Default,
        );
        assert_eq!(decision.verdict, Verdict::Deny);
        assert_eq!(decision.matched_rule.as_deref(), Some("write:/tmp/secrets/**"));
    }

    #[test]
    fn test_deny_beats_yolo() {
        let cfg = config(&[], &[], &["shell:rm *"]);
        let approvals = SessionApprovals::new();
        let decision = evaluate(
            &request("shell", ToolKind::Execute, "shell:rm -rf build", &[]),
            &cfg,
            &approvals,
            PermissionMode::Yolo,
        );
        assert_eq!(decision.verdict, Verdict::Deny);
    }

    #[test]
    fn test_allow_rule_matches() {
        let cfg = config(&["write:/tmp/**"], &[], &[]);
        let approvals = SessionApprovals::new();
        let decision = evaluate(
            &request("write", ToolKind::Edit, "write:/tmp/out.txt", &[]),
            &cfg,
            &approvals,
            PermissionMode::Default,
        );
        assert_eq!(decision.verdict, Verdict::Allow);
        assert_eq!(decision.matched_rule.as_deref(), Some("write:/tmp/**"));
    }

    #[test]
    fn test_session_memory_allows_exact_signature() {
        let cfg = PermissionConfig::default();
        let approvals = SessionApprovals::new();
        approvals.remember("write:/tmp/out.txt");

        let decision = evaluate(
            &request("write", ToolKind::Edit, "write:/tmp/out.txt", &[]),
            &cfg,
            &approvals,
            PermissionMode::Default,
        );
        assert_eq!(decision.verdict, Verdict::Allow);
        assert_eq!(decision.matched_rule.as_deref(), Some(REMEMBERED_SESSION));

        // A different signature still asks.
        let decision = evaluate(
            &request("write", ToolKind::Edit, "write:/tmp/other.txt", &[]),
            &cfg,
            &approvals,
            PermissionMode::Default,
        );
        assert_eq!(decision.verdict, Verdict::Ask);
    }

    #[test]
    fn test_default_mode_allows_read_only() {
        let cfg = PermissionConfig::default();
        let approvals = SessionApprovals::new();
        for kind in [ToolKind::Read, ToolKind::Search, ToolKind::ReadOnly] {
            let decision = evaluate(
                &request("read", kind, "read:/tmp/f", &[]),
                &cfg,
                &approvals,
                PermissionMode::Default,
            );
            assert_eq!(decision.verdict, Verdict::Allow);
            assert_eq!(decision.reason, "mode:default:readonly");
        }
        let decision = evaluate(
            &request("write", ToolKind::Edit, "write:/tmp/f", &[]),
            &cfg,
            &approvals,
            PermissionMode::Default,
        );
        assert_eq!(decision.verdict, Verdict::Ask);
    }

    #[test]
    fn test_auto_edit_mode_allows_edits() {
        let cfg = PermissionConfig::default();
        let approvals = SessionApprovals::new();
        let decision = evaluate(
            &request("edit", ToolKind::Edit, "edit:/tmp/f", &[]),
            &cfg,
            &approvals,
            PermissionMode::AutoEdit,
        );
        assert_eq!(decision.verdict, Verdict::Allow);
        assert_eq!(decision.reason, "mode:autoEdit:edit");

        let decision = evaluate(
            &request("shell", ToolKind::Execute, "shell:ls", &[]),
            &cfg,
            &approvals,
            PermissionMode::AutoEdit,
        );
        assert_eq!(decision.verdict, Verdict::Ask);
    }

    #[test]
    fn test_yolo_allows_everything_not_denied() {
        let cfg = PermissionConfig::default();
        let approvals = SessionApprovals::new();
        let decision = evaluate(
            &request("shell", ToolKind::Execute, "shell:cargo build", &[]),
            &cfg,
            &approvals,
            PermissionMode::Yolo,
        );
        assert_eq!(decision.verdict, Verdict::Allow);
        assert_eq!(decision.reason, "mode:yolo");
    }

    #[test]
    fn test_plan_mode_asks_for_writes_but_honors_allow_rules() {
        let cfg = config(&["write:/tmp/plan.md"], &[], &[]);
        let approvals = SessionApprovals::new();

        let decision = evaluate(
            &request("write", ToolKind::Edit, "write:/tmp/plan.md", &[]),
            &cfg,
            &approvals,
            PermissionMode::Plan,
        );
        assert_eq!(decision.verdict, Verdict::Allow);

        let decision = evaluate(
            &request("write", ToolKind::Edit, "write:/tmp/other.md", &[]),
            &cfg,
            &approvals,
            PermissionMode::Plan,
        );
        assert_eq!(decision.verdict, Verdict::Ask);

        let decision = evaluate(
            &request("read", ToolKind::Read, "read:/tmp/plan.md", &[]),
            &cfg,
            &approvals,
            PermissionMode::Plan,
        );
        assert_eq!(decision.verdict, Verdict::Allow);
        assert_eq!(decision.reason, "mode:plan:readonly");
    }

    #[test]
    fn test_ask_rule_reports_match() {
        let cfg = config(&[], &["shell:git push*"], &[]);
        let approvals = SessionApprovals::new();
        let decision = evaluate(
            &request("shell", ToolKind::Execute, "shell:git push origin", &[]),
            &cfg,
            &approvals,
            PermissionMode::Default,
        );
        assert_eq!(decision.verdict, Verdict::Ask);
        assert_eq!(decision.matched_rule.as_deref(), Some("shell:git push*"));
    }

    #[test]
    fn test_dangerous_paths_denied_in_every_mode() {
        let cfg = config(&["shell:**"], &[], &[]);
        let approvals = SessionApprovals::new();
        for paths in [
            vec![PathBuf::from("/")],
            vec![PathBuf::from("/etc/passwd")],
            vec![PathBuf::from("/tmp/../etc/passwd")],
            vec![PathBuf::from("../../escape")],
            vec![PathBuf::from("C:\\Windows\\System32\\cmd.exe")],
        ] {
            let decision = evaluate(
                &request("shell", ToolKind::Execute, "shell:touch x", &paths),
                &cfg,
                &approvals,
                PermissionMode::Yolo,
            );
            assert_eq!(decision.verdict, Verdict::Deny, "paths: {paths:?}");
        }
    }

    #[test]
    fn test_normalize_path_resolves_dots() {
        assert_eq!(
            normalize_path(Path::new("/tmp/./a/../b.txt")),
            PathBuf::from("/tmp/b.txt")
        );
        assert_eq!(
            normalize_path(Path::new("/tmp/../../x")),
            PathBuf::from("/x")
        );
        assert_eq!(normalize_path(Path::new("../x")), PathBuf::from("../x"));
    }

    // Adding a deny rule can only tighten the outcome (policy monotonicity).
    #[test]
    fn test_deny_rules_are_monotonic() {
        let approvals = SessionApprovals::new();
        let signatures = [
            ("write", ToolKind::Edit, "write:/tmp/a.txt"),
            ("read", ToolKind::Read, "read:/tmp/a.txt"),
            ("shell", ToolKind::Execute, "shell:ls"),
        ];
        let base = config(&["write:/tmp/**"], &["shell:*"], &[]);
        let tightened = config(&["write:/tmp/**"], &["shell:*"], &["*:/tmp/**", "shell:*"]);

        for (tool, kind, sig) in signatures {
            let before = evaluate(
                &request(tool, kind, sig, &[]),
                &base,
                &approvals,
                PermissionMode::Default,
            );
            let after = evaluate(
                &request(tool, kind, sig, &[]),
                &tightened,
                &approvals,
                PermissionMode::Default,
            );
            // The only change a deny rule may introduce is toward Deny.
            assert!(
                after.verdict == before.verdict || after.verdict == Verdict::Deny,
                "{sig}: {:?} -> {:?}",
                before.verdict,
                after.verdict
            );
        }
    }
}
