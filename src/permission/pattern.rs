//! Glob matching for permission rules over call signatures.
//!
//! Rules are shell-style patterns matched against the full signature
//! (`tool:content`), never a substring. `*` stays within a path segment,
//! `**` crosses separators. Signatures whose content is a filesystem path
//! match case-insensitively; everything else is case-sensitive.

use globset::GlobBuilder;

/// True when signature content looks like a filesystem path.
fn content_is_path(content: &str) -> bool {
    content.starts_with('/')
        || content.starts_with('~')
        || content.starts_with("\\\\")
        || (content.len() >= 3 && content.as_bytes()[1] == b':' && content.as_bytes()[2] == b'\\')
}

fn glob_match(pattern: &str, candidate: &str, case_insensitive: bool) -> bool {
    let glob = match GlobBuilder::new(pattern)
        .literal_separator(true)
        .case_insensitive(case_insensitive)
        .build()
    {
        Ok(glob) => glob,
        Err(err) => {
            tracing::warn!("Invalid permission pattern '{pattern}': {err}");
            return false;
        }
    };
    glob.compile_matcher().is_match(candidate)
}

/// Match a single rule pattern against a signature.
///
/// The tool-name part (before the first `:`) and the content part are
/// matched separately so that `**` keeps its path semantics inside the
/// content regardless of the `tool:` prefix.
#[must_use]
pub fn matches_signature(rule: &str, signature: &str) -> bool {
    match (rule.split_once(':'), signature.split_once(':')) {
        (Some((rule_tool, rule_content)), Some((sig_tool, sig_content))) => {
            glob_match(rule_tool, sig_tool, false)
                && glob_match(rule_content, sig_content, content_is_path(sig_content))
        }
        // A rule without a content part is matched against the whole
        // signature (e.g. a bare tool-name rule).
        _ => glob_match(rule, signature, false),
    }
}

/// First rule in `rules` matching `signature`, if any.
#[must_use]
pub fn first_match<'a>(rules: &'a [String], signature: &str) -> Option<&'a str> {
    rules
        .iter()
        .map(String::as_str)
        .find(|rule| matches_signature(rule, signature))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(matches_signature(
            "fetch:domain:api.example.com",
            "fetch:domain:api.example.com"
        ));
        assert!(!matches_signature(
            "fetch:domain:api.example.com",
            "fetch:domain:api.other.com"
        ));
    }

    #[test]
    fn test_star_does_not_cross_separator() {
        assert!(matches_signature("write:/tmp/*", "write:/tmp/f.txt"));
        assert!(!matches_signature("write:/tmp/*", "write:/tmp/nested/f.txt"));
    }

    #[test]
    fn test_double_star_crosses_separators() {
        assert!(matches_signature(
            "write:/tmp/**",
            "write:/tmp/nested/deep/f.txt"
        ));
        assert!(matches_signature("edit:**/*.rs", "edit:/home/dev/src/main.rs"));
        assert!(!matches_signature("edit:**/*.rs", "edit:/home/dev/src/main.ts"));
    }

    #[test]
    fn test_full_signature_not_substring() {
        assert!(!matches_signature("write:/tmp", "write:/tmp/f.txt"));
        assert!(!matches_signature("tmp", "write:/tmp/f.txt"));
    }

    #[test]
    fn test_tool_part_can_be_globbed() {
        assert!(matches_signature("*:/tmp/**", "write:/tmp/f.txt"));
        assert!(matches_signature("*:/tmp/**", "edit:/tmp/f.txt"));
        assert!(!matches_signature("w*:/tmp/**", "edit:/tmp/f.txt"));
    }

    #[test]
    fn test_path_signatures_match_case_insensitively() {
        assert!(matches_signature("write:/TMP/*.txt", "write:/tmp/F.TXT"));
        // Non-path content stays case-sensitive.
        assert!(!matches_signature(
            "fetch:domain:API.example.com",
            "fetch:domain:api.example.com"
        ));
    }

    #[test]
    fn test_command_prefix_pattern() {
        assert!(matches_signature("shell:git *", "shell:git status"));
        assert!(!matches_signature("shell:git *", "shell:rm -rf /"));
    }

    #[test]
    fn test_invalid_pattern_never_matches() {
        assert!(!matches_signature("write:[", "write:["));
    }

    #[test]
    fn test_first_match_order() {
        let rules = vec!["shell:git *".to_string(), "shell:**".to_string()];
        assert_eq!(first_match(&rules, "shell:git status"), Some("shell:git *"));
        assert_eq!(first_match(&rules, "shell:ls"), Some("shell:**"));
        assert_eq!(first_match(&rules, "write:/tmp/a"), None);
    }
}
