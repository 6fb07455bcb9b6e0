//! Environment scrubbing for spawned sessions (§4.2).
//!
//! The daemon's own environment may carry agent credentials or session
//! state (API keys, auth tokens cached by `CLAUDE_*`/`OPENCODE_*`-style
//! tooling). A spawned child must never inherit those — it gets a clean
//! slate plus whatever the caller explicitly asked for.

/// Family prefixes scrubbed from the inherited environment before spawn.
/// Matching is case-sensitive and prefix-based (`"CLAUDE"` also strips
/// exactly `CLAUDE`, not just `CLAUDE_*`).
const SCRUBBED_PREFIXES: &[&str] = &["OPENCODE", "CLAUDE", "GEMINI", "CODEX"];

fn is_scrubbed(name: &str) -> bool {
    SCRUBBED_PREFIXES
        .iter()
        .any(|prefix| name == *prefix || name.starts_with(prefix))
}

/// Scrub `inherited` of any agent-family variable, then always set `TERM`
/// and, if `session_label` is given, `OPENKANBAN_SESSION`.
///
/// Pure and independent of `std::env` so it is unit-testable without
/// mutating process-global state.
pub fn scrub_env(
    inherited: &[(String, String)],
    session_label: Option<&str>,
) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = inherited
        .iter()
        .filter(|(name, _)| !is_scrubbed(name))
        .cloned()
        .collect();

    out.push(("TERM".to_string(), "xterm-256color".to_string()));
    if let Some(label) = session_label {
        out.push(("OPENKANBAN_SESSION".to_string(), label.to_string()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_scrubs_exact_and_prefixed_families() {
        let inherited = pairs(&[
            ("CLAUDE", "1"),
            ("CLAUDE_API_KEY", "secret"),
            ("OPENCODE_TOKEN", "secret"),
            ("GEMINI_API_KEY", "secret"),
            ("CODEX_SESSION", "secret"),
            ("PATH", "/usr/bin"),
        ]);
        let scrubbed = scrub_env(&inherited, None);
        let names: Vec<&str> = scrubbed.iter().map(|(k, _)| k.as_str()).collect();
        assert!(names.contains(&"PATH"));
        assert!(names.contains(&"TERM"));
        assert!(!names.iter().any(|n| n.starts_with("CLAUDE")));
        assert!(!names.iter().any(|n| n.starts_with("OPENCODE")));
        assert!(!names.iter().any(|n| n.starts_with("GEMINI")));
        assert!(!names.iter().any(|n| n.starts_with("CODEX")));
    }

    #[test]
    fn test_always_sets_term() {
        let scrubbed = scrub_env(&[], None);
        assert!(
            scrubbed
                .iter()
                .any(|(k, v)| k == "TERM" && v == "xterm-256color")
        );
    }

    #[test]
    fn test_sets_session_label_when_given() {
        let scrubbed = scrub_env(&[], Some("myapp_feature-auth"));
        assert!(
            scrubbed
                .iter()
                .any(|(k, v)| k == "OPENKANBAN_SESSION" && v == "myapp_feature-auth")
        );
    }

    #[test]
    fn test_no_session_label_means_no_var() {
        let scrubbed = scrub_env(&[], None);
        assert!(!scrubbed.iter().any(|(k, _)| k == "OPENKANBAN_SESSION"));
    }

    #[test]
    fn test_unrelated_vars_pass_through_unchanged() {
        let inherited = pairs(&[("HOME", "/home/user"), ("SHELL", "/bin/zsh")]);
        let scrubbed = scrub_env(&inherited, None);
        assert!(scrubbed.contains(&("HOME".to_string(), "/home/user".to_string())));
        assert!(scrubbed.contains(&("SHELL".to_string(), "/bin/zsh".to_string())));
    }

    #[test]
    fn test_does_not_prefix_match_unrelated_names() {
        // "CLAUDETTE" starts with "CLAUDE" by the letter-prefix rule — this
        // documents that behavior rather than special-casing it, matching
        // the spec's literal "equals or is prefixed by" wording.
        let inherited = pairs(&[("CLAUDETTE_VAR", "x")]);
        let scrubbed = scrub_env(&inherited, None);
        assert!(!scrubbed.iter().any(|(k, _)| k == "CLAUDETTE_VAR"));
    }
}
