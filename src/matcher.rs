//! Host glob matching (component B).
//!
//! A pure function, as `spec.md` §4.2 specifies. Matching rules:
//!
//! - No `*` in the pattern: case-sensitive literal match.
//! - `*` matches zero or more non-`.` characters, except a pattern
//!   beginning with `*.` is an anchored subdomain wildcard: `*.example.com`
//!   matches `a.example.com` and `a.b.example.com` but never the apex
//!   `example.com`.
//! - Multiple wildcards are allowed (`192.168.*.*`), each delimited by `.`.
//! - The single pattern `*` matches every host.

use std::fmt;

/// A validated, pre-parsed host pattern.
///
/// Validation happens once, at construction, so the hot decision path never
/// re-parses a pattern string per matcher call.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pattern(String);

/// A pattern string that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternError {
    pattern: String,
    reason: &'static str,
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid host pattern {:?}: {}", self.pattern, self.reason)
    }
}

impl std::error::Error for PatternError {}

impl Pattern {
    /// Validates and wraps a pattern string.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] if `pattern` is empty or contains whitespace
    /// (hosts never do, and an accidentally-whitespace-padded pattern from a
    /// config file is almost always a mistake worth failing loudly on).
    pub fn new(pattern: impl Into<String>) -> Result<Self, PatternError> {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return Err(PatternError {
                pattern,
                reason: "pattern must not be empty",
            });
        }
        if pattern.chars().any(char::is_whitespace) {
            return Err(PatternError {
                pattern,
                reason: "pattern must not contain whitespace",
            });
        }
        Ok(Self(pattern))
    }

    /// The raw pattern string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns `true` if `host` matches `pattern` under the glob rules above.
#[must_use]
pub fn matches(host: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(suffix) = pattern.strip_prefix("*.") {
        // Anchored subdomain wildcard: at least one label must precede the
        // suffix, so the apex itself never matches.
        return host != suffix
            && host.ends_with(suffix)
            && host.len() > suffix.len()
            && host.as_bytes()[host.len() - suffix.len() - 1] == b'.';
    }
    if !pattern.contains('*') {
        return host == pattern;
    }
    glob_segments_match(host, pattern)
}

/// Short-circuiting `OR` of [`matches`] over a pattern set.
pub fn match_any<'a>(host: &str, patterns: impl IntoIterator<Item = &'a Pattern>) -> bool {
    patterns.into_iter().any(|p| matches(host, p.as_str()))
}

/// Handles a pattern with one or more interior `*` wildcards. Each
/// dot-delimited label is globbed independently against its counterpart
/// label in `host` (e.g. `192.168.*.*` matches `192.168.1.2` but not
/// `192.168.1.2.3`, and `api-*.example.com` matches `api-prod.example.com`).
fn glob_segments_match(host: &str, pattern: &str) -> bool {
    let host_labels: Vec<&str> = host.split('.').collect();
    let pattern_labels: Vec<&str> = pattern.split('.').collect();
    if host_labels.len() != pattern_labels.len() {
        return false;
    }
    host_labels
        .iter()
        .zip(pattern_labels.iter())
        .all(|(h, p)| label_matches(h, p))
}

/// Glob-matches a single label against a single pattern label, where `*`
/// stands for zero or more characters — intra-label, since both arguments
/// are already one `.`-delimited segment. Classic two-pointer wildcard
/// matching: remembers the most recent `*` and the label position it was
/// tried at, so backtracking on a later mismatch doesn't need a stack.
fn label_matches(label: &str, pattern: &str) -> bool {
    let label = label.as_bytes();
    let pattern = pattern.as_bytes();
    let (mut li, mut pi) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None; // (pattern_index_after_star, label_index_at_star)

    while li < label.len() {
        if pi < pattern.len() && pattern[pi] == label[li] {
            li += 1;
            pi += 1;
        } else if pi < pattern.len() && pattern[pi] == b'*' {
            star = Some((pi + 1, li));
            pi += 1;
        } else if let Some((star_pi, star_li)) = star {
            pi = star_pi;
            li = star_li + 1;
            star = Some((star_pi, li));
        } else {
            return false;
        }
    }
    while pi < pattern.len() && pattern[pi] == b'*' {
        pi += 1;
    }
    pi == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_pattern_matches_exactly() {
        assert!(matches("example.com", "example.com"));
        assert!(!matches("example.com", "example.org"));
        assert!(!matches("Example.com", "example.com"));
    }

    #[test]
    fn star_matches_everything() {
        assert!(matches("anything.at.all", "*"));
        assert!(matches("", "*"));
    }

    #[test]
    fn subdomain_wildcard_excludes_apex() {
        assert!(matches("a.example.com", "*.example.com"));
        assert!(matches("a.b.example.com", "*.example.com"));
        assert!(!matches("example.com", "*.example.com"));
        assert!(!matches("notexample.com", "*.example.com"));
    }

    #[test]
    fn multi_segment_wildcard() {
        assert!(matches("192.168.1.2", "192.168.*.*"));
        assert!(!matches("192.168.1.2.3", "192.168.*.*"));
        assert!(!matches("10.168.1.2", "192.168.*.*"));
    }

    #[test]
    fn intra_label_wildcard_matches_within_a_single_segment() {
        assert!(matches("abc.example.com", "a*.example.com"));
        assert!(matches("api-prod.example.com", "api-*.example.com"));
        assert!(matches("api-prod.example.com", "*-prod.example.com"));
        assert!(matches("api-prod-east.example.com", "api-*-east.example.com"));
        assert!(!matches("apiprod.example.com", "api-*.example.com"));
        assert!(!matches("api-prod.other.com", "api-*.example.com"));
    }

    #[test]
    fn match_any_short_circuits_on_first_hit() {
        let patterns = vec![
            Pattern::new("a.example.com").unwrap(),
            Pattern::new("b.example.com").unwrap(),
        ];
        assert!(match_any("b.example.com", patterns.iter()));
        assert!(!match_any("c.example.com", patterns.iter()));
    }

    #[test]
    fn pattern_rejects_empty_and_whitespace() {
        assert!(Pattern::new("").is_err());
        assert!(Pattern::new("exa mple.com").is_err());
        assert!(Pattern::new("example.com").is_ok());
    }

    proptest::proptest! {
        #[test]
        fn star_always_matches(host in "[a-z0-9.]{0,40}") {
            proptest::prop_assert!(matches(&host, "*"));
        }

        #[test]
        fn literal_pattern_is_reflexive(host in "[a-z]{1,10}(\\.[a-z]{1,10}){0,3}") {
            proptest::prop_assert!(matches(&host, &host));
        }

        #[test]
        fn subdomain_wildcard_never_matches_apex(apex in "[a-z]{1,10}(\\.[a-z]{1,10}){1,3}") {
            let pattern = format!("*.{apex}");
            proptest::prop_assert!(!matches(&apex, &pattern));
        }
    }
}
