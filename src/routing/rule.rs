//! Routing rule definition
//!
//! A rule maps a matcher pattern onto a rewrite target. Patterns ending in
//! `*` are "general": the matcher matches anything containing its prefix,
//! and a general target receives the captured remainder of the path.
//!
//! ```text
//! foo/bar/* -> yo/*   path foo/bar/123/456   rewrites to yo/123/456
//! foo/bar/* -> yo     path foo/bar/123/345   rewrites to yo
//! foo/bar   -> yo/*   invalid, nothing to capture
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::{Result, VestibuleError};

/// Wildcard suffix marker
pub const WILDCARD: char = '*';

/// One path-rewrite and cache directive within a domain config
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Rule {
    /// Pattern tested against the request path
    pub matcher: String,

    /// Rewrite target for matching paths
    pub matched: String,

    /// Higher priority rules are evaluated first
    #[serde(default)]
    pub priority: i32,

    /// Fallback rule used when nothing matches
    #[serde(default)]
    pub is_default: bool,

    /// TTL override for responses routed through this rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_after_secs: Option<u64>,

    /// Method restriction; empty matches every method
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
}

/// Whether a pattern carries the wildcard suffix
pub fn is_general_pattern(pattern: &str) -> bool {
    pattern.ends_with(WILDCARD)
}

/// `foo/bar/*` -> `foo/bar/`
pub fn strip_wildcard(pattern: &str) -> &str {
    pattern.strip_suffix(WILDCARD).unwrap_or(pattern)
}

impl Rule {
    /// Create a rule, rejecting empty patterns
    pub fn new(matcher: impl Into<String>, matched: impl Into<String>) -> Result<Self> {
        let rule = Self {
            matcher: matcher.into(),
            matched: matched.into(),
            ..Default::default()
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn with_expire_after(mut self, ttl: Duration) -> Self {
        self.expire_after_secs = Some(ttl.as_secs());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// TTL override, if the rule sets one
    pub fn expire_after(&self) -> Option<Duration> {
        self.expire_after_secs.map(Duration::from_secs)
    }

    pub fn is_general_matcher(&self) -> bool {
        is_general_pattern(&self.matcher)
    }

    pub fn is_general_matched(&self) -> bool {
        is_general_pattern(&self.matched)
    }

    /// Method restriction check (case-insensitive)
    pub fn allows_method(&self, method: &str) -> bool {
        self.method.is_empty() || self.method.eq_ignore_ascii_case(method)
    }

    /// Path predicate: containment of the matcher, wildcard stripped
    pub fn matches_path(&self, path: &str) -> bool {
        path.contains(strip_wildcard(&self.matcher))
    }

    pub fn matches(&self, path: &str, method: &str) -> bool {
        self.allows_method(method) && self.matches_path(path)
    }

    /// Rewrite `path` according to this rule
    pub fn rewrite(&self, path: &str) -> Result<String> {
        self.validate()?;

        if !self.is_general_matched() {
            return Ok(self.matched.clone());
        }

        if !self.is_general_matcher() {
            return Err(VestibuleError::InvalidRule(format!(
                "target '{}' captures a suffix but matcher '{}' has no wildcard",
                self.matched, self.matcher
            )));
        }

        let captured = path.replacen(strip_wildcard(&self.matcher), "", 1);
        Ok(format!("{}{}", strip_wildcard(&self.matched), captured))
    }

    /// Reject empty patterns
    pub fn validate(&self) -> Result<()> {
        if self.matcher.is_empty() || self.matched.is_empty() {
            return Err(VestibuleError::InvalidRule(
                "matcher and matched must both be non-empty".into(),
            ));
        }
        Ok(())
    }
}
