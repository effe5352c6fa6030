//! Rule resolution
//!
//! Rules are evaluated in descending priority, ties keeping declaration
//! order. The first match wins; otherwise the highest-priority default rule
//! applies; otherwise there is no route.

use bson::oid::ObjectId;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use super::rule::Rule;
use crate::types::{Result, VestibuleError};

/// Outcome of matching a path against a rule set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<'a> {
    /// A rule matched the path and method
    Matched(&'a Rule),
    /// Nothing matched; the default rule applies
    Default(&'a Rule),
    /// Nothing matched and no default exists
    NoRoute,
}

impl<'a> Resolution<'a> {
    pub fn rule(&self) -> Option<&'a Rule> {
        match self {
            Self::Matched(rule) | Self::Default(rule) => Some(rule),
            Self::NoRoute => None,
        }
    }
}

/// A resolved route: the winning rule and the rewritten upstream path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub rule: Rule,
    pub path: String,
    /// True when the route came from the default fallback
    pub via_default: bool,
}

/// Priority-ordered, immutable view over a config's rules
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    ordered: Vec<Rule>,
}

impl RuleSet {
    /// Build the ordering from a copy of the rules; the input is untouched.
    pub fn new(rules: &[Rule]) -> Self {
        let mut ordered = rules.to_vec();
        // sort_by is stable, so equal priorities keep declaration order
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { ordered }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.ordered
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Find the rule that applies to `path` and `method`
    pub fn match_rule(&self, path: &str, method: &str) -> Resolution<'_> {
        let mut default_rule: Option<&Rule> = None;

        for rule in &self.ordered {
            if rule.matches(path, method) {
                return Resolution::Matched(rule);
            }
            if rule.is_default && default_rule.is_none() {
                default_rule = Some(rule);
            }
        }

        match default_rule {
            Some(rule) => Resolution::Default(rule),
            None => Resolution::NoRoute,
        }
    }

    /// Resolve `path` to a rule and rewritten path
    pub fn resolve(&self, path: &str, method: &str) -> Result<Route> {
        let (rule, via_default) = match self.match_rule(path, method) {
            Resolution::Matched(rule) => (rule, false),
            Resolution::Default(rule) => (rule, true),
            Resolution::NoRoute => {
                return Err(VestibuleError::NoRouteMatched(format!("{} {}", method, path)));
            }
        };

        let rewritten = rule.rewrite(path)?;
        debug!(
            matcher = %rule.matcher,
            matched = %rule.matched,
            via_default,
            rewritten = %rewritten,
            "Route resolved"
        );

        Ok(Route {
            rule: rule.clone(),
            path: rewritten,
            via_default,
        })
    }
}

/// Memoised rule orderings keyed by config id
///
/// Each entry keeps the rule list it was built from. A config whose rules
/// differ from that list gets a fresh ordering, however quickly the edit
/// followed the last one.
pub struct RuleCache {
    sets: DashMap<ObjectId, (Vec<Rule>, Arc<RuleSet>)>,
}

impl RuleCache {
    pub fn new() -> Self {
        Self {
            sets: DashMap::new(),
        }
    }

    /// Get the ordering for a config's current rules, building it when the
    /// rules are new or changed
    pub fn get_or_build(&self, config_id: ObjectId, rules: &[Rule]) -> Arc<RuleSet> {
        if let Some(entry) = self.sets.get(&config_id) {
            let (source, set) = entry.value();
            if source.as_slice() == rules {
                return Arc::clone(set);
            }
        }

        let set = Arc::new(RuleSet::new(rules));
        self.sets
            .insert(config_id, (rules.to_vec(), Arc::clone(&set)));
        set
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

impl Default for RuleCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(matcher: &str, matched: &str, priority: i32) -> Rule {
        Rule::new(matcher, matched).unwrap().with_priority(priority)
    }

    #[test]
    fn test_priority_wins_regardless_of_declaration_order() {
        let declared = [
            rule("users/*", "ten/*", 10),
            rule("posts/*", "five/*", 5),
            rule("tags/*", "one/*", 1),
        ];
        let orders = [[0, 1, 2], [2, 1, 0], [1, 2, 0], [2, 0, 1]];

        for order in orders {
            let rules: Vec<Rule> = order.iter().map(|&i| declared[i].clone()).collect();
            let set = RuleSet::new(&rules);
            let route = set.resolve("posts/7", "GET").unwrap();
            assert_eq!(route.rule.priority, 5);
            assert_eq!(route.path, "five/7");
        }
    }

    #[test]
    fn test_higher_priority_shadows_lower() {
        let rules = vec![
            rule("foo/bar/*", "low/*", 1),
            rule("foo/bar/baz/*", "high/*", 9),
        ];
        let set = RuleSet::new(&rules);
        assert_eq!(set.resolve("foo/bar/baz/1", "GET").unwrap().path, "high/1");
        assert_eq!(set.resolve("foo/bar/qux", "GET").unwrap().path, "low/qux");
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let rules = vec![rule("a/*", "first/*", 3), rule("a/*", "second/*", 3)];
        let set = RuleSet::new(&rules);
        assert_eq!(set.resolve("a/x", "GET").unwrap().path, "first/x");
    }

    #[test]
    fn test_default_fallback() {
        let rules = vec![
            rule("posts/*", "v2/posts/*", 3),
            rule("index", "home.html", 0).as_default(),
            rule("users/*", "v2/users/*", 2),
        ];
        let set = RuleSet::new(&rules);

        match set.match_rule("unrelated/path", "GET") {
            Resolution::Default(r) => assert_eq!(r.matched, "home.html"),
            other => panic!("expected default, got {:?}", other),
        }

        let route = set.resolve("unrelated/path", "GET").unwrap();
        assert!(route.via_default);
        assert_eq!(route.path, "home.html");
    }

    #[test]
    fn test_highest_priority_default_is_used() {
        let rules = vec![
            rule("x", "low.html", 1).as_default(),
            rule("y", "high.html", 7).as_default(),
        ];
        let set = RuleSet::new(&rules);
        assert_eq!(set.resolve("zzz", "GET").unwrap().path, "high.html");
    }

    #[test]
    fn test_no_route() {
        let set = RuleSet::new(&[rule("posts/*", "v2/posts/*", 1)]);
        assert_eq!(set.match_rule("users/1", "GET"), Resolution::NoRoute);
        assert!(matches!(
            set.resolve("users/1", "GET"),
            Err(VestibuleError::NoRouteMatched(_))
        ));

        let empty = RuleSet::new(&[]);
        assert!(empty.match_rule("anything", "GET").rule().is_none());
    }

    #[test]
    fn test_invalid_rule_surfaces_at_resolution() {
        let set = RuleSet::new(&[rule("foo/bar", "yo/*", 1)]);
        assert!(matches!(
            set.resolve("foo/bar/1", "GET"),
            Err(VestibuleError::InvalidRule(_))
        ));
    }

    #[test]
    fn test_method_scoped_rules() {
        let rules = vec![
            rule("posts/*", "write/*", 10).with_method("POST"),
            rule("posts/*", "read/*", 1),
        ];
        let set = RuleSet::new(&rules);
        assert_eq!(set.resolve("posts/1", "POST").unwrap().path, "write/1");
        assert_eq!(set.resolve("posts/1", "GET").unwrap().path, "read/1");
    }

    #[test]
    fn test_resolution_does_not_mutate_input() {
        let rules = vec![rule("a/*", "a/*", 1), rule("b/*", "b/*", 5)];
        let snapshot = rules.clone();
        let set = RuleSet::new(&rules);
        let _ = set.resolve("b/1", "GET");
        assert_eq!(rules, snapshot);
        assert_eq!(set.rules()[0].priority, 5);
    }

    #[test]
    fn test_rule_cache_reuses_unchanged_rules() {
        let cache = RuleCache::new();
        let id = ObjectId::new();
        let rules = vec![rule("a/*", "one/*", 1)];

        let v1 = cache.get_or_build(id, &rules);
        let again = cache.get_or_build(id, &rules.clone());
        assert!(Arc::ptr_eq(&v1, &again));

        let v2 = cache.get_or_build(id, &[rule("a/*", "two/*", 1)]);
        assert_eq!(v2.resolve("a/z", "GET").unwrap().path, "two/z");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_rule_cache_sees_edit_within_same_millisecond() {
        let cache = RuleCache::new();
        let mut config = crate::db::schemas::DomainConfig::default();
        config.rules.push(rule("a/*", "old/*", 1));
        let frozen = config.metadata.updated_at;

        let before = cache.get_or_build(config.id, &config.rules);
        assert_eq!(before.resolve("a/1", "GET").unwrap().path, "old/1");

        config.push_rule(rule("a/*", "new/*", 9));
        // Same timestamp as before the edit
        config.metadata.updated_at = frozen;

        let after = cache.get_or_build(config.id, &config.rules);
        assert_eq!(after.resolve("a/1", "GET").unwrap().path, "new/1");
        assert_eq!(cache.len(), 1);
    }
}
