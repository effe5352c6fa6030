//! Rule Engine
//!
//! Maps a request path and method onto a domain config's routing rules and
//! computes the rewritten upstream path. Pure and stateless apart from the
//! memoised priority orderings in [`RuleCache`].

pub mod engine;
pub mod rule;

pub use engine::{Resolution, Route, RuleCache, RuleSet};
pub use rule::{is_general_pattern, strip_wildcard, Rule, WILDCARD};
