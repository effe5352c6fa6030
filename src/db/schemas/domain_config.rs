//! Domain config document schema
//!
//! One document per public domain a tenant proxies: where requests go
//! upstream, how cache keys are built, and the routing rules. Rules are
//! embedded by value and have no identity of their own.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::CacheKeyPolicy;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::routing::Rule;

/// Collection name for domain configs
pub const CONFIG_COLLECTION: &str = "configs";

/// Methods that always go live, whatever a config lists
pub const MUTATING_METHODS: [&str; 4] = ["POST", "PUT", "DELETE", "PATCH"];

fn default_cache_methods() -> Vec<String> {
    vec!["GET".to_string(), "HEAD".to_string()]
}

/// Per-domain proxy and cache configuration
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DomainConfig {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Owning tenant
    pub tenant_id: ObjectId,

    /// Inbound public host (unique across configs)
    pub domain: String,

    /// Upstream origin host
    pub proxy_domain: String,

    /// Cache key composition
    #[serde(default)]
    pub cache_key_policy: CacheKeyPolicy,

    /// Fallback TTL when the matched rule has none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_expiry_secs: Option<u64>,

    /// Methods whose responses may be cached
    #[serde(default = "default_cache_methods")]
    pub cache_methods: Vec<String>,

    /// Routing rules in declaration order
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            id: ObjectId::new(),
            metadata: Metadata::new(),
            tenant_id: ObjectId::new(),
            domain: String::new(),
            proxy_domain: String::new(),
            cache_key_policy: CacheKeyPolicy::default(),
            default_expiry_secs: None,
            cache_methods: default_cache_methods(),
            rules: Vec::new(),
        }
    }
}

impl DomainConfig {
    /// Create a config for a tenant
    pub fn new(
        tenant_id: ObjectId,
        domain: impl Into<String>,
        proxy_domain: impl Into<String>,
        cache_key_policy: CacheKeyPolicy,
        rules: Vec<Rule>,
    ) -> Self {
        Self {
            tenant_id,
            domain: domain.into(),
            proxy_domain: proxy_domain.into(),
            cache_key_policy,
            rules,
            ..Default::default()
        }
    }

    pub fn with_default_expiry(mut self, ttl: Duration) -> Self {
        self.default_expiry_secs = Some(ttl.as_secs());
        self
    }

    pub fn default_expiry(&self) -> Option<Duration> {
        self.default_expiry_secs.map(Duration::from_secs)
    }

    /// Whether responses to `method` may be cached under this config
    pub fn is_cacheable_method(&self, method: &str) -> bool {
        if MUTATING_METHODS.iter().any(|m| m.eq_ignore_ascii_case(method)) {
            return false;
        }
        self.cache_methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }

    /// Append a rule and bump the update timestamp
    pub fn push_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
        self.metadata.touch();
    }
}

impl IntoIndexes for DomainConfig {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Inbound host lookup must be unambiguous
            (
                doc! { "domain": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("domain_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "tenant_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("tenant_id_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for DomainConfig {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
