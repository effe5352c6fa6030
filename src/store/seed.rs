//! Seed file loading
//!
//! A seed file provisions tenants and their domain configs:
//!
//! ```json
//! { "tenants": [ { "external_ref": "acme",
//!     "configs": [ { "domain": "a.example", "proxy_domain": "b.example",
//!                    "rules": [ { "matcher": "posts/*", "matched": "v2/posts/*", "priority": 1 } ] } ] } ] }
//! ```
//!
//! Applying a seed twice leaves the store as after the first run: tenants are
//! reused by external reference and configs are replaced by domain.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use super::{ConfigStore, TenantStore};
use crate::cache::CacheKeyPolicy;
use crate::db::schemas::DomainConfig;
use crate::routing::Rule;
use crate::types::{Result, VestibuleError};

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SeedFile {
    #[serde(default)]
    pub tenants: Vec<SeedTenant>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SeedTenant {
    pub external_ref: String,
    #[serde(default)]
    pub configs: Vec<SeedConfig>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SeedConfig {
    pub domain: String,
    pub proxy_domain: String,
    #[serde(default)]
    pub cache_key_policy: CacheKeyPolicy,
    #[serde(default)]
    pub default_expiry_secs: Option<u64>,
    /// Overrides the default cacheable methods when present
    #[serde(default)]
    pub cache_methods: Option<Vec<String>>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// Counts of what a seed run touched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub tenants_created: usize,
    pub configs_saved: usize,
}

impl SeedFile {
    pub fn from_json(raw: &str) -> Result<Self> {
        let seed: SeedFile = serde_json::from_str(raw)?;
        seed.validate()?;
        Ok(seed)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            VestibuleError::Config(format!("Cannot read seed file {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    /// Reject seeds that could never be served
    pub fn validate(&self) -> Result<()> {
        for tenant in &self.tenants {
            if tenant.external_ref.trim().is_empty() {
                return Err(VestibuleError::BadRequest("Tenant external_ref is empty".into()));
            }
            for config in &tenant.configs {
                if config.domain.is_empty() || config.proxy_domain.is_empty() {
                    return Err(VestibuleError::BadRequest(format!(
                        "Config for tenant {} needs domain and proxy_domain",
                        tenant.external_ref
                    )));
                }
                for rule in &config.rules {
                    rule.validate()?;
                    if rule.is_general_matched() && !rule.is_general_matcher() {
                        // Kept: resolution reports it per request
                        warn!(
                            domain = %config.domain,
                            matcher = %rule.matcher,
                            matched = %rule.matched,
                            "Rule can never rewrite a path"
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

impl SeedConfig {
    fn into_config(self, tenant_id: bson::oid::ObjectId) -> DomainConfig {
        let mut config = DomainConfig::new(
            tenant_id,
            self.domain,
            self.proxy_domain,
            self.cache_key_policy,
            self.rules,
        );
        config.default_expiry_secs = self.default_expiry_secs;
        if let Some(methods) = self.cache_methods {
            config.cache_methods = methods;
        }
        config
    }
}

/// Provision every tenant and config in `seed`
pub async fn apply_seed<S>(store: &S, seed: &SeedFile) -> Result<SeedReport>
where
    S: TenantStore + ConfigStore + ?Sized,
{
    let mut report = SeedReport::default();

    for tenant in &seed.tenants {
        let doc = match store.get_tenant(&tenant.external_ref).await? {
            Some(existing) => existing,
            None => {
                report.tenants_created += 1;
                store.create_tenant(&tenant.external_ref).await?
            }
        };

        for config in &tenant.configs {
            let saved = store.save_config(config.clone().into_config(doc.id)).await?;
            info!(
                tenant = %tenant.external_ref,
                domain = %saved.domain,
                proxy_domain = %saved.proxy_domain,
                rules = saved.rules.len(),
                "Seeded domain config"
            );
            report.configs_saved += 1;
        }
    }

    Ok(report)
}
