//! Record stores consumed by the proxy
//!
//! The proxy only sees these traits. `MongoStore` backs them in production,
//! `MemoryStore` in dev mode and tests.

pub mod memory;
pub mod mongo;
pub mod seed;

use async_trait::async_trait;
use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;

use crate::cache::CacheKey;
use crate::db::schemas::{CacheEntity, CacheMeta, DomainConfig, TenantDoc};
use crate::types::{Result, VestibuleError};

pub use memory::MemoryStore;
pub use mongo::MongoStore;
pub use seed::{apply_seed, SeedConfig, SeedFile, SeedReport, SeedTenant};

/// Tenant provisioning
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Create a tenant; fails if the external reference is taken
    async fn create_tenant(&self, external_ref: &str) -> Result<TenantDoc>;

    async fn get_tenant(&self, external_ref: &str) -> Result<Option<TenantDoc>>;

    /// Change a tenant's external reference. Returns false if no tenant had `old`.
    async fn update_tenant_ref(&self, old: &str, new: &str) -> Result<bool>;

    /// Remove a tenant. Returns false if it did not exist.
    async fn delete_tenant(&self, external_ref: &str) -> Result<bool>;
}

/// Domain config lookup and authoring
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_config_by_domain(&self, domain: &str) -> Result<Option<DomainConfig>>;

    async fn get_config(&self, id: &ObjectId) -> Result<Option<DomainConfig>>;

    /// Insert a config, or replace the one already registered for its domain.
    /// The stored form is returned with its final id and timestamps.
    async fn save_config(&self, config: DomainConfig) -> Result<DomainConfig>;

    async fn list_configs(&self, tenant_id: &ObjectId) -> Result<Vec<DomainConfig>>;
}

/// Cache meta and entity records
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_cache_meta(&self, config_id: &ObjectId, key: &CacheKey) -> Result<Option<CacheMeta>>;

    /// Insert `initial` unless a meta for its (config_id, cache_key) exists,
    /// returning whichever record is stored. Never creates a second record
    /// for the same pair.
    async fn upsert_cache_meta(&self, initial: CacheMeta) -> Result<CacheMeta>;

    /// Point a meta at a new entity and expiry
    async fn update_cache_meta(
        &self,
        id: &ObjectId,
        entity_id: &ObjectId,
        expire_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn get_cache_entity(&self, id: &ObjectId) -> Result<Option<CacheEntity>>;

    async fn put_cache_entity(&self, entity: CacheEntity) -> Result<ObjectId>;
}

/// Run a storage call under a deadline
pub async fn bounded<T, F>(timeout: Duration, op: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(VestibuleError::Storage(format!(
            "{} timed out after {}ms",
            op,
            timeout.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: Result<()> = bounded(Duration::from_millis(10), "slow op", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(VestibuleError::Storage(msg)) => assert!(msg.contains("slow op")),
            other => panic!("expected storage timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bounded_passes_through() {
        let result = bounded(Duration::from_secs(1), "fast op", async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
