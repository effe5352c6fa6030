//! In-memory store
//!
//! Backs every store trait with `DashMap`s. Used in dev mode when MongoDB is
//! unreachable and as the store under test. Insert-if-absent goes through
//! the map's entry API, which holds the shard lock for the whole check.

use async_trait::async_trait;
use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use super::{CacheStore, ConfigStore, TenantStore};
use crate::cache::CacheKey;
use crate::db::schemas::{CacheEntity, CacheMeta, DomainConfig, Metadata, TenantDoc};
use crate::types::{Result, VestibuleError};

type MetaKey = (ObjectId, String);

/// ```
/// use vestibule::store::{MemoryStore, TenantStore};
///
/// # tokio_test::block_on(async {
/// let store = MemoryStore::new();
/// let tenant = store.create_tenant("acct-1").await.unwrap();
/// assert_eq!(store.get_tenant("acct-1").await.unwrap().unwrap().id, tenant.id);
/// # });
/// ```
#[derive(Default)]
pub struct MemoryStore {
    tenants: DashMap<String, TenantDoc>,
    /// Configs keyed by domain
    configs: DashMap<String, DomainConfig>,
    metas: DashMap<MetaKey, CacheMeta>,
    meta_keys: DashMap<ObjectId, MetaKey>,
    entities: DashMap<ObjectId, CacheEntity>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn meta_count(&self) -> usize {
        self.metas.len()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}

#[async_trait]
impl TenantStore for MemoryStore {
    async fn create_tenant(&self, external_ref: &str) -> Result<TenantDoc> {
        let tenant = match self.tenants.entry(external_ref.to_string()) {
            Entry::Occupied(_) => {
                return Err(VestibuleError::BadRequest(format!(
                    "Tenant already exists: {}",
                    external_ref
                )))
            }
            Entry::Vacant(slot) => slot.insert(TenantDoc::new(external_ref)).value().clone(),
        };
        Ok(tenant)
    }

    async fn get_tenant(&self, external_ref: &str) -> Result<Option<TenantDoc>> {
        Ok(self.tenants.get(external_ref).map(|t| t.value().clone()))
    }

    async fn update_tenant_ref(&self, old: &str, new: &str) -> Result<bool> {
        if self.tenants.contains_key(new) {
            return Err(VestibuleError::BadRequest(format!(
                "Tenant already exists: {}",
                new
            )));
        }

        let Some((_, mut tenant)) = self.tenants.remove(old) else {
            return Ok(false);
        };
        tenant.external_ref = new.to_string();
        tenant.metadata.touch();
        self.tenants.insert(new.to_string(), tenant);
        Ok(true)
    }

    async fn delete_tenant(&self, external_ref: &str) -> Result<bool> {
        Ok(self.tenants.remove(external_ref).is_some())
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get_config_by_domain(&self, domain: &str) -> Result<Option<DomainConfig>> {
        Ok(self.configs.get(domain).map(|c| c.value().clone()))
    }

    async fn get_config(&self, id: &ObjectId) -> Result<Option<DomainConfig>> {
        Ok(self
            .configs
            .iter()
            .find(|c| c.id == *id)
            .map(|c| c.value().clone()))
    }

    async fn save_config(&self, mut config: DomainConfig) -> Result<DomainConfig> {
        config.domain = config.domain.to_ascii_lowercase();

        let stored = match self.configs.entry(config.domain.clone()) {
            Entry::Occupied(mut existing) => {
                config.id = existing.get().id;
                config.metadata.created_at = existing.get().metadata.created_at;
                config.metadata.touch();
                existing.insert(config.clone());
                config
            }
            Entry::Vacant(slot) => {
                config.metadata = Metadata::new();
                slot.insert(config.clone());
                config
            }
        };

        debug!(domain = %stored.domain, config_id = %stored.id, "Config saved");
        Ok(stored)
    }

    async fn list_configs(&self, tenant_id: &ObjectId) -> Result<Vec<DomainConfig>> {
        Ok(self
            .configs
            .iter()
            .filter(|c| c.tenant_id == *tenant_id)
            .map(|c| c.value().clone())
            .collect())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get_cache_meta(&self, config_id: &ObjectId, key: &CacheKey) -> Result<Option<CacheMeta>> {
        let lookup = (*config_id, key.as_str().to_string());
        Ok(self.metas.get(&lookup).map(|m| m.value().clone()))
    }

    async fn upsert_cache_meta(&self, initial: CacheMeta) -> Result<CacheMeta> {
        let key = (initial.config_id, initial.cache_key.clone());
        let stored = self
            .metas
            .entry(key.clone())
            .or_insert_with(|| initial)
            .value()
            .clone();

        self.meta_keys.entry(stored.id).or_insert(key);
        Ok(stored)
    }

    async fn update_cache_meta(
        &self,
        id: &ObjectId,
        entity_id: &ObjectId,
        expire_at: DateTime<Utc>,
    ) -> Result<()> {
        let key = self
            .meta_keys
            .get(id)
            .map(|k| k.value().clone())
            .ok_or_else(|| VestibuleError::Storage(format!("Cache meta not found: {}", id)))?;

        let mut meta = self
            .metas
            .get_mut(&key)
            .ok_or_else(|| VestibuleError::Storage(format!("Cache meta not found: {}", id)))?;
        meta.entity_id = Some(*entity_id);
        meta.expire_at = expire_at;
        meta.metadata.touch();
        Ok(())
    }

    async fn get_cache_entity(&self, id: &ObjectId) -> Result<Option<CacheEntity>> {
        Ok(self.entities.get(id).map(|e| e.value().clone()))
    }

    async fn put_cache_entity(&self, entity: CacheEntity) -> Result<ObjectId> {
        let id = entity.id;
        self.entities.insert(id, entity);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_tenant_lifecycle() {
        let store = MemoryStore::new();

        let tenant = store.create_tenant("acct-1").await.unwrap();
        assert!(store.create_tenant("acct-1").await.is_err());
        assert_eq!(store.get_tenant("acct-1").await.unwrap().unwrap().id, tenant.id);

        assert!(store.update_tenant_ref("acct-1", "acct-2").await.unwrap());
        assert!(store.get_tenant("acct-1").await.unwrap().is_none());
        assert_eq!(store.get_tenant("acct-2").await.unwrap().unwrap().id, tenant.id);
        assert!(!store.update_tenant_ref("missing", "x").await.unwrap());

        assert!(store.delete_tenant("acct-2").await.unwrap());
        assert!(!store.delete_tenant("acct-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_save_config_replaces_by_domain() {
        let store = MemoryStore::new();
        let tenant = ObjectId::new();

        let first = store
            .save_config(DomainConfig::new(tenant, "A.example", "b.example", Default::default(), vec![]))
            .await
            .unwrap();
        assert_eq!(first.domain, "a.example");

        let second = store
            .save_config(DomainConfig::new(tenant, "a.example", "c.example", Default::default(), vec![]))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        let loaded = store.get_config_by_domain("a.example").await.unwrap().unwrap();
        assert_eq!(loaded.proxy_domain, "c.example");
        assert_eq!(store.get_config(&first.id).await.unwrap().unwrap().domain, "a.example");
        assert_eq!(store.list_configs(&tenant).await.unwrap().len(), 1);
        assert!(store.list_configs(&ObjectId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_upserts_create_one_meta() {
        let store = Arc::new(MemoryStore::new());
        let config_id = ObjectId::new();
        let key = CacheKey::from_stored("same-key");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                store
                    .upsert_cache_meta(CacheMeta::new(config_id, &key, Utc::now()))
                    .await
                    .unwrap()
                    .id
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.meta_count(), 1);
    }

    #[tokio::test]
    async fn test_update_unknown_meta_fails() {
        let store = MemoryStore::new();
        let result = store
            .update_cache_meta(&ObjectId::new(), &ObjectId::new(), Utc::now())
            .await;
        assert!(matches!(result, Err(VestibuleError::Storage(_))));
    }
}
