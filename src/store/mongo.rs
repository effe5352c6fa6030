//! MongoDB-backed store
//!
//! One typed collection per record kind, all opened from the single
//! `MongoClient` built at startup.

use async_trait::async_trait;
use bson::{doc, oid::ObjectId};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{CacheStore, ConfigStore, TenantStore};
use crate::cache::CacheKey;
use crate::db::schemas::{
    CacheEntity, CacheMeta, DomainConfig, TenantDoc, CACHE_ENTITY_COLLECTION,
    CACHE_META_COLLECTION, CONFIG_COLLECTION, TENANT_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::types::{Result, VestibuleError};

#[derive(Clone)]
pub struct MongoStore {
    tenants: MongoCollection<TenantDoc>,
    configs: MongoCollection<DomainConfig>,
    metas: MongoCollection<CacheMeta>,
    entities: MongoCollection<CacheEntity>,
}

impl MongoStore {
    /// Open all collections, creating their indexes
    pub async fn open(client: &MongoClient) -> Result<Self> {
        let store = Self {
            tenants: client.collection(TENANT_COLLECTION).await?,
            configs: client.collection(CONFIG_COLLECTION).await?,
            metas: client.collection(CACHE_META_COLLECTION).await?,
            entities: client.collection(CACHE_ENTITY_COLLECTION).await?,
        };
        info!(db = client.db_name(), "MongoDB store ready");
        Ok(store)
    }
}

#[async_trait]
impl TenantStore for MongoStore {
    async fn create_tenant(&self, external_ref: &str) -> Result<TenantDoc> {
        if self.get_tenant(external_ref).await?.is_some() {
            return Err(VestibuleError::BadRequest(format!(
                "Tenant already exists: {}",
                external_ref
            )));
        }

        let tenant = TenantDoc::new(external_ref);
        self.tenants.insert_one(tenant.clone()).await?;
        Ok(tenant)
    }

    async fn get_tenant(&self, external_ref: &str) -> Result<Option<TenantDoc>> {
        self.tenants
            .find_one(doc! { "external_ref": external_ref })
            .await
    }

    async fn update_tenant_ref(&self, old: &str, new: &str) -> Result<bool> {
        let result = self
            .tenants
            .set_fields(
                doc! { "external_ref": old, "metadata.is_deleted": { "$ne": true } },
                doc! { "external_ref": new },
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn delete_tenant(&self, external_ref: &str) -> Result<bool> {
        let result = self
            .tenants
            .soft_delete(doc! { "external_ref": external_ref, "metadata.is_deleted": { "$ne": true } })
            .await?;
        Ok(result.modified_count > 0)
    }
}

#[async_trait]
impl ConfigStore for MongoStore {
    async fn get_config_by_domain(&self, domain: &str) -> Result<Option<DomainConfig>> {
        self.configs.find_one(doc! { "domain": domain }).await
    }

    async fn get_config(&self, id: &ObjectId) -> Result<Option<DomainConfig>> {
        self.configs.find_one(doc! { "_id": *id }).await
    }

    async fn save_config(&self, mut config: DomainConfig) -> Result<DomainConfig> {
        config.domain = config.domain.to_ascii_lowercase();

        match self.get_config_by_domain(&config.domain).await? {
            Some(existing) => {
                config.id = existing.id;
                config.metadata.created_at = existing.metadata.created_at;
                config.metadata.touch();
                self.configs
                    .replace_one(doc! { "_id": existing.id }, config.clone())
                    .await?;
                debug!(domain = %config.domain, config_id = %config.id, "Config replaced");
                Ok(config)
            }
            None => {
                self.configs.insert_one(config.clone()).await?;
                debug!(domain = %config.domain, config_id = %config.id, "Config inserted");
                // Read back to pick up the stamped timestamps
                self.get_config(&config.id)
                    .await?
                    .ok_or_else(|| VestibuleError::Storage("Inserted config not found".into()))
            }
        }
    }

    async fn list_configs(&self, tenant_id: &ObjectId) -> Result<Vec<DomainConfig>> {
        self.configs.find_many(doc! { "tenant_id": *tenant_id }).await
    }
}

#[async_trait]
impl CacheStore for MongoStore {
    async fn get_cache_meta(&self, config_id: &ObjectId, key: &CacheKey) -> Result<Option<CacheMeta>> {
        self.metas
            .find_one(doc! { "config_id": *config_id, "cache_key": key.as_str() })
            .await
    }

    async fn upsert_cache_meta(&self, initial: CacheMeta) -> Result<CacheMeta> {
        let filter = doc! { "config_id": initial.config_id, "cache_key": initial.cache_key.clone() };
        self.metas.upsert_on_insert(filter, initial).await
    }

    async fn update_cache_meta(
        &self,
        id: &ObjectId,
        entity_id: &ObjectId,
        expire_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = self
            .metas
            .set_fields(
                doc! { "_id": *id },
                doc! {
                    "entity_id": *entity_id,
                    "expire_at": bson::DateTime::from_chrono(expire_at),
                },
            )
            .await?;

        if result.matched_count == 0 {
            return Err(VestibuleError::Storage(format!("Cache meta not found: {}", id)));
        }
        Ok(())
    }

    async fn get_cache_entity(&self, id: &ObjectId) -> Result<Option<CacheEntity>> {
        self.entities.find_one(doc! { "_id": *id }).await
    }

    async fn put_cache_entity(&self, entity: CacheEntity) -> Result<ObjectId> {
        self.entities.insert_one(entity).await
    }
}
