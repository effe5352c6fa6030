//! Cache decisions
//!
//! `CacheDecider` answers two questions for the proxy: can this request be
//! served from cache, and should this fresh response be stored. Storage
//! failures on the read side degrade to a miss; on the write side they are
//! returned to the caller, which logs and carries on.

use bson::oid::ObjectId;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::CacheKey;
use crate::db::schemas::{CacheEntity, CacheMeta, DomainConfig};
use crate::proxy::UpstreamResponse;
use crate::routing::Rule;
use crate::store::{bounded, CacheStore};
use crate::types::{Result, VestibuleError};

/// What to do with a cacheable request
#[derive(Debug, Clone)]
pub enum Decision {
    /// A fresh, servable entry exists
    ServeCached { meta: CacheMeta, entity: CacheEntity },
    /// Go to the origin. `stale_entity` is the expired entry kept for
    /// stale-on-error, if there is one.
    FetchAndStore { stale_entity: Option<ObjectId> },
}

impl Decision {
    fn miss() -> Self {
        Self::FetchAndStore { stale_entity: None }
    }
}

/// Responses with these statuses are never stored
pub fn is_storable(status: http::StatusCode) -> bool {
    status.as_u16() < 400
}

pub struct CacheDecider {
    store: Arc<dyn CacheStore>,
    default_ttl: Option<Duration>,
    storage_timeout: Duration,
}

impl CacheDecider {
    /// `default_ttl` is the process-wide fallback; `None` disables it.
    pub fn new(store: Arc<dyn CacheStore>, default_ttl: Option<Duration>, storage_timeout: Duration) -> Self {
        Self {
            store,
            default_ttl,
            storage_timeout,
        }
    }

    pub async fn decide(&self, config: &DomainConfig, key: &CacheKey) -> Decision {
        self.decide_at(config, key, Utc::now()).await
    }

    /// Decide against an explicit clock reading
    pub async fn decide_at(&self, config: &DomainConfig, key: &CacheKey, now: DateTime<Utc>) -> Decision {
        let lookup = bounded(
            self.storage_timeout,
            "cache meta lookup",
            self.store.get_cache_meta(&config.id, key),
        )
        .await;

        let meta = match lookup {
            Ok(Some(meta)) => meta,
            Ok(None) => return Decision::miss(),
            Err(e) => {
                warn!(config_id = %config.id, cache_key = %key, error = %e, "Cache lookup failed, treating as miss");
                return Decision::miss();
            }
        };

        // Meta created by a commit that never finished
        let Some(entity_id) = meta.entity_id else {
            return Decision::miss();
        };

        if meta.is_expired_at(now) {
            debug!(cache_key = %key, expire_at = %meta.expire_at, "Cache entry expired");
            return Decision::FetchAndStore {
                stale_entity: Some(entity_id),
            };
        }

        match self.load_entity(&entity_id).await {
            Some(entity) if entity.is_servable() => Decision::ServeCached { meta, entity },
            Some(entity) => {
                debug!(cache_key = %key, status = entity.status, "Cached entry has error status, refetching");
                Decision::miss()
            }
            None => Decision::miss(),
        }
    }

    /// Load an expired entity for stale-on-error. Only servable entities
    /// qualify; any storage failure means there is nothing to fall back to.
    pub async fn load_stale(&self, entity_id: &ObjectId) -> Option<CacheEntity> {
        self.load_entity(entity_id).await.filter(CacheEntity::is_servable)
    }

    async fn load_entity(&self, entity_id: &ObjectId) -> Option<CacheEntity> {
        let lookup = bounded(
            self.storage_timeout,
            "cache entity lookup",
            self.store.get_cache_entity(entity_id),
        )
        .await;

        match lookup {
            Ok(entity) => entity,
            Err(e) => {
                warn!(entity_id = %entity_id, error = %e, "Cache entity lookup failed");
                None
            }
        }
    }

    /// TTL for a response routed through `rule`: the rule's own, then the
    /// config default, then the process default. Zero at any level means
    /// do not cache.
    pub fn effective_ttl(&self, config: &DomainConfig, rule: &Rule) -> Option<Duration> {
        rule.expire_after()
            .or_else(|| config.default_expiry())
            .or(self.default_ttl)
            .filter(|ttl| !ttl.is_zero())
    }

    pub async fn commit(
        &self,
        config: &DomainConfig,
        rule: &Rule,
        key: &CacheKey,
        response: &UpstreamResponse,
    ) -> Result<Option<CacheMeta>> {
        self.commit_at(config, rule, key, response, Utc::now()).await
    }

    /// Store a fresh response. Returns the updated meta, or `None` when the
    /// response is not cacheable.
    pub async fn commit_at(
        &self,
        config: &DomainConfig,
        rule: &Rule,
        key: &CacheKey,
        response: &UpstreamResponse,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheMeta>> {
        if !is_storable(response.status) {
            debug!(cache_key = %key, status = response.status.as_u16(), "Error response not stored");
            return Ok(None);
        }

        let Some(ttl) = self.effective_ttl(config, rule) else {
            debug!(cache_key = %key, "No TTL applies, not storing");
            return Ok(None);
        };

        let ttl = TimeDelta::from_std(ttl)
            .map_err(|e| VestibuleError::Config(format!("TTL out of range: {}", e)))?;
        let expire_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| VestibuleError::Config("TTL overflows the calendar".into()))?;

        let meta = bounded(
            self.storage_timeout,
            "cache meta upsert",
            self.store
                .upsert_cache_meta(CacheMeta::new(config.id, key, expire_at)),
        )
        .await?;

        let entity = CacheEntity::new(meta.id, response.status, &response.headers, response.body.clone());
        let entity_id = bounded(
            self.storage_timeout,
            "cache entity insert",
            self.store.put_cache_entity(entity),
        )
        .await?;

        bounded(
            self.storage_timeout,
            "cache meta update",
            self.store.update_cache_meta(&meta.id, &entity_id, expire_at),
        )
        .await?;

        debug!(
            config_id = %config.id,
            cache_key = %key,
            meta_id = %meta.id,
            ttl_secs = ttl.num_seconds(),
            "Response cached"
        );

        Ok(Some(CacheMeta {
            entity_id: Some(entity_id),
            expire_at,
            ..meta
        }))
    }
}
