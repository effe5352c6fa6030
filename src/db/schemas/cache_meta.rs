//! Cache meta document schema
//!
//! Expiration bookkeeping for one cache identity. At most one document
//! exists per (config_id, cache_key); the unique index below backs the
//! insert-if-absent used by the commit path.

use bson::{doc, oid::ObjectId, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::cache::CacheKey;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for cache metas
pub const CACHE_META_COLLECTION: &str = "cache_meta";

/// Cache meta document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CacheMeta {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Owning domain config
    pub config_id: ObjectId,

    /// Derived cache key
    pub cache_key: String,

    /// Entity currently holding the response, once one has been stored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<ObjectId>,

    /// Kept past expiry so an expired entry can still back stale-on-error
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub expire_at: DateTime<Utc>,
}

impl Default for CacheMeta {
    fn default() -> Self {
        Self {
            id: ObjectId::new(),
            metadata: Metadata::new(),
            config_id: ObjectId::new(),
            cache_key: String::new(),
            entity_id: None,
            expire_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

impl CacheMeta {
    /// Fresh meta with a newly generated id and no entity yet
    pub fn new(config_id: ObjectId, cache_key: &CacheKey, expire_at: DateTime<Utc>) -> Self {
        Self {
            id: ObjectId::new(),
            metadata: Metadata::new(),
            config_id,
            cache_key: cache_key.as_str().to_string(),
            entity_id: None,
            expire_at,
        }
    }

    /// Expiry is inclusive: an entry expiring exactly at `at` is expired.
    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.expire_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl IntoIndexes for CacheMeta {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "config_id": 1, "cache_key": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("config_cache_key_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for CacheMeta {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
