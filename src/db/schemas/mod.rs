//! Database schemas for Vestibule
//!
//! Defines MongoDB document structures for tenants, domain configs and the
//! two halves of a cache record.

mod cache_entity;
mod cache_meta;
mod domain_config;
mod metadata;
mod tenant;

pub use cache_entity::{CacheEntity, StoredHeader, CACHE_ENTITY_COLLECTION};
pub use cache_meta::{CacheMeta, CACHE_META_COLLECTION};
pub use domain_config::{DomainConfig, CONFIG_COLLECTION, MUTATING_METHODS};
pub use metadata::Metadata;
pub use tenant::{TenantDoc, TENANT_COLLECTION};
