//! Tenant document schema
//!
//! A tenant is the account boundary that owns domain configs. The external
//! reference links it to the account record of whatever system provisions it.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for tenants
pub const TENANT_COLLECTION: &str = "tenants";

/// Tenant document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct TenantDoc {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Account identifier in the provisioning system
    pub external_ref: String,
}

impl TenantDoc {
    pub fn new(external_ref: impl Into<String>) -> Self {
        Self {
            id: ObjectId::new(),
            metadata: Metadata::new(),
            external_ref: external_ref.into(),
        }
    }
}

impl IntoIndexes for TenantDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "external_ref": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    // Soft-deleted tenants release their reference
                    .partial_filter_expression(doc! { "metadata.is_deleted": false })
                    .name("external_ref_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for TenantDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
