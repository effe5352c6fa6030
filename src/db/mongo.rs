//! MongoDB client and collection wrapper
//!
//! One `MongoClient` is built at startup and handed to the stores that need
//! it; collections are typed by their schema and apply the schema's indexes
//! when opened.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::{
    options::{IndexOptions, ReturnDocument, UpdateModifications},
    results::UpdateResult,
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, info};

use crate::db::schemas::Metadata;
use crate::types::{Result, VestibuleError};

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas with mutable metadata
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Connect and verify the server answers a ping
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Fail fast instead of hanging on an unreachable server
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| VestibuleError::Storage(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| VestibuleError::Storage(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + Default + IntoIndexes + MutMetadata,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + Default + IntoIndexes + MutMetadata,
{
    /// Open a collection and apply its indexes
    pub async fn new(client: &Client, db_name: &str, collection_name: &str) -> Result<Self> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;
        debug!(collection = collection_name, "Collection ready");

        Ok(mongo_collection)
    }

    async fn apply_indexes(&self) -> Result<()> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| VestibuleError::Storage(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    /// Insert a document, setting metadata timestamps
    pub async fn insert_one(&self, mut item: T) -> Result<ObjectId> {
        stamp_new(item.mut_metadata());

        let result = self
            .inner
            .insert_one(item)
            .await
            .map_err(|e| VestibuleError::Storage(format!("Insert failed: {}", e)))?;

        result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| VestibuleError::Storage("Failed to get inserted ID".into()))
    }

    /// Insert `item` unless a document matching `filter` exists; return
    /// whichever document is stored afterwards.
    ///
    /// The filter must cover a unique index. Two racing callers both issue an
    /// upsert; the loser either sees the winner's document or hits the unique
    /// index, in which case the winner's document is read back.
    pub async fn upsert_on_insert(&self, filter: Document, mut item: T) -> Result<T> {
        stamp_new(item.mut_metadata());

        let mut fields = bson::to_document(&item)?;
        // Equality fields of the filter are copied into the new document by
        // the server; repeating them in $setOnInsert is a conflict.
        for key in filter.keys() {
            fields.remove(key);
        }

        let outcome = self
            .inner
            .find_one_and_update(filter.clone(), doc! { "$setOnInsert": fields })
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await;

        match outcome {
            Ok(Some(stored)) => Ok(stored),
            Ok(None) => Err(VestibuleError::Storage(
                "Upsert returned no document".into(),
            )),
            Err(e) => {
                debug!(error = %e, "Upsert lost a race, reading back the winner");
                match self.inner.find_one(filter).await {
                    Ok(Some(existing)) => Ok(existing),
                    _ => Err(VestibuleError::Storage(format!("Upsert failed: {}", e))),
                }
            }
        }
    }

    /// Find one live document by filter
    pub async fn find_one(&self, filter: Document) -> Result<Option<T>> {
        let mut full_filter = filter;
        full_filter.insert("metadata.is_deleted", doc! { "$ne": true });

        self.inner
            .find_one(full_filter)
            .await
            .map_err(|e| VestibuleError::Storage(format!("Find failed: {}", e)))
    }

    /// Find all live documents matching a filter
    pub async fn find_many(&self, filter: Document) -> Result<Vec<T>> {
        use futures_util::StreamExt;

        let mut full_filter = filter;
        full_filter.insert("metadata.is_deleted", doc! { "$ne": true });

        let cursor = self
            .inner
            .find(full_filter)
            .await
            .map_err(|e| VestibuleError::Storage(format!("Find failed: {}", e)))?;

        let results: Vec<T> = cursor
            .filter_map(|doc| async {
                match doc {
                    Ok(d) => Some(d),
                    Err(e) => {
                        error!("Error reading document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(results)
    }

    /// Update one document
    pub async fn update_one(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<UpdateResult> {
        self.inner
            .update_one(filter, update.into())
            .await
            .map_err(|e| VestibuleError::Storage(format!("Update failed: {}", e)))
    }

    /// Replace one document wholesale
    pub async fn replace_one(&self, filter: Document, item: T) -> Result<UpdateResult> {
        self.inner
            .replace_one(filter, item)
            .await
            .map_err(|e| VestibuleError::Storage(format!("Replace failed: {}", e)))
    }

    /// Set fields on one document and bump its update timestamp
    pub async fn set_fields(&self, filter: Document, mut fields: Document) -> Result<UpdateResult> {
        fields.insert("metadata.updated_at", DateTime::now());
        self.update_one(filter, doc! { "$set": fields }).await
    }

    /// Soft delete a document
    pub async fn soft_delete(&self, filter: Document) -> Result<UpdateResult> {
        let now = DateTime::now();
        let update = doc! {
            "$set": {
                "metadata.is_deleted": true,
                "metadata.deleted_at": now,
                "metadata.updated_at": now,
            }
        };

        self.update_one(filter, update).await
    }
}

fn stamp_new(metadata: &mut Metadata) {
    let now = DateTime::now();
    metadata.is_deleted = false;
    metadata.deleted_at = None;
    metadata.created_at = Some(now);
    metadata.updated_at = Some(now);
}
