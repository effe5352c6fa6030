//! Cache entity document schema
//!
//! The stored form of one upstream response. Headers keep their original
//! order, including repeated names.

use bson::{doc, oid::ObjectId, Document};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for cache entities
pub const CACHE_ENTITY_COLLECTION: &str = "cache_entity";

/// One header line of a stored response
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StoredHeader {
    pub name: String,
    /// Raw value bytes; values need not be UTF-8
    #[serde(with = "raw_bytes")]
    pub value: Bytes,
}

/// Cached response document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CacheEntity {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Meta record this entity was stored for
    pub meta_id: ObjectId,

    /// Upstream status code
    pub status: u16,

    /// Response headers in arrival order
    #[serde(default)]
    pub headers: Vec<StoredHeader>,

    /// Raw response body
    #[serde(default, with = "raw_bytes")]
    pub body: Bytes,
}

impl Default for CacheEntity {
    fn default() -> Self {
        Self {
            id: ObjectId::new(),
            metadata: Metadata::new(),
            meta_id: ObjectId::new(),
            status: StatusCode::OK.as_u16(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }
}

impl CacheEntity {
    /// Capture a response for storage
    pub fn new(meta_id: ObjectId, status: StatusCode, headers: &HeaderMap, body: Bytes) -> Self {
        let headers = headers
            .iter()
            .map(|(name, value)| StoredHeader {
                name: name.as_str().to_string(),
                value: Bytes::copy_from_slice(value.as_bytes()),
            })
            .collect();

        Self {
            id: ObjectId::new(),
            metadata: Metadata::new(),
            meta_id,
            status: status.as_u16(),
            headers,
            body,
        }
    }

    /// Only non-error responses may be replayed from cache
    pub fn is_servable(&self) -> bool {
        self.status < 400
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK)
    }

    /// Rebuild the header map, skipping lines that no longer parse
    pub fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for header in &self.headers {
            match (
                HeaderName::from_bytes(header.name.as_bytes()),
                HeaderValue::from_bytes(&header.value),
            ) {
                (Ok(name), Ok(value)) => {
                    map.append(name, value);
                }
                _ => warn!(header = %header.name, "Dropping unparseable stored header"),
            }
        }
        map
    }

    /// Status, headers and body of the stored response
    pub fn to_response(&self) -> (StatusCode, HeaderMap, Bytes) {
        (self.status_code(), self.header_map(), self.body.clone())
    }
}

impl IntoIndexes for CacheEntity {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "meta_id": 1 },
            Some(
                IndexOptions::builder()
                    .name("meta_id_index".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for CacheEntity {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

/// Serialize bytes as BSON binary instead of an array of integers
mod raw_bytes {
    use bytes::Bytes;
    use serde::de::{self, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(body)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        deserializer.deserialize_byte_buf(BodyVisitor)
    }

    struct BodyVisitor;

    impl<'de> Visitor<'de> for BodyVisitor {
        type Value = Bytes;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a byte buffer")
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Bytes, E> {
            Ok(Bytes::copy_from_slice(v))
        }

        fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Bytes, E> {
            Ok(Bytes::from(v))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Bytes, E> {
            Ok(Bytes::copy_from_slice(v.as_bytes()))
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Bytes, A::Error> {
            let mut buf = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(byte) = seq.next_element::<u8>()? {
                buf.push(byte);
            }
            Ok(Bytes::from(buf))
        }
    }
}
