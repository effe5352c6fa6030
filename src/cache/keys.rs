//! Cache key derivation
//!
//! A cache key identifies one request shape within a domain config: the
//! selected header values, the method and (optionally) the full URL,
//! hashed into a fixed-length hex string safe to use as an index key.

use http::HeaderMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Which request parts participate in the cache key
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheKeyPolicy {
    /// Header names whose values are part of the key, in declared order
    #[serde(default)]
    pub header_keys: Vec<String>,

    /// Whether the full request URL is part of the key
    #[serde(default)]
    pub use_url: bool,
}

impl CacheKeyPolicy {
    /// Create a policy
    pub fn new(header_keys: Vec<String>, use_url: bool) -> Self {
        Self {
            header_keys,
            use_url,
        }
    }

    /// Header names lower-cased, declared order preserved
    pub fn normalized_header_keys(&self) -> impl Iterator<Item = String> + '_ {
        self.header_keys.iter().map(|name| name.trim().to_ascii_lowercase())
    }
}

/// Opaque cache identity of a request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a request.
    ///
    /// Components are hashed in a fixed order: header values (in the
    /// policy's declared order), method, then URL when the policy uses it.
    /// Each component is length-prefixed so adjacent values cannot run into
    /// each other.
    pub fn compute(method: &str, url: &str, headers: &HeaderMap, policy: &CacheKeyPolicy) -> Self {
        let mut hasher = Sha256::new();

        for name in policy.normalized_header_keys() {
            let values: Vec<&[u8]> = headers
                .get_all(name.as_str())
                .iter()
                .map(|v| v.as_bytes())
                .collect();

            if values.is_empty() {
                hasher.update([0u8]);
            } else {
                hasher.update([1u8]);
                update_component(&mut hasher, &values.join(&b", "[..]));
            }
        }

        update_component(&mut hasher, method.to_ascii_uppercase().as_bytes());

        if policy.use_url {
            update_component(&mut hasher, url.as_bytes());
        }

        Self(hex::encode(hasher.finalize()))
    }

    /// Wrap a key read back from storage
    pub fn from_stored(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn update_component(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
