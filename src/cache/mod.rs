//! Response caching: key derivation and the cache decision layer

pub mod decision;
pub mod keys;

pub use decision::{is_storable, CacheDecider, Decision};
pub use keys::{CacheKey, CacheKeyPolicy};
