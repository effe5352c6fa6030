//! Vestibule - multi-tenant caching reverse proxy
//!
//! Each inbound host maps to a tenant's domain config. The config's rules
//! rewrite the request path onto a proxy domain, and the response is served
//! from or stored in a MongoDB-backed cache.
//!
//! ## Layers
//!
//! - **routing**: rule matching and path rewriting
//! - **cache**: key derivation and the serve/fetch decision
//! - **proxy**: the per-request flow and the upstream client
//! - **store**: tenant, config and cache persistence (MongoDB or memory)
//! - **server**: HTTP and HTTPS listeners

pub mod cache;
pub mod config;
pub mod db;
pub mod logging;
pub mod proxy;
pub mod routing;
pub mod server;
pub mod store;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{Result, VestibuleError};
