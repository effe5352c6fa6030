//! Proxy orchestration: per-request flow and the upstream client

pub mod service;
pub mod upstream;

pub use service::{
    build_url, normalize_host, CacheStatus, InboundRequest, ProxiedResponse, ProxyService,
    ProxySettings, CACHE_STATUS_HEADER,
};
pub use upstream::{strip_hop_by_hop, HttpUpstream, UpstreamClient, UpstreamResponse};
