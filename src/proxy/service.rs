//! Per-request proxy flow
//!
//! ```text
//! config lookup -> rule resolution -> key -> cache decision
//!     -> served from cache
//!     -> upstream fetch -> fresh (then commit) | stale | failed
//! ```
//!
//! Config and cache reads never mutate anything; the only writes are the
//! upstream request itself and the cache commit.

use bson::oid::ObjectId;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::upstream::{UpstreamClient, UpstreamResponse};
use crate::cache::{CacheDecider, CacheKey, Decision};
use crate::db::schemas::{CacheEntity, DomainConfig};
use crate::routing::{Rule, RuleCache};
use crate::store::{bounded, CacheStore, ConfigStore};
use crate::types::{Result, VestibuleError};

/// Name of the response header reporting the cache outcome
pub const CACHE_STATUS_HEADER: &str = "x-vestibule-cache";

/// A request as seen by the proxy, body already read
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// Host the client addressed, possibly with a port
    pub host: String,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Whether the connection was accepted by the TLS listener
    pub tls: bool,
}

impl InboundRequest {
    pub fn scheme(&self) -> &'static str {
        if self.tls {
            "https"
        } else {
            "http"
        }
    }

    /// Path handed to rule resolution: no leading slash, no query
    pub fn rule_path(&self) -> &str {
        self.uri.path().trim_start_matches('/')
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }
}

/// How a reply was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from a fresh cache entry
    Hit,
    /// Fetched from the origin
    Miss,
    /// Origin failed; served an expired entry
    Stale,
    /// Method is never cached; fetched live
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Stale => "STALE",
            Self::Bypass => "BYPASS",
        }
    }

    pub fn header_value(&self) -> HeaderValue {
        HeaderValue::from_static(self.as_str())
    }
}

/// Reply to send back to the client
#[derive(Debug, Clone)]
pub struct ProxiedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub cache: CacheStatus,
    pub upstream_url: String,
}

impl ProxiedResponse {
    fn from_upstream(response: UpstreamResponse, cache: CacheStatus, upstream_url: String) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
            cache,
            upstream_url,
        }
    }

    fn from_entity(entity: &CacheEntity, cache: CacheStatus, upstream_url: String) -> Self {
        let (status, headers, body) = entity.to_response();
        Self {
            status,
            headers,
            body,
            cache,
            upstream_url,
        }
    }
}

/// Deadlines applied to collaborator calls
#[derive(Debug, Clone, Copy)]
pub struct ProxySettings {
    pub upstream_timeout: Duration,
    pub storage_timeout: Duration,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            upstream_timeout: Duration::from_secs(10),
            storage_timeout: Duration::from_secs(1),
        }
    }
}

/// Strip a `:port` suffix and lower-case the host
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let bare = if host.starts_with('[') {
        // [v6]:port
        match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        }
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => host,
        }
    };
    bare.to_ascii_lowercase()
}

/// `scheme://host/path[?query]`
pub fn build_url(scheme: &str, host: &str, path: &str, query: Option<&str>) -> String {
    let path = path.trim_start_matches('/');
    match query {
        Some(q) if !q.is_empty() => format!("{}://{}/{}?{}", scheme, host, path, q),
        _ => format!("{}://{}/{}", scheme, host, path),
    }
}

pub struct ProxyService {
    configs: Arc<dyn ConfigStore>,
    decider: CacheDecider,
    upstream: Arc<dyn UpstreamClient>,
    rules: RuleCache,
    settings: ProxySettings,
}

impl ProxyService {
    pub fn new(
        configs: Arc<dyn ConfigStore>,
        cache: Arc<dyn CacheStore>,
        upstream: Arc<dyn UpstreamClient>,
        default_ttl: Option<Duration>,
        settings: ProxySettings,
    ) -> Self {
        Self {
            configs,
            decider: CacheDecider::new(cache, default_ttl, settings.storage_timeout),
            upstream,
            rules: RuleCache::new(),
            settings,
        }
    }

    /// Handle one request end to end
    pub async fn handle(&self, request: InboundRequest) -> Result<ProxiedResponse> {
        let config = self.load_config(&request.host).await?;

        let rules = self.rules.get_or_build(config.id, &config.rules);
        let route = rules.resolve(request.rule_path(), request.method.as_str())?;

        let scheme = request.scheme();
        let upstream_url = build_url(scheme, &config.proxy_domain, &route.path, request.query());

        if !config.is_cacheable_method(request.method.as_str()) {
            debug!(method = %request.method, url = %upstream_url, "Method not cacheable, proxying live");
            let response = self.fetch(&request, &upstream_url).await?;
            return Ok(ProxiedResponse::from_upstream(response, CacheStatus::Bypass, upstream_url));
        }

        let key_url = build_url(scheme, &config.domain, &route.path, request.query());
        let key = CacheKey::compute(
            request.method.as_str(),
            &key_url,
            &request.headers,
            &config.cache_key_policy,
        );

        let stale_entity = match self.decider.decide(&config, &key).await {
            Decision::ServeCached { meta, entity } => {
                debug!(cache_key = %key, meta_id = %meta.id, "Serving from cache");
                return Ok(ProxiedResponse::from_entity(&entity, CacheStatus::Hit, upstream_url));
            }
            Decision::FetchAndStore { stale_entity } => stale_entity,
        };

        match self.fetch(&request, &upstream_url).await {
            Ok(response) if response.status.is_server_error() => {
                if let Some(stale) = self.stale_fallback(stale_entity).await {
                    warn!(url = %upstream_url, status = response.status.as_u16(), "Origin error, serving stale entry");
                    return Ok(ProxiedResponse::from_entity(&stale, CacheStatus::Stale, upstream_url));
                }
                Ok(ProxiedResponse::from_upstream(response, CacheStatus::Miss, upstream_url))
            }
            Ok(response) => {
                self.commit(&config, &route.rule, &key, &response).await;
                Ok(ProxiedResponse::from_upstream(response, CacheStatus::Miss, upstream_url))
            }
            Err(e) if e.is_upstream_failure() => match self.stale_fallback(stale_entity).await {
                Some(stale) => {
                    warn!(url = %upstream_url, error = %e, "Origin unreachable, serving stale entry");
                    Ok(ProxiedResponse::from_entity(&stale, CacheStatus::Stale, upstream_url))
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    async fn load_config(&self, raw_host: &str) -> Result<DomainConfig> {
        let host = normalize_host(raw_host);
        if host.is_empty() {
            return Err(VestibuleError::BadRequest("Missing host".into()));
        }

        let config = bounded(
            self.settings.storage_timeout,
            "config lookup",
            self.configs.get_config_by_domain(&host),
        )
        .await?;
        config.ok_or(VestibuleError::ConfigNotFound(host))
    }

    async fn fetch(&self, request: &InboundRequest, url: &str) -> Result<UpstreamResponse> {
        self.upstream
            .forward(
                &request.method,
                url,
                &request.headers,
                request.body.clone(),
                self.settings.upstream_timeout,
            )
            .await
    }

    async fn stale_fallback(&self, stale_entity: Option<ObjectId>) -> Option<CacheEntity> {
        match stale_entity {
            Some(id) => self.decider.load_stale(&id).await,
            None => None,
        }
    }

    /// Caching is best-effort; a failed commit never fails the reply
    async fn commit(
        &self,
        config: &DomainConfig,
        rule: &Rule,
        key: &CacheKey,
        response: &UpstreamResponse,
    ) {
        if let Err(e) = self.decider.commit(config, rule, key, response).await {
            warn!(config_id = %config.id, cache_key = %key, error = %e, "Cache commit failed");
        }
    }
}
