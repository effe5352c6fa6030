//! End-to-end proxy flow against the in-memory store and a scripted origin

use async_trait::async_trait;
use bson::oid::ObjectId;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vestibule::cache::{CacheKey, CacheKeyPolicy};
use vestibule::db::schemas::{CacheEntity, CacheMeta, DomainConfig};
use vestibule::proxy::{
    CacheStatus, InboundRequest, ProxyService, ProxySettings, UpstreamClient, UpstreamResponse,
};
use vestibule::routing::Rule;
use vestibule::store::{CacheStore, ConfigStore, MemoryStore};
use vestibule::{Result, VestibuleError};

/// One scripted origin reply
enum Reply {
    Ok(StatusCode, &'static str),
    Refused,
    TimedOut,
}

/// Origin that plays back queued replies, then answers 200 with a
/// body naming the URL it was asked for
struct ScriptedOrigin {
    script: Mutex<VecDeque<Reply>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl ScriptedOrigin {
    fn new(script: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamClient for ScriptedOrigin {
    async fn forward(
        &self,
        _method: &Method,
        url: &str,
        _headers: &HeaderMap,
        _body: Bytes,
        _timeout: Duration,
    ) -> Result<UpstreamResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.append("x-origin", HeaderValue::from_static("one"));
        headers.append("x-origin", HeaderValue::from_static("two"));

        match next {
            Some(Reply::Ok(status, body)) => Ok(UpstreamResponse::new(status, headers, body)),
            Some(Reply::Refused) => Err(VestibuleError::UpstreamTransport("connection refused".into())),
            Some(Reply::TimedOut) => Err(VestibuleError::UpstreamTimeout(format!("{} after 10000ms", url))),
            None => Ok(UpstreamResponse::new(StatusCode::OK, headers, format!("{{\"url\":\"{}\"}}", url))),
        }
    }
}

fn get(host: &str, uri: &str) -> InboundRequest {
    request(Method::GET, host, uri)
}

fn request(method: Method, host: &str, uri: &str) -> InboundRequest {
    InboundRequest {
        method,
        host: host.to_string(),
        uri: uri.parse().unwrap(),
        headers: HeaderMap::new(),
        body: Bytes::new(),
        tls: false,
    }
}

async fn proxy_with(
    origin: Arc<ScriptedOrigin>,
    config: DomainConfig,
    default_ttl: Option<Duration>,
) -> (ProxyService, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    store.save_config(config).await.unwrap();

    let proxy = ProxyService::new(
        store.clone(),
        store.clone(),
        origin,
        default_ttl,
        ProxySettings::default(),
    );
    (proxy, store)
}

fn posts_config() -> DomainConfig {
    DomainConfig::new(
        ObjectId::new(),
        "a.example",
        "b.example",
        CacheKeyPolicy::default(),
        vec![
            Rule::new("posts/*", "v2/posts/*").unwrap().with_priority(1),
            Rule::new("index", "home.html").unwrap().as_default(),
        ],
    )
}

#[tokio::test]
async fn miss_then_hit_serves_identical_response() {
    let origin = ScriptedOrigin::new(vec![]);
    let config = posts_config().with_default_expiry(Duration::from_secs(60));
    let (proxy, store) = proxy_with(origin.clone(), config, None).await;

    let first = proxy.handle(get("a.example", "/posts/42")).await.unwrap();
    assert_eq!(first.cache, CacheStatus::Miss);
    assert_eq!(first.upstream_url, "http://b.example/v2/posts/42");
    assert_eq!(first.body, Bytes::from_static(b"{\"url\":\"http://b.example/v2/posts/42\"}"));

    let second = proxy.handle(get("A.EXAMPLE:10080", "/posts/42")).await.unwrap();
    assert_eq!(second.cache, CacheStatus::Hit);
    assert_eq!(second.status, first.status);
    assert_eq!(second.body, first.body);
    assert_eq!(second.headers, first.headers);
    let origins: Vec<_> = second.headers.get_all("x-origin").iter().collect();
    assert_eq!(origins, ["one", "two"]);

    assert_eq!(origin.calls(), 1);
    assert_eq!(store.meta_count(), 1);
    assert_eq!(store.entity_count(), 1);
}

#[tokio::test]
async fn stale_entry_served_when_origin_fails() {
    let origin = ScriptedOrigin::new(vec![
        Reply::Ok(StatusCode::OK, "fresh"),
        Reply::Refused,
        Reply::Ok(StatusCode::SERVICE_UNAVAILABLE, "down"),
    ]);
    let (proxy, _) = proxy_with(origin.clone(), posts_config(), Some(Duration::from_millis(50))).await;

    let first = proxy.handle(get("a.example", "/posts/7")).await.unwrap();
    assert_eq!(first.cache, CacheStatus::Miss);

    tokio::time::sleep(Duration::from_millis(120)).await;

    let refused = proxy.handle(get("a.example", "/posts/7")).await.unwrap();
    assert_eq!(refused.cache, CacheStatus::Stale);
    assert_eq!(refused.status, StatusCode::OK);
    assert_eq!(refused.body, Bytes::from_static(b"fresh"));

    let unavailable = proxy.handle(get("a.example", "/posts/7")).await.unwrap();
    assert_eq!(unavailable.cache, CacheStatus::Stale);
    assert_eq!(unavailable.body, Bytes::from_static(b"fresh"));

    assert_eq!(origin.calls(), 3);
}

#[tokio::test]
async fn origin_failure_without_cache_is_an_error() {
    let origin = ScriptedOrigin::new(vec![Reply::Refused]);
    let (proxy, store) = proxy_with(origin, posts_config(), Some(Duration::from_secs(60))).await;

    let result = proxy.handle(get("a.example", "/posts/1")).await;
    assert!(matches!(result, Err(VestibuleError::UpstreamTransport(_))));
    assert_eq!(store.entity_count(), 0);
}

#[tokio::test]
async fn mutating_methods_bypass_the_cache() {
    let origin = ScriptedOrigin::new(vec![]);
    let (proxy, store) = proxy_with(origin.clone(), posts_config(), Some(Duration::from_secs(60))).await;

    for _ in 0..2 {
        let reply = proxy
            .handle(request(Method::POST, "a.example", "/posts/1"))
            .await
            .unwrap();
        assert_eq!(reply.cache, CacheStatus::Bypass);
    }

    assert_eq!(origin.calls(), 2);
    assert_eq!(store.meta_count(), 0);
    assert_eq!(store.entity_count(), 0);
}

#[tokio::test]
async fn concurrent_cold_requests_share_one_meta() {
    let origin = ScriptedOrigin::slow(Duration::from_millis(20));
    let (proxy, store) = proxy_with(origin.clone(), posts_config(), Some(Duration::from_secs(60))).await;

    let requests = (0..8).map(|_| proxy.handle(get("a.example", "/posts/99")));
    let replies = futures::future::join_all(requests).await;

    for reply in replies {
        assert_eq!(reply.unwrap().status, StatusCode::OK);
    }
    assert_eq!(store.meta_count(), 1);

    let after = proxy.handle(get("a.example", "/posts/99")).await.unwrap();
    assert_eq!(after.cache, CacheStatus::Hit);
}

#[tokio::test]
async fn default_rule_and_no_route() {
    let origin = ScriptedOrigin::new(vec![]);
    let (proxy, _) = proxy_with(origin.clone(), posts_config(), None).await;

    let reply = proxy.handle(get("a.example", "/about")).await.unwrap();
    assert_eq!(reply.upstream_url, "http://b.example/home.html");
    // No TTL anywhere, so nothing is kept
    let again = proxy.handle(get("a.example", "/about")).await.unwrap();
    assert_eq!(again.cache, CacheStatus::Miss);

    let bare = DomainConfig::new(
        ObjectId::new(),
        "c.example",
        "d.example",
        CacheKeyPolicy::default(),
        vec![Rule::new("posts/*", "v2/posts/*").unwrap()],
    );
    let (proxy, _) = proxy_with(origin, bare, None).await;
    let result = proxy.handle(get("c.example", "/about")).await;
    assert!(matches!(result, Err(VestibuleError::NoRouteMatched(_))));
}

#[tokio::test]
async fn header_keys_split_cache_entries() {
    let origin = ScriptedOrigin::new(vec![]);
    let mut config = posts_config().with_default_expiry(Duration::from_secs(60));
    config.cache_key_policy = CacheKeyPolicy::new(vec!["Accept".into()], true);
    let (proxy, store) = proxy_with(origin.clone(), config, None).await;

    for accept in ["application/json", "text/html", "application/json"] {
        let mut req = get("a.example", "/posts/5");
        req.headers.insert("accept", HeaderValue::from_static(accept));
        proxy.handle(req).await.unwrap();
    }

    assert_eq!(origin.calls(), 2);
    assert_eq!(store.meta_count(), 2);
}

#[tokio::test]
async fn stale_entry_served_when_origin_times_out() {
    let origin = ScriptedOrigin::new(vec![Reply::Ok(StatusCode::OK, "fresh"), Reply::TimedOut]);
    let (proxy, _) = proxy_with(origin.clone(), posts_config(), Some(Duration::from_millis(50))).await;

    let first = proxy.handle(get("a.example", "/posts/3")).await.unwrap();
    assert_eq!(first.cache, CacheStatus::Miss);

    tokio::time::sleep(Duration::from_millis(120)).await;

    let reply = proxy.handle(get("a.example", "/posts/3")).await.unwrap();
    assert_eq!(reply.cache, CacheStatus::Stale);
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, Bytes::from_static(b"fresh"));
    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn origin_timeout_without_cache_is_gateway_timeout() {
    let origin = ScriptedOrigin::new(vec![Reply::TimedOut]);
    let (proxy, _) = proxy_with(origin, posts_config(), Some(Duration::from_secs(60))).await;

    let err = proxy.handle(get("a.example", "/posts/3")).await.unwrap_err();
    assert!(matches!(err, VestibuleError::UpstreamTimeout(_)));
    assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
}

/// Cache store that finds nothing and refuses every write
struct ReadOnlyCache;

#[async_trait]
impl CacheStore for ReadOnlyCache {
    async fn get_cache_meta(&self, _config_id: &ObjectId, _key: &CacheKey) -> Result<Option<CacheMeta>> {
        Ok(None)
    }

    async fn upsert_cache_meta(&self, _initial: CacheMeta) -> Result<CacheMeta> {
        Err(VestibuleError::Storage("cache store is read-only".into()))
    }

    async fn update_cache_meta(
        &self,
        _id: &ObjectId,
        _entity_id: &ObjectId,
        _expire_at: DateTime<Utc>,
    ) -> Result<()> {
        Err(VestibuleError::Storage("cache store is read-only".into()))
    }

    async fn get_cache_entity(&self, _id: &ObjectId) -> Result<Option<CacheEntity>> {
        Ok(None)
    }

    async fn put_cache_entity(&self, _entity: CacheEntity) -> Result<ObjectId> {
        Err(VestibuleError::Storage("cache store is read-only".into()))
    }
}

#[tokio::test]
async fn failed_commit_still_returns_fresh_reply() {
    let origin = ScriptedOrigin::new(vec![]);
    let configs = Arc::new(MemoryStore::new());
    configs.save_config(posts_config()).await.unwrap();
    let proxy = ProxyService::new(
        configs,
        Arc::new(ReadOnlyCache),
        origin.clone(),
        Some(Duration::from_secs(60)),
        ProxySettings::default(),
    );

    for _ in 0..2 {
        let reply = proxy.handle(get("a.example", "/posts/8")).await.unwrap();
        assert_eq!(reply.cache, CacheStatus::Miss);
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body, Bytes::from_static(b"{\"url\":\"http://b.example/v2/posts/8\"}"));
    }
    assert_eq!(origin.calls(), 2);
}

/// Config store that fails or stalls on every lookup
struct UnavailableConfigs {
    stall: Option<Duration>,
}

#[async_trait]
impl ConfigStore for UnavailableConfigs {
    async fn get_config_by_domain(&self, _domain: &str) -> Result<Option<DomainConfig>> {
        match self.stall {
            Some(stall) => {
                tokio::time::sleep(stall).await;
                Ok(Some(posts_config()))
            }
            None => Err(VestibuleError::Storage("connection reset".into())),
        }
    }

    async fn get_config(&self, _id: &ObjectId) -> Result<Option<DomainConfig>> {
        Err(VestibuleError::Storage("connection reset".into()))
    }

    async fn save_config(&self, _config: DomainConfig) -> Result<DomainConfig> {
        Err(VestibuleError::Storage("connection reset".into()))
    }

    async fn list_configs(&self, _tenant_id: &ObjectId) -> Result<Vec<DomainConfig>> {
        Err(VestibuleError::Storage("connection reset".into()))
    }
}

#[tokio::test]
async fn config_store_failure_fails_the_request() {
    for stall in [None, Some(Duration::from_secs(5))] {
        let origin = ScriptedOrigin::new(vec![]);
        let proxy = ProxyService::new(
            Arc::new(UnavailableConfigs { stall }),
            Arc::new(MemoryStore::new()),
            origin.clone(),
            Some(Duration::from_secs(60)),
            ProxySettings {
                upstream_timeout: Duration::from_secs(1),
                storage_timeout: Duration::from_millis(50),
            },
        );

        let err = proxy.handle(get("a.example", "/posts/1")).await.unwrap_err();
        assert!(matches!(err, VestibuleError::Storage(_)), "got {:?}", err);
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(origin.calls(), 0);
    }
}
