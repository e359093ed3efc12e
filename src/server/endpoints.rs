//! Health, readiness and metrics endpoints

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hyper::{Method, StatusCode, Uri};
use serde::Serialize;
use tracing::{error, warn};

use super::listener::{reply, text, Endpoint, HttpResponse};
use crate::cache::FingerprintCache;
use crate::domain::ports::OrderStore;
use crate::error::within;
use crate::metrics::ServiceMetrics;

/// Readiness flag flipped once warm start has finished.
#[derive(Debug, Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_ready(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    time: String,
}

fn health_json(status: StatusCode, label: &'static str) -> HttpResponse {
    let body = HealthBody {
        status: label,
        time: chrono::Utc::now().to_rfc3339(),
    };
    match serde_json::to_vec(&body) {
        Ok(json) => reply(status, "application/json", json),
        Err(e) => {
            error!(error = %e, "Failed to encode health body");
            text(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// `/healthz`, `/livez` and `/readyz`.
///
/// Ready means warm start has finished and the store answers its health
/// check within `check_timeout`.
pub struct HealthEndpoint {
    readiness: Readiness,
    store: Arc<dyn OrderStore>,
    check_timeout: Duration,
}

impl HealthEndpoint {
    pub fn new(readiness: Readiness, store: Arc<dyn OrderStore>, check_timeout: Duration) -> Self {
        Self {
            readiness,
            store,
            check_timeout,
        }
    }

    async fn ready(&self) -> HttpResponse {
        if !self.readiness.is_ready() {
            return health_json(StatusCode::SERVICE_UNAVAILABLE, "warming");
        }

        match within(self.check_timeout, "health_check", self.store.health_check()).await {
            Ok(()) => health_json(StatusCode::OK, "ready"),
            Err(e) => {
                warn!(error = %e, "Store health check failed");
                health_json(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
            }
        }
    }
}

#[async_trait]
impl Endpoint for HealthEndpoint {
    fn name(&self) -> &'static str {
        "health"
    }

    async fn respond(&self, _method: &Method, uri: &Uri) -> HttpResponse {
        match uri.path() {
            "/healthz" | "/livez" => health_json(StatusCode::OK, "ok"),
            "/readyz" => self.ready().await,
            _ => text(StatusCode::NOT_FOUND, "not found"),
        }
    }
}

/// `/metrics` in the Prometheus text format.
///
/// The cache-entries gauge is refreshed on every scrape, so entries reclaimed
/// by the TTL sweep drop out of it.
pub struct MetricsEndpoint {
    metrics: ServiceMetrics,
    cache: Arc<FingerprintCache>,
}

impl MetricsEndpoint {
    pub fn new(metrics: ServiceMetrics, cache: Arc<FingerprintCache>) -> Self {
        Self { metrics, cache }
    }
}

#[async_trait]
impl Endpoint for MetricsEndpoint {
    fn name(&self) -> &'static str {
        "metrics"
    }

    async fn respond(&self, _method: &Method, uri: &Uri) -> HttpResponse {
        if uri.path() != "/metrics" {
            return text(StatusCode::NOT_FOUND, "not found");
        }

        self.metrics.set_cache_entries(self.cache.len());
        match self.metrics.encode() {
            Ok((content_type, body)) => {
                let mut response = text(StatusCode::OK, body);
                if let Ok(value) = content_type.parse() {
                    response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
                }
                response
            }
            Err(e) => {
                error!(error = %e, "Failed to encode metrics");
                text(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryOrderStore;
    use crate::cache::{CacheConfig, CacheMode};
    use http_body_util::BodyExt;

    async fn body_string(response: HttpResponse) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn health(readiness: Readiness) -> (HealthEndpoint, Arc<InMemoryOrderStore>) {
        let store = Arc::new(InMemoryOrderStore::new());
        let endpoint = HealthEndpoint::new(readiness, store.clone(), Duration::from_secs(1));
        (endpoint, store)
    }

    #[tokio::test]
    async fn test_readyz_follows_readiness() {
        let readiness = Readiness::new();
        let (endpoint, _store) = health(readiness.clone());
        let uri: Uri = "/readyz".parse().unwrap();

        let response = endpoint.respond(&Method::GET, &uri).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(body_string(response).await.contains("\"status\":\"warming\""));

        readiness.mark_ready();
        let response = endpoint.respond(&Method::GET, &uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.contains("\"status\":\"ready\""));
    }

    #[tokio::test]
    async fn test_readyz_requires_reachable_store() {
        let readiness = Readiness::new();
        readiness.mark_ready();
        let (endpoint, store) = health(readiness);
        let uri: Uri = "/readyz".parse().unwrap();

        store.set_failing(true);
        let response = endpoint.respond(&Method::GET, &uri).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(body_string(response).await.contains("store_unavailable"));

        // Liveness does not depend on the store
        let response = endpoint.respond(&Method::GET, &"/livez".parse().unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);

        store.set_failing(false);
        let response = endpoint.respond(&Method::GET, &uri).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_healthz_is_json() {
        let (endpoint, _store) = health(Readiness::new());
        let response = endpoint.respond(&Method::GET, &"/healthz".parse().unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[hyper::header::CONTENT_TYPE], "application/json");

        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["status"], "ok");
        assert!(body["time"].is_string());
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let metrics = ServiceMetrics::new().unwrap();
        metrics.record_lookup("cache");
        let endpoint = MetricsEndpoint::new(metrics, FingerprintCache::unbounded(CacheMode::Payload));

        let response = endpoint.respond(&Method::GET, &"/metrics".parse().unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.contains("ordercache_lookup_total{source=\"cache\"} 1"));

        let response = endpoint.respond(&Method::GET, &"/other".parse().unwrap()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_gauge_drops_after_sweep() {
        let metrics = ServiceMetrics::new().unwrap();
        let cache = FingerprintCache::new(CacheConfig {
            mode: CacheMode::Presence,
            ttl: Some(Duration::from_secs(10)),
        })
        .unwrap();
        // Sweep by hand only
        cache.shutdown().await;
        cache.set("A1", None);
        cache.set("B2", None);
        metrics.set_cache_entries(cache.len());
        let endpoint = MetricsEndpoint::new(metrics.clone(), cache.clone());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.sweep_expired(), 2);

        let response = endpoint.respond(&Method::GET, &"/metrics".parse().unwrap()).await;
        assert!(body_string(response).await.contains("ordercache_cache_entries 0"));
        assert_eq!(metrics.cache_entries(), 0);
    }
}
