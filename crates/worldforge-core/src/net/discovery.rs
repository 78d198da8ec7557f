//! Service discovery against a Consul-compatible registry.
//!
//! Logical names resolve through `GET /v1/health/service/{name}?passing=true`;
//! the first healthy instance wins and is cached for a short TTL. Any
//! failure — registry unreachable, bad status, empty instance list — falls
//! back to `{name}:50051` so the worker keeps functioning in environments
//! where DNS already routes service names (compose, k8s).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::DiscoveryError;

/// How long a resolved address stays valid.
const CACHE_TTL: Duration = Duration::from_secs(30);

/// Port assumed when falling back to DNS-based addressing.
const DEFAULT_GRPC_PORT: u16 = 50051;

#[derive(Debug, Deserialize)]
struct HealthEntry {
    #[serde(rename = "Service")]
    service: HealthService,
}

#[derive(Debug, Deserialize)]
struct HealthService {
    #[serde(rename = "Address", default)]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
}

#[derive(Debug, Clone)]
struct CachedAddress {
    address: String,
    resolved_at: Instant,
}

/// Resolver with a TTL cache in front of the registry.
pub struct ServiceDiscovery {
    http: reqwest::Client,
    registry_base: String,
    cache: RwLock<HashMap<String, CachedAddress>>,
}

impl ServiceDiscovery {
    pub fn new(http: reqwest::Client, consul_host: &str, consul_port: u16) -> Self {
        Self {
            http,
            registry_base: format!("http://{consul_host}:{consul_port}"),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a logical service name to `host:port`.
    ///
    /// Never fails: registry problems degrade to the DNS fallback address,
    /// which is also cached so an unreachable registry is not hammered.
    pub async fn resolve(&self, service: &str) -> String {
        if let Some(cached) = self.cached(service).await {
            return cached;
        }

        let address = match self.query(service).await {
            Ok(address) => {
                tracing::info!(service, %address, "resolved service via registry");
                address
            }
            Err(err) => {
                let fallback = format!("{service}:{DEFAULT_GRPC_PORT}");
                tracing::warn!(
                    service,
                    error = %err,
                    %fallback,
                    "service discovery failed, falling back to DNS addressing",
                );
                fallback
            }
        };

        self.cache.write().await.insert(
            service.to_string(),
            CachedAddress {
                address: address.clone(),
                resolved_at: Instant::now(),
            },
        );
        address
    }

    async fn cached(&self, service: &str) -> Option<String> {
        let cache = self.cache.read().await;
        cache
            .get(service)
            .filter(|entry| entry.resolved_at.elapsed() < CACHE_TTL)
            .map(|entry| entry.address.clone())
    }

    async fn query(&self, service: &str) -> Result<String, DiscoveryError> {
        let url = format!("{}/v1/health/service/{service}", self.registry_base);
        let response = self
            .http
            .get(&url)
            .query(&[("passing", "true")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DiscoveryError::BadStatus {
                status: response.status().as_u16(),
            });
        }

        let entries: Vec<HealthEntry> = response.json().await?;
        let entry = entries.first().ok_or_else(|| DiscoveryError::NoInstances {
            service: service.to_string(),
        })?;

        // Registrations without an address mean "reach me by service name".
        let host = if entry.service.address.is_empty() {
            service
        } else {
            entry.service.address.as_str()
        };
        Ok(format!("{host}:{}", entry.service.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn discovery_for(server: &MockServer) -> ServiceDiscovery {
        let url = server.uri();
        let host_port = url.trim_start_matches("http://");
        let (host, port) = host_port.split_once(':').expect("host:port");
        ServiceDiscovery::new(reqwest::Client::new(), host, port.parse().expect("port"))
    }

    #[tokio::test]
    async fn resolves_first_healthy_instance() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/health/service/character-service"))
            .and(query_param("passing", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"Service": {"Address": "10.0.0.7", "Port": 50052}},
                {"Service": {"Address": "10.0.0.8", "Port": 50052}}
            ])))
            .mount(&server)
            .await;

        let discovery = discovery_for(&server);
        let address = discovery.resolve("character-service").await;
        assert_eq!(address, "10.0.0.7:50052");
    }

    #[tokio::test]
    async fn empty_address_uses_service_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/health/service/media-service"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"Service": {"Address": "", "Port": 50051}}
            ])))
            .mount(&server)
            .await;

        let discovery = discovery_for(&server);
        assert_eq!(discovery.resolve("media-service").await, "media-service:50051");
    }

    #[tokio::test]
    async fn empty_list_falls_back_to_dns() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/health/service/post-service"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let discovery = discovery_for(&server);
        assert_eq!(discovery.resolve("post-service").await, "post-service:50051");
    }

    #[tokio::test]
    async fn registry_error_falls_back_to_dns() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/health/service/world-service"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let discovery = discovery_for(&server);
        assert_eq!(discovery.resolve("world-service").await, "world-service:50051");
    }

    #[tokio::test]
    async fn second_resolution_is_served_from_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/health/service/world-service"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"Service": {"Address": "10.1.1.1", "Port": 50051}}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let discovery = discovery_for(&server);
        assert_eq!(discovery.resolve("world-service").await, "10.1.1.1:50051");
        assert_eq!(discovery.resolve("world-service").await, "10.1.1.1:50051");
    }
}
