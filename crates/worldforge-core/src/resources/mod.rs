//! Process-wide shared resources.
//!
//! One pool per worker process: the MongoDB client, the pooled HTTP client,
//! lazily created gRPC channels, and the four permits bounding in-flight
//! LLM / image / gRPC / DB operations. The clients (LLM, image, service
//! gateway) are built on top and share everything; nothing else in the
//! crate opens a connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, Semaphore};
use tonic::transport::{Channel, Endpoint};

use crate::config::Config;
use crate::error::StorageError;
use crate::image::ImageClient;
use crate::llm::LlmClient;
use crate::net::ServiceDiscovery;
use crate::services::ServiceClient;
use crate::storage::Storage;

/// Errors raised while bringing the pool up.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The HTTP client could not be built.
    #[error("HTTP client initialization failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The document store could not be reached.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Lazy map from `host:port` to a multiplexed gRPC channel.
///
/// Channels are created on first use with HTTP/2 keep-alive pings so idle
/// connections to the domain services stay healthy, and are shared by every
/// caller addressing the same endpoint.
pub struct GrpcChannels {
    inner: RwLock<HashMap<String, Channel>>,
}

impl GrpcChannels {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch or create the channel for `host:port`.
    pub async fn get(&self, address: &str) -> Result<Channel, tonic::transport::Error> {
        if let Some(channel) = self.inner.read().await.get(address) {
            return Ok(channel.clone());
        }

        let endpoint = Endpoint::from_shared(format!("http://{address}"))?
            .connect_timeout(Duration::from_secs(10))
            .http2_keep_alive_interval(Duration::from_secs(60))
            .keep_alive_timeout(Duration::from_secs(5))
            .keep_alive_while_idle(true);
        let channel = endpoint.connect_lazy();

        let mut map = self.inner.write().await;
        // A racing caller may have inserted first; keep the existing one.
        let channel = map.entry(address.to_string()).or_insert(channel).clone();
        tracing::debug!(address, "gRPC channel ready");
        Ok(channel)
    }

    /// Drop all channels. tonic closes the connections on drop.
    pub async fn close(&self) {
        let mut map = self.inner.write().await;
        let count = map.len();
        map.clear();
        tracing::info!(channels = count, "gRPC channels closed");
    }
}

impl Default for GrpcChannels {
    fn default() -> Self {
        Self::new()
    }
}

/// The shared resources of one worker process.
pub struct ResourcePool {
    pub config: Config,
    pub http: reqwest::Client,
    pub storage: Storage,
    pub discovery: Arc<ServiceDiscovery>,
    pub channels: Arc<GrpcChannels>,
    pub services: Arc<ServiceClient>,
    pub llm: Arc<LlmClient>,
    pub images: Arc<ImageClient>,
    /// Bounds concurrently running activities per process.
    pub activity_permits: Arc<Semaphore>,
}

impl ResourcePool {
    /// Bring up every shared resource and the clients layered on them.
    pub async fn initialize(config: Config) -> Result<Arc<Self>, PoolError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(20)
            .user_agent(format!("worldforge-ai-worker/{}", crate::version()))
            .build()?;
        tracing::info!("HTTP client initialized");

        let storage = Storage::connect(&config.mongo, config.limits.max_concurrent_db_operations)
            .await?;
        storage.ensure_indexes().await?;

        let discovery = Arc::new(ServiceDiscovery::new(
            http.clone(),
            &config.consul.host,
            config.consul.port,
        ));
        let channels = Arc::new(GrpcChannels::new());

        let grpc_permits = Arc::new(Semaphore::new(config.limits.max_concurrent_grpc_calls));
        let llm_permits = Arc::new(Semaphore::new(config.limits.max_concurrent_llm_requests));
        let image_permits = Arc::new(Semaphore::new(config.limits.max_concurrent_image_requests));

        let services = Arc::new(ServiceClient::new(
            Arc::clone(&discovery),
            Arc::clone(&channels),
            grpc_permits,
            Some(storage.clone()),
        ));

        let llm = Arc::new(LlmClient::new(
            http.clone(),
            config.providers.llm_base_url.clone(),
            config.providers.openrouter_api_key.clone(),
            config.providers.default_llm_model.clone(),
            llm_permits,
            Some(storage.clone()),
        ));

        let images = Arc::new(ImageClient::new(
            http.clone(),
            config.providers.image_base_url.clone(),
            config.providers.runware_api_key.clone(),
            image_permits,
            Arc::clone(&services) as Arc<dyn crate::services::MediaGateway>,
            Some(storage.clone()),
        ));

        let activity_permits = Arc::new(Semaphore::new(config.limits.max_activities_per_worker));

        tracing::info!("resource pool fully initialized");
        Ok(Arc::new(Self {
            config,
            http,
            storage,
            discovery,
            channels,
            services,
            llm,
            images,
            activity_permits,
        }))
    }

    /// Ordered teardown: HTTP first, then channels, then the store.
    pub async fn shutdown(&self) {
        // reqwest's pool closes when the last clone drops; nothing to await.
        self.channels.close().await;
        self.storage.clone().shutdown().await;
        tracing::info!("resource pool closed");
    }
}
