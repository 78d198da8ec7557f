//! MongoDB storage layer.
//!
//! Four collections: `tasks` (durable workflow inputs),
//! `world_generation_status` (per-world progress/cost ledger),
//! `world_parameters` (the generated world document, written once) and
//! `api_requests_history` (append-only audit of external calls).
//!
//! Every operation holds a DB permit from the shared pool, so the number of
//! in-flight Mongo operations per process is bounded regardless of how many
//! workflows are running.

pub mod audit;
pub mod models;
pub mod progress;
pub mod tasks;
pub mod world_params;

use std::sync::Arc;
use std::time::Duration;

use mongodb::options::ClientOptions;
use mongodb::{bson::doc, Client, Collection, Database, IndexModel};
use tokio::sync::Semaphore;

use crate::config::MongoConfig;
use crate::error::StorageError;
use models::{ApiRequestHistory, Task, WorldGenerationStatus, WorldParameters};

pub(crate) const TASKS: &str = "tasks";
pub(crate) const WORLD_GENERATION_STATUS: &str = "world_generation_status";
pub(crate) const WORLD_PARAMETERS: &str = "world_parameters";
pub(crate) const API_REQUESTS_HISTORY: &str = "api_requests_history";

/// Handle to the document store plus the permit bounding concurrent access.
#[derive(Clone)]
pub struct Storage {
    client: Client,
    db: Database,
    permits: Arc<Semaphore>,
}

impl Storage {
    /// Connect with a pool sized to the DB permit (double it so the pool is
    /// never the bottleneck under peak permit usage).
    pub async fn connect(config: &MongoConfig, max_db_ops: usize) -> Result<Self, StorageError> {
        let mut options = ClientOptions::parse(&config.uri).await?;
        options.max_pool_size = Some((max_db_ops * 2) as u32);
        options.min_pool_size = Some(10);
        options.max_idle_time = Some(Duration::from_secs(30));
        options.server_selection_timeout = Some(Duration::from_secs(5));
        options.connect_timeout = Some(Duration::from_secs(10));
        options.app_name = Some(format!("worldforge-ai-worker/{}", crate::version()));

        let client = Client::with_options(options)?;
        let db = client.database(&config.database);
        tracing::info!(
            database = %config.database,
            max_pool_size = max_db_ops * 2,
            "MongoDB client initialized",
        );
        Ok(Self {
            client,
            db,
            permits: Arc::new(Semaphore::new(max_db_ops)),
        })
    }

    /// Create the secondary indexes the query paths rely on.
    pub async fn ensure_indexes(&self) -> Result<(), StorageError> {
        let _permit = self.permit().await;

        let tasks = self.tasks_collection();
        for keys in [
            doc! {"world_id": 1},
            doc! {"type": 1},
            doc! {"status": 1},
        ] {
            tasks
                .create_index(IndexModel::builder().keys(keys).build())
                .await?;
        }
        tasks
            .create_index(
                IndexModel::builder()
                    .keys(doc! {"world_id": 1, "type": 1})
                    .build(),
            )
            .await?;

        let history = self.history_collection();
        for keys in [
            doc! {"world_id": 1},
            doc! {"task_id": 1},
            doc! {"api_type": 1},
        ] {
            history
                .create_index(IndexModel::builder().keys(keys).build())
                .await?;
        }

        tracing::info!("MongoDB indexes initialized");
        Ok(())
    }

    /// Close the underlying client. Called last during pool shutdown.
    pub async fn shutdown(self) {
        self.client.shutdown().await;
        tracing::info!("MongoDB client closed");
    }

    pub(crate) async fn permit(&self) -> tokio::sync::OwnedSemaphorePermit {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .expect("DB permit semaphore closed")
    }

    pub(crate) fn tasks_collection(&self) -> Collection<Task> {
        self.db.collection(TASKS)
    }

    pub(crate) fn status_collection(&self) -> Collection<WorldGenerationStatus> {
        self.db.collection(WORLD_GENERATION_STATUS)
    }

    pub(crate) fn params_collection(&self) -> Collection<WorldParameters> {
        self.db.collection(WORLD_PARAMETERS)
    }

    pub(crate) fn history_collection(&self) -> Collection<ApiRequestHistory> {
        self.db.collection(API_REQUESTS_HISTORY)
    }
}
