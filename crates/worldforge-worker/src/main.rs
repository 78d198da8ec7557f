//! Worldforge worker binary.
//!
//! `run` starts a worker that claims pending generation tasks and drives
//! them until a shutdown signal arrives. `submit` is a development stand-in
//! for the entry-point publisher: it writes one `init_world_creation` task
//! and exits.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use uuid::Uuid;

use worldforge_core::config::Config;
use worldforge_core::resources::ResourcePool;
use worldforge_core::storage::models::{Task, TaskKind};
use worldforge_core::storage::Storage;
use worldforge_core::workflow::init_world::InitWorldCreationInput;
use worldforge_core::workflow::Worker;

#[derive(Parser)]
#[command(
    name = "worldforge-worker",
    version,
    about = "Worldforge AI world-generation worker"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the worker until interrupted (the default).
    Run,
    /// Publish one init_world_creation task and exit.
    Submit {
        /// Free-form prompt describing the world to generate.
        #[arg(long)]
        prompt: String,
        /// Number of characters to generate.
        #[arg(long, default_value_t = 10)]
        characters: i64,
        /// Number of posts to generate across all characters.
        #[arg(long, default_value_t = 50)]
        posts: i64,
        /// World id; generated when omitted.
        #[arg(long)]
        world_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_env()?;
    init_tracing(&config.log_level);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_worker(config).await,
        Command::Submit {
            prompt,
            characters,
            posts,
            world_id,
        } => submit(config, prompt, characters, posts, world_id).await,
    }
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_worker(config: Config) -> anyhow::Result<()> {
    config.validate()?;
    tracing::info!(version = worldforge_core::version(), "starting worldforge worker");

    let pool = ResourcePool::initialize(config).await?;
    let worker = Worker::new(Arc::clone(&pool));
    tracing::info!(worker_id = %worker.worker_id(), "worker initialized");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received, draining worker");
        let _ = shutdown_tx.send(true);
    });

    worker.run(shutdown_rx).await;
    pool.shutdown().await;
    tracing::info!("worker stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn submit(
    config: Config,
    prompt: String,
    characters: i64,
    posts: i64,
    world_id: Option<String>,
) -> anyhow::Result<()> {
    anyhow::ensure!(!prompt.trim().is_empty(), "prompt must not be empty");
    anyhow::ensure!(characters >= 0, "characters count must not be negative");
    anyhow::ensure!(posts >= 0, "posts count must not be negative");

    let storage =
        Storage::connect(&config.mongo, config.limits.max_concurrent_db_operations).await?;
    storage.ensure_indexes().await?;

    let world_id = world_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let input = InitWorldCreationInput {
        world_id: world_id.clone(),
        world_name: String::new(),
        world_prompt: prompt,
        characters_count: characters,
        posts_count: posts,
        api_call_limits_llm: None,
        api_call_limits_images: None,
    };
    let parameters = mongodb::bson::to_document(&input)?;
    let task = Task::new(
        Uuid::new_v4().to_string(),
        TaskKind::InitWorldCreation,
        world_id.clone(),
        parameters,
    );
    storage.create_task(&task).await?;

    println!("world_id: {world_id}");
    println!("task_id:  {}", task.id);
    println!("Task is pending; a running worker will pick it up.");

    storage.shutdown().await;
    Ok(())
}
