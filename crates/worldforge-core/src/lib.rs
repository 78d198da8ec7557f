/// Core library for the Worldforge AI world-generation engine.
///
/// This crate contains all business logic: configuration, shared resource
/// pooling, the LLM and image-generation clients, the gRPC service gateway,
/// the MongoDB-backed task store and progress ledger, and the workflow
/// orchestrator that drives a world generation from a single prompt to a
/// full cast of characters and posts.
pub mod config;
pub mod error;
pub mod image;
pub mod llm;
pub mod net;
pub mod prompts;
pub mod resources;
pub mod schemas;
pub mod services;
pub mod storage;
pub mod workflow;

pub use error::*;

/// Returns the version of the worldforge-core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
