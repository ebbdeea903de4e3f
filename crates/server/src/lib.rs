//! Blackscope evaluation server
//!
//! Runs a fixed pipeline of evaluation stages against a target URL and
//! streams structured progress messages to the client as NDJSON.

pub mod browser;
pub mod config;
pub mod engine;
pub mod llm;
pub mod scan;
pub mod server;
pub mod stage;
pub mod stages;

pub use config::ServerConfig;
pub use engine::{DefaultResources, Engine, EngineError, ResourceProvider, RunResources};
pub use stage::{Emitter, ExecutionHistory, RunContext, Stage, StageArtifact, StageError};
