//! Blackscope CLI library
//!
//! Streams an evaluation run from the server, reconstructs the nested
//! agents → scenarios view and renders it to the terminal.

pub mod client;
pub mod output;
pub mod view;

pub use client::{ClientError, QaClient};
pub use view::{AgentView, RunView, ScenarioView};
