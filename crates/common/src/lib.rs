//! Blackscope Common Library
//!
//! Shared wire protocol and stream codec for the Blackscope platform.

pub mod error;
pub mod message;
pub mod record;

// Re-export commonly used types
pub use error::{Error, Result};
pub use message::{
    Level, Message, MessageKind, Metric, MetricsList, MetricsPayload, Source, StateDetails,
    TestExecutionReport, TestExecutionResult, TestScenario, TestScenarioList, TestStatus,
    UpdateEnvelope, ORCHESTRATOR_ID,
};
pub use record::{encode_record, StreamReader};

/// Blackscope version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
