//! Stage contract and per-run execution context
//!
//! A stage is one pluggable evaluation unit. Given the target URL and the
//! run's shared resources it emits a finite, ordered sequence of messages
//! through its [`Emitter`] and finishes with an artifact that later stages
//! may consume via the run's [`ExecutionHistory`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use blackscope_common::{Message, TestExecutionReport, TestScenarioList};

use crate::browser::{Browser, BrowserError};
use crate::llm::{LlmClient, LlmError};
use crate::scan::HtmlDocument;

/// Stage-level errors
///
/// `Precondition` and `MissingDependency` are reported in-band as
/// agent-scoped error messages; any other variant is folded into an
/// orchestrator-scoped error message. Either way the run continues with the
/// next stage. `Disconnected` aborts the run.
#[derive(Error, Debug)]
pub enum StageError {
    /// The stage cannot proceed on this input; reported in-band
    #[error("{0}")]
    Precondition(String),

    #[error("Dependency {dependency} is required for {stage}.")]
    MissingDependency { stage: String, dependency: String },

    #[error("Skipping {stage} since {dependency} run failed.")]
    FailedDependency { stage: String, dependency: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("Model call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The client went away; the run is abandoned
    #[error("client disconnected")]
    Disconnected,
}

impl StageError {
    /// Faults reported as agent-scoped error messages rather than the
    /// generic orchestrator fallback
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            StageError::Precondition(_)
                | StageError::MissingDependency { .. }
                | StageError::FailedDependency { .. }
        )
    }
}

/// The page fetched by the reachability check
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub ok: bool,
    pub content_type: Option<String>,
    pub body: String,
}

/// Typed output a stage records into the run's history
#[derive(Debug, Clone)]
pub enum StageArtifact {
    None,
    Page(FetchedPage),
    Document(HtmlDocument),
    Scenarios(TestScenarioList),
    Report(TestExecutionReport),
}

impl StageArtifact {
    pub fn as_page(&self) -> Option<&FetchedPage> {
        match self {
            StageArtifact::Page(page) => Some(page),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&HtmlDocument> {
        match self {
            StageArtifact::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_scenarios(&self) -> Option<&TestScenarioList> {
        match self {
            StageArtifact::Scenarios(list) => Some(list),
            _ => None,
        }
    }
}

/// Outcome of one finished stage
#[derive(Debug, Clone)]
pub enum StageOutcome {
    Completed(StageArtifact),
    Failed,
}

/// Execution results of the stages that already ran in this run
#[derive(Debug, Default)]
pub struct ExecutionHistory {
    outcomes: HashMap<String, StageOutcome>,
}

impl ExecutionHistory {
    pub fn record_success(&mut self, stage_id: &str, artifact: StageArtifact) {
        self.outcomes
            .insert(stage_id.to_string(), StageOutcome::Completed(artifact));
    }

    pub fn record_failure(&mut self, stage_id: &str) {
        self.outcomes.insert(stage_id.to_string(), StageOutcome::Failed);
    }

    pub fn contains(&self, stage_id: &str) -> bool {
        self.outcomes.contains_key(stage_id)
    }

    pub fn failed(&self, stage_id: &str) -> bool {
        matches!(self.outcomes.get(stage_id), Some(StageOutcome::Failed))
    }

    /// Artifact of a successfully completed stage
    pub fn artifact(&self, stage_id: &str) -> Option<&StageArtifact> {
        match self.outcomes.get(stage_id) {
            Some(StageOutcome::Completed(artifact)) => Some(artifact),
            _ => None,
        }
    }
}

/// Per-run context handed to every stage
///
/// Each concurrent run owns its own context; nothing here is shared across
/// runs. The history is behind a mutex only because stages borrow the
/// context immutably; stages execute strictly sequentially.
pub struct RunContext {
    /// Normalized target URL
    pub url: String,
    /// Connection-reusing HTTP client for direct fetches
    pub http: reqwest::Client,
    /// Browser-automation session
    pub browser: Arc<dyn Browser>,
    /// Chat-model client for AI-backed stages
    pub llm: Arc<LlmClient>,
    /// Artifacts of the stages that already ran
    pub history: Mutex<ExecutionHistory>,
}

/// Outbound message channel scoped to one running stage
///
/// Messages emitted without an agent identity are stamped with the running
/// stage's id and display name before being forwarded; messages that already
/// carry an identity pass through unmodified.
pub struct Emitter {
    tx: mpsc::Sender<Message>,
    agent_id: String,
    agent_name: String,
    sent: AtomicUsize,
}

impl Emitter {
    pub fn new(tx: mpsc::Sender<Message>, agent_id: &str, agent_name: &str) -> Self {
        Self {
            tx,
            agent_id: agent_id.to_string(),
            agent_name: agent_name.to_string(),
            sent: AtomicUsize::new(0),
        }
    }

    /// Forward one message to the stream, in emission order
    pub async fn send(&self, mut message: Message) -> Result<(), StageError> {
        if message.agent_id.is_none() {
            message.agent_id = Some(self.agent_id.clone());
            message.agent_name = Some(self.agent_name.clone());
        }
        self.tx
            .send(message)
            .await
            .map_err(|_| StageError::Disconnected)?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Number of messages emitted so far by this stage
    pub fn count(&self) -> usize {
        self.sent.load(Ordering::Relaxed)
    }
}

/// One pluggable evaluation unit
///
/// A stage must emit at least one message before finishing; recoverable
/// faults are reported as messages (or as `StageError::Precondition`), not
/// propagated as run-fatal errors.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable identifier, used as the agent id on the wire
    fn id(&self) -> &'static str;

    /// Human-readable agent name
    fn display_name(&self) -> &'static str;

    /// Ids of stages that must have completed successfully before this one
    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }

    async fn run(&self, ctx: &RunContext, emitter: &Emitter)
        -> Result<StageArtifact, StageError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use blackscope_common::Level;

    #[test]
    fn test_history_tracks_outcomes() {
        let mut history = ExecutionHistory::default();
        history.record_success("access_check", StageArtifact::None);
        history.record_failure("driver_access");

        assert!(history.contains("access_check"));
        assert!(!history.failed("access_check"));
        assert!(history.failed("driver_access"));
        assert!(history.artifact("driver_access").is_none());
        assert!(!history.contains("html_validator"));
    }

    #[tokio::test]
    async fn test_emitter_stamps_missing_identity() {
        let (tx, mut rx) = mpsc::channel(4);
        let emitter = Emitter::new(tx, "access_check", "Reachability Check");

        emitter
            .send(Message::evaluation("no identity", Level::Info))
            .await
            .unwrap();
        emitter
            .send(Message::evaluation("own identity", Level::Info).with_agent("other", "Other"))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.agent_id.as_deref(), Some("access_check"));
        assert_eq!(first.agent_name.as_deref(), Some("Reachability Check"));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.agent_id.as_deref(), Some("other"));
        assert_eq!(emitter.count(), 2);
    }

    #[tokio::test]
    async fn test_emitter_reports_disconnect() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let emitter = Emitter::new(tx, "s", "S");

        let err = emitter
            .send(Message::evaluation("late", Level::Info))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Disconnected));
    }
}
