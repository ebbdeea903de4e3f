//! Pipeline engine
//!
//! Drives the fixed list of stages to completion in sequence and concatenates
//! their message output into one ordered outbound stream. Each run owns its
//! shared resources (browsing HTTP client, browser session, model client);
//! they are acquired up front and released on every exit path.
//!
//! Stream shape: for stages S1..Sn emitting message lists M1..Mn the stream
//! is exactly `[activate(S1)] ++ M1 ++ ... ++ [activate(Sn)] ++ Mn ++ [end]`.
//! A stage fault is folded into the stream as an error-level message and the
//! run continues; only resource acquisition failures and client disconnects
//! end a run early, without a terminal end-state descriptor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use blackscope_common::{Level, Message, StateDetails, ORCHESTRATOR_ID};

use crate::browser::{Browser, BrowserConfig, WebDriverSession};
use crate::llm::{LlmClient, LlmConfig};
use crate::stage::{Emitter, ExecutionHistory, RunContext, Stage, StageError};

const CHANNEL_CAPACITY: usize = 64;

/// Run-fatal engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to acquire shared resources: {0}")]
    Acquire(String),

    #[error("client disconnected before the run completed")]
    Disconnected,
}

/// The shared resources of one run
pub struct RunResources {
    pub http: reqwest::Client,
    pub browser: Arc<dyn Browser>,
    pub llm: Arc<LlmClient>,
}

/// Acquires one isolated resource set per run
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn acquire(&self) -> Result<RunResources, EngineError>;
}

/// Production resources: browsing HTTP client with connection reuse and a
/// WebDriver browser session
pub struct DefaultResources {
    browser: BrowserConfig,
    llm: LlmConfig,
}

impl DefaultResources {
    pub fn new(browser: BrowserConfig, llm: LlmConfig) -> Self {
        Self { browser, llm }
    }

    fn browsing_client() -> Result<reqwest::Client, reqwest::Error> {
        use reqwest::header::{HeaderMap, HeaderValue};

        let mut headers = HeaderMap::new();
        headers.insert("User-Agent", HeaderValue::from_static("HTML-QA/0.1"));
        headers.insert(
            "Accept",
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml"),
        );
        headers.insert(
            "Accept-Language",
            HeaderValue::from_static("en-US,en;q=0.5"),
        );
        headers.insert("Accept-Encoding", HeaderValue::from_static("gzip, deflate"));
        headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));

        reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
    }
}

#[async_trait]
impl ResourceProvider for DefaultResources {
    async fn acquire(&self) -> Result<RunResources, EngineError> {
        let http =
            Self::browsing_client().map_err(|e| EngineError::Acquire(e.to_string()))?;

        let browser = WebDriverSession::new(self.browser.clone())
            .map_err(|e| EngineError::Acquire(e.to_string()))?;
        browser
            .connect()
            .await
            .map_err(|e| EngineError::Acquire(e.to_string()))?;

        let llm =
            LlmClient::new(self.llm.clone()).map_err(|e| EngineError::Acquire(e.to_string()))?;

        Ok(RunResources {
            http,
            browser: Arc::new(browser),
            llm: Arc::new(llm),
        })
    }
}

/// Sequences the evaluation stages of one run
pub struct Engine {
    stages: Vec<Arc<dyn Stage>>,
    resources: Arc<dyn ResourceProvider>,
}

impl Engine {
    pub fn new(stages: Vec<Arc<dyn Stage>>, resources: Arc<dyn ResourceProvider>) -> Self {
        Self { stages, resources }
    }

    /// Start a run, returning its ordered message stream
    ///
    /// The run executes in a background task; dropping the stream abandons
    /// the run at its next emission and still releases its resources.
    pub fn run(self: Arc<Self>, url: impl Into<String>) -> ReceiverStream<Message> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let url = url.into();
        tokio::spawn(async move {
            if let Err(e) = self.drive(url, tx).await {
                warn!("run ended early: {}", e);
            }
        });
        ReceiverStream::new(rx)
    }

    async fn drive(&self, url: String, tx: mpsc::Sender<Message>) -> Result<(), EngineError> {
        let run_id = Uuid::new_v4();
        let url = normalize_url(&url);
        info!(%run_id, %url, "starting evaluation run");

        let resources = self.resources.acquire().await?;
        let ctx = RunContext {
            url,
            http: resources.http,
            browser: resources.browser,
            llm: resources.llm,
            history: Mutex::new(ExecutionHistory::default()),
        };

        let result = self.run_stages(&ctx, &tx).await;

        // Release failure must not mask the run's outcome
        if let Err(e) = ctx.browser.close().await {
            warn!(%run_id, "failed to release browser session: {}", e);
        }

        match &result {
            Ok(()) => info!(%run_id, "evaluation run complete"),
            Err(e) => warn!(%run_id, "evaluation run abandoned: {}", e),
        }
        result
    }

    async fn run_stages(
        &self,
        ctx: &RunContext,
        tx: &mpsc::Sender<Message>,
    ) -> Result<(), EngineError> {
        for stage in &self.stages {
            let activation = Message::state(
                format!("Starting evaluation of {}...", stage.id()),
                StateDetails::activate(stage.id(), stage.display_name()),
            );
            tx.send(activation)
                .await
                .map_err(|_| EngineError::Disconnected)?;

            let emitter = Emitter::new(tx.clone(), stage.id(), stage.display_name());
            let outcome = match self.check_dependencies(stage.as_ref(), ctx).await {
                Ok(()) => stage.run(ctx, &emitter).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(artifact) => {
                    if emitter.count() == 0 {
                        warn!(stage = stage.id(), "stage finished without emitting any message");
                    }
                    ctx.history.lock().await.record_success(stage.id(), artifact);
                }
                Err(StageError::Disconnected) => return Err(EngineError::Disconnected),
                Err(e) if e.is_precondition() => {
                    debug!(stage = stage.id(), "stage precondition failed: {}", e);
                    let msg = Message::evaluation(e.to_string(), Level::Error)
                        .with_agent(stage.id(), stage.display_name());
                    tx.send(msg).await.map_err(|_| EngineError::Disconnected)?;
                    ctx.history.lock().await.record_failure(stage.id());
                }
                Err(e) => {
                    error!(stage = stage.id(), "stage failed unexpectedly: {}", e);
                    let mut msg = Message::evaluation(
                        format!(
                            "{} failed to run due to an unexpected error. Please contact support.",
                            stage.id()
                        ),
                        Level::Error,
                    );
                    msg.agent_id = Some(ORCHESTRATOR_ID.to_string());
                    tx.send(msg).await.map_err(|_| EngineError::Disconnected)?;
                    ctx.history.lock().await.record_failure(stage.id());
                }
            }
        }

        tx.send(Message::state("Evaluation complete.", StateDetails::end()))
            .await
            .map_err(|_| EngineError::Disconnected)?;
        Ok(())
    }

    async fn check_dependencies(
        &self,
        stage: &dyn Stage,
        ctx: &RunContext,
    ) -> Result<(), StageError> {
        let history = ctx.history.lock().await;
        for dependency in stage.dependencies() {
            if !history.contains(dependency) {
                return Err(StageError::MissingDependency {
                    stage: stage.id().to_string(),
                    dependency: dependency.to_string(),
                });
            }
            if history.failed(dependency) {
                return Err(StageError::FailedDependency {
                    stage: stage.id().to_string(),
                    dependency: dependency.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Prefix scheme-less URLs with https
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::BrowserResult;
    use crate::stage::StageArtifact;
    use blackscope_common::MessageKind;
    use tokio_stream::StreamExt;

    struct NoopBrowser;

    #[async_trait]
    impl Browser for NoopBrowser {
        async fn connect(&self) -> BrowserResult<()> {
            Ok(())
        }
        async fn navigate(&self, _url: &str) -> BrowserResult<()> {
            Ok(())
        }
        async fn current_url(&self) -> BrowserResult<String> {
            Ok(String::new())
        }
        async fn title(&self) -> BrowserResult<String> {
            Ok(String::new())
        }
        async fn page_source(&self) -> BrowserResult<String> {
            Ok(String::new())
        }
        async fn close(&self) -> BrowserResult<()> {
            Ok(())
        }
    }

    struct StubResources;

    #[async_trait]
    impl ResourceProvider for StubResources {
        async fn acquire(&self) -> Result<RunResources, EngineError> {
            Ok(RunResources {
                http: reqwest::Client::new(),
                browser: Arc::new(NoopBrowser),
                llm: Arc::new(LlmClient::new(LlmConfig::default()).map_err(|e| {
                    EngineError::Acquire(e.to_string())
                })?),
            })
        }
    }

    enum StubBehavior {
        Emit(usize),
        Precondition,
        Unexpected,
    }

    struct StubStage {
        id: &'static str,
        name: &'static str,
        deps: &'static [&'static str],
        behavior: StubBehavior,
    }

    #[async_trait]
    impl Stage for StubStage {
        fn id(&self) -> &'static str {
            self.id
        }
        fn display_name(&self) -> &'static str {
            self.name
        }
        fn dependencies(&self) -> &'static [&'static str] {
            self.deps
        }

        async fn run(
            &self,
            _ctx: &RunContext,
            emitter: &Emitter,
        ) -> Result<StageArtifact, StageError> {
            match self.behavior {
                StubBehavior::Emit(count) => {
                    for i in 0..count {
                        emitter
                            .send(Message::evaluation(format!("msg {}", i), Level::Info))
                            .await?;
                    }
                    Ok(StageArtifact::None)
                }
                StubBehavior::Precondition => Err(StageError::Precondition(
                    "Failed to connect to the website".to_string(),
                )),
                StubBehavior::Unexpected => Err(StageError::Llm(crate::llm::LlmError::EmptyCompletion)),
            }
        }
    }

    fn engine(stages: Vec<Arc<dyn Stage>>) -> Arc<Engine> {
        Arc::new(Engine::new(stages, Arc::new(StubResources)))
    }

    async fn collect(engine: Arc<Engine>, url: &str) -> Vec<Message> {
        engine.run(url).collect().await
    }

    #[tokio::test]
    async fn test_stream_ordering() {
        let engine = engine(vec![
            Arc::new(StubStage {
                id: "s1",
                name: "S1",
                deps: &[],
                behavior: StubBehavior::Emit(2),
            }),
            Arc::new(StubStage {
                id: "s2",
                name: "S2",
                deps: &[],
                behavior: StubBehavior::Emit(1),
            }),
        ]);

        let messages = collect(engine, "example.com").await;
        assert_eq!(messages.len(), 6);

        assert_eq!(messages[0].kind, MessageKind::State);
        assert_eq!(
            messages[0].state_details().unwrap().agent_id.as_deref(),
            Some("s1")
        );
        assert_eq!(messages[1].agent_id.as_deref(), Some("s1"));
        assert_eq!(messages[2].agent_id.as_deref(), Some("s1"));
        assert_eq!(
            messages[3].state_details().unwrap().agent_id.as_deref(),
            Some("s2")
        );
        assert_eq!(messages[4].agent_id.as_deref(), Some("s2"));
        assert!(messages[5].state_details().unwrap().is_end_state);
    }

    #[tokio::test]
    async fn test_precondition_failure_is_isolated() {
        let engine = engine(vec![
            Arc::new(StubStage {
                id: "s1",
                name: "S1",
                deps: &[],
                behavior: StubBehavior::Precondition,
            }),
            Arc::new(StubStage {
                id: "s2",
                name: "S2",
                deps: &[],
                behavior: StubBehavior::Emit(1),
            }),
        ]);

        let messages = collect(engine, "example.com").await;
        // activate(s1), error(s1), activate(s2), msg, end
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[1].level, Level::Error);
        assert_eq!(messages[1].agent_id.as_deref(), Some("s1"));
        assert_eq!(messages[1].message, "Failed to connect to the website");
        assert!(messages[4].state_details().unwrap().is_end_state);
    }

    #[tokio::test]
    async fn test_unexpected_failure_reports_as_orchestrator() {
        let engine = engine(vec![Arc::new(StubStage {
            id: "s1",
            name: "S1",
            deps: &[],
            behavior: StubBehavior::Unexpected,
        })]);

        let messages = collect(engine, "example.com").await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].level, Level::Error);
        assert_eq!(messages[1].agent_id.as_deref(), Some(ORCHESTRATOR_ID));
        assert!(messages[1].message.contains("unexpected error"));
    }

    #[tokio::test]
    async fn test_failed_dependency_skips_stage() {
        let engine = engine(vec![
            Arc::new(StubStage {
                id: "s1",
                name: "S1",
                deps: &[],
                behavior: StubBehavior::Precondition,
            }),
            Arc::new(StubStage {
                id: "s2",
                name: "S2",
                deps: &["s1"],
                behavior: StubBehavior::Emit(1),
            }),
        ]);

        let messages = collect(engine, "example.com").await;
        // activate(s1), error(s1), activate(s2), skip-error(s2), end
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[3].level, Level::Error);
        assert_eq!(messages[3].agent_id.as_deref(), Some("s2"));
        assert_eq!(messages[3].message, "Skipping s2 since s1 run failed.");
    }

    #[tokio::test]
    async fn test_missing_dependency_skips_stage() {
        let engine = engine(vec![Arc::new(StubStage {
            id: "s2",
            name: "S2",
            deps: &["s1"],
            behavior: StubBehavior::Emit(1),
        })]);

        let messages = collect(engine, "example.com").await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].message, "Dependency s1 is required for s2.");
    }

    #[tokio::test]
    async fn test_dropped_stream_abandons_run() {
        let engine = engine(vec![Arc::new(StubStage {
            id: "s1",
            name: "S1",
            deps: &[],
            behavior: StubBehavior::Emit(CHANNEL_CAPACITY * 2),
        })]);

        let mut stream = engine.run("example.com");
        let first = stream.next().await.unwrap();
        assert_eq!(first.kind, MessageKind::State);
        drop(stream);
        // The spawned run observes the closed channel and stops; nothing to
        // assert beyond not hanging.
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("example.com"), "https://example.com");
        assert_eq!(normalize_url("  example.com "), "https://example.com");
        assert_eq!(normalize_url("http://example.com"), "http://example.com");
        assert_eq!(normalize_url("https://example.com"), "https://example.com");
    }
}
