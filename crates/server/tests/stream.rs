//! End-to-end test of the streaming HTTP surface
//!
//! Spawns the real axum server on an ephemeral port with a stubbed pipeline
//! and drives it over the wire, decoding the NDJSON body with the same
//! reader the CLI client uses.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;

use blackscope_common::{Level, Message, MessageKind, StreamReader, UpdateEnvelope};
use blackscope_server::browser::{Browser, BrowserResult};
use blackscope_server::llm::{LlmClient, LlmConfig};
use blackscope_server::server::router;
use blackscope_server::{
    Emitter, Engine, EngineError, ResourceProvider, RunContext, RunResources, Stage,
    StageArtifact, StageError,
};

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
            llm: Arc::new(
                LlmClient::new(LlmConfig::default())
                    .map_err(|e| EngineError::Acquire(e.to_string()))?,
            ),
        })
    }
}

struct EchoStage {
    id: &'static str,
    name: &'static str,
    lines: &'static [&'static str],
}

#[async_trait]
impl Stage for EchoStage {
    fn id(&self) -> &'static str {
        self.id
    }
    fn display_name(&self) -> &'static str {
        self.name
    }

    async fn run(
        &self,
        _ctx: &RunContext,
        emitter: &Emitter,
    ) -> Result<StageArtifact, StageError> {
        for line in self.lines {
            emitter
                .send(Message::evaluation(*line, Level::Info))
                .await?;
        }
        Ok(StageArtifact::None)
    }
}

async fn spawn_server() -> SocketAddr {
    let stages: Vec<Arc<dyn Stage>> = vec![
        Arc::new(EchoStage {
            id: "probe",
            name: "Probe",
            lines: &["probing", "probed"],
        }),
        Arc::new(EchoStage {
            id: "inspect",
            name: "Inspect",
            lines: &["inspected"],
        }),
    ];
    let engine = Arc::new(Engine::new(stages, Arc::new(StubResources)));
    let app = router(engine, &[]);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server");
    });
    addr
}

#[tokio::test]
async fn test_health_and_heartbeat() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();

    let health: serde_json::Value = client
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "UP");

    let heartbeat = client
        .get(format!("http://{}/heartbeat", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(heartbeat.status(), 200);
    assert!(heartbeat.text().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_url_is_rejected_before_streaming() {
    let addr = spawn_server().await;
    let response = reqwest::Client::new()
        .post(format!("http://{}/qa", addr))
        .json(&serde_json::json!({ "url": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_qa_streams_ordered_ndjson() {
    let addr = spawn_server().await;
    let response = reqwest::Client::new()
        .post(format!("http://{}/qa", addr))
        .json(&serde_json::json!({ "url": "example.com" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("application/x-ndjson")
    );

    let mut reader = StreamReader::new();
    let mut envelopes: Vec<UpdateEnvelope> = Vec::new();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        envelopes.extend(reader.push(&chunk.unwrap()));
    }
    envelopes.extend(reader.finish());

    assert!(envelopes.iter().all(|e| e.kind == "update"));

    let messages: Vec<Message> = envelopes.into_iter().map(|e| e.content).collect();
    // activate(probe), probing, probed, activate(inspect), inspected, end
    assert_eq!(messages.len(), 6);
    assert_eq!(messages[0].kind, MessageKind::State);
    assert_eq!(
        messages[0].state_details().unwrap().agent_id.as_deref(),
        Some("probe")
    );
    assert_eq!(messages[1].message, "probing");
    assert_eq!(messages[2].message, "probed");
    assert_eq!(
        messages[3].state_details().unwrap().agent_id.as_deref(),
        Some("inspect")
    );
    assert_eq!(messages[4].message, "inspected");
    assert!(messages[5].state_details().unwrap().is_end_state);
}
