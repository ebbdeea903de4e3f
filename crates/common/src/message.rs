//! Wire protocol types for the evaluation stream
//!
//! Every update the server streams to a client is one [`Message`] wrapped in
//! an [`UpdateEnvelope`] and encoded as a single NDJSON record. Messages are
//! immutable once emitted; the kind-dependent `details` payload travels as
//! raw JSON and is re-typed on demand through the accessor methods.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved agent id for messages owned by the orchestrator itself
pub const ORCHESTRATOR_ID: &str = "orchestrator";

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Agent,
    Orchestrator,
}

impl Default for Source {
    fn default() -> Self {
        Self::Agent
    }
}

/// What a message describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Evaluation,
    State,
    Feedback,
    TestScenarios,
    Metrics,
    TestExecutionReport,
}

impl Default for MessageKind {
    fn default() -> Self {
        Self::Evaluation
    }
}

/// Severity / semantics of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Info,
    Improvement,
    Warning,
    Error,
    Bug,
    Vulnerability,
    Malicious,
    Success,
}

impl Default for Level {
    fn default() -> Self {
        Self::Info
    }
}

impl Level {
    /// Levels that close a scenario the moment they are reported
    pub fn is_terminal(&self) -> bool {
        matches!(self, Level::Success | Level::Error)
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Level::Info => "info",
            Level::Improvement => "improvement",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Bug => "bug",
            Level::Vulnerability => "vulnerability",
            Level::Malicious => "malicious",
            Level::Success => "success",
        };
        write!(f, "{}", s)
    }
}

/// `details` payload of a `state` message
///
/// A descriptor either announces the run's termination (`is_end_state`) or
/// announces that the given agent, optionally a scenario within it, is now
/// the active unit. Never both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_name: Option<String>,
    #[serde(default)]
    pub is_end_state: bool,
}

impl StateDetails {
    /// Descriptor activating an agent
    pub fn activate(agent_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            agent_name: Some(agent_name.into()),
            ..Default::default()
        }
    }

    /// Terminal end-of-run descriptor
    pub fn end() -> Self {
        Self {
            is_end_state: true,
            ..Default::default()
        }
    }

    pub fn with_scenario(
        mut self,
        scenario_id: impl Into<String>,
        scenario_name: impl Into<String>,
    ) -> Self {
        self.scenario_id = Some(scenario_id.into());
        self.scenario_name = Some(scenario_name.into());
        self
    }
}

/// A single generated test scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestScenario {
    /// Short identifier, used as the scenario id in scoped messages
    pub short_name: String,
    pub name: String,
    /// What this scenario tests
    pub objective: String,
    /// User actions to perform
    pub steps: Vec<String>,
    /// What should happen
    pub expected_result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preconditions: Option<String>,
}

/// Collection of generated test scenarios
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestScenarioList {
    pub scenarios: Vec<TestScenario>,
}

/// One evaluation metric
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issues: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub improvements: Option<Vec<String>>,
}

/// A named list of metrics with an aggregate score
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsList {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub metrics: Vec<Metric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
}

/// `details` payload of a `metrics` message: either a single metric or a list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricsPayload {
    List(MetricsList),
    Single(Metric),
}

/// Outcome of one executed scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestStatus {
    Passed,
    Failed,
    Error,
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestStatus::Passed => write!(f, "PASSED"),
            TestStatus::Failed => write!(f, "FAILED"),
            TestStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Result of executing a single test scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestExecutionResult {
    pub scenario_name: String,
    pub status: TestStatus,
    pub execution_details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors_encountered: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_seconds: Option<f64>,
}

/// Terminal report over all executed scenarios
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestExecutionReport {
    pub total_scenarios: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub results: Vec<TestExecutionResult>,
}

/// One structured progress/result record in the stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_name: Option<String>,
    pub message: String,
    #[serde(default)]
    pub source: Source,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub level: Level,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Plain evaluation finding at the given level
    pub fn evaluation(text: impl Into<String>, level: Level) -> Self {
        Self {
            agent_id: None,
            agent_name: None,
            scenario_id: None,
            scenario_name: None,
            message: text.into(),
            source: Source::Agent,
            kind: MessageKind::Evaluation,
            level,
            details: None,
            timestamp: Utc::now(),
        }
    }

    /// Orchestrator state transition message
    pub fn state(text: impl Into<String>, details: StateDetails) -> Self {
        let mut msg = Self::evaluation(text, Level::Info);
        msg.source = Source::Orchestrator;
        msg.kind = MessageKind::State;
        msg.details = serde_json::to_value(details).ok();
        msg
    }

    /// Message carrying generated test scenarios
    pub fn test_scenarios(text: impl Into<String>, scenarios: &TestScenarioList) -> Self {
        let mut msg = Self::evaluation(text, Level::Success);
        msg.kind = MessageKind::TestScenarios;
        msg.details = serde_json::to_value(scenarios).ok();
        msg
    }

    /// Message carrying a metrics assessment
    pub fn metrics(text: impl Into<String>, metrics: &MetricsList) -> Self {
        let mut msg = Self::evaluation(text, Level::Info);
        msg.kind = MessageKind::Metrics;
        msg.details = serde_json::to_value(metrics).ok();
        msg
    }

    /// Terminal execution report message
    pub fn execution_report(text: impl Into<String>, report: &TestExecutionReport) -> Self {
        let mut msg = Self::evaluation(text, Level::Info);
        msg.kind = MessageKind::TestExecutionReport;
        msg.details = serde_json::to_value(report).ok();
        msg
    }

    pub fn with_agent(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.agent_id = Some(id.into());
        self.agent_name = Some(name.into());
        self
    }

    /// Scope this message to a generated scenario. Only meaningful when the
    /// message also carries an agent identity.
    pub fn with_scenario(mut self, id: impl Into<String>) -> Self {
        self.scenario_id = Some(id.into());
        self
    }

    /// Typed view of the `details` payload of a `state` message
    pub fn state_details(&self) -> Option<StateDetails> {
        if self.kind != MessageKind::State {
            return None;
        }
        self.details
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Typed view of a `test_scenarios` payload
    pub fn scenarios_payload(&self) -> Option<TestScenarioList> {
        if self.kind != MessageKind::TestScenarios {
            return None;
        }
        self.details
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Typed view of a `metrics` payload
    pub fn metrics_payload(&self) -> Option<MetricsPayload> {
        if self.kind != MessageKind::Metrics {
            return None;
        }
        self.details
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Typed view of a `test_execution_report` payload
    pub fn report_payload(&self) -> Option<TestExecutionReport> {
        if self.kind != MessageKind::TestExecutionReport {
            return None;
        }
        self.details
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Outer envelope of every streamed NDJSON record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: Message,
}

impl UpdateEnvelope {
    pub fn update(content: Message) -> Self {
        Self {
            kind: "update".to_string(),
            content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let msg = Message::evaluation("ok", Level::Success).with_agent("a1", "A1");
        let envelope = UpdateEnvelope::update(msg);
        let json = serde_json::to_string(&envelope).unwrap();

        assert!(json.contains("\"type\":\"update\""));
        assert!(json.contains("\"agent_id\":\"a1\""));
        assert!(json.contains("\"level\":\"success\""));
        // Absent optional fields are omitted entirely
        assert!(!json.contains("scenario_id"));
        assert!(!json.contains("details"));
    }

    #[test]
    fn test_state_details_roundtrip() {
        let msg = Message::state(
            "Starting evaluation of access_check...",
            StateDetails::activate("access_check", "Reachability Check"),
        );
        assert_eq!(msg.source, Source::Orchestrator);

        let details = msg.state_details().unwrap();
        assert_eq!(details.agent_id.as_deref(), Some("access_check"));
        assert!(!details.is_end_state);
    }

    #[test]
    fn test_end_state_descriptor() {
        let msg = Message::state("Evaluation complete.", StateDetails::end());
        let details = msg.state_details().unwrap();
        assert!(details.is_end_state);
        assert!(details.agent_id.is_none());
    }

    #[test]
    fn test_kind_mismatch_yields_no_payload() {
        let msg = Message::evaluation("plain", Level::Info);
        assert!(msg.state_details().is_none());
        assert!(msg.metrics_payload().is_none());
    }

    #[test]
    fn test_metrics_payload_untagged() {
        let list = MetricsList {
            name: Some("HTML Compliance Assessment".to_string()),
            metrics: vec![Metric {
                name: "Security".to_string(),
                score: Some(90),
                ..Default::default()
            }],
            feedback: None,
            score: Some(95),
        };
        let msg = Message::metrics("HTML Compliance Assessment", &list);
        match msg.metrics_payload().unwrap() {
            MetricsPayload::List(got) => assert_eq!(got.metrics.len(), 1),
            MetricsPayload::Single(_) => panic!("expected list payload"),
        }
    }

    #[test]
    fn test_status_serializes_uppercase() {
        let json = serde_json::to_string(&TestStatus::Passed).unwrap();
        assert_eq!(json, "\"PASSED\"");
    }

    #[test]
    fn test_message_defaults_on_decode() {
        // A minimal record decodes with defaulted source, kind and level
        let json = r#"{"message":"hello","timestamp":"2026-01-01T00:00:00Z"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.source, Source::Agent);
        assert_eq!(msg.kind, MessageKind::Evaluation);
        assert_eq!(msg.level, Level::Info);
    }
}
