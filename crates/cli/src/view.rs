//! Client-side reconstruction of the run state
//!
//! Folds the ordered stream of decoded messages into a nested
//! agents → scenarios view. The fold is pure: applying the same ordered
//! sequence from a fresh state always produces the same final state, and the
//! view is displayable after every step.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use blackscope_common::{
    Message, MessageKind, MetricsPayload, TestExecutionReport, TestScenarioList, ORCHESTRATOR_ID,
};

/// Derived state of one generated test scenario
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScenarioView {
    pub id: String,
    pub name: String,
    pub messages: Vec<Message>,
    pub is_active: bool,
    pub is_complete: bool,
}

/// Derived state of one agent (one pipeline stage, or the orchestrator)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentView {
    pub id: String,
    pub name: String,
    /// Messages not scoped to any scenario, in arrival order
    pub messages: Vec<Message>,
    pub scenarios: HashMap<String, ScenarioView>,
    scenario_order: Vec<String>,
    pub is_active: bool,
    pub is_complete: bool,
    pub test_scenarios: Option<TestScenarioList>,
    pub metrics: Option<MetricsPayload>,
    pub execution_report: Option<TestExecutionReport>,
}

impl AgentView {
    fn new(id: &str, name: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            name: name.unwrap_or(id).to_string(),
            ..Default::default()
        }
    }

    /// Scenarios in the order they were first seen
    pub fn scenarios_in_order(&self) -> impl Iterator<Item = &ScenarioView> {
        self.scenario_order
            .iter()
            .filter_map(|id| self.scenarios.get(id))
    }

    /// Materialize a scenario lazily; created inactive and incomplete
    fn scenario_mut(&mut self, id: &str, name: Option<&str>) -> &mut ScenarioView {
        let scenario = match self.scenarios.entry(id.to_string()) {
            Entry::Vacant(entry) => {
                self.scenario_order.push(id.to_string());
                entry.insert(ScenarioView {
                    id: id.to_string(),
                    name: name.unwrap_or(id).to_string(),
                    ..Default::default()
                })
            }
            Entry::Occupied(entry) => entry.into_mut(),
        };
        if let Some(name) = name {
            if scenario.name == scenario.id {
                scenario.name = name.to_string();
            }
        }
        scenario
    }
}

/// Reconstructed view of one run
#[derive(Debug, Clone, PartialEq)]
pub struct RunView {
    agents: HashMap<String, AgentView>,
    order: Vec<String>,
    pub is_loading: bool,
    pub is_complete: bool,
}

impl Default for RunView {
    fn default() -> Self {
        Self::new()
    }
}

impl RunView {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
            order: Vec::new(),
            is_loading: true,
            is_complete: false,
        }
    }

    /// Agents in the order they were first seen
    pub fn agents_in_order(&self) -> impl Iterator<Item = &AgentView> {
        self.order.iter().filter_map(|id| self.agents.get(id))
    }

    pub fn agent(&self, id: &str) -> Option<&AgentView> {
        self.agents.get(id)
    }

    /// Count of currently active agents; at most one between folds
    pub fn active_agents(&self) -> usize {
        self.agents.values().filter(|a| a.is_active).count()
    }

    fn agent_mut(&mut self, id: &str, name: Option<&str>) -> &mut AgentView {
        let agent = match self.agents.entry(id.to_string()) {
            Entry::Vacant(entry) => {
                self.order.push(id.to_string());
                entry.insert(AgentView::new(id, name))
            }
            Entry::Occupied(entry) => entry.into_mut(),
        };
        if let Some(name) = name {
            if agent.name == agent.id {
                agent.name = name.to_string();
            }
        }
        agent
    }

    /// Fold one decoded message into the view
    pub fn apply(&mut self, message: Message) {
        let agent_id = message
            .agent_id
            .clone()
            .unwrap_or_else(|| ORCHESTRATOR_ID.to_string());
        self.agent_mut(&agent_id, message.agent_name.as_deref());

        if message.kind == MessageKind::State {
            if let Some(details) = message.state_details() {
                if details.is_end_state {
                    for agent in self.agents.values_mut() {
                        agent.is_active = false;
                        agent.is_complete = true;
                    }
                    self.is_complete = true;
                    self.is_loading = false;
                } else if let Some(target_id) = details.agent_id.as_deref() {
                    // The new activation implicitly completes the previous
                    // stage; there is no explicit "stage ended" event.
                    for (id, agent) in self.agents.iter_mut() {
                        if agent.is_active && id != target_id {
                            agent.is_active = false;
                            agent.is_complete = true;
                        }
                    }
                    let target = self.agent_mut(target_id, details.agent_name.as_deref());
                    target.is_active = true;
                    if let Some(scenario_id) = details.scenario_id.as_deref() {
                        let scenario =
                            target.scenario_mut(scenario_id, details.scenario_name.as_deref());
                        scenario.is_active = true;
                    }
                }
            }
        }

        match message.kind {
            MessageKind::TestScenarios => {
                if let Some(payload) = message.scenarios_payload() {
                    self.agent_mut(&agent_id, None).test_scenarios = Some(payload);
                }
            }
            MessageKind::Metrics => {
                if let Some(payload) = message.metrics_payload() {
                    self.agent_mut(&agent_id, None).metrics = Some(payload);
                }
            }
            MessageKind::TestExecutionReport => {
                if let Some(payload) = message.report_payload() {
                    self.agent_mut(&agent_id, None).execution_report = Some(payload);
                }
            }
            _ => {}
        }

        let agent = self.agent_mut(&agent_id, None);
        match message.scenario_id.clone() {
            Some(scenario_id) => {
                let terminal = message.level.is_terminal();
                let scenario = agent.scenario_mut(&scenario_id, message.scenario_name.as_deref());
                scenario.messages.push(message);
                // A terminal-level outcome finishes the scenario immediately,
                // independent of any later state descriptor.
                if terminal {
                    scenario.is_active = false;
                    scenario.is_complete = true;
                }
            }
            None => agent.messages.push(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blackscope_common::{Level, Metric, MetricsList, StateDetails};

    fn activate(agent_id: &str, agent_name: &str) -> Message {
        Message::state(
            format!("Starting evaluation of {}...", agent_id),
            StateDetails::activate(agent_id, agent_name),
        )
    }

    fn end() -> Message {
        Message::state("Evaluation complete.", StateDetails::end())
    }

    #[test]
    fn test_end_to_end_scenario() {
        let mut view = RunView::new();
        view.apply(activate("a1", "A1"));
        view.apply(Message::evaluation("ok", Level::Success).with_agent("a1", "A1"));
        view.apply(end());

        let a1 = view.agent("a1").unwrap();
        assert!(a1.is_complete);
        assert!(!a1.is_active);
        assert_eq!(a1.name, "A1");
        assert_eq!(a1.messages.len(), 1);
        assert_eq!(a1.messages[0].message, "ok");
        assert_eq!(a1.messages[0].level, Level::Success);
        assert!(view.is_complete);
        assert!(!view.is_loading);
    }

    #[test]
    fn test_at_most_one_active_agent() {
        let mut view = RunView::new();
        let stream = vec![
            activate("a1", "A1"),
            Message::evaluation("working", Level::Info).with_agent("a1", "A1"),
            activate("a2", "A2"),
            Message::evaluation("working", Level::Info).with_agent("a2", "A2"),
            activate("a3", "A3"),
            end(),
        ];
        for message in stream {
            view.apply(message);
            assert!(view.active_agents() <= 1);
        }
        assert_eq!(view.active_agents(), 0);
        assert!(view.agent("a1").unwrap().is_complete);
        assert!(view.agent("a2").unwrap().is_complete);
    }

    #[test]
    fn test_activation_completes_previous_agent() {
        let mut view = RunView::new();
        view.apply(activate("a1", "A1"));
        assert!(view.agent("a1").unwrap().is_active);
        assert!(!view.agent("a1").unwrap().is_complete);

        view.apply(activate("a2", "A2"));
        let a1 = view.agent("a1").unwrap();
        assert!(!a1.is_active);
        assert!(a1.is_complete);
        assert!(view.agent("a2").unwrap().is_active);
    }

    #[test]
    fn test_metrics_replacement_is_idempotent() {
        let first = MetricsList {
            name: Some("first".to_string()),
            metrics: vec![Metric {
                name: "Security".to_string(),
                score: Some(40),
                ..Default::default()
            }],
            feedback: None,
            score: Some(40),
        };
        let second = MetricsList {
            name: Some("second".to_string()),
            metrics: vec![Metric {
                name: "Security".to_string(),
                score: Some(90),
                ..Default::default()
            }],
            feedback: None,
            score: Some(90),
        };

        let mut view = RunView::new();
        view.apply(Message::metrics("m", &first).with_agent("a1", "A1"));
        view.apply(Message::metrics("m", &second).with_agent("a1", "A1"));

        match view.agent("a1").unwrap().metrics.as_ref().unwrap() {
            MetricsPayload::List(list) => {
                assert_eq!(list.name.as_deref(), Some("second"));
                assert_eq!(list.score, Some(90));
            }
            MetricsPayload::Single(_) => panic!("expected list payload"),
        }
    }

    #[test]
    fn test_terminal_level_closes_scenario() {
        let mut view = RunView::new();
        view.apply(activate("exec", "Execution"));
        view.apply(
            Message::evaluation("Executing scenario: login", Level::Info)
                .with_agent("exec", "Execution")
                .with_scenario("login"),
        );

        let scenario = &view.agent("exec").unwrap().scenarios["login"];
        // Implicit scenarios are created inactive and incomplete
        assert!(!scenario.is_active);
        assert!(!scenario.is_complete);

        view.apply(
            Message::evaluation("Scenario login completed: FAILED", Level::Error)
                .with_agent("exec", "Execution")
                .with_scenario("login"),
        );

        let scenario = &view.agent("exec").unwrap().scenarios["login"];
        assert!(!scenario.is_active);
        assert!(scenario.is_complete);
        assert_eq!(scenario.messages.len(), 2);
    }

    #[test]
    fn test_scenario_activation_descriptor() {
        let mut view = RunView::new();
        view.apply(Message::state(
            "scenario running",
            StateDetails::activate("exec", "Execution").with_scenario("login", "Login flow"),
        ));

        let agent = view.agent("exec").unwrap();
        assert!(agent.is_active);
        let scenario = &agent.scenarios["login"];
        assert!(scenario.is_active);
        assert_eq!(scenario.name, "Login flow");
    }

    #[test]
    fn test_state_messages_belong_to_orchestrator() {
        let mut view = RunView::new();
        view.apply(activate("a1", "A1"));
        view.apply(end());

        let orchestrator = view.agent(ORCHESTRATOR_ID).unwrap();
        assert_eq!(orchestrator.messages.len(), 2);
    }

    #[test]
    fn test_messages_after_end_state_are_folded_without_crash() {
        let mut view = RunView::new();
        view.apply(activate("a1", "A1"));
        view.apply(end());
        view.apply(Message::evaluation("straggler", Level::Info).with_agent("a1", "A1"));

        assert!(view.is_complete);
        assert_eq!(view.agent("a1").unwrap().messages.len(), 1);
    }

    #[test]
    fn test_fold_is_deterministic() {
        let stream = vec![
            activate("a1", "A1"),
            Message::evaluation("one", Level::Info).with_agent("a1", "A1"),
            Message::evaluation("two", Level::Warning).with_agent("a1", "A1"),
            activate("a2", "A2"),
            Message::evaluation("done", Level::Success)
                .with_agent("a2", "A2")
                .with_scenario("s1"),
            end(),
        ];

        let mut first = RunView::new();
        let mut second = RunView::new();
        for message in &stream {
            first.apply(message.clone());
        }
        for message in &stream {
            second.apply(message.clone());
        }
        assert_eq!(first, second);
    }

    #[test]
    fn test_agent_order_is_first_seen() {
        let mut view = RunView::new();
        view.apply(activate("b", "B"));
        view.apply(activate("a", "A"));

        let ids: Vec<&str> = view.agents_in_order().map(|a| a.id.as_str()).collect();
        // Orchestrator owns the state messages, so it is seen first
        assert_eq!(ids, vec![ORCHESTRATOR_ID, "b", "a"]);
    }
}
