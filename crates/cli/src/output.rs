//! Terminal rendering for streamed evaluation updates

use colored::{ColoredString, Colorize};
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};

use blackscope_common::{Level, Message, MessageKind, MetricsPayload, ORCHESTRATOR_ID};

use crate::view::{AgentView, RunView};

fn level_tag(level: Level) -> ColoredString {
    match level {
        Level::Info => "info".blue(),
        Level::Improvement => "improvement".cyan(),
        Level::Warning => "warning".yellow(),
        Level::Error => "error".red(),
        Level::Bug => "bug".red().bold(),
        Level::Vulnerability => "vulnerability".magenta().bold(),
        Level::Malicious => "malicious".red().bold(),
        Level::Success => "success".green(),
    }
}

/// Render one streamed message as it arrives
pub fn print_message(message: &Message) {
    let who = message
        .agent_name
        .as_deref()
        .or(message.agent_id.as_deref())
        .unwrap_or(ORCHESTRATOR_ID);

    if message.kind == MessageKind::State {
        println!("{} {}", "==>".bold(), message.message.bold());
        return;
    }

    match &message.scenario_id {
        Some(scenario) => println!(
            "  [{}] {} ({}): {}",
            level_tag(message.level),
            who,
            scenario,
            message.message
        ),
        None => println!("  [{}] {}: {}", level_tag(message.level), who, message.message),
    }
}

fn new_table(headers: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers);
    table
}

fn print_metrics(agent: &AgentView) {
    let Some(metrics) = &agent.metrics else {
        return;
    };
    let mut table = new_table(vec!["Metric", "Score", "Feedback"]);
    match metrics {
        MetricsPayload::List(list) => {
            for metric in &list.metrics {
                table.add_row(vec![
                    metric.name.clone(),
                    metric.score.map(|s| s.to_string()).unwrap_or_default(),
                    metric.feedback.clone().unwrap_or_default(),
                ]);
            }
            if let Some(score) = list.score {
                table.add_row(vec![
                    "Overall".to_string(),
                    score.to_string(),
                    list.feedback.clone().unwrap_or_default(),
                ]);
            }
        }
        MetricsPayload::Single(metric) => {
            table.add_row(vec![
                metric.name.clone(),
                metric.score.map(|s| s.to_string()).unwrap_or_default(),
                metric.feedback.clone().unwrap_or_default(),
            ]);
        }
    }
    println!("{table}");
}

fn print_execution_report(agent: &AgentView) {
    let Some(report) = &agent.execution_report else {
        return;
    };
    println!(
        "  {} scenarios: {} {} / {} {} / {} {}",
        report.total_scenarios,
        report.passed,
        "passed".green(),
        report.failed,
        "failed".red(),
        report.errors,
        "errors".red().bold(),
    );
    let mut table = new_table(vec!["Scenario", "Status", "Details"]);
    for result in &report.results {
        table.add_row(vec![
            result.scenario_name.clone(),
            result.status.to_string(),
            result.execution_details.clone(),
        ]);
    }
    println!("{table}");
}

/// Render the final per-agent summary once a run completes
pub fn print_summary(view: &RunView) {
    for agent in view.agents_in_order() {
        if agent.id == ORCHESTRATOR_ID {
            continue;
        }
        let status = if agent.is_complete {
            "complete".green()
        } else {
            "incomplete".yellow()
        };
        println!("\n{} [{}]", agent.name.bold(), status);

        print_metrics(agent);

        if let Some(scenarios) = &agent.test_scenarios {
            let mut table = new_table(vec!["ID", "Scenario", "Objective"]);
            for scenario in &scenarios.scenarios {
                table.add_row(vec![
                    scenario.short_name.clone(),
                    scenario.name.clone(),
                    scenario.objective.clone(),
                ]);
            }
            println!("{table}");
        }

        print_execution_report(agent);
    }
}
