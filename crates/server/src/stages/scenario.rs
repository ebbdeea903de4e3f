//! AI-backed test scenario generation and execution stages

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;

use blackscope_common::{
    Level, Message, TestExecutionReport, TestExecutionResult, TestScenario, TestScenarioList,
    TestStatus,
};

use crate::scan::HtmlDocument;
use crate::stage::{Emitter, RunContext, Stage, StageArtifact, StageError};

/// Page text handed to the generation model
const MAX_CONTENT_LENGTH: usize = 1000;

/// Page text handed to the execution judge
const MAX_PAGE_STATE_LENGTH: usize = 4000;

const GENERATION_SYSTEM_PROMPT: &str = "\
You are a senior QA engineer generating functional test scenarios for a web page. \
Derive realistic user-facing scenarios from the page content: navigation, forms, \
links, and visible interactive elements. Respond with a single JSON object and no \
other text, matching exactly this shape:\n\
{\"scenarios\": [{\"short_name\": \"snake_case_id\", \"name\": \"...\", \
\"objective\": \"...\", \"steps\": [\"...\"], \"expected_result\": \"...\", \
\"preconditions\": null}]}";

const EXECUTION_SYSTEM_PROMPT: &str = "\
You are a QA test executor judging whether a test scenario passes against the \
current state of a web page. Walk the steps mentally against the provided page \
state and decide the outcome. Respond with a single JSON object and no other \
text, matching exactly this shape:\n\
{\"status\": \"PASSED\" | \"FAILED\" | \"ERROR\", \"execution_details\": \"...\", \
\"errors_encountered\": [\"...\"] }";

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Reload the target if the browser wandered off it
async fn ensure_on_target(ctx: &RunContext) -> Result<(), StageError> {
    let current = ctx.browser.current_url().await?;
    if !current.ends_with(&ctx.url) {
        ctx.browser.navigate(&ctx.url).await?;
    }
    Ok(())
}

/// Generates test scenarios from the parsed page content
pub struct ScenarioGenerationStage;

#[async_trait]
impl Stage for ScenarioGenerationStage {
    fn id(&self) -> &'static str {
        "scenario_generation"
    }

    fn display_name(&self) -> &'static str {
        "Test Scenario Generation"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["driver_access", "html_validator"]
    }

    async fn run(
        &self,
        ctx: &RunContext,
        emitter: &Emitter,
    ) -> Result<StageArtifact, StageError> {
        ensure_on_target(ctx).await?;

        let text = {
            let history = ctx.history.lock().await;
            let doc = history
                .artifact("html_validator")
                .and_then(|artifact| artifact.as_document());
            match doc {
                Some(doc) => truncate(doc.text(), MAX_CONTENT_LENGTH).to_string(),
                None => {
                    return Err(StageError::Precondition(
                        "Parsed page content unavailable for scenario generation".to_string(),
                    ))
                }
            }
        };

        let title = ctx.browser.title().await?;
        let prompt = format!(
            "Generate test scenarios for this web page.\n\nURL: {}\nTitle: {}\n\nVisible content:\n{}",
            ctx.url, title, text
        );

        let result: TestScenarioList = ctx
            .llm
            .chat_structured(GENERATION_SYSTEM_PROMPT, &prompt)
            .await?;

        emitter
            .send(Message::test_scenarios(
                format!("Generated {} scenarios.", result.scenarios.len()),
                &result,
            ))
            .await?;
        Ok(StageArtifact::Scenarios(result))
    }
}

#[derive(Debug, Deserialize)]
struct ScenarioVerdict {
    status: TestStatus,
    execution_details: String,
    #[serde(default)]
    errors_encountered: Option<Vec<String>>,
}

/// Executes every generated scenario against the live page and reports a
/// terminal execution summary
pub struct ScenarioExecutionStage;

impl ScenarioExecutionStage {
    async fn judge(
        &self,
        ctx: &RunContext,
        scenario: &TestScenario,
    ) -> Result<ScenarioVerdict, StageError> {
        ensure_on_target(ctx).await?;
        let source = ctx.browser.page_source().await?;
        let page = HtmlDocument::parse(&source);
        let title = ctx.browser.title().await?;

        let prompt = format!(
            "Scenario: {}\nObjective: {}\nPreconditions: {}\nSteps:\n{}\nExpected result: {}\n\n\
             Page under test: {}\nTitle: {}\nPage state:\n{}",
            scenario.name,
            scenario.objective,
            scenario.preconditions.as_deref().unwrap_or("none"),
            scenario
                .steps
                .iter()
                .enumerate()
                .map(|(i, s)| format!("{}. {}", i + 1, s))
                .collect::<Vec<_>>()
                .join("\n"),
            scenario.expected_result,
            ctx.url,
            title,
            truncate(page.text(), MAX_PAGE_STATE_LENGTH),
        );

        Ok(ctx
            .llm
            .chat_structured(EXECUTION_SYSTEM_PROMPT, &prompt)
            .await?)
    }
}

#[async_trait]
impl Stage for ScenarioExecutionStage {
    fn id(&self) -> &'static str {
        "scenario_execution"
    }

    fn display_name(&self) -> &'static str {
        "Test Scenario Execution"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["driver_access", "scenario_generation"]
    }

    async fn run(
        &self,
        ctx: &RunContext,
        emitter: &Emitter,
    ) -> Result<StageArtifact, StageError> {
        let scenarios = {
            let history = ctx.history.lock().await;
            match history
                .artifact("scenario_generation")
                .and_then(|artifact| artifact.as_scenarios())
            {
                Some(list) => list.clone(),
                None => {
                    return Err(StageError::Precondition(
                        "No generated scenarios available for execution".to_string(),
                    ))
                }
            }
        };

        let mut results = Vec::new();
        let mut passed = 0;
        let mut failed = 0;
        let mut errors = 0;

        for scenario in &scenarios.scenarios {
            emitter
                .send(
                    Message::evaluation(
                        format!("Executing scenario: {}", scenario.name),
                        Level::Info,
                    )
                    .with_scenario(&scenario.short_name),
                )
                .await?;

            let started = Instant::now();
            match self.judge(ctx, scenario).await {
                Ok(verdict) => {
                    let level = match verdict.status {
                        TestStatus::Passed => {
                            passed += 1;
                            Level::Success
                        }
                        TestStatus::Failed => {
                            failed += 1;
                            Level::Error
                        }
                        TestStatus::Error => {
                            errors += 1;
                            Level::Error
                        }
                    };
                    emitter
                        .send(
                            Message::evaluation(
                                format!(
                                    "Scenario {} completed: {}",
                                    scenario.name, verdict.status
                                ),
                                level,
                            )
                            .with_scenario(&scenario.short_name),
                        )
                        .await?;
                    results.push(TestExecutionResult {
                        scenario_name: scenario.name.clone(),
                        status: verdict.status,
                        execution_details: verdict.execution_details,
                        errors_encountered: verdict.errors_encountered,
                        execution_time_seconds: Some(started.elapsed().as_secs_f64()),
                    });
                }
                Err(StageError::Disconnected) => return Err(StageError::Disconnected),
                Err(e) => {
                    emitter
                        .send(
                            Message::evaluation(
                                format!("A crash occurred during scenario {}.", scenario.name),
                                Level::Error,
                            )
                            .with_scenario(&scenario.short_name),
                        )
                        .await?;
                    errors += 1;
                    results.push(TestExecutionResult {
                        scenario_name: scenario.name.clone(),
                        status: TestStatus::Error,
                        execution_details: format!("Failed to execute scenario: {}", e),
                        errors_encountered: Some(vec![e.to_string()]),
                        execution_time_seconds: Some(started.elapsed().as_secs_f64()),
                    });
                }
            }
        }

        let report = TestExecutionReport {
            total_scenarios: scenarios.scenarios.len(),
            passed,
            failed,
            errors,
            results,
        };
        emitter
            .send(Message::execution_report(
                format!(
                    "Executed {} scenarios: {} passed, {} failed, {} errors.",
                    report.total_scenarios, report.passed, report.failed, report.errors
                ),
                &report,
            ))
            .await?;
        Ok(StageArtifact::Report(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("abcdef", 3), "abc");
        assert_eq!(truncate("ab", 3), "ab");
        // Multi-byte characters are counted, not sliced
        assert_eq!(truncate("ééé", 2), "éé");
    }

    #[test]
    fn test_verdict_decodes_model_output() {
        let verdict: ScenarioVerdict = serde_json::from_str(
            r#"{"status": "FAILED", "execution_details": "submit button missing"}"#,
        )
        .unwrap();
        assert_eq!(verdict.status, TestStatus::Failed);
        assert!(verdict.errors_encountered.is_none());
    }
}
