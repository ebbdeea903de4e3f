//! Reachability and browser-access stages

use async_trait::async_trait;
use reqwest::Method;

use blackscope_common::{Level, Message};

use crate::stage::{Emitter, FetchedPage, RunContext, Stage, StageArtifact, StageError};

const PLAUSIBLE_CONTENT_TYPES: &[&str] = &["text/html", "application/xhtml+xml"];

/// Checks that the target answers HTTP and serves HTML-like content
///
/// Probes the site with OPTIONS first, then GET, inspecting the
/// `Content-Type` of both responses. A failed GET is a precondition failure:
/// nothing downstream can work without the page.
pub struct AccessCheckStage;

impl AccessCheckStage {
    async fn inspect_content_type(
        &self,
        content_type: Option<&str>,
        method: &str,
        emitter: &Emitter,
    ) -> Result<(), StageError> {
        match content_type {
            None => {
                emitter
                    .send(Message::evaluation(
                        format!("Content-Type header missing in {} response.", method),
                        Level::Bug,
                    ))
                    .await
            }
            Some(value) => {
                if PLAUSIBLE_CONTENT_TYPES.iter().any(|ct| value.starts_with(ct)) {
                    Ok(())
                } else {
                    emitter
                        .send(Message::evaluation(
                            format!("Invalid Content-Type header in {} response.", method),
                            Level::Error,
                        ))
                        .await
                }
            }
        }
    }
}

fn content_type_of(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

#[async_trait]
impl Stage for AccessCheckStage {
    fn id(&self) -> &'static str {
        "access_check"
    }

    fn display_name(&self) -> &'static str {
        "Reachability Check"
    }

    async fn run(
        &self,
        ctx: &RunContext,
        emitter: &Emitter,
    ) -> Result<StageArtifact, StageError> {
        let shake = ctx
            .http
            .request(Method::OPTIONS, &ctx.url)
            .send()
            .await?;
        if !shake.status().is_success() {
            emitter
                .send(Message::evaluation(
                    "Failed to pre-fetch the website via OPTIONS.",
                    Level::Error,
                ))
                .await?;
        }
        let shake_content_type = content_type_of(&shake);
        self.inspect_content_type(shake_content_type.as_deref(), "OPTIONS", emitter)
            .await?;

        let response = ctx.http.get(&ctx.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StageError::Precondition(
                "Failed to connect to the website".to_string(),
            ));
        }

        let content_type = content_type_of(&response);
        self.inspect_content_type(content_type.as_deref(), "GET", emitter)
            .await?;
        if let (Some(got), Some(expected)) = (&content_type, &shake_content_type) {
            if got != expected {
                emitter
                    .send(Message::evaluation(
                        "Content-Type header mismatch between pre-fetch and fetch",
                        Level::Warning,
                    ))
                    .await?;
            }
        }
        emitter
            .send(Message::evaluation(
                "Successfully connected to the website.",
                Level::Info,
            ))
            .await?;

        let body = response.text().await?;
        Ok(StageArtifact::Page(FetchedPage {
            status: status.as_u16(),
            ok: true,
            content_type,
            body,
        }))
    }
}

/// Loads the target into the shared browser session
pub struct DriverAccessStage;

#[async_trait]
impl Stage for DriverAccessStage {
    fn id(&self) -> &'static str {
        "driver_access"
    }

    fn display_name(&self) -> &'static str {
        "WebDriver Access"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["access_check"]
    }

    async fn run(
        &self,
        ctx: &RunContext,
        emitter: &Emitter,
    ) -> Result<StageArtifact, StageError> {
        ctx.browser.navigate(&ctx.url).await?;
        emitter
            .send(Message::evaluation(
                "Successfully loaded the website into AI-powered browser.",
                Level::Info,
            ))
            .await?;
        Ok(StageArtifact::None)
    }
}
