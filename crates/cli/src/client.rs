//! HTTP client for the evaluation stream

use futures::StreamExt;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use blackscope_common::{Message, StreamReader};

use crate::view::RunView;

/// Client-side errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server rejected the request (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("stream ended unexpectedly before the run completed")]
    UnexpectedEnd,
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Client for the Blackscope evaluation server
pub struct QaClient {
    http: reqwest::Client,
    base_url: String,
}

impl QaClient {
    pub fn new(base_url: impl Into<String>) -> ClientResult<Self> {
        // No overall timeout: a run streams for as long as its stages take.
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Check server health, returning the raw body
    pub async fn health(&self) -> ClientResult<String> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    /// Run a streaming evaluation against `url`
    ///
    /// Decoded messages are folded into a [`RunView`] as they arrive;
    /// `observe` sees every message together with the view state after it.
    /// A stream that closes without an end-state descriptor is surfaced as
    /// [`ClientError::UnexpectedEnd`], never as silent success.
    pub async fn stream_qa<F>(&self, url: &str, mut observe: F) -> ClientResult<RunView>
    where
        F: FnMut(&Message, &RunView),
    {
        let response = self
            .http
            .post(format!("{}/qa", self.base_url))
            .json(&json!({ "url": url }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let mut reader = StreamReader::new();
        let mut view = RunView::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            for envelope in reader.push(&chunk?) {
                view.apply(envelope.content.clone());
                observe(&envelope.content, &view);
            }
        }
        if let Some(envelope) = reader.finish() {
            view.apply(envelope.content.clone());
            observe(&envelope.content, &view);
        }

        if !view.is_complete {
            debug!("stream closed without an end-state descriptor");
            return Err(ClientError::UnexpectedEnd);
        }
        Ok(view)
    }
}
