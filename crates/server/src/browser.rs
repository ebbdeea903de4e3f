//! Browser automation session
//!
//! Thin WebDriver protocol client over HTTP. One session is created per run
//! against a driver endpoint (geckodriver by default) and deleted on every
//! exit path of that run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Browser session errors
#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Failed to reach WebDriver endpoint: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("WebDriver error: {error}: {message}")]
    Driver { error: String, message: String },

    #[error("Invalid WebDriver response: {0}")]
    InvalidResponse(String),

    #[error("No active browser session")]
    NotConnected,
}

pub type BrowserResult<T> = Result<T, BrowserError>;

/// Browser session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// WebDriver endpoint (geckodriver)
    pub webdriver_url: String,
    /// Viewport width, ensures proper page layout
    pub width: u32,
    pub height: u32,
    pub headless: bool,
    /// Per-command timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://127.0.0.1:4444".to_string(),
            width: 1920,
            height: 1080,
            headless: true,
            timeout_seconds: 60,
        }
    }
}

/// Capability shared by every browser-automation backend
#[async_trait]
pub trait Browser: Send + Sync {
    /// Create the underlying session. Failure here is run-fatal.
    async fn connect(&self) -> BrowserResult<()>;

    /// Navigate the session to a URL
    async fn navigate(&self, url: &str) -> BrowserResult<()>;

    async fn current_url(&self) -> BrowserResult<String>;

    async fn title(&self) -> BrowserResult<String>;

    /// Serialized DOM of the current page
    async fn page_source(&self) -> BrowserResult<String>;

    /// Delete the session. Called on every exit path of a run.
    async fn close(&self) -> BrowserResult<()>;
}

/// WebDriver-protocol browser session (headless Firefox by default)
pub struct WebDriverSession {
    config: BrowserConfig,
    http: reqwest::Client,
    session_id: Mutex<Option<String>>,
}

#[derive(Deserialize)]
struct WireValue {
    value: Value,
}

impl WebDriverSession {
    /// Create a new session handle (does not connect)
    pub fn new(config: BrowserConfig) -> BrowserResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            config,
            http,
            session_id: Mutex::new(None),
        })
    }

    fn capabilities(&self) -> Value {
        let mut args = vec![
            format!("--width={}", self.config.width),
            format!("--height={}", self.config.height),
        ];
        if self.config.headless {
            args.push("--headless".to_string());
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "firefox",
                    "moz:firefoxOptions": { "args": args }
                }
            }
        })
    }

    async fn session_url(&self, suffix: &str) -> BrowserResult<String> {
        let guard = self.session_id.lock().await;
        let id = guard.as_ref().ok_or(BrowserError::NotConnected)?;
        Ok(format!(
            "{}/session/{}{}",
            self.config.webdriver_url, id, suffix
        ))
    }

    /// Unwrap the `value` field, mapping protocol-level errors
    fn unwrap_value(value: Value) -> BrowserResult<Value> {
        if let Some(obj) = value.as_object() {
            if let (Some(error), Some(message)) = (obj.get("error"), obj.get("message")) {
                return Err(BrowserError::Driver {
                    error: error.as_str().unwrap_or("unknown").to_string(),
                    message: message.as_str().unwrap_or_default().to_string(),
                });
            }
        }
        Ok(value)
    }

    async fn execute(&self, method: reqwest::Method, url: &str, body: Option<Value>) -> BrowserResult<Value> {
        trace!("WebDriver {} {}", method, url);
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response: WireValue = request.send().await?.json().await?;
        Self::unwrap_value(response.value)
    }

    async fn get_string(&self, suffix: &str) -> BrowserResult<String> {
        let url = self.session_url(suffix).await?;
        let value = self.execute(reqwest::Method::GET, &url, None).await?;
        value
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| BrowserError::InvalidResponse(format!("expected string for {}", suffix)))
    }
}

#[async_trait]
impl Browser for WebDriverSession {
    async fn connect(&self) -> BrowserResult<()> {
        let url = format!("{}/session", self.config.webdriver_url);
        let value = self
            .execute(reqwest::Method::POST, &url, Some(self.capabilities()))
            .await?;

        let id = value
            .get("sessionId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BrowserError::InvalidResponse("missing sessionId".to_string()))?;

        debug!("WebDriver session created: {}", id);
        *self.session_id.lock().await = Some(id.to_string());
        Ok(())
    }

    async fn navigate(&self, url: &str) -> BrowserResult<()> {
        let endpoint = self.session_url("/url").await?;
        self.execute(reqwest::Method::POST, &endpoint, Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    async fn current_url(&self) -> BrowserResult<String> {
        self.get_string("/url").await
    }

    async fn title(&self) -> BrowserResult<String> {
        self.get_string("/title").await
    }

    async fn page_source(&self) -> BrowserResult<String> {
        self.get_string("/source").await
    }

    async fn close(&self) -> BrowserResult<()> {
        let id = self.session_id.lock().await.take();
        let Some(id) = id else {
            return Ok(());
        };
        let url = format!("{}/session/{}", self.config.webdriver_url, id);
        self.execute(reqwest::Method::DELETE, &url, None).await?;
        debug!("WebDriver session deleted: {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_reflect_config() {
        let session = WebDriverSession::new(BrowserConfig::default()).unwrap();
        let caps = session.capabilities();
        let args = caps["capabilities"]["alwaysMatch"]["moz:firefoxOptions"]["args"]
            .as_array()
            .unwrap();

        let rendered: Vec<&str> = args.iter().filter_map(|a| a.as_str()).collect();
        assert!(rendered.contains(&"--width=1920"));
        assert!(rendered.contains(&"--headless"));
    }

    #[test]
    fn test_headful_config_omits_headless_flag() {
        let session = WebDriverSession::new(BrowserConfig {
            headless: false,
            ..Default::default()
        })
        .unwrap();
        let caps = session.capabilities();
        assert!(!caps.to_string().contains("--headless"));
    }

    #[test]
    fn test_unwrap_value_maps_driver_errors() {
        let err = WebDriverSession::unwrap_value(json!({
            "error": "invalid session id",
            "message": "session deleted",
            "stacktrace": ""
        }))
        .unwrap_err();
        assert!(matches!(err, BrowserError::Driver { .. }));
    }

    #[tokio::test]
    async fn test_commands_require_connection() {
        let session = WebDriverSession::new(BrowserConfig::default()).unwrap();
        let err = session.session_url("/url").await.unwrap_err();
        assert!(matches!(err, BrowserError::NotConnected));
    }

    #[tokio::test]
    async fn test_close_without_session_is_noop() {
        let session = WebDriverSession::new(BrowserConfig::default()).unwrap();
        assert!(session.close().await.is_ok());
    }
}
