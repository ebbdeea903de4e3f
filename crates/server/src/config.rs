//! Server configuration
//!
//! Environment-driven; every field has a workable default for local
//! development. API keys are read from `BLACKSCOPE_API_KEY` with fallbacks
//! to the common provider variables.

use crate::browser::BrowserConfig;
use crate::llm::LlmConfig;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen address
    pub listen_addr: String,

    /// CORS origins allowed to call the API
    pub allowed_origins: Vec<String>,

    /// Browser session configuration
    pub browser: BrowserConfig,

    /// Chat-model configuration
    pub llm: LlmConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8000".to_string(),
            allowed_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
            ],
            browser: BrowserConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ServerConfig {
    /// Build the configuration from the environment
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(addr) = env_var("BLACKSCOPE_ADDR") {
            config.listen_addr = addr;
        }
        if let Some(origins) = env_var("BLACKSCOPE_ALLOWED_ORIGINS") {
            config.allowed_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }

        if let Some(url) = env_var("BLACKSCOPE_WEBDRIVER_URL") {
            config.browser.webdriver_url = url;
        }
        if let Some(width) = env_var("BLACKSCOPE_BROWSER_WIDTH").and_then(|v| v.parse().ok()) {
            config.browser.width = width;
        }
        if let Some(height) = env_var("BLACKSCOPE_BROWSER_HEIGHT").and_then(|v| v.parse().ok()) {
            config.browser.height = height;
        }
        if let Some(headless) = env_var("BLACKSCOPE_HEADLESS") {
            config.browser.headless = headless != "0" && !headless.eq_ignore_ascii_case("false");
        }

        if let Some(model) = env_var("BLACKSCOPE_MODEL") {
            config.llm.model = model;
        }
        if let Some(base_url) = env_var("BLACKSCOPE_LLM_BASE_URL") {
            config.llm.base_url = base_url;
        }
        config.llm.api_key = env_var("BLACKSCOPE_API_KEY")
            .or_else(|| env_var("DEEPSEEK_API_KEY"))
            .or_else(|| env_var("OPENAI_API_KEY"));

        config
    }
}
