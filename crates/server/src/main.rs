use std::net::SocketAddr;

use tracing::info;

use blackscope_server::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ServerConfig::from_env();
    let addr: SocketAddr = config.listen_addr.parse()?;

    info!(
        "Starting Blackscope QA server on http://{} (webdriver: {}, model: {})",
        addr, config.browser.webdriver_url, config.llm.model
    );

    blackscope_server::server::serve(addr, config).await
}
