use std::sync::Arc;

use sse_tools_mcp::{build_app, config::Config, logging, upstream_client::HttpApiClient, AppState};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;
    if config.search_api_key.is_none() {
        warn!("BRAVE_API_KEY is not set; the search tool will fail until it is configured");
    }

    let apis = Arc::new(HttpApiClient::new(config.upstream.clone())?);
    let bind_socket = config.bind_socket()?;
    let state = AppState::new(config.search_api_key.clone(), apis)?;
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        port = config.port,
        "server starting"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
