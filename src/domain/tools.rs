//! Interactive tools exposed via Model Context Protocol
//!
//! Provides `add`, `weather` and `search`. The weather and search tools
//! delegate their lookups to an `UpstreamApis` implementation.

use std::sync::Arc;

use rust_mcp_sdk::{
    macros,
    schema::{ContentBlock, TextContent},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::utils::{
    format_number, format_weather_report, normalize_city, normalize_search_count,
    normalize_search_query,
};
use crate::errors::{AppError, ToolError};
use crate::mcp::registry::{ToolRegistry, ToolResult};
use crate::upstream_client::UpstreamApis;

#[macros::mcp_tool(name = "add", description = "Add two numbers")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct AddTool {
    pub a: f64,
    pub b: f64,
}

#[macros::mcp_tool(name = "weather", description = "Get current weather for a city")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct WeatherTool {
    pub city: String,
}

#[macros::mcp_tool(
    name = "search",
    description = "Search the web; count defaults to 5 results"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct SearchTool {
    pub query: String,
    pub count: Option<f64>,
}

fn text(value: impl Into<String>) -> Vec<ContentBlock> {
    vec![ContentBlock::from(TextContent::new(value.into(), None, None))]
}

pub fn register_tools(
    registry: &mut ToolRegistry,
    apis: Arc<dyn UpstreamApis>,
    search_api_key: Option<Arc<str>>,
) -> Result<(), AppError> {
    registry.register(AddTool::tool(), |args: AddTool| async move { add(args) })?;

    let weather_apis = Arc::clone(&apis);
    registry.register(WeatherTool::tool(), move |args: WeatherTool| {
        let apis = Arc::clone(&weather_apis);
        async move { weather(apis.as_ref(), args).await }
    })?;

    registry.register(SearchTool::tool(), move |args: SearchTool| {
        let apis = Arc::clone(&apis);
        let api_key = search_api_key.clone();
        async move { search(apis.as_ref(), api_key.as_deref(), args).await }
    })?;

    Ok(())
}

pub fn add(args: AddTool) -> ToolResult {
    Ok(text(format_number(args.a + args.b)))
}

pub async fn weather(apis: &dyn UpstreamApis, args: WeatherTool) -> ToolResult {
    let city = normalize_city(&args.city)?;

    let location = apis
        .geocode(city)
        .await
        .map_err(|err| ToolError::from_upstream(&err, "Failed to fetch location data"))?
        .ok_or_else(|| ToolError::not_found(format!("City not found: {city}")))?;

    debug!(
        city,
        latitude = location.latitude,
        longitude = location.longitude,
        "resolved city"
    );

    let current = apis
        .current_weather(location.latitude, location.longitude)
        .await
        .map_err(|err| ToolError::from_upstream(&err, "Failed to fetch weather data"))?
        .ok_or_else(|| ToolError::not_found("Weather data not available"))?;

    Ok(text(format_weather_report(&location, &current)))
}

pub async fn search(
    apis: &dyn UpstreamApis,
    api_key: Option<&str>,
    args: SearchTool,
) -> ToolResult {
    let api_key = api_key.ok_or_else(|| {
        ToolError::missing_configuration("BRAVE_API_KEY is not configured")
    })?;
    let query = normalize_search_query(&args.query)?;
    let count = normalize_search_count(args.count)?;

    let results = apis
        .web_search(api_key, query, count)
        .await
        .map_err(|err| ToolError::from_upstream(&err, format!("Search request failed: {err}")))?;

    let rendered = serde_json::to_string_pretty(&results)
        .map_err(|err| ToolError::internal(format!("failed to serialize search results: {err}")))?;
    Ok(text(rendered))
}
