//! Axum HTTP handlers for the web server
//!
//! Provides the server information endpoint, the SSE connection endpoint and
//! the message endpoint that feeds JSON-RPC requests into a session.

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::errors::AppError;
use crate::mcp::rpc::{json_rpc_error, PARSE_ERROR};
use crate::mcp::server::handle_json_rpc_payload;
use crate::AppState;

pub const SSE_PATH: &str = "/sse";
pub const MESSAGES_PATH: &str = "/messages";
pub const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
pub struct ServerInfoResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub status: &'static str,
    pub endpoints: EndpointMap,
    pub tools: Vec<ToolSummary>,
    pub resources: Vec<ResourceSummary>,
}

#[derive(Debug, Serialize)]
pub struct EndpointMap {
    pub sse: &'static str,
    pub messages: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResourceSummary {
    pub name: String,
    #[serde(rename = "uriTemplate")]
    pub uri_template: String,
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

pub async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        status: "running",
        endpoints: EndpointMap {
            sse: SSE_PATH,
            messages: MESSAGES_PATH,
        },
        tools: state
            .tools
            .definitions()
            .into_iter()
            .map(|tool| ToolSummary {
                name: tool.name,
                description: tool.description,
            })
            .collect(),
        resources: state
            .resources
            .templates()
            .iter()
            .map(|entry| ResourceSummary {
                name: entry.name.clone(),
                uri_template: entry.uri_template.clone(),
            })
            .collect(),
    })
}

pub async fn sse_connect(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.sessions.open();
    Sse::new(session.into_event_stream(MESSAGES_PATH))
        .keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE))
}

pub async fn post_message(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
    body: Bytes,
) -> Result<Response, AppError> {
    let session_id = query
        .session_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            AppError::bad_request("missing_session_id", "sessionId query parameter is required")
        })?;

    if !state.sessions.contains(&session_id) {
        return Err(AppError::not_found(
            "session_not_found",
            "no active session with this id",
        ));
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            return Ok((
                StatusCode::BAD_REQUEST,
                Json(json_rpc_error(None, PARSE_ERROR, "Parse error")),
            )
                .into_response())
        }
    };

    if let Some(response) = handle_json_rpc_payload(&state, payload).await {
        state.sessions.deliver(&session_id, response).await?;
    } else {
        debug!(session_id = %session_id, "no response queued for message");
    }

    Ok((StatusCode::ACCEPTED, "Accepted").into_response())
}
