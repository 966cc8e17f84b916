//! The central Model Context Protocol engine
//!
//! Provides the primary MCP JSON-RPC decoding, method execution routing, capabilities
//! negotiation (`initialize`), and tool/resource dispatch.

use rust_mcp_sdk::schema::{
    CallToolRequest, CallToolRequestParams, CallToolResult, ContentBlock, Implementation,
    InitializeRequest, InitializeResult, JsonrpcMessage, JsonrpcRequest, ListResourcesRequest,
    ListResourcesResult, ListToolsRequest, ListToolsResult, PingRequest, ReadResourceContent,
    ReadResourceRequest, ReadResourceRequestParams, ReadResourceResult, ServerCapabilities,
    ServerCapabilitiesResources, ServerCapabilitiesTools, TextContent, TextResourceContents,
};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::errors::{AppError, ToolError};
use crate::mcp::rpc::{
    app_error_to_json_rpc, is_json_rpc_error, json_rpc_error, json_rpc_error_with_data,
    json_rpc_result, json_rpc_typed_result, request_id_to_value, tool_error_to_json_rpc,
    INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
};
use crate::AppState;

/// Protocol revisions this server accepts, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 3] = ["2025-06-18", "2025-03-26", "2024-11-05"];

/// Handles a decoded request body, single message or batch. Returns `None`
/// when nothing needs to be sent back (notifications only).
pub async fn handle_json_rpc_payload(state: &AppState, payload: Value) -> Option<Value> {
    let Value::Array(batch) = payload else {
        return handle_json_rpc_value(state, payload).await;
    };

    if batch.is_empty() {
        return Some(Value::Array(vec![json_rpc_error(
            None,
            INVALID_REQUEST,
            "Invalid Request",
        )]));
    }

    let mut responses = Vec::new();
    for item in batch {
        if let Some(response) = handle_json_rpc_value(state, item).await {
            responses.push(response);
        }
    }

    if responses.is_empty() {
        None
    } else {
        Some(Value::Array(responses))
    }
}

pub async fn handle_json_rpc_value(state: &AppState, payload: Value) -> Option<Value> {
    if !payload.is_object() {
        return Some(json_rpc_error(None, INVALID_REQUEST, "Invalid Request"));
    }

    let request_id = payload.get("id").cloned();
    let parsed: JsonrpcMessage = match serde_json::from_value(payload) {
        Ok(message) => message,
        Err(_) => return Some(json_rpc_error(request_id, INVALID_REQUEST, "Invalid Request")),
    };

    match parsed {
        JsonrpcMessage::Request(request) => {
            if let Err(error_response) = validate_request_shape(&request) {
                return Some(error_response);
            }

            let request_id = request_id_to_value(request.id);
            if request.method.trim().is_empty() {
                return Some(json_rpc_error(Some(request_id), INVALID_REQUEST, "Invalid Request"));
            }

            Some(
                handle_json_rpc_request(
                    state,
                    Some(request_id),
                    request.method,
                    request.params.map(Value::Object),
                )
                .await,
            )
        }
        JsonrpcMessage::Notification(notification) => {
            info!(method = %notification.method, "mcp notification received");
            None
        }
        JsonrpcMessage::ResultResponse(_) | JsonrpcMessage::ErrorResponse(_) => None,
    }
}

pub fn validate_request_shape(request: &JsonrpcRequest) -> Result<(), Value> {
    let request_id = Some(request_id_to_value(request.id.clone()));
    let invalid = || json_rpc_error(request_id.clone(), INVALID_PARAMS, "Invalid params");
    let payload = serde_json::to_value(request).map_err(|_| invalid())?;

    let valid = match request.method.as_str() {
        "tools/call" => serde_json::from_value::<CallToolRequest>(payload).is_ok(),
        "resources/read" => serde_json::from_value::<ReadResourceRequest>(payload).is_ok(),
        "tools/list" => serde_json::from_value::<ListToolsRequest>(payload).is_ok(),
        "resources/list" => serde_json::from_value::<ListResourcesRequest>(payload).is_ok(),
        "ping" => serde_json::from_value::<PingRequest>(payload).is_ok(),
        "initialize" => serde_json::from_value::<InitializeRequest>(payload).is_ok(),
        _ => true,
    };

    if valid {
        Ok(())
    } else if request.method == "tools/call" {
        Err(tool_error_to_json_rpc(request_id.clone(), &malformed_tool_call()))
    } else {
        Err(invalid())
    }
}

fn malformed_tool_call() -> ToolError {
    ToolError::invalid_arguments("tools/call requires a tool name and object arguments")
}

pub async fn handle_json_rpc_request(
    state: &AppState,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
) -> Value {
    let audit_params = redact_audit_params(params.as_ref());

    let response = match method.as_str() {
        "initialize" => match negotiate_protocol_version(params.as_ref()) {
            Ok(protocol_version) => json_rpc_typed_result(
                id,
                &InitializeResult {
                    server_info: Implementation {
                        name: env!("CARGO_PKG_NAME").to_string(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                        title: None,
                        description: None,
                        icons: vec![],
                        website_url: None,
                    },
                    capabilities: ServerCapabilities {
                        tools: Some(ServerCapabilitiesTools {
                            list_changed: Some(false),
                        }),
                        resources: Some(ServerCapabilitiesResources {
                            subscribe: Some(false),
                            list_changed: Some(false),
                        }),
                        prompts: None,
                        ..Default::default()
                    },
                    protocol_version: protocol_version.to_string(),
                    instructions: None,
                    meta: None,
                },
            ),
            Err(err) => app_error_to_json_rpc(id, err),
        },
        "ping" => json_rpc_result(id, json!({})),
        "tools/list" => json_rpc_typed_result(
            id,
            &ListToolsResult {
                meta: None,
                next_cursor: None,
                tools: state.tools.definitions(),
            },
        ),
        "tools/call" => handle_tools_call(state, id, params).await,
        "resources/list" => json_rpc_typed_result(
            id,
            &ListResourcesResult {
                meta: None,
                next_cursor: None,
                resources: vec![],
            },
        ),
        "resources/templates/list" => json_rpc_result(id, resource_templates(state)),
        "resources/read" => handle_resources_read(state, id, params),
        _ => json_rpc_error(id, METHOD_NOT_FOUND, "Method not found"),
    };

    info!(
        method = %method,
        params = %audit_params,
        outcome = if is_json_rpc_error(&response) { "failure" } else { "success" },
        "mcp action audited"
    );

    response
}

pub async fn handle_tools_call(state: &AppState, id: Option<Value>, params: Option<Value>) -> Value {
    let Some(tool_call) =
        params.and_then(|raw| serde_json::from_value::<CallToolRequestParams>(raw).ok())
    else {
        return tool_error_to_json_rpc(id, &malformed_tool_call());
    };

    let arguments = tool_call.arguments.unwrap_or_default();
    match state.tools.call(&tool_call.name, arguments).await {
        Some(Ok(content)) => json_rpc_typed_result(
            id,
            &CallToolResult {
                content,
                is_error: None,
                meta: None,
                structured_content: None,
            },
        ),
        Some(Err(err)) if err.kind.is_protocol_error() => tool_error_to_json_rpc(id, &err),
        Some(Err(err)) => json_rpc_typed_result(id, &tool_error_result(&err)),
        None => json_rpc_error_with_data(
            id,
            METHOD_NOT_FOUND,
            "Method not found",
            Some(json!({
                "code": "tool_not_found",
                "message": "unknown tool name",
                "details": {
                    "name": tool_call.name,
                },
            })),
        ),
    }
}

/// Soft tool failures are returned to the caller as error content.
pub fn tool_error_result(err: &ToolError) -> CallToolResult {
    CallToolResult {
        content: vec![ContentBlock::from(TextContent::new(
            err.message.clone(),
            None,
            None,
        ))],
        is_error: Some(true),
        meta: None,
        structured_content: Some(Map::from_iter([(
            "error".to_string(),
            json!({
                "kind": err.kind,
                "message": err.message,
            }),
        )])),
    }
}

fn resource_templates(state: &AppState) -> Value {
    let templates = state
        .resources
        .templates()
        .iter()
        .map(|entry| {
            json!({
                "name": entry.name,
                "uriTemplate": entry.uri_template,
                "description": entry.description,
                "mimeType": entry.mime_type,
            })
        })
        .collect::<Vec<_>>();

    json!({ "resourceTemplates": templates })
}

pub fn handle_resources_read(state: &AppState, id: Option<Value>, params: Option<Value>) -> Value {
    let Some(raw_params) = params else {
        return json_rpc_error(id, INVALID_PARAMS, "Invalid params");
    };

    let resource_read: ReadResourceRequestParams = match serde_json::from_value(raw_params) {
        Ok(value) => value,
        Err(_) => return json_rpc_error(id, INVALID_PARAMS, "Invalid params"),
    };

    match state.resources.read(&resource_read.uri) {
        Some((entry, text)) => json_rpc_typed_result(
            id,
            &ReadResourceResult {
                contents: vec![ReadResourceContent::from(TextResourceContents {
                    meta: None,
                    mime_type: entry.mime_type.clone(),
                    text,
                    uri: resource_read.uri.clone(),
                })],
                meta: None,
            },
        ),
        None => json_rpc_error_with_data(
            id,
            METHOD_NOT_FOUND,
            "Method not found",
            Some(json!({
                "code": "resource_not_found",
                "message": "unknown resource uri",
                "details": {
                    "uri": resource_read.uri,
                },
            })),
        ),
    }
}

/// Echoes the client's protocol revision when supported, otherwise offers
/// the newest revision this server speaks.
pub fn negotiate_protocol_version(params: Option<&Value>) -> Result<&'static str, AppError> {
    let offered_version = params
        .and_then(Value::as_object)
        .and_then(|object| object.get("protocolVersion"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|version| !version.is_empty())
        .ok_or_else(|| {
            AppError::bad_request(
                "invalid_protocol_version",
                "initialize params.protocolVersion is required",
            )
        })?;

    Ok(SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .copied()
        .find(|version| *version == offered_version)
        .unwrap_or(SUPPORTED_PROTOCOL_VERSIONS[0]))
}

pub fn redact_audit_params(params: Option<&Value>) -> Value {
    params.map(redact_audit_value).unwrap_or(Value::Null)
}

pub fn redact_audit_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), redact_audit_value(item))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_audit_value).collect()),
        _ => value.clone(),
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    matches!(
        normalized.as_str(),
        "authorization" | "bearer" | "api_key" | "apikey" | "subscription_token"
    ) || normalized.contains("token")
        || normalized.contains("secret")
        || normalized.contains("password")
        || normalized.contains("credential")
}
