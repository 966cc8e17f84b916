use std::sync::Arc;

use axum::{
    http::Method,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

pub mod config;
pub mod domain;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod upstream_client;

use errors::AppError;
use mcp::{
    registry::{ResourceRegistry, ToolRegistry},
    session::SessionRegistry,
};
use upstream_client::UpstreamApis;

#[derive(Clone)]
pub struct AppState {
    pub tools: Arc<ToolRegistry>,
    pub resources: Arc<ResourceRegistry>,
    pub sessions: SessionRegistry,
}

impl AppState {
    pub fn new(
        search_api_key: Option<String>,
        apis: Arc<dyn UpstreamApis>,
    ) -> Result<Self, AppError> {
        let mut tools = ToolRegistry::new();
        domain::tools::register_tools(&mut tools, apis, search_api_key.map(Arc::<str>::from))?;

        let mut resources = ResourceRegistry::new();
        domain::resources::register_resources(&mut resources)?;

        Ok(Self {
            tools: Arc::new(tools),
            resources: Arc::new(resources),
            sessions: SessionRegistry::new(),
        })
    }
}

pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(http::handlers::server_info))
        .route(http::handlers::SSE_PATH, get(http::handlers::sse_connect))
        .route(http::handlers::MESSAGES_PATH, post(http::handlers::post_message))
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::UpstreamConfig;
    use crate::domain::tools::tests::MockApis;
    use crate::upstream_client::HttpApiClient;

    use super::*;

    fn app_with(search_api_key: Option<&str>, apis: Arc<dyn UpstreamApis>) -> Router {
        let state = AppState::new(search_api_key.map(str::to_string), apis).expect("state builds");
        build_app(state)
    }

    fn app() -> Router {
        app_with(Some("key-123"), Arc::new(MockApis::berlin()))
    }

    async fn open_session(app: &Router) -> Body {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/sse")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        response.into_body()
    }

    /// Reads one SSE event and returns its `(event, data)` pair.
    async fn next_event(body: &mut Body) -> (String, String) {
        let mut buffer = String::new();
        while !buffer.contains("\n\n") {
            let frame = body
                .frame()
                .await
                .expect("stream still open")
                .expect("frame read");
            if let Ok(data) = frame.into_data() {
                buffer.push_str(std::str::from_utf8(&data).expect("utf8 event"));
            }
        }

        let mut event = String::new();
        let mut data = Vec::new();
        for line in buffer.lines() {
            if let Some(value) = line.strip_prefix("event:") {
                event = value.trim().to_string();
            } else if let Some(value) = line.strip_prefix("data:") {
                data.push(value.trim_start().to_string());
            }
        }
        (event, data.join("\n"))
    }

    async fn post_message(app: &Router, uri: &str, body: impl Into<Body>) -> StatusCode {
        app.clone()
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .method("POST")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(body.into())
                    .expect("request build"),
            )
            .await
            .expect("request execution")
            .status()
    }

    /// Opens a session, posts `request` to it and returns the pushed response.
    async fn rpc(app: &Router, request: Value) -> Value {
        let mut stream = open_session(app).await;
        let (event, endpoint) = next_event(&mut stream).await;
        assert_eq!(event, "endpoint");

        let status = post_message(app, &endpoint, request.to_string()).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (event, data) = next_event(&mut stream).await;
        assert_eq!(event, "message");
        serde_json::from_str(&data).expect("valid json-rpc message")
    }

    fn tool_call(id: i64, name: &str, arguments: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": {"name": name, "arguments": arguments}
        })
    }

    #[tokio::test]
    async fn server_info_lists_tools() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        let body_json: Value = serde_json::from_slice(&body).expect("valid json response");

        assert_eq!(body_json["name"], env!("CARGO_PKG_NAME"));
        assert_eq!(body_json["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body_json["status"], "running");
        assert_eq!(body_json["endpoints"]["sse"], "/sse");
        assert_eq!(body_json["endpoints"]["messages"], "/messages");
        let names: Vec<&str> = body_json["tools"]
            .as_array()
            .expect("tools array")
            .iter()
            .filter_map(|tool| tool["name"].as_str())
            .collect();
        assert_eq!(names, vec!["add", "weather", "search"]);
        assert_eq!(body_json["resources"][0]["uriTemplate"], "greeting://{name}");
    }

    #[tokio::test]
    async fn cors_preflight_allows_any_origin() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/messages")
                    .method("OPTIONS")
                    .header(header::ORIGIN, "https://example.com")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
            .is_none());
    }

    #[tokio::test]
    async fn sse_announces_message_endpoint() {
        let app = app();
        let mut stream = open_session(&app).await;
        let (event, data) = next_event(&mut stream).await;

        assert_eq!(event, "endpoint");
        assert!(data.starts_with("/messages?sessionId="));
    }

    #[tokio::test]
    async fn messages_without_session_id_are_rejected() {
        let status = post_message(
            &app(),
            "/messages",
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn messages_for_unknown_session_are_not_found() {
        let status = post_message(
            &app(),
            "/messages?sessionId=does-not-exist",
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_message_is_a_parse_error() {
        let app = app();
        let mut stream = open_session(&app).await;
        let (_, endpoint) = next_event(&mut stream).await;

        let status = post_message(&app, &endpoint, "{").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn concurrent_sessions_receive_only_their_own_responses() {
        let app = app();
        let mut first = open_session(&app).await;
        let (_, first_endpoint) = next_event(&mut first).await;
        let mut second = open_session(&app).await;
        let (_, second_endpoint) = next_event(&mut second).await;
        assert_ne!(first_endpoint, second_endpoint);

        let status = post_message(
            &app,
            &second_endpoint,
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (_, data) = next_event(&mut second).await;
        let message: Value = serde_json::from_str(&data).expect("json message");
        assert_eq!(message["id"], 2);

        let nothing = tokio::time::timeout(Duration::from_millis(100), first.frame()).await;
        assert!(nothing.is_err(), "first session must not receive the response");

        let status = post_message(
            &app,
            &first_endpoint,
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let (_, data) = next_event(&mut first).await;
        let message: Value = serde_json::from_str(&data).expect("json message");
        assert_eq!(message["id"], 1);
    }

    #[tokio::test]
    async fn closed_session_stops_accepting_messages() {
        let app = app();
        let mut stream = open_session(&app).await;
        let (_, endpoint) = next_event(&mut stream).await;
        drop(stream);

        let status = post_message(
            &app,
            &endpoint,
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn initialize_returns_capabilities() {
        let response = rpc(
            &app(),
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": {
                    "protocolVersion": "2024-11-05",
                    "clientInfo": {"name": "test-client", "version": "1.0.0"},
                    "capabilities": {}
                }
            }),
        )
        .await;

        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(
            response["result"]["serverInfo"]["name"],
            env!("CARGO_PKG_NAME")
        );
        assert!(response["result"]["capabilities"]["tools"].is_object());
        assert!(response["result"]["capabilities"]["resources"].is_object());
    }

    #[tokio::test]
    async fn notification_pushes_nothing() {
        let app = app();
        let mut stream = open_session(&app).await;
        let (_, endpoint) = next_event(&mut stream).await;

        let status = post_message(
            &app,
            &endpoint,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let nothing = tokio::time::timeout(Duration::from_millis(100), stream.frame()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn batch_returns_only_id_responses() {
        let response = rpc(
            &app(),
            json!([
                {"jsonrpc": "2.0", "method": "notifications/initialized"},
                {"jsonrpc": "2.0", "id": 100, "method": "ping"},
                {"jsonrpc": "2.0", "id": 200, "method": "tools/list", "params": {}}
            ]),
        )
        .await;

        let responses = response.as_array().expect("batch response array");
        assert_eq!(responses.len(), 2);
    }

    #[tokio::test]
    async fn tools_list_has_typed_schemas() {
        let response = rpc(
            &app(),
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list", "params": {}}),
        )
        .await;

        let tools = &response["result"]["tools"];
        assert_eq!(tools[0]["name"], "add");
        assert_eq!(tools[0]["inputSchema"]["properties"]["a"]["type"], "number");
        assert_eq!(tools[1]["name"], "weather");
        assert_eq!(tools[1]["inputSchema"]["properties"]["city"]["type"], "string");
        assert_eq!(tools[2]["name"], "search");
        let required = tools[2]["inputSchema"]["required"]
            .as_array()
            .expect("required list");
        assert!(required.contains(&json!("query")));
        assert!(!required.contains(&json!("count")));
    }

    #[tokio::test]
    async fn add_returns_sum() {
        let response = rpc(&app(), tool_call(3, "add", json!({"a": 2, "b": 40}))).await;

        assert_eq!(response["id"], 3);
        assert_eq!(response["result"]["content"][0]["type"], "text");
        assert_eq!(response["result"]["content"][0]["text"], "42");
    }

    #[tokio::test]
    async fn add_with_invalid_arguments_is_invalid_params() {
        let response = rpc(&app(), tool_call(4, "add", json!({"a": "two", "b": 1}))).await;

        assert_eq!(response["error"]["code"], -32602);
        assert_eq!(response["error"]["data"]["code"], "invalid_arguments");
    }

    #[tokio::test]
    async fn tool_call_with_array_arguments_is_invalid_arguments() {
        let response = rpc(&app(), tool_call(12, "add", json!([1, 2]))).await;

        assert_eq!(response["id"], 12);
        assert_eq!(response["error"]["code"], -32602);
        assert_eq!(response["error"]["data"]["code"], "invalid_arguments");
    }

    #[tokio::test]
    async fn unknown_tool_is_method_not_found() {
        let response = rpc(&app(), tool_call(5, "divide", json!({}))).await;

        assert_eq!(response["error"]["code"], -32601);
        assert_eq!(response["error"]["data"]["code"], "tool_not_found");
    }

    #[tokio::test]
    async fn weather_unknown_city_is_soft_error_content() {
        let response = rpc(
            &app(),
            tool_call(6, "weather", json!({"city": "nonexistent-city-xyz"})),
        )
        .await;

        assert!(response.get("error").is_none());
        assert_eq!(response["result"]["isError"], true);
        let text = response["result"]["content"][0]["text"]
            .as_str()
            .expect("text content");
        assert!(text.contains("City not found"));
        assert_eq!(response["result"]["structuredContent"]["error"]["kind"], "not_found");
    }

    #[tokio::test]
    async fn weather_geocoding_outage_reports_location_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let apis = HttpApiClient::new(UpstreamConfig {
            geocoding_url: format!("{}/v1/search", server.uri()),
            weather_url: format!("{}/v1/forecast", server.uri()),
            max_retries: 0,
            ..UpstreamConfig::default()
        })
        .expect("client builds");

        let response = rpc(
            &app_with(None, Arc::new(apis)),
            tool_call(7, "weather", json!({"city": "Berlin"})),
        )
        .await;

        let text = response["result"]["content"][0]["text"]
            .as_str()
            .expect("text content");
        assert!(text.contains("Failed to fetch location"));
        assert_eq!(
            response["result"]["structuredContent"]["error"]["kind"],
            "upstream_failure"
        );
    }

    #[tokio::test]
    async fn search_without_key_is_protocol_error() {
        let apis = Arc::new(MockApis::berlin());
        let response = rpc(
            &app_with(None, apis.clone()),
            tool_call(8, "search", json!({"query": "test"})),
        )
        .await;

        assert_eq!(response["error"]["code"], -32603);
        assert_eq!(response["error"]["data"]["code"], "missing_configuration");
        assert_eq!(apis.call_count(), 0);
    }

    #[tokio::test]
    async fn search_returns_pretty_json_results() {
        let apis = MockApis::berlin();
        let expected = serde_json::to_string_pretty(&apis.search_results).expect("pretty json");

        let response = rpc(
            &app_with(Some("key-123"), Arc::new(apis)),
            tool_call(9, "search", json!({"query": "test"})),
        )
        .await;

        assert_eq!(response["result"]["content"][0]["text"], expected);
    }

    #[tokio::test]
    async fn search_text_keeps_upstream_field_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/res/v1/web/search"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"web":{"results":[{"url":"https://a","title":"A","page_age":"1d"}]}}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let apis = HttpApiClient::new(UpstreamConfig {
            search_url: format!("{}/res/v1/web/search", server.uri()),
            max_retries: 0,
            ..UpstreamConfig::default()
        })
        .expect("client builds");

        let response = rpc(
            &app_with(Some("key-123"), Arc::new(apis)),
            tool_call(13, "search", json!({"query": "rust", "count": 1})),
        )
        .await;

        assert_eq!(
            response["result"]["content"][0]["text"],
            "[\n  {\n    \"url\": \"https://a\",\n    \"title\": \"A\",\n    \"page_age\": \"1d\"\n  }\n]"
        );
    }

    #[tokio::test]
    async fn search_upstream_error_status_is_soft_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/res/v1/web/search"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let apis = HttpApiClient::new(UpstreamConfig {
            search_url: format!("{}/res/v1/web/search", server.uri()),
            ..UpstreamConfig::default()
        })
        .expect("client builds");

        let response = rpc(
            &app_with(Some("bad-key"), Arc::new(apis)),
            tool_call(14, "search", json!({"query": "rust"})),
        )
        .await;

        assert!(response.get("error").is_none());
        assert_eq!(response["result"]["isError"], true);
        let text = response["result"]["content"][0]["text"]
            .as_str()
            .expect("text content");
        assert!(text.starts_with("Search request failed"));
        assert_eq!(
            response["result"]["structuredContent"]["error"]["kind"],
            "upstream_failure"
        );
    }

    #[tokio::test]
    async fn weather_timeout_is_soft_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"results": []}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let apis = HttpApiClient::new(UpstreamConfig {
            geocoding_url: format!("{}/v1/search", server.uri()),
            weather_url: format!("{}/v1/forecast", server.uri()),
            timeout: Duration::from_millis(50),
            max_retries: 0,
            ..UpstreamConfig::default()
        })
        .expect("client builds");

        let response = rpc(
            &app_with(None, Arc::new(apis)),
            tool_call(15, "weather", json!({"city": "Berlin"})),
        )
        .await;

        assert!(response.get("error").is_none());
        assert_eq!(response["result"]["isError"], true);
        assert_eq!(
            response["result"]["content"][0]["text"],
            "Failed to fetch location data"
        );
        assert_eq!(
            response["result"]["structuredContent"]["error"]["kind"],
            "upstream_unavailable"
        );
    }

    #[tokio::test]
    async fn greeting_resource_reads_name() {
        let response = rpc(
            &app(),
            json!({
                "jsonrpc": "2.0",
                "id": 10,
                "method": "resources/read",
                "params": {"uri": "greeting://Ada"}
            }),
        )
        .await;

        assert_eq!(response["result"]["contents"][0]["uri"], "greeting://Ada");
        assert_eq!(response["result"]["contents"][0]["text"], "Hello, Ada!");
    }

    #[tokio::test]
    async fn resource_templates_list_greeting() {
        let response = rpc(
            &app(),
            json!({"jsonrpc": "2.0", "id": 11, "method": "resources/templates/list"}),
        )
        .await;

        assert_eq!(
            response["result"]["resourceTemplates"][0]["uriTemplate"],
            "greeting://{name}"
        );
        assert_eq!(response["result"]["resourceTemplates"][0]["name"], "greeting");
    }

    #[tokio::test]
    async fn unknown_resource_is_not_found() {
        let response = rpc(
            &app(),
            json!({
                "jsonrpc": "2.0",
                "id": 12,
                "method": "resources/read",
                "params": {"uri": "farewell://Ada"}
            }),
        )
        .await;

        assert_eq!(response["error"]["code"], -32601);
        assert_eq!(response["error"]["data"]["code"], "resource_not_found");
    }
}
