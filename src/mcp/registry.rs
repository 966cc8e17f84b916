//! Tool and resource registries
//!
//! Tools are registered with a typed argument struct; incoming arguments are
//! deserialized into it before the handler is invoked. Resources are
//! registered with a URI template whose `{placeholder}` segments are passed
//! to the handler.

use std::{collections::HashMap, future::Future, sync::Arc};

use futures::future::BoxFuture;
use regex::Regex;
use rust_mcp_sdk::schema::{ContentBlock, Tool};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::errors::{AppError, ToolError};

pub type ToolResult = Result<Vec<ContentBlock>, ToolError>;

type ErasedToolHandler = dyn Fn(Map<String, Value>) -> BoxFuture<'static, ToolResult> + Send + Sync;

struct RegisteredTool {
    definition: Tool,
    handler: Box<ErasedToolHandler>,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<A, F, Fut>(&mut self, definition: Tool, handler: F) -> Result<(), AppError>
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        if self.get(&definition.name).is_some() {
            return Err(AppError::internal(format!(
                "tool {} is already registered",
                definition.name
            )));
        }

        let handler = Arc::new(handler);
        let erased = move |arguments: Map<String, Value>| -> BoxFuture<'static, ToolResult> {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let arguments: A = serde_json::from_value(Value::Object(arguments))
                    .map_err(|err| ToolError::invalid_arguments(err.to_string()))?;
                handler(arguments).await
            })
        };

        self.tools.push(RegisteredTool {
            definition,
            handler: Box::new(erased),
        });
        Ok(())
    }

    pub fn definitions(&self) -> Vec<Tool> {
        self.tools.iter().map(|tool| tool.definition.clone()).collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|tool| tool.definition.name.as_str())
    }

    /// Validates `arguments` against the tool's schema and runs it.
    /// Returns `None` when no tool has that name.
    pub async fn call(&self, name: &str, arguments: Map<String, Value>) -> Option<ToolResult> {
        let tool = self.get(name)?;
        Some((tool.handler)(arguments).await)
    }

    fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.iter().find(|tool| tool.definition.name == name)
    }
}

pub type TemplateParams = HashMap<String, String>;

type ResourceHandler = dyn Fn(&TemplateParams) -> String + Send + Sync;

pub struct ResourceTemplateEntry {
    pub name: String,
    pub uri_template: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    matcher: Regex,
    handler: Box<ResourceHandler>,
}

#[derive(Default)]
pub struct ResourceRegistry {
    templates: Vec<ResourceTemplateEntry>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(
        &mut self,
        name: &str,
        uri_template: &str,
        description: Option<&str>,
        handler: F,
    ) -> Result<(), AppError>
    where
        F: Fn(&TemplateParams) -> String + Send + Sync + 'static,
    {
        if self.templates.iter().any(|entry| entry.name == name) {
            return Err(AppError::internal(format!(
                "resource {name} is already registered"
            )));
        }

        self.templates.push(ResourceTemplateEntry {
            name: name.to_string(),
            uri_template: uri_template.to_string(),
            description: description.map(str::to_string),
            mime_type: Some("text/plain".to_string()),
            matcher: compile_uri_template(uri_template)?,
            handler: Box::new(handler),
        });
        Ok(())
    }

    pub fn templates(&self) -> &[ResourceTemplateEntry] {
        &self.templates
    }

    /// Renders the first template matching `uri`, or `None` when none match.
    pub fn read(&self, uri: &str) -> Option<(&ResourceTemplateEntry, String)> {
        self.templates.iter().find_map(|entry| {
            let captures = entry.matcher.captures(uri)?;
            let params = entry
                .matcher
                .capture_names()
                .flatten()
                .filter_map(|name| {
                    captures
                        .name(name)
                        .map(|value| (name.to_string(), value.as_str().to_string()))
                })
                .collect::<TemplateParams>();
            Some((entry, (entry.handler)(&params)))
        })
    }
}

/// Compiles `scheme://path/{name}` into an anchored regex where each
/// placeholder matches one non-empty segment without `/`.
pub fn compile_uri_template(template: &str) -> Result<Regex, AppError> {
    let invalid = || AppError::internal(format!("invalid uri template: {template}"));

    let mut pattern = String::from("^");
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let end = rest[start..].find('}').map(|offset| start + offset).ok_or_else(invalid)?;
        let name = &rest[start + 1..end];
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid());
        }

        pattern.push_str(&regex::escape(&rest[..start]));
        pattern.push_str(&format!("(?P<{name}>[^/]+)"));
        rest = &rest[end + 1..];
    }
    pattern.push_str(&regex::escape(rest));
    pattern.push('$');

    Regex::new(&pattern).map_err(|_| invalid())
}
