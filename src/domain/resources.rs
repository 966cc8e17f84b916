//! Model Context Protocol templated resources

use crate::errors::AppError;
use crate::mcp::registry::ResourceRegistry;

pub const GREETING_RESOURCE_NAME: &str = "greeting";
pub const GREETING_URI_TEMPLATE: &str = "greeting://{name}";

pub fn register_resources(registry: &mut ResourceRegistry) -> Result<(), AppError> {
    registry.register(
        GREETING_RESOURCE_NAME,
        GREETING_URI_TEMPLATE,
        Some("Personalized greeting for the given name"),
        |params| {
            let name = params.get("name").map(String::as_str).unwrap_or_default();
            format!("Hello, {name}!")
        },
    )
}
