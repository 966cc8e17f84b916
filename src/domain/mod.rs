//! Tools and resources served by this server
//!
//! Provides the `add`, `weather` and `search` tools and the `greeting://{name}` resource.

pub mod resources;
pub mod tools;
pub mod utils;
