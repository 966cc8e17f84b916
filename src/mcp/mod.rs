//! Model Context Protocol (MCP) server handling and JSON-RPC implementations
//!
//! Provides protocol-level specifics surrounding JSON-RPC validation, negotiation,
//! formatting, routing, the tool/resource registries and SSE sessions.

pub mod registry;
pub mod rpc;
pub mod server;
pub mod session;
