//! HTTP transport layer for the Model Context Protocol
//!
//! Provides the external API routing: server info, SSE connections and message submission.

pub mod handlers;
