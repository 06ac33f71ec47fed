//! Model Context Protocol (MCP) implementation.
//!
//! # Architecture
//!
//! - `protocol` - JSON-RPC envelopes, MCP payload types and error codes
//! - `codec` - self-delimiting JSON framing
//! - `transport` - byte streams: child process pipes, TCP, stdio
//! - `session` - framing, request ids and response correlation on one transport
//! - `handler` - tool registry and handler trait
//! - `server` - dispatch loop, single-session and TCP serving
//! - `client` - handshake, tool listing and tool calls

pub mod client;
pub mod codec;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use client::{Client, ClientConfig, ClientState};
pub use handler::{ToolHandler, ToolRegistry};
pub use protocol::*;
pub use server::McpServer;
pub use session::Session;
pub use transport::{ProcessOptions, ProcessTransport, Target, TcpTransport, Transport};
