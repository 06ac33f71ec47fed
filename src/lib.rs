//! Toolwire - a small MCP tool protocol engine.
//!
//! A client and a server speaking JSON-RPC 2.0 with the MCP tool methods
//! (`initialize`, `tools/list`, `tools/call`) over a child process's pipes or
//! a TCP connection.
//!
//! # Architecture
//!
//! 1. **Transport** (`mcp::transport`) - byte streams and process supervision
//! 2. **Session** (`mcp::session`) - framing, request ids, response correlation
//! 3. **Client** (`mcp::client`) - handshake and tool calls
//! 4. **Server** (`mcp::server`) - tool registry and dispatch loops
//! 5. **Tools** (`tools`) - built-in tools served by the binary
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use toolwire::mcp::{Client, ClientConfig};
//!
//! # async fn run() -> toolwire::Result<()> {
//! let target = "tcp://127.0.0.1:8080".parse()?;
//! let mut client = Client::start(target, ClientConfig::default()).await?;
//! for tool in client.list_tools().await? {
//!     println!("{}: {}", tool.name, tool.description);
//! }
//! let result = client.call_tool("echo", HashMap::new()).await?;
//! println!("{}", result.text());
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod mcp;
pub mod tools;

pub use error::{Error, Result};

/// Crate version, reported as the default server and client version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
