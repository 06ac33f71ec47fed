//! Command-line and runtime configuration.

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::mcp::client::ClientConfig;
use crate::mcp::transport::{ProcessOptions, Target};

/// Command-line arguments for the toolwire binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "toolwire")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "JSON-RPC tool server and client over process pipes or TCP")]
pub struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true, env = "TOOLWIRE_DEBUG")]
    pub debug: bool,

    /// Log output format
    #[arg(
        long,
        global = true,
        value_enum,
        default_value = "text",
        env = "TOOLWIRE_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the built-in tools
    Serve(ServeArgs),
    /// List the tools offered by a server
    Tools(ToolsArgs),
    /// Call one tool on a server
    Call(CallArgs),
}

/// Arguments for `serve`.
#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Transport mode: stdio or tcp
    #[arg(short, long, value_enum, default_value = "stdio", env = "TOOLWIRE_TRANSPORT")]
    pub transport: Transport,

    /// Address to bind (tcp transport only)
    #[arg(long, default_value = "0.0.0.0", env = "TOOLWIRE_HOST")]
    pub host: String,

    /// Port to bind (tcp transport only)
    #[arg(short, long, default_value = "8080", env = "TOOLWIRE_PORT")]
    pub port: u16,

    /// Server name reported in the handshake
    #[arg(long, default_value = "toolwire", env = "TOOLWIRE_NAME")]
    pub name: String,
}

/// Process transport timing, shared by the client subcommands.
#[derive(clap::Args, Debug, Clone, Copy)]
pub struct ProcessArgs {
    /// Milliseconds to wait for a spawned server before checking it is alive
    #[arg(long, default_value = "100", env = "TOOLWIRE_GRACE_MS")]
    pub grace_ms: u64,

    /// Seconds to wait for a spawned server to exit before killing it
    #[arg(long, default_value = "5", env = "TOOLWIRE_SHUTDOWN_TIMEOUT_SECS")]
    pub shutdown_timeout_secs: u64,
}

impl ProcessArgs {
    pub fn options(&self) -> ProcessOptions {
        ProcessOptions {
            startup_grace: Duration::from_millis(self.grace_ms),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            process: self.options(),
            ..ClientConfig::default()
        }
    }
}

/// Arguments for `tools`.
#[derive(clap::Args, Debug, Clone)]
pub struct ToolsArgs {
    /// `tcp://host:port`, or a server command line
    pub target: String,

    #[command(flatten)]
    pub process: ProcessArgs,

    /// Extra arguments for a server command (after `--`)
    #[arg(last = true)]
    pub target_args: Vec<String>,
}

impl ToolsArgs {
    pub fn target(&self) -> Result<Target> {
        Target::from_parts(&self.target, self.target_args.clone())
    }
}

/// Arguments for `call`.
#[derive(clap::Args, Debug, Clone)]
pub struct CallArgs {
    /// `tcp://host:port`, or a server command line
    pub target: String,

    /// Tool name
    pub tool: String,

    /// Tool arguments as a JSON object
    #[arg(short, long, default_value = "{}")]
    pub args: String,

    #[command(flatten)]
    pub process: ProcessArgs,

    /// Extra arguments for a server command (after `--`)
    #[arg(last = true)]
    pub target_args: Vec<String>,
}

impl CallArgs {
    pub fn target(&self) -> Result<Target> {
        Target::from_parts(&self.target, self.target_args.clone())
    }

    /// Parse `--args` into an argument map.
    pub fn arguments(&self) -> Result<HashMap<String, Value>> {
        match serde_json::from_str::<Value>(&self.args) {
            Ok(Value::Object(map)) => Ok(map.into_iter().collect()),
            Ok(Value::Null) => Ok(HashMap::new()),
            Ok(other) => Err(Error::Config(format!(
                "--args must be a JSON object, got {}",
                other
            ))),
            Err(e) => Err(Error::Config(format!("--args is not valid JSON: {}", e))),
        }
    }
}

/// Transport mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Stdio,
    Tcp,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Transport mode
    pub transport: Transport,
    /// Bind host for tcp
    pub host: String,
    /// Bind port for tcp
    pub port: u16,
    /// Name reported in the handshake
    pub name: String,
}

impl ServerConfig {
    /// `host:port` to bind in tcp mode.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<ServeArgs> for ServerConfig {
    fn from(args: ServeArgs) -> Self {
        Self {
            transport: args.transport,
            host: args.host,
            port: args.port,
            name: args.name,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Stdio,
            host: "0.0.0.0".to_string(),
            port: 8080,
            name: "toolwire".to_string(),
        }
    }
}
