//! Toolwire - MCP tool server and client.

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{debug, info, warn};

use toolwire::config::{Args, CallArgs, Command, ServerConfig, ToolsArgs, Transport};
use toolwire::logging::init_logging;
use toolwire::mcp::handler::ToolRegistry;
use toolwire::mcp::server::McpServer;
use toolwire::mcp::{Client, ClientConfig, Target};
use toolwire::tools;
use toolwire::VERSION;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Ignoring unreadable .env file: {}", e);
        }
    }

    let args = Args::parse();
    init_logging(args.debug, args.log_format)?;

    match args.command {
        Command::Serve(serve) => serve_command(serve.into()).await,
        Command::Tools(tools) => tools_command(tools).await,
        Command::Call(call) => call_command(call).await,
    }
}

async fn serve_command(config: ServerConfig) -> anyhow::Result<()> {
    info!("Toolwire v{}", VERSION);

    let mut registry = ToolRegistry::new();
    tools::register_builtin_tools(&mut registry)?;
    info!("Registered {} tools", registry.tool_count());

    let server = McpServer::new(registry, config.name.clone());

    match config.transport {
        Transport::Stdio => {
            info!("Serving on stdio");
            tokio::select! {
                result = server.serve_stdio() => result?,
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, shutting down");
                    // A pending stdin read sits on a blocking thread that
                    // runtime shutdown would wait on until the next line.
                    std::process::exit(0);
                }
            }
        }
        Transport::Tcp => {
            let addr = config.bind_addr();
            tokio::select! {
                result = server.serve_tcp(&addr) => {
                    result.with_context(|| format!("TCP server on {} failed", addr))?
                }
                _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
            }
        }
    }

    info!("Server stopped");
    Ok(())
}

async fn connect(target: Target, config: ClientConfig) -> anyhow::Result<Client> {
    let description = target.to_string();
    let client = Client::start(target, config)
        .await
        .with_context(|| format!("Failed to connect to {}", description))?;

    if let Some(server) = client.server_info() {
        debug!(
            "Connected to {} v{}",
            server.server_info.name, server.server_info.version
        );
    }
    Ok(client)
}

async fn disconnect(mut client: Client) {
    if let Err(e) = client.close().await {
        warn!("Error while closing connection: {}", e);
    }
}

async fn tools_command(args: ToolsArgs) -> anyhow::Result<()> {
    let client = connect(args.target()?, args.process.client_config()).await?;
    let listed = client.list_tools().await;
    disconnect(client).await;

    for tool in listed.context("tools/list failed")? {
        println!("{:<24} {}", tool.name, tool.description);
    }
    Ok(())
}

async fn call_command(args: CallArgs) -> anyhow::Result<()> {
    let arguments = args.arguments()?;
    let client = connect(args.target()?, args.process.client_config()).await?;
    let called = client.call_tool(args.tool.clone(), arguments).await;
    disconnect(client).await;

    let result = called.with_context(|| format!("Calling {} failed", args.tool))?;
    println!("{}", result.text());
    if result.is_error {
        bail!("Tool {} reported an error", args.tool);
    }
    Ok(())
}
