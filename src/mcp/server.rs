//! MCP server implementation.

use futures::FutureExt;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::mcp::handler::ToolRegistry;
use crate::mcp::protocol::*;
use crate::mcp::session::{Incoming, Session};
use crate::mcp::transport::{IoTransport, TcpTransport, Transport};
use crate::VERSION;

/// Pause after a failed accept so a persistent error (e.g. fd exhaustion)
/// does not spin the listener.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// MCP server.
///
/// Cloning is cheap: clones share the same registry, which is frozen once
/// the server is constructed.
#[derive(Clone)]
pub struct McpServer {
    registry: Arc<ToolRegistry>,
    info: Implementation,
}

impl McpServer {
    /// Create a server named `name` reporting the crate version.
    pub fn new(registry: ToolRegistry, name: impl Into<String>) -> Self {
        Self::with_version(registry, name, VERSION)
    }

    /// Create a server with an explicit identity.
    pub fn with_version(
        registry: ToolRegistry,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            info: Implementation::new(name, version),
        }
    }

    /// Server identity sent in the handshake.
    pub fn info(&self) -> &Implementation {
        &self.info
    }

    /// Number of tools being served.
    pub fn tool_count(&self) -> usize {
        self.registry.tool_count()
    }

    /// Serve a single session on this process's stdin/stdout.
    pub async fn serve_stdio(&self) -> Result<()> {
        self.run(IoTransport::stdio()).await
    }

    /// Bind `addr` and serve every accepted connection concurrently.
    pub async fn serve_tcp(&self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::connection(format!("Failed to bind {}", addr), e))?;
        self.serve_listener(listener).await
    }

    /// Accept connections from `listener` until the task is dropped.
    ///
    /// Each connection gets its own session and dispatch loop on a separate
    /// task. Accept failures are logged and do not stop the listener.
    pub async fn serve_listener(&self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        info!(
            "{} v{} listening on tcp://{} ({} tools)",
            self.info.name,
            self.info.version,
            local,
            self.tool_count()
        );

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            info!("Accepted connection from {}", peer);
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.run(TcpTransport::from_stream(stream)).await {
                    error!("Session with {} failed: {}", peer, e);
                }
                info!("Connection from {} closed", peer);
            });
        }
    }

    /// Run the dispatch loop on `transport` until the peer disconnects.
    pub async fn run<T: Transport + 'static>(&self, transport: T) -> Result<()> {
        let session = Session::new(transport)?;
        debug!("Starting dispatch loop on {}", session.label());

        let result = self.dispatch(&session).await;

        if let Err(e) = session.close().await {
            debug!("Error closing {}: {}", session.label(), e);
        }
        result
    }

    async fn dispatch(&self, session: &Session) -> Result<()> {
        loop {
            let incoming = match session.receive().await? {
                Some(incoming) => incoming,
                None => {
                    info!("Peer disconnected from {}", session.label());
                    return Ok(());
                }
            };

            let reply = match incoming {
                Incoming::Message(Message::Request(req)) => Some(self.handle_request(req).await),
                Incoming::Message(Message::Notification(notif)) => {
                    self.handle_notification(notif);
                    None
                }
                Incoming::Message(Message::Response(resp)) => {
                    warn!("Ignoring unexpected response (id {:?})", resp.id);
                    None
                }
                Incoming::Invalid(invalid) => {
                    warn!("Rejecting invalid envelope: {}", invalid.error);
                    Some(JsonRpcResponse::failure(invalid.id, invalid.error))
                }
                Incoming::Malformed(reason) => {
                    warn!("Rejecting undecodable input: {}", reason);
                    Some(JsonRpcResponse::failure(
                        None,
                        JsonRpcError::with_data(
                            error_codes::PARSE_ERROR,
                            "Parse error",
                            Value::String(reason),
                        ),
                    ))
                }
            };

            if let Some(response) = reply {
                match session.send(&Message::Response(response)).await {
                    Ok(()) => {}
                    Err(e) if e.is_disconnect() => {
                        info!("Peer went away before reading its response: {}", e);
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    /// Handle a JSON-RPC request. Failures become error responses.
    pub async fn handle_request(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        let JsonRpcRequest {
            id, method, params, ..
        } = req;
        debug!("Handling request: {} (id: {})", method, id);

        let outcome = match ClientRequest::parse(&method, params) {
            Ok(ClientRequest::Initialize(params)) => self.handle_initialize(params),
            Ok(ClientRequest::Ping) => Ok(json!({})),
            Ok(ClientRequest::ListTools) => self.handle_list_tools(),
            Ok(ClientRequest::CallTool(params)) => self.handle_call_tool(params).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(error) => {
                debug!("Request {} (id: {}) failed: {}", method, id, error);
                JsonRpcResponse::failure(Some(id), error)
            }
        }
    }

    fn handle_notification(&self, notif: JsonRpcNotification) {
        match notif.method.as_str() {
            methods::INITIALIZED => info!("Client initialized"),
            other => debug!("Ignoring notification: {}", other),
        }
    }

    fn handle_initialize(&self, params: InitializeParams) -> std::result::Result<Value, JsonRpcError> {
        info!(
            "Initialize from {} v{} (protocol {})",
            params.client_info.name, params.client_info.version, params.protocol_version
        );
        if params.protocol_version != MCP_VERSION {
            debug!(
                "Client asked for protocol {}, answering with {}",
                params.protocol_version, MCP_VERSION
            );
        }

        let result = InitializeResult {
            protocol_version: MCP_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: self.info.clone(),
        };
        to_result_value(&result)
    }

    fn handle_list_tools(&self) -> std::result::Result<Value, JsonRpcError> {
        to_result_value(&ListToolsResult {
            tools: self.registry.list_tools(),
        })
    }

    async fn handle_call_tool(
        &self,
        params: CallToolParams,
    ) -> std::result::Result<Value, JsonRpcError> {
        let CallToolParams { name, arguments } = params;
        let tool = self
            .registry
            .get_tool(&name)
            .ok_or_else(|| Error::ToolNotFound(name.clone()).to_rpc_error())?;

        debug!("Calling tool {}", name);
        let outcome = AssertUnwindSafe(tool.execute(arguments)).catch_unwind().await;

        match outcome {
            Ok(Ok(result)) => to_result_value(&result),
            Ok(Err(e)) => {
                warn!("Tool {} failed: {}", name, e);
                Err(match e {
                    Error::InvalidToolArguments(_) | Error::ToolExecutionFailed(_) => {
                        e.to_rpc_error()
                    }
                    other => Error::ToolExecutionFailed(other.to_string()).to_rpc_error(),
                })
            }
            Err(_) => {
                error!("Tool {} panicked", name);
                Err(Error::ToolExecutionFailed(format!("tool {} panicked", name)).to_rpc_error())
            }
        }
    }
}

fn to_result_value<T: serde::Serialize>(value: &T) -> std::result::Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| Error::from(e).to_rpc_error())
}
