//! MCP client: handshake, tool listing and tool calls over one session.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::mcp::protocol::*;
use crate::mcp::session::Session;
use crate::mcp::transport::{ProcessOptions, Target};
use crate::VERSION;

/// Client lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No transport yet.
    Disconnected,
    /// Transport being opened.
    Connecting,
    /// Transport open, handshake not done.
    Connected,
    /// Handshake complete; tools may be listed and called.
    Initialized,
    /// Transport being torn down.
    Closing,
    /// Transport released. `connect` may be called again.
    Closed,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Initialized => "initialized",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Identity sent in the handshake.
    pub client_info: Implementation,
    /// Start-up and shutdown timing for process targets.
    pub process: ProcessOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_info: Implementation::new("toolwire-client", VERSION),
            process: ProcessOptions::default(),
        }
    }
}

/// MCP client bound to one target.
///
/// `connect` and `initialize` take `&mut self`; once initialized, calls take
/// `&self` and may be issued from several tasks. They are serialized by the
/// session, one round trip at a time.
pub struct Client {
    target: Target,
    config: ClientConfig,
    state: ClientState,
    session: Option<Session>,
    server: Option<InitializeResult>,
}

impl Client {
    pub fn new(target: Target, config: ClientConfig) -> Self {
        Self {
            target,
            config,
            state: ClientState::Disconnected,
            session: None,
            server: None,
        }
    }

    /// Create a client, connect and complete the handshake.
    pub async fn start(target: Target, config: ClientConfig) -> Result<Self> {
        let mut client = Self::new(target, config);
        client.connect().await?;
        client.initialize().await?;
        Ok(client)
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// The server's handshake answer, once initialized.
    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server.as_ref()
    }

    /// Open the transport.
    ///
    /// Fails with [`Error::InvalidState`] unless the client is disconnected
    /// or closed, and with [`Error::Connection`] if the target cannot be
    /// reached or exits during start-up.
    pub async fn connect(&mut self) -> Result<()> {
        match self.state {
            ClientState::Disconnected | ClientState::Closed => {}
            other => {
                return Err(Error::InvalidState(format!(
                    "cannot connect to {} while {}",
                    self.target, other
                )))
            }
        }

        self.state = ClientState::Connecting;
        self.server = None;
        debug!("Connecting to {}", self.target);

        match self.target.open(&self.config.process).await.and_then(Session::new) {
            Ok(session) => {
                info!("Connected to {}", session.label());
                self.session = Some(session);
                self.state = ClientState::Connected;
                Ok(())
            }
            Err(e) => {
                self.state = ClientState::Disconnected;
                Err(e)
            }
        }
    }

    /// Perform the `initialize` / `notifications/initialized` handshake.
    ///
    /// On failure the transport is torn down, the client ends up closed and
    /// the cause is returned inside [`Error::Initialization`].
    pub async fn initialize(&mut self) -> Result<InitializeResult> {
        if self.state != ClientState::Connected {
            return Err(Error::InvalidState(format!(
                "cannot initialize while {}",
                self.state
            )));
        }

        match self.handshake().await {
            Ok(result) => {
                info!(
                    "Initialized with {} v{} (protocol {})",
                    result.server_info.name, result.server_info.version, result.protocol_version
                );
                self.server = Some(result.clone());
                self.state = ClientState::Initialized;
                Ok(result)
            }
            Err(cause) => {
                warn!("Handshake with {} failed: {}", self.target, cause);
                if let Err(e) = self.close().await {
                    debug!("Error closing after failed handshake: {}", e);
                }
                Err(Error::initialization(
                    format!("handshake with {} failed", self.target),
                    cause,
                ))
            }
        }
    }

    async fn handshake(&self) -> Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: MCP_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: self.config.client_info.clone(),
        };

        let result: InitializeResult = self
            .call(methods::INITIALIZE, Some(serde_json::to_value(params)?))
            .await?;

        self.session()?.notify(methods::INITIALIZED, None).await?;
        Ok(result)
    }

    /// List the server's tools.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.ensure_initialized(methods::TOOLS_LIST)?;
        let result: ListToolsResult = self.call(methods::TOOLS_LIST, None).await?;
        Ok(result.tools)
    }

    /// Invoke a tool.
    ///
    /// A result with `is_error: true` is returned as `Ok`; only JSON-RPC
    /// level failures surface as [`Error::Remote`].
    pub async fn call_tool(
        &self,
        name: impl Into<String>,
        arguments: HashMap<String, Value>,
    ) -> Result<ToolResult> {
        self.ensure_initialized(methods::TOOLS_CALL)?;
        let params = CallToolParams {
            name: name.into(),
            arguments,
        };
        self.call(methods::TOOLS_CALL, Some(serde_json::to_value(params)?))
            .await
    }

    /// Round-trip a `ping`. Allowed before the handshake.
    pub async fn ping(&self) -> Result<()> {
        let _: Value = self.call(methods::PING, None).await?;
        Ok(())
    }

    /// Release the transport. Safe to call in any state; always ends closed.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == ClientState::Closed {
            return Ok(());
        }

        self.state = ClientState::Closing;
        let result = match self.session.take() {
            Some(session) => session.close().await,
            None => Ok(()),
        };
        self.state = ClientState::Closed;

        match &result {
            Ok(()) => info!("Closed connection to {}", self.target),
            Err(e) => warn!("Connection to {} closed uncleanly: {}", self.target, e),
        }
        result
    }

    fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or_else(|| {
            Error::InvalidState(format!("not connected to {} ({})", self.target, self.state))
        })
    }

    fn ensure_initialized(&self, method: &str) -> Result<()> {
        if self.state != ClientState::Initialized {
            return Err(Error::InvalidState(format!(
                "{} requires an initialized client, but it is {}",
                method, self.state
            )));
        }
        Ok(())
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<T> {
        let response = self.session()?.request(method, params).await?;
        parse_result(method, response)
    }
}

fn parse_result<T: DeserializeOwned>(method: &str, response: JsonRpcResponse) -> Result<T> {
    let JsonRpcResponse {
        id, result, error, ..
    } = response;
    let id = id.ok_or_else(|| Error::Protocol(format!("response to {} has no id", method)))?;

    if let Some(error) = error {
        return Err(Error::Remote {
            method: method.to_string(),
            id,
            error,
        });
    }

    let result = result.ok_or_else(|| {
        Error::Protocol(format!("response to {} (id {}) has no result", method, id))
    })?;
    serde_json::from_value(result).map_err(|e| {
        Error::Protocol(format!(
            "unexpected result for {} (id {}): {}",
            method, id, e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::handler::{get_string_arg, success_result, ToolRegistry};
    use crate::mcp::server::McpServer;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    async fn spawn_server() -> (Target, tokio::task::JoinHandle<Result<()>>) {
        let mut registry = ToolRegistry::new();
        registry
            .register_fn("echo", "Echo text", None, |args| {
                Ok(success_result(get_string_arg(&args, "text")?))
            })
            .unwrap();
        let server = McpServer::with_version(registry, "client-test", "9.9.9");

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target: Target = format!("tcp://{}", listener.local_addr().unwrap())
            .parse()
            .unwrap();
        let handle = tokio::spawn(async move { server.serve_listener(listener).await });
        (target, handle)
    }

    fn args(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let (target, server) = spawn_server().await;
        let mut client = Client::new(target, ClientConfig::default());
        assert_eq!(client.state(), ClientState::Disconnected);

        client.connect().await.unwrap();
        assert_eq!(client.state(), ClientState::Connected);
        client.ping().await.unwrap();

        let init = client.initialize().await.unwrap();
        assert_eq!(client.state(), ClientState::Initialized);
        assert_eq!(init.protocol_version, MCP_VERSION);
        assert_eq!(client.server_info().unwrap().server_info.name, "client-test");

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");

        let result = client
            .call_tool("echo", args(&[("text", json!("hi"))]))
            .await
            .unwrap();
        assert_eq!(result.text(), "hi");
        assert!(!result.is_error);

        client.close().await.unwrap();
        assert_eq!(client.state(), ClientState::Closed);
        client.close().await.unwrap();

        server.abort();
    }

    #[tokio::test]
    async fn test_remote_errors_keep_client_usable() {
        let (target, server) = spawn_server().await;
        let client = Client::start(target, ClientConfig::default()).await.unwrap();

        let err = client.call_tool("missing", HashMap::new()).await.unwrap_err();
        match err {
            Error::Remote { method, id, error } => {
                assert_eq!(method, "tools/call");
                assert_eq!(id, RequestId::Number(2));
                assert_eq!(error.code, error_codes::INVALID_PARAMS);
            }
            other => panic!("expected remote error, got {:?}", other),
        }

        let err = client.call_tool("echo", HashMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::Remote { .. }));

        let result = client
            .call_tool("echo", args(&[("text", json!("still here"))]))
            .await
            .unwrap();
        assert_eq!(result.text(), "still here");

        server.abort();
    }

    #[tokio::test]
    async fn test_state_contract_violations() {
        let (target, server) = spawn_server().await;
        let mut client = Client::new(target, ClientConfig::default());

        assert!(matches!(client.list_tools().await, Err(Error::InvalidState(_))));
        assert!(matches!(client.initialize().await, Err(Error::InvalidState(_))));

        client.connect().await.unwrap();
        assert!(matches!(client.connect().await, Err(Error::InvalidState(_))));
        assert!(matches!(client.list_tools().await, Err(Error::InvalidState(_))));

        client.initialize().await.unwrap();
        client.close().await.unwrap();
        assert!(matches!(
            client.call_tool("echo", HashMap::new()).await,
            Err(Error::InvalidState(_))
        ));

        // A closed client can connect again.
        client.connect().await.unwrap();
        client.initialize().await.unwrap();
        assert_eq!(client.list_tools().await.unwrap().len(), 1);
        client.close().await.unwrap();

        server.abort();
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let target: Target = format!("tcp://{}", addr).parse().unwrap();
        let mut client = Client::new(target, ClientConfig::default());
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }), "got {:?}", err);
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[tokio::test]
    async fn test_handshake_error_closes_client() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let request: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(request["method"], "initialize");
            let reply = json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "error": {"code": -32603, "message": "not today"}
            });
            write
                .write_all(format!("{}\n", reply).as_bytes())
                .await
                .unwrap();
            // Wait for the client to hang up.
            while let Ok(Some(_)) = lines.next_line().await {}
        });

        let target: Target = format!("tcp://{}", addr).parse().unwrap();
        let mut client = Client::new(target, ClientConfig::default());
        client.connect().await.unwrap();

        let err = client.initialize().await.unwrap_err();
        match &err {
            Error::Initialization {
                source: Some(cause),
                ..
            } => assert!(matches!(**cause, Error::Remote { .. })),
            other => panic!("expected initialization error, got {:?}", other),
        }
        assert_eq!(client.state(), ClientState::Closed);
        assert!(client.server_info().is_none());

        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_initialize_sends_initialized_notification() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();

            let line = lines.next_line().await.unwrap().unwrap();
            let request: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(request["method"], "initialize");
            let reply = json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "result": {
                    "protocolVersion": MCP_VERSION,
                    "capabilities": {"tools": {"listChanged": false}},
                    "serverInfo": {"name": "scripted", "version": "0.0.1"}
                }
            });
            write
                .write_all(format!("{}\n", reply).as_bytes())
                .await
                .unwrap();

            let line = lines.next_line().await.unwrap().unwrap();
            while let Ok(Some(_)) = lines.next_line().await {}
            serde_json::from_str::<Value>(&line).unwrap()
        });

        let target: Target = format!("tcp://{}", addr).parse().unwrap();
        let mut client = Client::new(target, ClientConfig::default());
        client.connect().await.unwrap();
        client.initialize().await.unwrap();
        assert_eq!(client.state(), ClientState::Initialized);
        assert_eq!(client.server_info().unwrap().server_info.name, "scripted");
        client.close().await.unwrap();

        let notification = peer.await.unwrap();
        assert_eq!(notification["jsonrpc"], "2.0");
        assert_eq!(notification["method"], methods::INITIALIZED);
        assert!(notification.get("id").is_none(), "got {}", notification);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_that_exits_immediately() {
        let target = Target::process("sh", vec!["-c".to_string(), "exit 0".to_string()]);
        let mut client = Client::new(target, ClientConfig::default());

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }), "got {:?}", err);
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_that_dies_during_handshake() {
        // Outlives the start-up grace, then exits without answering.
        let target = Target::process(
            "sh",
            vec!["-c".to_string(), "sleep 0.3; exit 0".to_string()],
        );
        let mut client = Client::new(target, ClientConfig::default());
        client.connect().await.unwrap();

        let err = client.initialize().await.unwrap_err();
        match &err {
            Error::Initialization {
                source: Some(cause),
                ..
            } => assert!(cause.is_disconnect(), "got {:?}", cause),
            other => panic!("expected initialization error, got {:?}", other),
        }
        assert_eq!(client.state(), ClientState::Closed);
    }
}
