//! MCP protocol types and message definitions.
//!
//! Envelopes are plain JSON-RPC 2.0 objects. Incoming values are classified
//! into [`Message`] by [`Message::from_value`], and request payloads are then
//! validated per method by [`ClientRequest::parse`], so handlers only ever see
//! typed parameters.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// JSON-RPC version.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol version.
pub const MCP_VERSION: &str = "2024-11-05";

/// Method names understood by the engine.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
}

// ===== JSON-RPC Base Types =====

/// A JSON-RPC request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC response.
///
/// `id` is `None` (serialized as `null`) only for errors raised before a
/// request id could be read, such as parse errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Build a success response.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    pub fn failure(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// A JSON-RPC notification (no id, no response expected).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(code: i32, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message)?;
        if let Some(data) = &self.data {
            match data {
                Value::String(s) => write!(f, " ({})", s)?,
                other => write!(f, " ({})", other)?,
            }
        }
        Ok(())
    }
}

/// Request ID (can be string or number).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{:?}", s),
            Self::Number(n) => write!(f, "{}", n),
        }
    }
}

// ===== Envelope Classification =====

/// Any envelope that can travel over a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

/// A JSON value that is not a valid envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidMessage {
    /// The request id, when one could be recovered.
    pub id: Option<RequestId>,
    pub error: JsonRpcError,
}

impl InvalidMessage {
    fn new(id: Option<RequestId>, reason: &str) -> Self {
        Self {
            id,
            error: JsonRpcError::with_data(
                error_codes::INVALID_REQUEST,
                "Invalid request",
                Value::String(reason.to_string()),
            ),
        }
    }
}

impl Message {
    /// Classify a decoded JSON value as a request, notification or response.
    ///
    /// A value with `method` is a request when it also carries a non-null
    /// `id`, otherwise a notification. A value without `method` must carry
    /// exactly one of `result` or `error`.
    pub fn from_value(value: Value) -> std::result::Result<Self, InvalidMessage> {
        let Value::Object(mut obj) = value else {
            return Err(InvalidMessage::new(None, "message must be a JSON object"));
        };

        let id = match obj.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => match serde_json::from_value::<RequestId>(raw) {
                Ok(id) => Some(id),
                Err(_) => {
                    return Err(InvalidMessage::new(
                        None,
                        "id must be a string or an integer",
                    ))
                }
            },
        };

        if let Some(version) = obj.get("jsonrpc") {
            if version.as_str() != Some(JSONRPC_VERSION) {
                return Err(InvalidMessage::new(id, "jsonrpc must be \"2.0\""));
            }
        }

        if let Some(method) = obj.remove("method") {
            let Value::String(method) = method else {
                return Err(InvalidMessage::new(id, "method must be a string"));
            };
            let params = obj.remove("params").filter(|p| !p.is_null());
            return Ok(match id {
                Some(id) => Message::Request(JsonRpcRequest::new(id, method, params)),
                None => Message::Notification(JsonRpcNotification::new(method, params)),
            });
        }

        let result = obj.remove("result");
        let error = obj.remove("error").filter(|e| !e.is_null());

        match (result, error) {
            (None, None) => Err(InvalidMessage::new(
                id,
                "response must carry either result or error",
            )),
            (Some(result), None) => Ok(Message::Response(JsonRpcResponse {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id,
                result: Some(result),
                error: None,
            })),
            (result, Some(error)) if result.as_ref().map_or(true, Value::is_null) => {
                match serde_json::from_value::<JsonRpcError>(error) {
                    Ok(error) => Ok(Message::Response(JsonRpcResponse::failure(id, error))),
                    Err(_) => Err(InvalidMessage::new(id, "malformed error object")),
                }
            }
            _ => Err(InvalidMessage::new(
                id,
                "response must not carry both result and error",
            )),
        }
    }
}

// ===== MCP-Specific Types =====

/// Client capabilities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Map<String, Value>>,
}

/// Server capabilities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

/// Tools capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    #[serde(default)]
    pub list_changed: bool,
}

/// Name and version of one side of a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

impl Implementation {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Initialize params.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ClientCapabilities,
    #[serde(default)]
    pub client_info: Implementation,
}

/// Initialize result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    pub server_info: Implementation,
}

/// Tool definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// Tool call result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    /// All text content joined with newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Content block in a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// Any other content type (images, embedded resources). Decoded so the
    /// text items of a mixed result stay readable.
    #[serde(other)]
    Unsupported,
}

impl ContentBlock {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// List tools result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
}

/// Call tool params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub arguments: HashMap<String, Value>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ===== Typed Method Dispatch =====

/// A request from client to server with its params validated.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    Initialize(InitializeParams),
    Ping,
    ListTools,
    CallTool(CallToolParams),
}

impl ClientRequest {
    /// Route a method name to its typed payload.
    ///
    /// Unknown methods yield "method not found"; payloads that do not match
    /// the method's shape yield "invalid params".
    pub fn parse(method: &str, params: Option<Value>) -> std::result::Result<Self, JsonRpcError> {
        match method {
            methods::INITIALIZE => {
                let params = match params {
                    Some(value) => decode_params(value)?,
                    None => InitializeParams::default(),
                };
                Ok(Self::Initialize(params))
            }
            methods::PING => Ok(Self::Ping),
            methods::TOOLS_LIST => Ok(Self::ListTools),
            methods::TOOLS_CALL => {
                let value = params.ok_or_else(|| {
                    JsonRpcError::with_data(
                        error_codes::INVALID_PARAMS,
                        "Invalid params",
                        Value::String("tools/call requires params".to_string()),
                    )
                })?;
                Ok(Self::CallTool(decode_params(value)?))
            }
            other => Err(JsonRpcError::with_data(
                error_codes::METHOD_NOT_FOUND,
                "Method not found",
                Value::String(other.to_string()),
            )),
        }
    }
}

fn decode_params<T: serde::de::DeserializeOwned>(
    value: Value,
) -> std::result::Result<T, JsonRpcError> {
    serde_json::from_value(value).map_err(|e| {
        JsonRpcError::with_data(
            error_codes::INVALID_PARAMS,
            "Invalid params",
            Value::String(e.to_string()),
        )
    })
}

// ===== Error Codes =====

/// Standard JSON-RPC error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_jsonrpc_request_serialization() {
        let request = JsonRpcRequest::new(
            RequestId::Number(1),
            "tools/call",
            Some(json!({"name": "test"})),
        );

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"tools/call\""));

        let parsed: JsonRpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.method, "tools/call");
    }

    #[test]
    fn test_response_success_omits_error() {
        let response = JsonRpcResponse::success(RequestId::Number(1), json!({"ok": true}));

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"result\""));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn test_parse_error_response_has_null_id() {
        let response = JsonRpcResponse::failure(
            None,
            JsonRpcError::new(error_codes::PARSE_ERROR, "Parse error"),
        );

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"id\":null"));
        assert!(json.contains("-32700"));
    }

    #[test]
    fn test_request_id_variants() {
        assert_eq!(serde_json::to_string(&RequestId::Number(42)).unwrap(), "42");
        assert_eq!(
            serde_json::to_string(&RequestId::String("req-1".to_string())).unwrap(),
            "\"req-1\""
        );
        assert_eq!(RequestId::Number(42).to_string(), "42");
        assert_eq!(RequestId::String("a".to_string()).to_string(), "\"a\"");
    }

    #[test]
    fn test_classify_request_and_notification() {
        let msg = Message::from_value(json!({
            "jsonrpc": "2.0", "id": "abc", "method": "tools/list"
        }))
        .unwrap();
        assert!(matches!(
            msg,
            Message::Request(JsonRpcRequest { id: RequestId::String(ref s), .. }) if s == "abc"
        ));

        let msg = Message::from_value(json!({
            "jsonrpc": "2.0", "method": "notifications/initialized"
        }))
        .unwrap();
        assert!(matches!(
            msg,
            Message::Notification(JsonRpcNotification { ref method, .. }) if method == methods::INITIALIZED
        ));
    }

    #[test]
    fn test_classify_responses() {
        let ok = Message::from_value(json!({"jsonrpc": "2.0", "id": 3, "result": null})).unwrap();
        match ok {
            Message::Response(resp) => {
                assert_eq!(resp.id, Some(RequestId::Number(3)));
                assert_eq!(resp.result, Some(Value::Null));
            }
            other => panic!("expected response, got {:?}", other),
        }

        let err = Message::from_value(json!({
            "jsonrpc": "2.0", "id": 4, "error": {"code": -32601, "message": "Method not found"}
        }))
        .unwrap();
        match err {
            Message::Response(resp) => {
                assert!(resp.result.is_none());
                assert_eq!(resp.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_response_must_be_result_xor_error() {
        let both = Message::from_value(json!({
            "jsonrpc": "2.0", "id": 1, "result": {}, "error": {"code": 1, "message": "x"}
        }))
        .unwrap_err();
        assert_eq!(both.id, Some(RequestId::Number(1)));
        assert_eq!(both.error.code, error_codes::INVALID_REQUEST);

        let neither = Message::from_value(json!({"jsonrpc": "2.0", "id": 2})).unwrap_err();
        assert_eq!(neither.error.code, error_codes::INVALID_REQUEST);
    }

    #[test]
    fn test_invalid_envelopes() {
        assert!(Message::from_value(json!([1, 2, 3])).is_err());
        assert!(Message::from_value(json!({"id": 1.5, "method": "ping"})).is_err());
        assert!(Message::from_value(json!({"id": 1, "method": 7})).is_err());
        assert!(Message::from_value(json!({"jsonrpc": "1.0", "id": 1, "method": "ping"})).is_err());
    }

    #[test]
    fn test_tool_definition_schema_optional() {
        let tool = Tool {
            name: "echo".to_string(),
            description: "Echo text back".to_string(),
            input_schema: None,
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(!json.contains("inputSchema"));

        let tool = Tool {
            input_schema: Some(json!({"type": "object"})),
            ..tool
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("\"inputSchema\""));
    }

    #[test]
    fn test_tool_result_wire_shape() {
        let result = ToolResult {
            content: vec![ContentBlock::Text {
                text: "Success".to_string(),
            }],
            is_error: false,
        };

        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"type\":\"text\""));
        assert!(json.contains("\"isError\":false"));

        let decoded: ToolResult =
            serde_json::from_str(r#"{"content":[{"type":"text","text":"a"},{"type":"text","text":"b"}]}"#)
                .unwrap();
        assert!(!decoded.is_error);
        assert_eq!(decoded.text(), "a\nb");
    }

    #[test]
    fn test_non_text_content_is_tolerated() {
        let decoded: ToolResult = serde_json::from_str(
            r#"{"content":[{"type":"image","data":"AAAA","mimeType":"image/png"},{"type":"text","text":"caption"}]}"#,
        )
        .unwrap();
        assert_eq!(decoded.content[0], ContentBlock::Unsupported);
        assert_eq!(decoded.text(), "caption");
    }

    #[test]
    fn test_initialize_result_wire_shape() {
        let result = InitializeResult {
            protocol_version: MCP_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability::default()),
            },
            server_info: Implementation::new("toolwire", "0.3.0"),
        };

        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"protocolVersion\""));
        assert!(json.contains("\"serverInfo\""));
        assert!(json.contains("\"listChanged\":false"));
        assert!(!json.contains("\"resources\""));
    }

    #[test]
    fn test_parse_client_requests() {
        assert_eq!(
            ClientRequest::parse("tools/list", None).unwrap(),
            ClientRequest::ListTools
        );
        assert_eq!(ClientRequest::parse("ping", None).unwrap(), ClientRequest::Ping);

        let init = ClientRequest::parse(
            "initialize",
            Some(json!({
                "protocolVersion": MCP_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "test-client", "version": "1.0.0"}
            })),
        )
        .unwrap();
        match init {
            ClientRequest::Initialize(params) => {
                assert_eq!(params.client_info.name, "test-client");
            }
            other => panic!("expected initialize, got {:?}", other),
        }

        let call = ClientRequest::parse(
            "tools/call",
            Some(json!({"name": "echo", "arguments": null})),
        )
        .unwrap();
        match call {
            ClientRequest::CallTool(params) => {
                assert_eq!(params.name, "echo");
                assert!(params.arguments.is_empty());
            }
            other => panic!("expected tools/call, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_method_and_bad_params() {
        let err = ClientRequest::parse("bogus", None).unwrap_err();
        assert_eq!(err.code, error_codes::METHOD_NOT_FOUND);
        assert_eq!(err.data, Some(json!("bogus")));

        let err = ClientRequest::parse("tools/call", None).unwrap_err();
        assert_eq!(err.code, error_codes::INVALID_PARAMS);

        let err = ClientRequest::parse("tools/call", Some(json!({"arguments": {}}))).unwrap_err();
        assert_eq!(err.code, error_codes::INVALID_PARAMS);

        let err = ClientRequest::parse("initialize", Some(json!("nope"))).unwrap_err();
        assert_eq!(err.code, error_codes::INVALID_PARAMS);
    }

    #[test]
    fn test_message_serializes_untagged() {
        let msg = Message::Notification(JsonRpcNotification::new(methods::INITIALIZED, None));
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#
        );
    }
}
