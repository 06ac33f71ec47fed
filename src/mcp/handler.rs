//! Tool registry and the handler capability behind each tool.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::mcp::protocol::{ContentBlock, Tool, ToolResult};

/// Handler for MCP tool calls.
///
/// Returning `Ok` with `is_error: true` reports a failed operation to the
/// caller as a normal result. Returning `Err` is reported as a JSON-RPC error.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: HashMap<String, Value>) -> Result<ToolResult>;
}

/// Adapts a plain function or closure into a [`ToolHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> ToolHandler for FnHandler<F>
where
    F: Fn(HashMap<String, Value>) -> Result<ToolResult> + Send + Sync,
{
    async fn execute(&self, arguments: HashMap<String, Value>) -> Result<ToolResult> {
        (self.0)(arguments)
    }
}

struct RegisteredTool {
    definition: Tool,
    handler: Arc<dyn ToolHandler>,
}

/// Registry of tool handlers.
///
/// Built before serving starts. The server takes ownership of the registry,
/// so nothing can register tools once dispatch loops are running.
#[derive(Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool handler under `name`.
    ///
    /// Fails with [`Error::DuplicateTool`] if the name is taken.
    pub fn register<H: ToolHandler + 'static>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Option<Value>,
        handler: H,
    ) -> Result<()> {
        self.register_arc(name, description, input_schema, Arc::new(handler))
    }

    /// Register a tool handler (Arc version).
    pub fn register_arc(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Option<Value>,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<()> {
        let name = name.into();
        if self.tools.contains_key(&name) {
            return Err(Error::DuplicateTool(name));
        }

        debug!("Registered tool: {}", name);
        let definition = Tool {
            name: name.clone(),
            description: description.into(),
            input_schema,
        };
        self.tools.insert(
            name,
            RegisteredTool {
                definition,
                handler,
            },
        );
        Ok(())
    }

    /// Register a closure as a tool.
    pub fn register_fn<F>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Option<Value>,
        f: F,
    ) -> Result<()>
    where
        F: Fn(HashMap<String, Value>) -> Result<ToolResult> + Send + Sync + 'static,
    {
        self.register(name, description, input_schema, FnHandler(f))
    }

    /// All tool definitions, in registration order.
    pub fn list_tools(&self) -> Vec<Tool> {
        self.tools.values().map(|t| t.definition.clone()).collect()
    }

    /// Get a tool handler by name.
    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).map(|t| t.handler.clone())
    }

    /// Get the number of registered tools.
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }
}

/// Helper macro for creating tool input schemas.
#[macro_export]
macro_rules! tool_schema {
    ($($json:tt)+) => {
        serde_json::json!({
            "type": "object",
            "properties": {
                $($json)+
            }
        })
    };
}

/// Helper to create a text content block.
pub fn text_content(text: impl Into<String>) -> ContentBlock {
    ContentBlock::Text { text: text.into() }
}

/// Helper to create a successful tool result.
pub fn success_result(text: impl Into<String>) -> ToolResult {
    ToolResult {
        content: vec![text_content(text)],
        is_error: false,
    }
}

/// Helper to create an error tool result.
pub fn error_result(text: impl Into<String>) -> ToolResult {
    ToolResult {
        content: vec![text_content(text)],
        is_error: true,
    }
}

/// Helper to extract a required string argument.
pub fn get_string_arg(args: &HashMap<String, Value>, name: &str) -> Result<String> {
    args.get(name)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| {
            Error::InvalidToolArguments(format!("Missing required string argument: {}", name))
        })
}

/// Helper to extract an optional string argument.
pub fn get_optional_string_arg(args: &HashMap<String, Value>, name: &str) -> Option<String> {
    args.get(name).and_then(|v| v.as_str()).map(String::from)
}

/// Helper to extract an integer argument with a default.
pub fn get_int_arg(args: &HashMap<String, Value>, name: &str, default: i64) -> Result<i64> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v.as_i64().ok_or_else(|| {
            Error::InvalidToolArguments(format!("Argument {} must be an integer", name))
        }),
    }
}

/// Helper to extract a boolean argument with a default.
pub fn get_bool_arg(args: &HashMap<String, Value>, name: &str, default: bool) -> bool {
    args.get(name).and_then(|v| v.as_bool()).unwrap_or(default)
}
