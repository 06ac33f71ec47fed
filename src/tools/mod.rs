//! Built-in tools served by the `toolwire` binary.
//!
//! - `echo` - returns its text, optionally repeated
//! - `reverse` - reverses its text, by character or by word
//! - `word_count` - counts words, lines and characters

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::error::Result;
use crate::mcp::handler::{
    error_result, get_bool_arg, get_int_arg, get_optional_string_arg, get_string_arg,
    success_result, ToolHandler, ToolRegistry,
};
use crate::mcp::protocol::ToolResult;
use crate::tool_schema;

const MAX_REPEAT: i64 = 100;

/// Register every built-in tool.
pub fn register_builtin_tools(registry: &mut ToolRegistry) -> Result<()> {
    registry.register(
        "echo",
        "Return the given text unchanged, optionally repeated.",
        Some(json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "Text to echo back"
                },
                "repeat": {
                    "type": "integer",
                    "description": "How many times to repeat the text (default: 1)",
                    "minimum": 1,
                    "maximum": MAX_REPEAT
                },
                "separator": {
                    "type": "string",
                    "description": "Placed between repetitions (default: newline)"
                }
            },
            "required": ["text"]
        })),
        EchoTool,
    )?;
    registry.register(
        "reverse",
        "Reverse the characters of the given text, or the order of its words.",
        Some(tool_schema! {
            "text": { "type": "string", "description": "Text to reverse" },
            "words": { "type": "boolean", "description": "Reverse word order instead of characters" }
        }),
        ReverseTool,
    )?;
    registry.register(
        "word_count",
        "Count the words, lines and characters in the given text. Returns a JSON object.",
        Some(tool_schema! {
            "text": { "type": "string", "description": "Text to analyse" }
        }),
        WordCountTool,
    )?;
    Ok(())
}

/// Echo tool.
pub struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    async fn execute(&self, args: HashMap<String, Value>) -> Result<ToolResult> {
        let text = get_string_arg(&args, "text")?;
        let repeat = get_int_arg(&args, "repeat", 1)?;

        if !(1..=MAX_REPEAT).contains(&repeat) {
            return Ok(error_result(format!(
                "repeat must be between 1 and {}, got {}",
                MAX_REPEAT, repeat
            )));
        }

        let separator =
            get_optional_string_arg(&args, "separator").unwrap_or_else(|| "\n".to_string());
        let copies = vec![text.as_str(); repeat as usize];
        Ok(success_result(copies.join(&separator)))
    }
}

/// Reverse tool.
pub struct ReverseTool;

#[async_trait]
impl ToolHandler for ReverseTool {
    async fn execute(&self, args: HashMap<String, Value>) -> Result<ToolResult> {
        let text = get_string_arg(&args, "text")?;
        let reversed = if get_bool_arg(&args, "words", false) {
            text.split_whitespace().rev().collect::<Vec<_>>().join(" ")
        } else {
            text.chars().rev().collect()
        };
        Ok(success_result(reversed))
    }
}

/// Word count tool.
pub struct WordCountTool;

#[async_trait]
impl ToolHandler for WordCountTool {
    async fn execute(&self, args: HashMap<String, Value>) -> Result<ToolResult> {
        let text = get_string_arg(&args, "text")?;
        let counts = json!({
            "words": text.split_whitespace().count(),
            "lines": text.lines().count(),
            "characters": text.chars().count(),
        });
        Ok(success_result(counts.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn args(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_registers_all_tools_once() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry).unwrap();

        let names: Vec<_> = registry.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["echo", "reverse", "word_count"]);
        assert!(registry
            .list_tools()
            .iter()
            .all(|t| t.input_schema.is_some()));

        assert!(matches!(
            register_builtin_tools(&mut registry),
            Err(Error::DuplicateTool(_))
        ));
    }

    #[tokio::test]
    async fn test_echo() {
        let result = EchoTool.execute(args(&[("text", json!("hi"))])).await.unwrap();
        assert_eq!(result.text(), "hi");
        assert!(!result.is_error);

        let result = EchoTool
            .execute(args(&[("text", json!("ab")), ("repeat", json!(3))]))
            .await
            .unwrap();
        assert_eq!(result.text(), "ab\nab\nab");

        let result = EchoTool
            .execute(args(&[
                ("text", json!("ab")),
                ("repeat", json!(2)),
                ("separator", json!(", ")),
            ]))
            .await
            .unwrap();
        assert_eq!(result.text(), "ab, ab");
    }

    #[tokio::test]
    async fn test_echo_rejects_bad_repeat() {
        let result = EchoTool
            .execute(args(&[("text", json!("x")), ("repeat", json!(0))]))
            .await
            .unwrap();
        assert!(result.is_error);

        let err = EchoTool
            .execute(args(&[("text", json!("x")), ("repeat", json!("many"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidToolArguments(_)));

        let err = EchoTool.execute(HashMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidToolArguments(_)));
    }

    #[tokio::test]
    async fn test_reverse_handles_unicode() {
        let result = ReverseTool
            .execute(args(&[("text", json!("héllo"))]))
            .await
            .unwrap();
        assert_eq!(result.text(), "olléh");
    }

    #[tokio::test]
    async fn test_reverse_words() {
        let result = ReverseTool
            .execute(args(&[("text", json!("one  two three")), ("words", json!(true))]))
            .await
            .unwrap();
        assert_eq!(result.text(), "three two one");
    }

    #[tokio::test]
    async fn test_word_count() {
        let result = WordCountTool
            .execute(args(&[("text", json!("one two\nthree  four\n"))]))
            .await
            .unwrap();
        let counts: Value = serde_json::from_str(&result.text()).unwrap();
        assert_eq!(counts["words"], 4);
        assert_eq!(counts["lines"], 2);
        assert_eq!(counts["characters"], 20);
    }
}
