//! Decoding of the agent's line-delimited stream-json output.

use eagleeye_types::{AgentMessage, FinalResult};
use serde_json::Value;

use crate::TaskError;

/// Decodes one stdout line into zero or more messages.
///
/// Blank lines and record types that carry nothing for the interpreter
/// (`system` init records and the like) decode to an empty list.
pub fn decode_stream_line(line: &str) -> Result<Vec<AgentMessage>, TaskError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_str(trimmed).map_err(|err| {
        TaskError::stream_decode(format!("line is not JSON ({err}): {}", preview(trimmed)))
    })?;
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return Err(TaskError::stream_decode(format!(
            "record without a string `type`: {}",
            preview(trimmed)
        )));
    };

    let messages: Vec<AgentMessage> = match kind {
        "assistant" => content_blocks(&value)
            .filter_map(|block| match block.get("type").and_then(Value::as_str) {
                Some("text") => Some(AgentMessage::TextChunk {
                    text: block
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                }),
                Some("tool_use") => Some(AgentMessage::ToolInvocation {
                    tool_name: block
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string(),
                    raw_input: block.get("input").cloned().unwrap_or(Value::Null),
                }),
                _ => None,
            })
            .collect(),
        "user" => content_blocks(&value)
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("tool_result"))
            .map(|block| AgentMessage::ToolResult {
                content: match block.get("content") {
                    Some(Value::String(text)) => text.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                },
            })
            .collect(),
        "result" => vec![AgentMessage::FinalResult(FinalResult {
            turn_count: value.get("num_turns").and_then(Value::as_u64).unwrap_or(0),
            elapsed_seconds: value
                .get("duration_ms")
                .and_then(Value::as_f64)
                .map(|ms| ms / 1000.0)
                .unwrap_or(0.0),
            cost_estimate: value.get("total_cost_usd").and_then(Value::as_f64),
            error_flag: value
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })],
        _ => Vec::new(),
    };
    Ok(messages)
}

fn content_blocks(value: &Value) -> impl Iterator<Item = &Value> {
    value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn preview(line: &str) -> String {
    let mut out: String = line.chars().take(120).collect();
    if out.len() < line.len() {
        out.push_str("...");
    }
    out
}
