//! Folds the agent message stream into a `RunRecord`.

use eagleeye_types::{AgentMessage, FinalResult, ToolCallRecord};
use futures::TryStreamExt;
use serde_json::Value;

use crate::{messages, AgentProcess, TaskError, TaskLog};

/// Upper bound, in characters, of a formatted tool description.
pub const TOOL_DESCRIPTION_LIMIT: usize = 80;

const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpreterState {
    Collecting,
    Finalized,
}

/// Accumulated output of one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunRecord {
    text_chunks: Vec<String>,
    tool_calls: Vec<ToolCallRecord>,
    tool_result_count: usize,
    tool_result_chars: usize,
    final_result: Option<FinalResult>,
}

impl RunRecord {
    /// Ordered concatenation of every text chunk.
    pub fn text(&self) -> String {
        self.text_chunks.concat()
    }

    pub fn tool_calls(&self) -> &[ToolCallRecord] {
        &self.tool_calls
    }

    pub fn tool_result_count(&self) -> usize {
        self.tool_result_count
    }

    pub fn tool_result_chars(&self) -> usize {
        self.tool_result_chars
    }

    pub fn final_result(&self) -> Option<&FinalResult> {
        self.final_result.as_ref()
    }

    pub fn into_tool_calls(self) -> Vec<ToolCallRecord> {
        self.tool_calls
    }
}

pub struct Interpreter<'a> {
    log: &'a TaskLog,
    state: InterpreterState,
    record: RunRecord,
}

impl<'a> Interpreter<'a> {
    pub fn new(log: &'a TaskLog) -> Self {
        Self {
            log,
            state: InterpreterState::Collecting,
            record: RunRecord::default(),
        }
    }

    pub fn state(&self) -> InterpreterState {
        self.state
    }

    pub fn record(&self) -> &RunRecord {
        &self.record
    }

    pub fn into_record(self) -> RunRecord {
        self.record
    }

    pub fn apply(&mut self, message: AgentMessage) -> InterpreterState {
        if self.state == InterpreterState::Finalized {
            self.log.ignored_after_final(message.kind());
            return self.state;
        }
        match message {
            AgentMessage::TextChunk { text } => {
                self.log.message("text_chunk", text.chars().count());
                self.record.text_chunks.push(text);
            }
            AgentMessage::ToolInvocation {
                tool_name,
                raw_input,
            } => {
                let call = ToolCallRecord {
                    description: describe_tool_invocation(&tool_name, &raw_input),
                    name: tool_name,
                };
                self.log.tool_call(&call);
                self.record.tool_calls.push(call);
            }
            AgentMessage::ToolResult { content } => {
                let size = content.chars().count();
                self.log.message("tool_result", size);
                self.record.tool_result_count += 1;
                self.record.tool_result_chars += size;
            }
            AgentMessage::FinalResult(result) => {
                self.log.finalized(&result);
                self.record.final_result = Some(result);
                self.state = InterpreterState::Finalized;
            }
        }
        self.state
    }

    /// Consumes messages until the final result arrives.
    ///
    /// A stream that closes without a final result is a decode failure even
    /// when the process exits cleanly.
    pub async fn drive(&mut self, process: &mut dyn AgentProcess) -> Result<(), TaskError> {
        let stream = messages(process);
        futures::pin_mut!(stream);
        while let Some(message) = stream.try_next().await? {
            if self.apply(message) == InterpreterState::Finalized {
                return Ok(());
            }
        }
        Err(TaskError::stream_decode(
            "agent stream ended without a final result",
        ))
    }

    /// Discards whatever follows the final result and reaps the process.
    ///
    /// Undecodable trailing lines are skipped; the exit status still decides
    /// the outcome.
    pub async fn settle(&mut self, process: &mut dyn AgentProcess) -> Result<(), TaskError> {
        loop {
            match process.next_message().await {
                Ok(Some(message)) => {
                    self.apply(message);
                }
                Ok(None) => return Ok(()),
                Err(TaskError::StreamDecodeFailure(_)) => {
                    self.log.ignored_after_final("undecodable");
                    return process.wait().await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Short human-readable description of a tool call, never longer than
/// `TOOL_DESCRIPTION_LIMIT` characters.
pub fn describe_tool_invocation(tool_name: &str, input: &Value) -> String {
    let described = describe(tool_name, input).unwrap_or_else(|| format!("{tool_name} (input)"));
    truncate_chars(&described, TOOL_DESCRIPTION_LIMIT)
}

fn describe(tool_name: &str, input: &Value) -> Option<String> {
    match tool_name {
        "Bash" => describe_shell(str_field(input, &["command"])?),
        "Read" | "Write" | "Edit" | "MultiEdit" | "NotebookEdit" => {
            let path = str_field(input, &["file_path", "path", "notebook_path"])?;
            Some(format!("{tool_name} {path}"))
        }
        "Grep" | "Glob" => {
            let pattern = str_field(input, &["pattern"])?;
            let mut out = format!("{tool_name} {}", truncate_chars(pattern, 40));
            if let Some(path) = str_field(input, &["path"]) {
                out.push_str(" in ");
                out.push_str(&truncate_chars(path, 30));
            }
            Some(out)
        }
        "WebFetch" => Some(format!("{tool_name} {}", str_field(input, &["url"])?)),
        "WebSearch" => Some(format!("{tool_name} {}", str_field(input, &["query"])?)),
        name if name.starts_with("mcp__") || name.contains("__") => {
            Some(format!("mcp {}", truncate_chars(name, 70)))
        }
        name => {
            if input.is_null() {
                return None;
            }
            Some(format!("{name} {input}"))
        }
    }
}

fn describe_shell(command: &str) -> Option<String> {
    let command = command.trim();
    if command.is_empty() {
        return None;
    }
    if let Some(rest) = command.strip_prefix("cd ") {
        let target = before_separator(rest).trim();
        if !target.is_empty() {
            return Some(format!("cd {target}"));
        }
    }
    let fetches = command.contains("curl") || command.contains("wget");
    let url = command
        .split_whitespace()
        .map(|token| token.trim_matches(|c| c == '"' || c == '\''))
        .find(|token| token.starts_with("http://") || token.starts_with("https://"));
    if let Some(url) = url {
        if fetches || command.contains("://") {
            return Some(format!("fetch {url}"));
        }
    }
    let head = before_separator(command).trim();
    if head.len() < command.len() && !head.is_empty() {
        return Some(head.to_string());
    }
    Some(truncate_chars(command, 60))
}

fn before_separator(command: &str) -> &str {
    let cut = ["&&", "||", ";", "|"]
        .iter()
        .filter_map(|sep| command.find(sep))
        .min()
        .unwrap_or(command.len());
    &command[..cut]
}

fn str_field<'v>(input: &'v Value, keys: &[&str]) -> Option<&'v str> {
    keys.iter()
        .find_map(|key| input.get(key).and_then(Value::as_str))
        .filter(|value| !value.trim().is_empty())
}

fn truncate_chars(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let mut out: String = input.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}
