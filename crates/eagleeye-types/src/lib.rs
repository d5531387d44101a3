use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

mod request;

pub use request::*;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Crawl,
    PolicyAnalysis,
    CompetitorAnalysis,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Crawl => "crawl",
            TaskKind::PolicyAnalysis => "policy_analysis",
            TaskKind::CompetitorAnalysis => "competitor_analysis",
        }
    }

    /// Only crawl tasks leave files behind that count as the deliverable.
    pub fn has_filesystem_deliverable(self) -> bool {
        matches!(self, TaskKind::Crawl)
    }
}

/// Immutable description of one agent invocation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescriptor {
    pub task_id: String,
    pub task_name: String,
    pub kind: TaskKind,
    pub prompt: String,
    pub capability_allowlist: BTreeSet<String>,
    pub max_turns: u32,
    pub timeout_seconds: u64,
    pub working_dir: PathBuf,
    /// Pre-created directory the agent is asked to write into (crawl only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalResult {
    pub turn_count: u64,
    pub elapsed_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_estimate: Option<f64>,
    pub error_flag: bool,
}

/// One decoded unit of the agent's output stream, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentMessage {
    TextChunk { text: String },
    ToolInvocation { tool_name: String, raw_input: Value },
    ToolResult { content: String },
    FinalResult(FinalResult),
}

impl AgentMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentMessage::TextChunk { .. } => "text_chunk",
            AgentMessage::ToolInvocation { .. } => "tool_invocation",
            AgentMessage::ToolResult { .. } => "tool_result",
            AgentMessage::FinalResult(_) => "final_result",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionResult {
    Structured(Map<String, Value>),
    RawText(String),
}

impl ExtractionResult {
    pub fn is_structured(&self) -> bool {
        matches!(self, ExtractionResult::Structured(_))
    }

    /// Wire shape returned to callers: the object itself, or `{"rawOutput": ..}`.
    pub fn to_value(&self) -> Value {
        match self {
            ExtractionResult::Structured(map) => Value::Object(map.clone()),
            ExtractionResult::RawText(text) => json!({ "rawOutput": text }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMethod {
    /// Driven through the external agent process.
    Skill,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutcomePayload {
    Structured(Map<String, Value>),
    RawText(String),
    Diagnostic(String),
}

impl From<ExtractionResult> for OutcomePayload {
    fn from(value: ExtractionResult) -> Self {
        match value {
            ExtractionResult::Structured(map) => OutcomePayload::Structured(map),
            ExtractionResult::RawText(text) => OutcomePayload::RawText(text),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub policy: u32,
    pub competitor: u32,
}

/// What the reconciler found in a crawl output directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactReport {
    pub output_dir: PathBuf,
    pub artifacts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_stats: Option<CategoryStats>,
}

impl ArtifactReport {
    pub fn has_deliverables(&self) -> bool {
        !self.artifacts.is_empty()
    }
}

/// Terminal result of one dispatched task. `E` is the failure classification.
#[derive(Debug, Clone)]
pub struct TaskOutcome<E> {
    pub task_id: String,
    pub kind: TaskKind,
    pub success: bool,
    pub method: ExecutionMethod,
    pub payload: OutcomePayload,
    pub elapsed_seconds: f64,
    pub tool_calls: Vec<ToolCallRecord>,
    pub turn_count: Option<u64>,
    pub cost_estimate: Option<f64>,
    pub error_flag: bool,
    /// Extraction fell back to raw text.
    pub degraded: bool,
    /// A reported failure was upgraded because deliverables were found.
    pub reconciled: bool,
    pub note: Option<String>,
    pub artifacts: Option<ArtifactReport>,
    pub failure: Option<E>,
}
