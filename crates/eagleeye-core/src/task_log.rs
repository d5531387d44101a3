//! Per-task diagnostic log handle.
//!
//! One `TaskLog` is created per task and handed to every component that
//! reports on it, so records always carry the task id and name.

use std::path::Path;

use eagleeye_observability::{emit_event, redact_text, ObservabilityEvent, ProcessKind};
use eagleeye_types::{FinalResult, ToolCallRecord};
use tracing::Level;

use crate::TaskError;

#[derive(Debug, Clone)]
pub struct TaskLog {
    process: ProcessKind,
    task_id: String,
    task_name: String,
}

impl TaskLog {
    pub fn new(
        process: ProcessKind,
        task_id: impl Into<String>,
        task_name: impl Into<String>,
    ) -> Self {
        Self {
            process,
            task_id: task_id.into(),
            task_name: task_name.into(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    fn emit<'e>(
        &'e self,
        level: Level,
        component: &'e str,
        event: &'e str,
        fill: impl FnOnce(&mut ObservabilityEvent<'e>),
    ) {
        let mut record = ObservabilityEvent {
            event,
            component,
            task_id: Some(&self.task_id),
            task_name: Some(&self.task_name),
            ..Default::default()
        };
        fill(&mut record);
        emit_event(level, self.process, record);
    }

    pub fn started(&self, prompt: &str, timeout_seconds: u64, working_dir: &Path) {
        let detail = format!(
            "prompt={} timeout={}s cwd={}",
            redact_text(prompt),
            timeout_seconds,
            working_dir.display()
        );
        self.emit(Level::INFO, "agent.session", "task.start", |e| {
            e.status = Some("running");
            e.detail = Some(&detail);
        });
    }

    pub fn launched(&self, pid: Option<u32>) {
        let detail = pid.map(|p| format!("pid={p}")).unwrap_or_default();
        self.emit(Level::DEBUG, "agent.session", "process.spawned", |e| {
            e.detail = Some(&detail);
        });
    }

    pub fn message(&self, kind: &str, size: usize) {
        let detail = format!("{kind} len={size}");
        self.emit(Level::DEBUG, "agent.interpreter", "message.received", |e| {
            e.detail = Some(&detail);
        });
    }

    pub fn tool_call(&self, call: &ToolCallRecord) {
        self.emit(Level::INFO, "agent.interpreter", "tool.invoked", |e| {
            e.tool = Some(&call.name);
            e.detail = Some(&call.description);
        });
    }

    pub fn finalized(&self, result: &FinalResult) {
        let cost = result
            .cost_estimate
            .map(|c| format!(" cost=${c:.4}"))
            .unwrap_or_default();
        let detail = format!(
            "elapsed={:.1}s turns={}{}",
            result.elapsed_seconds, result.turn_count, cost
        );
        self.emit(Level::INFO, "agent.interpreter", "task.finalized", |e| {
            e.status = Some("finalized");
            e.detail = Some(&detail);
        });
        if result.error_flag {
            self.emit(Level::WARN, "agent.interpreter", "task.error_flag", |e| {
                e.status = Some("flagged");
                e.detail = Some("agent marked its final result as an error");
            });
        }
    }

    pub fn ignored_after_final(&self, kind: &str) {
        self.emit(Level::DEBUG, "agent.session", "message.after_final", |e| {
            e.detail = Some(kind);
        });
    }

    pub fn lingered_after_final(&self) {
        self.emit(Level::WARN, "agent.session", "process.lingered", |e| {
            e.status = Some("killed");
            e.detail = Some("agent did not exit after its final result");
        });
    }

    /// Numbered tool-call summary plus total output size, in arrival order.
    pub fn summary(
        &self,
        tool_calls: &[ToolCallRecord],
        tool_results: (usize, usize),
        output_len: usize,
    ) {
        for (idx, call) in tool_calls.iter().enumerate() {
            let detail = format!("{}. {}", idx + 1, call.description);
            self.emit(Level::INFO, "agent.summary", "tool.summary", |e| {
                e.tool = Some(&call.name);
                e.detail = Some(&detail);
            });
        }
        let (result_count, result_chars) = tool_results;
        let detail = format!(
            "tool_calls={} results={result_count}/{result_chars}ch output_len={output_len}",
            tool_calls.len()
        );
        self.emit(Level::INFO, "agent.summary", "task.output", |e| {
            e.detail = Some(&detail);
        });
    }

    pub fn extraction_fallback(&self, text_len: usize) {
        let detail = format!("no structured object in {text_len} chars, returning raw text");
        self.emit(Level::WARN, "agent.extractor", "extraction.fallback", |e| {
            e.status = Some("degraded");
            e.detail = Some(&detail);
        });
    }

    pub fn reconciled(&self, artifacts: usize, original: &TaskError) {
        let detail = format!("{artifacts} artifact(s) present despite: {original}");
        self.emit(Level::WARN, "agent.reconciler", "task.reconciled", |e| {
            e.status = Some("success");
            e.error_code = Some(original.code());
            e.detail = Some(&detail);
        });
    }

    pub fn completed(&self, elapsed_seconds: f64) {
        let detail = format!("elapsed={elapsed_seconds:.1}s");
        self.emit(Level::INFO, "agent.dispatcher", "task.completed", |e| {
            e.status = Some("success");
            e.detail = Some(&detail);
        });
    }

    pub fn failed(&self, error: &TaskError, elapsed_seconds: f64) {
        let detail = format!("{error} (after {elapsed_seconds:.1}s)");
        self.emit(Level::ERROR, "agent.dispatcher", "task.failed", |e| {
            e.status = Some("failed");
            e.error_code = Some(error.code());
            e.detail = Some(&detail);
        });
    }

    pub fn terminate_error(&self, detail: &str) {
        self.emit(Level::WARN, "agent.session", "process.terminate_error", |e| {
            e.detail = Some(detail);
        });
    }
}
