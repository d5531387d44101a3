//! Process logging for the proxy and CLI binaries.
//!
//! Every process writes a compact console stream plus a daily JSONL file
//! named `eagleeye.<process>.<YYYY-MM-DD>.jsonl`. Task lifecycle records go
//! through [`emit_event`] on the `eagleeye.obs` target so they can be
//! filtered out of the general log.

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder as RollingBuilder, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_SUFFIX: &str = "jsonl";
const MAX_RETENTION_DAYS: u64 = 36_500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    Proxy,
    Cli,
}

impl ProcessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessKind::Proxy => "proxy",
            ProcessKind::Cli => "cli",
        }
    }

    fn file_prefix(self) -> String {
        format!("eagleeye.{}", self.as_str())
    }
}

/// What `init_process_logging` set up, for the startup log line.
#[derive(Debug, Clone, Serialize)]
pub struct LoggingInitInfo {
    pub process: ProcessKind,
    pub logs_dir: PathBuf,
    pub file_prefix: String,
    pub retention_days: u64,
    pub removed_files: usize,
}

/// One structured lifecycle record. Unset fields are written as empty strings.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObservabilityEvent<'a> {
    pub event: &'a str,
    pub component: &'a str,
    pub task_id: Option<&'a str>,
    pub task_name: Option<&'a str>,
    pub tool: Option<&'a str>,
    pub status: Option<&'a str>,
    pub error_code: Option<&'a str>,
    pub detail: Option<&'a str>,
}

/// Replaces prompt or article text with its length and a short digest.
pub fn redact_text(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!(
        "[redacted len={} sha256={}]",
        trimmed.chars().count(),
        short_hash(trimmed)
    )
}

pub fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest[..8].iter().map(|byte| format!("{byte:02x}")).collect()
}

macro_rules! obs_record {
    ($macro:ident, $process:expr, $event:expr) => {
        tracing::$macro!(
            target: "eagleeye.obs",
            process = $process.as_str(),
            component = $event.component,
            event = $event.event,
            task_id = $event.task_id.unwrap_or_default(),
            task_name = $event.task_name.unwrap_or_default(),
            tool = $event.tool.unwrap_or_default(),
            status = $event.status.unwrap_or_default(),
            error_code = $event.error_code.unwrap_or_default(),
            detail = $event.detail.unwrap_or_default(),
            "observability_event"
        )
    };
}

pub fn emit_event(level: Level, process: ProcessKind, event: ObservabilityEvent<'_>) {
    if level == Level::ERROR {
        obs_record!(error, process, event);
    } else if level == Level::WARN {
        obs_record!(warn, process, event);
    } else if level == Level::INFO {
        obs_record!(info, process, event);
    } else {
        obs_record!(debug, process, event);
    }
}

/// Installs the global subscriber. The returned guard flushes the file
/// writer on drop and must live as long as the process.
pub fn init_process_logging(
    process: ProcessKind,
    logs_dir: &Path,
    retention_days: u64,
) -> anyhow::Result<(WorkerGuard, LoggingInitInfo)> {
    fs::create_dir_all(logs_dir)?;
    let removed_files = cleanup_old_jsonl(logs_dir, process, retention_days)?;

    let appender = RollingBuilder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix(process.file_prefix())
        .filename_suffix(LOG_SUFFIX)
        .build(logs_dir)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(writer)
        .with_ansi(false)
        .with_current_span(false)
        .with_span_list(false);
    let console_layer = tracing_subscriber::fmt::layer().compact().with_target(true);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // A second init (tests, embedded use) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    Ok((
        guard,
        LoggingInitInfo {
            process,
            logs_dir: logs_dir.to_path_buf(),
            file_prefix: process.file_prefix(),
            retention_days,
            removed_files,
        },
    ))
}

/// Removes this process's JSONL files older than the retention window and
/// returns how many were deleted. Other processes' files are left alone.
pub fn cleanup_old_jsonl(
    logs_dir: &Path,
    process: ProcessKind,
    retention_days: u64,
) -> anyhow::Result<usize> {
    let days = retention_days.min(MAX_RETENTION_DAYS) as i64;
    let cutoff = Utc::now().date_naive() - chrono::Duration::days(days);
    let prefix = process.file_prefix();

    let mut removed = 0;
    for entry in fs::read_dir(logs_dir)?.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(date) = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| log_file_date(name, &prefix))
        else {
            continue;
        };
        if date < cutoff && fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

fn log_file_date(file_name: &str, prefix: &str) -> Option<NaiveDate> {
    let date = file_name
        .strip_prefix(prefix)?
        .strip_prefix('.')?
        .strip_suffix(LOG_SUFFIX)?
        .strip_suffix('.')?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

pub fn canonical_logs_dir_from_root(root: &Path) -> PathBuf {
    root.join("logs")
}
