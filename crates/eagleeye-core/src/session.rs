//! Agent process lifecycle: launch, incremental stream reads, termination.

use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use eagleeye_types::{AgentMessage, TaskDescriptor};
use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::{decode_stream_line, AgentConfig, TaskError, TaskLog};

/// Upper bound on captured stderr; the rest is read and discarded.
pub const STDERR_CAPTURE_LIMIT: usize = 64 * 1024;

const STDERR_GRACE: Duration = Duration::from_millis(500);

/// Command line shape of every agent launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    pub binary: String,
    pub extra_args: Vec<String>,
}

impl AgentCommand {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            extra_args: config.extra_args.clone(),
        }
    }

    pub fn args(&self, descriptor: &TaskDescriptor) -> Vec<String> {
        let allowlist = descriptor
            .capability_allowlist
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let mut args = vec![
            "-p".to_string(),
            descriptor.prompt.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--dangerously-skip-permissions".to_string(),
            "--allowedTools".to_string(),
            allowlist,
            "--max-turns".to_string(),
            descriptor.max_turns.to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// One running agent invocation.
///
/// `terminate` must be safe to call any number of times and after the
/// process has already exited on its own.
#[async_trait]
pub trait AgentProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Next decoded message, or `None` once stdout is closed and the process
    /// exited cleanly. A non-zero exit surfaces here as `ProcessExitFailure`.
    async fn next_message(&mut self) -> Result<Option<AgentMessage>, TaskError>;

    /// Drains remaining output and waits for a natural exit.
    async fn wait(&mut self) -> Result<(), TaskError>;

    async fn terminate(&mut self) -> Result<(), TaskError>;
}

#[async_trait]
pub trait AgentLauncher: Send + Sync {
    async fn launch(
        &self,
        descriptor: &TaskDescriptor,
        log: &TaskLog,
    ) -> Result<Box<dyn AgentProcess>, TaskError>;
}

/// Lazy message stream over a running process. Each poll is a suspension point.
pub fn messages(
    process: &mut dyn AgentProcess,
) -> impl Stream<Item = Result<AgentMessage, TaskError>> + Send + '_ {
    async_stream::try_stream! {
        while let Some(message) = process.next_message().await? {
            yield message;
        }
    }
}

/// Launches the agent CLI as a child process.
#[derive(Debug, Clone)]
pub struct CliLauncher {
    command: AgentCommand,
}

impl CliLauncher {
    pub fn new(command: AgentCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl AgentLauncher for CliLauncher {
    async fn launch(
        &self,
        descriptor: &TaskDescriptor,
        log: &TaskLog,
    ) -> Result<Box<dyn AgentProcess>, TaskError> {
        let mut command = Command::new(&self.command.binary);
        command
            .args(self.command.args(descriptor))
            .current_dir(&descriptor.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|err| TaskError::LaunchFailure {
            binary: self.command.binary.clone(),
            message: err.to_string(),
        })?;
        let pid = child.id();
        log.launched(pid);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TaskError::unknown("agent stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TaskError::unknown("agent stderr was not captured"))?;

        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_task = tokio::spawn(collect_stderr(stderr, stderr_buf.clone()));

        Ok(Box::new(CliProcess {
            child,
            pid,
            stdout: BufReader::new(stdout),
            pending: VecDeque::new(),
            stdout_closed: false,
            exit: None,
            terminated: false,
            stderr_buf,
            stderr_task: Some(stderr_task),
        }))
    }
}

async fn collect_stderr(mut stderr: ChildStderr, buf: Arc<Mutex<Vec<u8>>>) {
    let mut chunk = [0u8; 4096];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => append_capped(&buf, &chunk[..n]),
        }
    }
}

fn append_capped(buf: &Mutex<Vec<u8>>, bytes: &[u8]) {
    if let Ok(mut captured) = buf.lock() {
        let room = STDERR_CAPTURE_LIMIT.saturating_sub(captured.len());
        captured.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }
}

pub struct CliProcess {
    child: Child,
    pid: Option<u32>,
    stdout: BufReader<ChildStdout>,
    pending: VecDeque<AgentMessage>,
    stdout_closed: bool,
    exit: Option<ExitStatus>,
    terminated: bool,
    stderr_buf: Arc<Mutex<Vec<u8>>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl CliProcess {
    /// Next raw stdout line without its terminator, `None` at EOF.
    async fn read_raw_line(&mut self) -> Result<Option<Vec<u8>>, TaskError> {
        let mut buf = Vec::new();
        if self.stdout.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(None);
        }
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        Ok(Some(buf))
    }

    async fn stderr_text(&mut self) -> String {
        if let Some(mut handle) = self.stderr_task.take() {
            // A grandchild may still hold the pipe open; don't wait on it forever.
            if tokio::time::timeout(STDERR_GRACE, &mut handle).await.is_err() {
                handle.abort();
            }
        }
        self.stderr_buf
            .lock()
            .map(|buf| String::from_utf8_lossy(&buf).trim().to_string())
            .unwrap_or_default()
    }

    async fn reap(&mut self) -> Result<(), TaskError> {
        let status = match self.exit {
            Some(status) => status,
            None => {
                let status = self.child.wait().await?;
                self.exit = Some(status);
                status
            }
        };
        if status.success() {
            return Ok(());
        }
        Err(TaskError::ProcessExitFailure {
            exit_code: status.code(),
            stderr: self.stderr_text().await,
        })
    }
}

#[async_trait]
impl AgentProcess for CliProcess {
    fn id(&self) -> Option<u32> {
        self.pid
    }

    async fn next_message(&mut self) -> Result<Option<AgentMessage>, TaskError> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(Some(message));
            }
            if self.stdout_closed {
                return self.reap().await.map(|_| None);
            }
            match self.read_raw_line().await? {
                Some(raw) => {
                    let line = std::str::from_utf8(&raw).map_err(|err| {
                        TaskError::stream_decode(format!("agent output is not UTF-8: {err}"))
                    })?;
                    self.pending.extend(decode_stream_line(line)?);
                }
                None => self.stdout_closed = true,
            }
        }
    }

    async fn wait(&mut self) -> Result<(), TaskError> {
        self.pending.clear();
        while !self.stdout_closed {
            if self.read_raw_line().await?.is_none() {
                self.stdout_closed = true;
            }
        }
        self.reap().await
    }

    async fn terminate(&mut self) -> Result<(), TaskError> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;
        if self.exit.is_some() {
            return Ok(());
        }
        if let Err(err) = self.child.kill().await {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    self.exit = Some(status);
                    return Ok(());
                }
                _ => return Err(TaskError::unknown(format!("failed to kill agent: {err}"))),
            }
        }
        self.exit = self.child.try_wait().ok().flatten();
        Ok(())
    }
}

impl Drop for CliProcess {
    fn drop(&mut self) {
        if let Some(handle) = self.stderr_task.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug, Clone)]
    pub enum Step {
        Emit(AgentMessage),
        Sleep(Duration),
        Fail(TaskError),
    }

    /// In-memory process that replays a script and counts `terminate` calls.
    pub struct ScriptedProcess {
        steps: VecDeque<Step>,
        exit_code: i32,
        terminate_calls: Arc<AtomicUsize>,
    }

    impl ScriptedProcess {
        pub fn new(steps: Vec<Step>, exit_code: i32) -> Self {
            Self {
                steps: steps.into(),
                exit_code,
                terminate_calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn terminations(&self) -> Arc<AtomicUsize> {
            self.terminate_calls.clone()
        }

        fn exit_result(&self) -> Result<(), TaskError> {
            if self.exit_code == 0 {
                Ok(())
            } else {
                Err(TaskError::ProcessExitFailure {
                    exit_code: Some(self.exit_code),
                    stderr: "scripted failure".to_string(),
                })
            }
        }
    }

    #[async_trait]
    impl AgentProcess for ScriptedProcess {
        fn id(&self) -> Option<u32> {
            None
        }

        async fn next_message(&mut self) -> Result<Option<AgentMessage>, TaskError> {
            while let Some(step) = self.steps.pop_front() {
                match step {
                    Step::Emit(message) => return Ok(Some(message)),
                    Step::Sleep(duration) => tokio::time::sleep(duration).await,
                    Step::Fail(err) => return Err(err),
                }
            }
            self.exit_result().map(|_| None)
        }

        async fn wait(&mut self) -> Result<(), TaskError> {
            self.steps.clear();
            self.exit_result()
        }

        async fn terminate(&mut self) -> Result<(), TaskError> {
            self.terminate_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    pub fn text(text: &str) -> Step {
        Step::Emit(AgentMessage::TextChunk {
            text: text.to_string(),
        })
    }

    pub fn final_result(error_flag: bool) -> Step {
        Step::Emit(AgentMessage::FinalResult(eagleeye_types::FinalResult {
            turn_count: 1,
            elapsed_seconds: 0.1,
            cost_estimate: None,
            error_flag,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use futures::TryStreamExt;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    fn descriptor() -> TaskDescriptor {
        TaskDescriptor {
            task_id: "t-1".to_string(),
            task_name: "policy".to_string(),
            kind: eagleeye_types::TaskKind::PolicyAnalysis,
            prompt: "分析这篇政策".to_string(),
            capability_allowlist: ["Read", "Grep", "Glob"]
                .iter()
                .map(|s| s.to_string())
                .collect::<BTreeSet<_>>(),
            max_turns: 10,
            timeout_seconds: 60,
            working_dir: PathBuf::from("."),
            output_dir: None,
        }
    }

    #[test]
    fn args_follow_invocation_contract() {
        let mut command = AgentCommand::new("claude");
        command.extra_args = vec!["--model".to_string(), "sonnet".to_string()];
        let args = command.args(&descriptor());
        assert_eq!(
            args,
            vec![
                "-p",
                "分析这篇政策",
                "--output-format",
                "stream-json",
                "--verbose",
                "--dangerously-skip-permissions",
                "--allowedTools",
                "Glob,Grep,Read",
                "--max-turns",
                "10",
                "--model",
                "sonnet",
            ]
        );
    }

    #[tokio::test]
    async fn messages_stream_yields_in_order_then_ends() {
        let mut process = ScriptedProcess::new(vec![text("a"), text("b"), final_result(false)], 0);
        let collected: Vec<AgentMessage> = messages(&mut process)
            .try_collect()
            .await
            .expect("stream");
        assert_eq!(collected.len(), 3);
        assert_eq!(collected[0].kind(), "text_chunk");
        assert_eq!(collected[2].kind(), "final_result");
    }

    #[tokio::test]
    async fn messages_stream_surfaces_exit_failure() {
        let mut process = ScriptedProcess::new(vec![text("partial")], 2);
        let result: Result<Vec<AgentMessage>, TaskError> =
            messages(&mut process).try_collect().await;
        assert_eq!(
            result.expect_err("exit failure").code(),
            "PROCESS_EXIT_FAILURE"
        );
    }

    #[tokio::test]
    async fn missing_binary_is_launch_failure() {
        let launcher = CliLauncher::new(AgentCommand::new("eagleeye-no-such-agent-binary"));
        let log = TaskLog::new(eagleeye_observability::ProcessKind::Cli, "t-1", "policy");
        let err = match launcher.launch(&descriptor(), &log).await {
            Ok(_) => panic!("launch should fail"),
            Err(err) => err,
        };
        assert_eq!(err.code(), "LAUNCH_FAILURE");
        assert!(err.to_string().contains("eagleeye-no-such-agent-binary"));
    }
}
