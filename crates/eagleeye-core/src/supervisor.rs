use std::time::Duration;

use eagleeye_types::TaskDescriptor;
use tokio::time::Instant;

use crate::{AgentProcess, Interpreter, RunRecord, TaskError, TaskLog};

/// Result of one supervised session. The record is kept even on failure so
/// callers can report what the agent did before it stopped.
#[derive(Debug, Clone)]
pub struct SupervisedRun {
    pub record: RunRecord,
    pub failure: Option<TaskError>,
    pub elapsed_seconds: f64,
}

impl SupervisedRun {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Longest wait for the process to exit once its final result was read.
pub const POST_FINAL_GRACE: Duration = Duration::from_secs(10);

/// Drives `process` to completion under the descriptor's deadline.
///
/// A final result read before the deadline completes the session; the exit
/// status is then awaited for at most `POST_FINAL_GRACE` and a process that
/// lingers past it is killed without failing the task. `terminate` is
/// invoked exactly once before returning, whichever way the session ended.
pub async fn supervise(
    mut process: Box<dyn AgentProcess>,
    descriptor: &TaskDescriptor,
    log: &TaskLog,
) -> SupervisedRun {
    let started = Instant::now();
    let deadline = started + Duration::from_secs(descriptor.timeout_seconds);
    let mut interpreter = Interpreter::new(log);

    let mut outcome = tokio::select! {
        result = interpreter.drive(process.as_mut()) => result,
        _ = tokio::time::sleep_until(deadline) => Err(TaskError::Timeout {
            elapsed_seconds: started.elapsed().as_secs_f64(),
            limit_seconds: descriptor.timeout_seconds,
        }),
    };

    if outcome.is_ok() {
        let settle_by = deadline.min(Instant::now() + POST_FINAL_GRACE);
        outcome = tokio::select! {
            result = interpreter.settle(process.as_mut()) => result,
            _ = tokio::time::sleep_until(settle_by) => {
                log.lingered_after_final();
                Ok(())
            }
        };
    }

    if let Err(err) = process.terminate().await {
        log.terminate_error(&err.to_string());
    }

    SupervisedRun {
        record: interpreter.into_record(),
        failure: outcome.err(),
        elapsed_seconds: started.elapsed().as_secs_f64(),
    }
}
