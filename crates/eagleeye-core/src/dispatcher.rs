use std::sync::Arc;

use chrono::Local;
use eagleeye_observability::ProcessKind;
use eagleeye_types::{ExecutionMethod, OutcomePayload, TaskDescriptor, TaskKind, TaskRequest};
use tokio::time::Instant;

use crate::{
    extract, inspect_output, prepare_output_dir, reconcile, supervise, AgentCommand,
    AgentLauncher, AgentProcess, CliLauncher, ProxyConfig, RunRecord, SupervisedRun, TaskBuilder,
    TaskError, TaskLog, TaskOutcome,
};

pub const ALTERNATE_PATH_UNAVAILABLE: &str =
    "MCP mode not implemented yet. Please use useSkill=True";

/// Runs one request end to end: build, supervise, extract, reconcile.
#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<ProxyConfig>,
    launcher: Arc<dyn AgentLauncher>,
    process: ProcessKind,
}

impl Dispatcher {
    pub fn new(
        config: ProxyConfig,
        launcher: Arc<dyn AgentLauncher>,
        process: ProcessKind,
    ) -> Self {
        Self {
            config: Arc::new(config),
            launcher,
            process,
        }
    }

    /// Dispatcher backed by the configured agent CLI.
    pub fn with_cli(config: ProxyConfig, process: ProcessKind) -> Self {
        let launcher = Arc::new(CliLauncher::new(AgentCommand::from_config(&config.agent)));
        Self::new(config, launcher, process)
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// `Err` is reserved for requests rejected before any session starts;
    /// everything that goes wrong afterwards is reported inside the outcome.
    pub async fn dispatch(&self, request: TaskRequest) -> Result<TaskOutcome, TaskError> {
        let started = Instant::now();
        let descriptor =
            TaskBuilder::new(&self.config).build(&request, Local::now().naive_local())?;
        if let TaskRequest::Crawl(crawl) = &request {
            if !crawl.use_skill {
                return Err(TaskError::NotImplemented(
                    ALTERNATE_PATH_UNAVAILABLE.to_string(),
                ));
            }
        }

        let log = TaskLog::new(self.process, &descriptor.task_id, &descriptor.task_name);
        log.started(
            &descriptor.prompt,
            descriptor.timeout_seconds,
            &descriptor.working_dir,
        );

        let run = match self.start(&descriptor, &log).await {
            Ok(process) => supervise(process, &descriptor, &log).await,
            Err(err) => SupervisedRun {
                record: RunRecord::default(),
                failure: Some(err),
                elapsed_seconds: started.elapsed().as_secs_f64(),
            },
        };

        Ok(self.conclude(&descriptor, run, &log, started))
    }

    async fn start(
        &self,
        descriptor: &TaskDescriptor,
        log: &TaskLog,
    ) -> Result<Box<dyn AgentProcess>, TaskError> {
        prepare_output_dir(descriptor)?;
        self.launcher.launch(descriptor, log).await
    }

    fn conclude(
        &self,
        descriptor: &TaskDescriptor,
        run: SupervisedRun,
        log: &TaskLog,
        started: Instant,
    ) -> TaskOutcome {
        let artifacts = descriptor
            .output_dir
            .as_deref()
            .filter(|_| descriptor.kind.has_filesystem_deliverable())
            .map(|dir| inspect_output(dir, &self.config.crawl.artifact_pattern));
        let verdict = reconcile(descriptor.kind, run.failure.as_ref(), artifacts.as_ref());
        if let (true, Some(err), Some(report)) = (verdict.reconciled, &run.failure, &artifacts) {
            log.reconciled(report.artifacts.len(), err);
        }

        let text = run.record.text();
        log.summary(
            run.record.tool_calls(),
            (run.record.tool_result_count(), run.record.tool_result_chars()),
            text.chars().count(),
        );

        let mut degraded = false;
        let payload = match (&run.failure, verdict.success, descriptor.kind) {
            (Some(err), false, _) => OutcomePayload::Diagnostic(err.to_string()),
            (_, _, TaskKind::Crawl) => OutcomePayload::RawText(text),
            (_, _, TaskKind::PolicyAnalysis | TaskKind::CompetitorAnalysis) => {
                let extracted = extract(&text);
                if !extracted.is_structured() {
                    degraded = true;
                    log.extraction_fallback(text.chars().count());
                }
                extracted.into()
            }
        };

        let elapsed_seconds = started.elapsed().as_secs_f64();
        let failure = if verdict.success { None } else { run.failure };
        match &failure {
            Some(err) => log.failed(err, elapsed_seconds),
            None => log.completed(elapsed_seconds),
        }

        let final_result = run.record.final_result().cloned();
        TaskOutcome {
            task_id: descriptor.task_id.clone(),
            kind: descriptor.kind,
            success: verdict.success,
            method: ExecutionMethod::Skill,
            payload,
            elapsed_seconds,
            tool_calls: run.record.into_tool_calls(),
            turn_count: final_result.as_ref().map(|r| r.turn_count),
            cost_estimate: final_result.as_ref().and_then(|r| r.cost_estimate),
            error_flag: final_result.map(|r| r.error_flag).unwrap_or(false),
            degraded,
            reconciled: verdict.reconciled,
            note: verdict.note,
            artifacts,
            failure,
        }
    }
}
