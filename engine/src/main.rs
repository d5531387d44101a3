use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::{fs, io::Read};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use eagleeye_core::{Dispatcher, ProxyConfig, TaskOutcome};
use eagleeye_observability::{emit_event, init_process_logging, ObservabilityEvent, ProcessKind};
use eagleeye_server::{serve, AppState};
use eagleeye_types::{OutcomePayload, TaskRequest};
use serde_json::{json, Value};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "eagleeye-proxy")]
#[command(about = "Drives the agent CLI for EagleEye crawl and analysis tasks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP proxy until ctrl-c.
    Serve {
        #[arg(long, alias = "hostname")]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long, env = "EAGLEEYE_CONFIG")]
        config: Option<String>,
        #[arg(long)]
        agent_binary: Option<String>,
        #[arg(long)]
        working_dir: Option<String>,
    },
    /// Dispatch one request and print the outcome as JSON.
    Task {
        #[arg(long, value_enum)]
        kind: TaskKindArg,
        /// Request body: inline JSON, `@path` or `-` for stdin.
        #[arg(long)]
        json: String,
        #[arg(long, env = "EAGLEEYE_CONFIG")]
        config: Option<String>,
        #[arg(long)]
        agent_binary: Option<String>,
        #[arg(long)]
        working_dir: Option<String>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum TaskKindArg {
    Crawl,
    Policy,
    Competitor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            host,
            port,
            config,
            agent_binary,
            working_dir,
        } => {
            let overrides = build_cli_overrides(host, port, agent_binary, working_dir);
            let config = load_config(config.as_deref(), overrides)?;
            let (_log_guard, log_info) = init_process_logging(
                ProcessKind::Proxy,
                &config.logs_dir(),
                config.logging.retention_days,
            )?;
            emit_event(
                tracing::Level::INFO,
                ProcessKind::Proxy,
                ObservabilityEvent {
                    event: "logging.initialized",
                    component: "proxy.main",
                    status: Some("ok"),
                    detail: Some("proxy jsonl logging initialized"),
                    ..Default::default()
                },
            );
            info!("proxy logging initialized: {:?}", log_info);

            let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
                .parse()
                .context("invalid host or port")?;
            log_startup(&config, &addr);
            let state = AppState::new(Dispatcher::with_cli(config, ProcessKind::Proxy));
            serve(addr, state).await?;
        }
        Command::Task {
            kind,
            json,
            config,
            agent_binary,
            working_dir,
        } => {
            let overrides = build_cli_overrides(None, None, agent_binary, working_dir);
            let config = load_config(config.as_deref(), overrides)?;
            let (_log_guard, _) = init_process_logging(
                ProcessKind::Cli,
                &config.logs_dir(),
                config.logging.retention_days,
            )?;
            let request = parse_task_request(kind, read_request_json(&json)?)?;
            let dispatcher = Dispatcher::with_cli(config, ProcessKind::Cli);
            let outcome = dispatcher
                .dispatch(request)
                .await
                .map_err(|err| anyhow::anyhow!("request rejected ({}): {err}", err.code()))?;
            println!("{}", serde_json::to_string_pretty(&outcome_json(&outcome))?);
            if !outcome.success {
                anyhow::bail!("task {} failed", outcome.task_id);
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&str>, overrides: Option<Value>) -> anyhow::Result<ProxyConfig> {
    ProxyConfig::load(path.map(Path::new), overrides).context("failed to load proxy config")
}

fn build_cli_overrides(
    host: Option<String>,
    port: Option<u16>,
    agent_binary: Option<String>,
    working_dir: Option<String>,
) -> Option<Value> {
    if host.is_none() && port.is_none() && agent_binary.is_none() && working_dir.is_none() {
        return None;
    }
    Some(json!({
        "server": { "host": host, "port": port },
        "agent": { "binary": agent_binary, "working_dir": working_dir },
    }))
}

fn read_request_json(input: &str) -> anyhow::Result<Value> {
    if input.trim() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        return Ok(serde_json::from_str(&buf)?);
    }
    if let Some(path) = input.strip_prefix('@') {
        let raw = fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
        return Ok(serde_json::from_str(&raw)?);
    }
    Ok(serde_json::from_str(input)?)
}

fn parse_task_request(kind: TaskKindArg, payload: Value) -> anyhow::Result<TaskRequest> {
    let request = match kind {
        TaskKindArg::Crawl => TaskRequest::Crawl(serde_json::from_value(payload)?),
        TaskKindArg::Policy => TaskRequest::PolicyAnalysis(serde_json::from_value(payload)?),
        TaskKindArg::Competitor => {
            TaskRequest::CompetitorAnalysis(serde_json::from_value(payload)?)
        }
    };
    Ok(request)
}

fn outcome_json(outcome: &TaskOutcome) -> Value {
    let payload = match &outcome.payload {
        OutcomePayload::Structured(map) => Value::Object(map.clone()),
        OutcomePayload::RawText(text) => json!({ "rawOutput": text }),
        OutcomePayload::Diagnostic(text) => json!({ "diagnostic": text }),
    };
    json!({
        "taskId": outcome.task_id,
        "kind": outcome.kind,
        "success": outcome.success,
        "method": outcome.method,
        "payload": payload,
        "elapsedSeconds": outcome.elapsed_seconds,
        "toolCalls": outcome.tool_calls,
        "turnCount": outcome.turn_count,
        "costEstimate": outcome.cost_estimate,
        "errorFlag": outcome.error_flag,
        "degraded": outcome.degraded,
        "reconciled": outcome.reconciled,
        "note": outcome.note,
        "artifacts": outcome.artifacts,
        "error": outcome.failure.as_ref().map(|err| json!({
            "code": err.code(),
            "message": err.to_string(),
        })),
    })
}

fn log_startup(config: &ProxyConfig, addr: &SocketAddr) {
    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    info!("starting eagleeye-proxy on http://{addr}");
    info!(
        "startup paths: exe={} agent={} working_dir={} crawl_output={} logs={}",
        exe.display(),
        config.agent.binary,
        config.agent.working_dir.display(),
        config.crawl_output_root().display(),
        config.logs_dir().display()
    );
}
