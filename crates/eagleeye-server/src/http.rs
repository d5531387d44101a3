use std::net::SocketAddr;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Level;

use eagleeye_core::{TaskError, TaskOutcome};
use eagleeye_observability::{emit_event, ObservabilityEvent, ProcessKind};
use eagleeye_types::{
    CategoryStats, CompetitorAnalysisRequest, CrawlRequest, ExecutionMethod, OutcomePayload,
    PolicyAnalysisRequest, TaskRequest,
};

use crate::AppState;

const SERVICE_NAME: &str = "EagleEye Proxy";

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let detail = format!("listening on http://{addr}");
    emit_event(
        Level::INFO,
        ProcessKind::Proxy,
        ObservabilityEvent {
            event: "server.listening",
            component: "http",
            status: Some("ready"),
            detail: Some(&detail),
            ..Default::default()
        },
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/crawl", post(crawl))
        .route("/analyze-policy", post(analyze_policy))
        .route("/analyze-competitor", post(analyze_competitor))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CrawlResponse {
    success: bool,
    method: ExecutionMethod,
    data: String,
    task_id: String,
    elapsed_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    article_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category_stats: Option<CategoryStats>,
    reconciled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

async fn crawl(
    State(state): State<AppState>,
    Json(input): Json<CrawlRequest>,
) -> Result<Json<CrawlResponse>, ApiError> {
    let outcome = run(&state, TaskRequest::Crawl(input)).await?;
    let data = match outcome.payload {
        OutcomePayload::RawText(text) => text,
        OutcomePayload::Structured(map) => Value::Object(map).to_string(),
        OutcomePayload::Diagnostic(text) => text,
    };
    let report = outcome.artifacts;
    Ok(Json(CrawlResponse {
        success: outcome.success,
        method: outcome.method,
        data,
        task_id: outcome.task_id,
        elapsed_seconds: outcome.elapsed_seconds,
        output_dir: report
            .as_ref()
            .map(|r| r.output_dir.display().to_string()),
        article_count: report.as_ref().and_then(|r| r.article_count),
        category_stats: report.as_ref().and_then(|r| r.category_stats),
        reconciled: outcome.reconciled,
        note: outcome.note,
    }))
}

async fn analyze_policy(
    State(state): State<AppState>,
    Json(input): Json<PolicyAnalysisRequest>,
) -> Result<Json<Value>, ApiError> {
    let outcome = run(&state, TaskRequest::PolicyAnalysis(input)).await?;
    Ok(Json(analysis_body(outcome.payload)))
}

async fn analyze_competitor(
    State(state): State<AppState>,
    Json(input): Json<CompetitorAnalysisRequest>,
) -> Result<Json<Value>, ApiError> {
    let outcome = run(&state, TaskRequest::CompetitorAnalysis(input)).await?;
    Ok(Json(analysis_body(outcome.payload)))
}

fn analysis_body(payload: OutcomePayload) -> Value {
    match payload {
        OutcomePayload::Structured(map) => Value::Object(map),
        OutcomePayload::RawText(text) | OutcomePayload::Diagnostic(text) => {
            json!({ "rawOutput": text })
        }
    }
}

/// Dispatches and turns failed outcomes into HTTP errors.
async fn run(state: &AppState, request: TaskRequest) -> Result<TaskOutcome, ApiError> {
    let outcome = state.dispatcher.dispatch(request).await?;
    if outcome.success {
        return Ok(outcome);
    }
    Err(outcome
        .failure
        .map(ApiError::from)
        .unwrap_or_else(|| ApiError::from(TaskError::unknown("task failed without a cause"))))
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    detail: String,
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let detail = match &err {
            TaskError::Timeout { limit_seconds, .. } => {
                format!("Request timeout after {limit_seconds} seconds")
            }
            TaskError::ProcessExitFailure { exit_code, stderr } => {
                let stderr = if stderr.is_empty() {
                    "Unknown error"
                } else {
                    stderr.as_str()
                };
                match exit_code {
                    Some(code) => format!("Claude CLI error (exit code {code}): {stderr}"),
                    None => format!("Claude CLI terminated by signal: {stderr}"),
                }
            }
            other => other.to_string(),
        };
        Self { status, detail }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use eagleeye_core::{AgentLauncher, AgentProcess, Dispatcher, ProxyConfig, TaskLog};
    use eagleeye_types::{AgentMessage, FinalResult, TaskDescriptor};
    use tower::ServiceExt;

    use super::*;

    struct CannedProcess {
        messages: VecDeque<AgentMessage>,
        exit_code: i32,
    }

    #[async_trait]
    impl AgentProcess for CannedProcess {
        fn id(&self) -> Option<u32> {
            None
        }

        async fn next_message(&mut self) -> Result<Option<AgentMessage>, TaskError> {
            if let Some(message) = self.messages.pop_front() {
                return Ok(Some(message));
            }
            self.wait().await.map(|_| None)
        }

        async fn wait(&mut self) -> Result<(), TaskError> {
            if self.exit_code == 0 {
                Ok(())
            } else {
                Err(TaskError::ProcessExitFailure {
                    exit_code: Some(self.exit_code),
                    stderr: "model overloaded".to_string(),
                })
            }
        }

        async fn terminate(&mut self) -> Result<(), TaskError> {
            Ok(())
        }
    }

    struct CannedLauncher {
        text: String,
        exit_code: i32,
        last_prompt: Mutex<Option<String>>,
    }

    #[async_trait]
    impl AgentLauncher for CannedLauncher {
        async fn launch(
            &self,
            descriptor: &TaskDescriptor,
            _log: &TaskLog,
        ) -> Result<Box<dyn AgentProcess>, TaskError> {
            if let Ok(mut prompt) = self.last_prompt.lock() {
                *prompt = Some(descriptor.prompt.clone());
            }
            let mut messages = VecDeque::new();
            messages.push_back(AgentMessage::TextChunk {
                text: self.text.clone(),
            });
            if self.exit_code == 0 {
                messages.push_back(AgentMessage::FinalResult(FinalResult {
                    turn_count: 1,
                    elapsed_seconds: 0.2,
                    cost_estimate: None,
                    error_flag: false,
                }));
            }
            Ok(Box::new(CannedProcess {
                messages,
                exit_code: self.exit_code,
            }))
        }
    }

    fn state_with(
        text: &str,
        exit_code: i32,
    ) -> (AppState, Arc<CannedLauncher>, tempfile::TempDir) {
        let root = tempfile::tempdir().expect("tempdir");
        let mut config = ProxyConfig::default();
        config.agent.working_dir = root.path().to_path_buf();
        let launcher = Arc::new(CannedLauncher {
            text: text.to_string(),
            exit_code,
            last_prompt: Mutex::new(None),
        });
        let dispatcher = Dispatcher::new(config, launcher.clone(), ProcessKind::Proxy);
        (AppState::new(dispatcher), launcher, root)
    }

    async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request");
        let resp = app.oneshot(req).await.expect("response");
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
        let payload: Value = serde_json::from_slice(&body).expect("json");
        (status, payload)
    }

    #[tokio::test]
    async fn health_and_root_respond() {
        let (state, _, _root) = state_with("", 0);
        let resp = app_router(state.clone())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app_router(state)
            .oneshot(Request::builder().uri("/").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let body = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
        let payload: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(payload["service"], json!(SERVICE_NAME));
    }

    #[tokio::test]
    async fn policy_route_returns_structured_object() {
        let (state, launcher, _root) = state_with(
            r#"分析完成：{"policyType":"减税","importance":"高","suggestions":[]}"#,
            0,
        );
        let (status, payload) = post_json(
            app_router(state),
            "/analyze-policy",
            json!({ "content": "减税政策...", "products": "[{\"name\":\"经营贷\"}]" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["policyType"], json!("减税"));
        let prompt = launcher
            .last_prompt
            .lock()
            .expect("lock")
            .clone()
            .expect("prompt");
        assert!(prompt.contains("经营贷"));
    }

    #[tokio::test]
    async fn competitor_route_falls_back_to_raw_output() {
        let (state, _, _root) = state_with("无法解析的输出", 0);
        let (status, payload) = post_json(
            app_router(state),
            "/analyze-competitor",
            json!({ "content": "竞品新闻", "userProducts": null }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload, json!({ "rawOutput": "无法解析的输出" }));
    }

    #[tokio::test]
    async fn empty_content_is_bad_request() {
        let (state, launcher, _root) = state_with("", 0);
        let (status, payload) =
            post_json(app_router(state), "/analyze-policy", json!({ "content": "" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["detail"], json!("invalid request: content is required"));
        assert!(launcher.last_prompt.lock().expect("lock").is_none());
    }

    #[tokio::test]
    async fn crawl_without_skill_is_not_implemented() {
        let (state, _, _root) = state_with("", 0);
        let (status, payload) = post_json(
            app_router(state),
            "/api/crawl",
            json!({ "listUrl": "https://example.com", "sourceName": "example" }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(
            payload["detail"],
            json!("MCP mode not implemented yet. Please use useSkill=True")
        );
    }

    #[tokio::test]
    async fn crawl_with_skill_reports_task_details() {
        let (state, _, _root) = state_with("抓取完成", 0);
        let (status, payload) = post_json(
            app_router(state),
            "/api/crawl",
            json!({
                "listUrl": "https://finance.eastmoney.com/a/cbank.html",
                "sourceName": "eastmoney_bank",
                "taskId": "job-20251228",
                "useSkill": true
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["success"], json!(true));
        assert_eq!(payload["method"], json!("skill"));
        assert_eq!(payload["data"], json!("抓取完成"));
        assert_eq!(payload["taskId"], json!("job-20251228"));
        assert_eq!(payload["reconciled"], json!(false));
        assert!(payload["outputDir"]
            .as_str()
            .expect("output dir")
            .ends_with("_job-2025_eastmoney_bank"));
    }

    #[tokio::test]
    async fn crawl_process_failure_maps_to_500() {
        let (state, _, _root) = state_with("partial", 2);
        let (status, payload) = post_json(
            app_router(state),
            "/api/crawl",
            json!({
                "listUrl": "https://example.com/list",
                "sourceName": "example",
                "useSkill": true
            }),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            payload["detail"],
            json!("Claude CLI error (exit code 2): model overloaded")
        );
    }

    #[test]
    fn timeout_maps_to_gateway_timeout() {
        let err = ApiError::from(TaskError::Timeout {
            elapsed_seconds: 300.4,
            limit_seconds: 300,
        });
        assert_eq!(err.status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.detail, "Request timeout after 300 seconds");
    }
}
