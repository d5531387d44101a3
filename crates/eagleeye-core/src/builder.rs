//! Turns inbound requests into immutable task descriptors.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use eagleeye_types::{
    CompetitorAnalysisRequest, CrawlRequest, PolicyAnalysisRequest, TaskDescriptor, TaskKind,
    TaskRequest,
};
use serde_json::Value;

use crate::{ProxyConfig, TaskError};

/// Length of the caller identifier prefix embedded in crawl directory names.
pub const TASK_ID_PREFIX_LEN: usize = 8;

const OUTPUT_FORMAT_RULES: &str = "输出要求：只输出一个 JSON 对象，不要使用 Markdown 代码块，不要在 JSON 前后输出任何解释文字。";

pub struct TaskBuilder<'a> {
    config: &'a ProxyConfig,
}

impl<'a> TaskBuilder<'a> {
    pub fn new(config: &'a ProxyConfig) -> Self {
        Self { config }
    }

    /// `now` is the local wall-clock time used for crawl directory names.
    pub fn build(
        &self,
        request: &TaskRequest,
        now: NaiveDateTime,
    ) -> Result<TaskDescriptor, TaskError> {
        match request {
            TaskRequest::Crawl(req) => self.crawl(req, now),
            TaskRequest::PolicyAnalysis(req) => self.policy(req),
            TaskRequest::CompetitorAnalysis(req) => self.competitor(req),
        }
    }

    fn crawl(&self, req: &CrawlRequest, now: NaiveDateTime) -> Result<TaskDescriptor, TaskError> {
        let list_url = required(&req.list_url, "listUrl")?;
        let source_name = required(&req.source_name, "sourceName")?;
        if req.max_articles == 0 {
            return Err(TaskError::invalid_request("maxArticles must be at least 1"));
        }

        let caller_id = req.task_id.as_deref().map(str::trim).filter(|id| !id.is_empty());
        let dir_name = output_dir_name(now, caller_id, source_name);
        let output_dir = self.config.crawl_output_root().join(dir_name);
        let prompt = format!(
            "使用 eagleeye-crawler skill 爬取 {list_url} 的最新{}篇文章，来源标识为 {source_name}，\
             将文章 Markdown、metadata.json 和 summary.md 保存到目录 {}",
            req.max_articles,
            output_dir.display()
        );

        Ok(TaskDescriptor {
            task_id: resolve_task_id(caller_id),
            task_name: format!("crawl:{source_name}"),
            kind: TaskKind::Crawl,
            prompt,
            capability_allowlist: self.config.crawl.allowed_tools.clone(),
            max_turns: self.config.crawl.max_turns,
            timeout_seconds: self.config.crawl.timeout_seconds,
            working_dir: self.config.agent.working_dir.clone(),
            output_dir: Some(output_dir),
        })
    }

    fn policy(&self, req: &PolicyAnalysisRequest) -> Result<TaskDescriptor, TaskError> {
        let content = required(&req.content, "content")?;
        let mut prompt = String::from("使用 policy-analyzer skill 分析下面这篇政策文章。\n\n");
        push_product_context(&mut prompt, "用户产品信息", req.products.as_ref());
        prompt.push_str("政策文章内容：\n");
        prompt.push_str(content);
        prompt.push_str("\n\n");
        prompt.push_str(OUTPUT_FORMAT_RULES);
        prompt.push_str(
            "\nJSON 字段：policyType（政策类型）、importance（重要程度）、relevance（相关度）、\
             areas（涉及领域数组）、summary（摘要）、keyPoints（要点数组）、impactAnalysis（影响分析）、\
             suggestions（建议数组，每项包含 suggestion 和 reason）。",
        );
        Ok(self.analysis_descriptor(TaskKind::PolicyAnalysis, "policy-analysis", prompt))
    }

    fn competitor(&self, req: &CompetitorAnalysisRequest) -> Result<TaskDescriptor, TaskError> {
        let content = required(&req.content, "content")?;
        let mut prompt = String::from("使用 competitor-analyzer skill 分析下面这篇竞品文章。\n\n");
        push_product_context(&mut prompt, "我方产品信息", req.user_products.as_ref());
        prompt.push_str("竞品文章内容：\n");
        prompt.push_str(content);
        prompt.push_str("\n\n");
        prompt.push_str(OUTPUT_FORMAT_RULES);
        prompt.push_str(
            "\nJSON 字段：company（公司）、type（动态类型）、importance（重要程度）、relevance（相关度）、\
             tags（标签数组）、summary（摘要）、keyPoints（要点数组）、marketImpact（市场影响）、\
             competitiveAnalysis（竞争分析）、ourSuggestions（我方建议数组）。",
        );
        Ok(self.analysis_descriptor(TaskKind::CompetitorAnalysis, "competitor-analysis", prompt))
    }

    fn analysis_descriptor(&self, kind: TaskKind, name: &str, prompt: String) -> TaskDescriptor {
        TaskDescriptor {
            task_id: resolve_task_id(None),
            task_name: name.to_string(),
            kind,
            prompt,
            capability_allowlist: self.config.analysis.allowed_tools.clone(),
            max_turns: self.config.analysis.max_turns,
            timeout_seconds: self.config.analysis.timeout_seconds,
            working_dir: self.config.agent.working_dir.clone(),
            output_dir: None,
        }
    }
}

fn required<'r>(value: &'r str, field: &str) -> Result<&'r str, TaskError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(TaskError::invalid_request(format!("{field} is required")));
    }
    Ok(trimmed)
}

fn resolve_task_id(caller_id: Option<&str>) -> String {
    caller_id
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string())
}

fn push_product_context(prompt: &mut String, label: &str, products: Option<&Value>) {
    let rendered = match products {
        None | Some(Value::Null) => return,
        Some(Value::String(text)) => text.trim().to_string(),
        Some(other) => other.to_string(),
    };
    if rendered.is_empty() || rendered == "[]" {
        return;
    }
    prompt.push_str(label);
    prompt.push_str("（请结合这些产品评估相关度并给出建议）：\n");
    prompt.push_str(&rendered);
    prompt.push_str("\n\n");
}

/// `<YYYYMMDD_HHMMSS>_<id[0..8]>_<source>`, dropping the id segment when the
/// caller id is missing or shorter than eight characters.
pub fn output_dir_name(now: NaiveDateTime, task_id: Option<&str>, source_name: &str) -> String {
    let stamp = now.format("%Y%m%d_%H%M%S");
    let source = sanitize_component(source_name);
    let prefix = task_id
        .map(str::trim)
        .filter(|id| id.chars().count() >= TASK_ID_PREFIX_LEN)
        .map(|id| sanitize_component(&id.chars().take(TASK_ID_PREFIX_LEN).collect::<String>()));
    match prefix {
        Some(prefix) => format!("{stamp}_{prefix}_{source}"),
        None => format!("{stamp}_{source}"),
    }
}

pub fn sanitize_component(input: &str) -> String {
    input
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Creates the crawl output directory before the agent is launched.
pub fn prepare_output_dir(descriptor: &TaskDescriptor) -> Result<Option<PathBuf>, TaskError> {
    let Some(dir) = descriptor.output_dir.as_deref() else {
        return Ok(None);
    };
    create_dir(dir)?;
    Ok(Some(dir.to_path_buf()))
}

fn create_dir(dir: &Path) -> Result<(), TaskError> {
    std::fs::create_dir_all(dir).map_err(|err| {
        TaskError::unknown(format!(
            "failed to create output directory {}: {err}",
            dir.display()
        ))
    })
}
