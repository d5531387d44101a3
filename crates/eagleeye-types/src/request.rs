use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::TaskKind;

fn default_max_articles() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CrawlRequest {
    #[serde(default)]
    pub list_url: String,
    #[serde(default)]
    pub source_name: String,
    #[serde(default = "default_max_articles")]
    pub max_articles: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// `true` drives the agent; `false` selects the direct crawler service.
    #[serde(default)]
    pub use_skill: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyAnalysisRequest {
    #[serde(default)]
    pub content: String,
    /// Product context, either a JSON string or structured JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub products: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompetitorAnalysisRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_products: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskRequest {
    Crawl(CrawlRequest),
    PolicyAnalysis(PolicyAnalysisRequest),
    CompetitorAnalysis(CompetitorAnalysisRequest),
}

impl TaskRequest {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskRequest::Crawl(_) => TaskKind::Crawl,
            TaskRequest::PolicyAnalysis(_) => TaskKind::PolicyAnalysis,
            TaskRequest::CompetitorAnalysis(_) => TaskKind::CompetitorAnalysis,
        }
    }
}
