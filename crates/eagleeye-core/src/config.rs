use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use eagleeye_observability::canonical_logs_dir_from_root;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const DEFAULT_PROXY_HOST: &str = "0.0.0.0";
pub const DEFAULT_PROXY_PORT: u16 = 8000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub binary: String,
    pub working_dir: PathBuf,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrawlConfig {
    pub output_dir: PathBuf,
    pub timeout_seconds: u64,
    pub max_turns: u32,
    pub artifact_pattern: String,
    pub allowed_tools: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisConfig {
    pub timeout_seconds: u64,
    pub max_turns: u32,
    pub allowed_tools: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Defaults to `<agent.working_dir>/logs` when unset.
    pub dir: Option<PathBuf>,
    pub retention_days: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxyConfig {
    pub agent: AgentConfig,
    pub crawl: CrawlConfig,
    pub analysis: AnalysisConfig,
    pub mcp: McpConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig {
                binary: "claude".to_string(),
                working_dir: PathBuf::from("."),
                extra_args: Vec::new(),
            },
            crawl: CrawlConfig {
                output_dir: PathBuf::from("crawl_files"),
                timeout_seconds: 300,
                max_turns: 50,
                artifact_pattern: "*.md".to_string(),
                allowed_tools: tool_set(&[
                    "Read", "Write", "Edit", "Bash", "Glob", "Grep", "WebFetch", "Skill",
                ]),
            },
            analysis: AnalysisConfig {
                timeout_seconds: 600,
                max_turns: 10,
                allowed_tools: tool_set(&["Read", "Glob", "Grep", "Skill"]),
            },
            mcp: McpConfig {
                url: "http://localhost:3000/mcp".to_string(),
            },
            server: ServerConfig {
                host: DEFAULT_PROXY_HOST.to_string(),
                port: DEFAULT_PROXY_PORT,
            },
            logging: LoggingConfig {
                dir: None,
                retention_days: 14,
            },
        }
    }
}

fn tool_set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

impl ProxyConfig {
    /// Merges defaults, the optional config file, the environment and CLI overrides.
    pub fn load(path: Option<&Path>, cli_overrides: Option<Value>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => read_json_file(path)?,
            None => empty_object(),
        };
        Self::from_layers(file, env_layer(), cli_overrides.unwrap_or_else(empty_object))
    }

    fn from_layers(file: Value, env: Value, cli: Value) -> anyhow::Result<Self> {
        let mut merged = defaults_layer();
        deep_merge(&mut merged, &file);
        deep_merge(&mut merged, &env);
        deep_merge(&mut merged, &cli);
        let config: ProxyConfig =
            serde_json::from_value(merged).context("invalid proxy configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.crawl.timeout_seconds == 0 || self.analysis.timeout_seconds == 0 {
            bail!("timeouts must be at least one second");
        }
        if self.crawl.max_turns == 0 || self.analysis.max_turns == 0 {
            bail!("turn budgets must be at least one turn");
        }
        if self.agent.binary.trim().is_empty() {
            bail!("agent.binary must not be empty");
        }
        if glob::Pattern::new(&self.crawl.artifact_pattern).is_err() {
            bail!(
                "crawl.artifact_pattern `{}` is not a valid glob",
                self.crawl.artifact_pattern
            );
        }
        Ok(())
    }

    /// Crawl output root, resolved against the agent working directory.
    pub fn crawl_output_root(&self) -> PathBuf {
        if self.crawl.output_dir.is_absolute() {
            self.crawl.output_dir.clone()
        } else {
            self.agent.working_dir.join(&self.crawl.output_dir)
        }
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.logging
            .dir
            .clone()
            .unwrap_or_else(|| canonical_logs_dir_from_root(&self.agent.working_dir))
    }
}

fn defaults_layer() -> Value {
    serde_json::to_value(ProxyConfig::default()).unwrap_or_else(|_| empty_object())
}

fn env_layer() -> Value {
    env_layer_from(|key| std::env::var(key).ok())
}

fn env_layer_from(lookup: impl Fn(&str) -> Option<String>) -> Value {
    let mut root = empty_object();
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(dir) = non_empty("CRAWL_OUTPUT_DIR") {
        deep_merge(&mut root, &json!({ "crawl": { "output_dir": dir } }));
    }
    if let Some(secs) = non_empty("CRAWL_TIMEOUT").and_then(|v| v.trim().parse::<u64>().ok()) {
        deep_merge(&mut root, &json!({ "crawl": { "timeout_seconds": secs } }));
    }
    if let Some(url) = non_empty("MCP_HTTP_URL") {
        deep_merge(&mut root, &json!({ "mcp": { "url": url } }));
    }
    if let Some(secs) =
        non_empty("EAGLEEYE_ANALYSIS_TIMEOUT").and_then(|v| v.trim().parse::<u64>().ok())
    {
        deep_merge(&mut root, &json!({ "analysis": { "timeout_seconds": secs } }));
    }
    if let Some(binary) = non_empty("EAGLEEYE_AGENT_BINARY") {
        deep_merge(&mut root, &json!({ "agent": { "binary": binary } }));
    }
    if let Some(dir) = non_empty("EAGLEEYE_WORKING_DIR") {
        deep_merge(&mut root, &json!({ "agent": { "working_dir": dir } }));
    }
    if let Some(dir) = non_empty("EAGLEEYE_LOG_DIR") {
        deep_merge(&mut root, &json!({ "logging": { "dir": dir } }));
    }
    if let Some(port) = non_empty("EAGLEEYE_PORT").and_then(|v| v.trim().parse::<u16>().ok()) {
        deep_merge(&mut root, &json!({ "server": { "port": port } }));
    }

    root
}

fn read_json_file(path: &Path) -> anyhow::Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("config file {} is not valid JSON", path.display()))?;
    if !value.is_object() {
        bail!("config file {} must contain a JSON object", path.display());
    }
    Ok(value)
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> Value {
        let vars = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        env_layer_from(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ProxyConfig::default();
        assert_eq!(config.agent.binary, "claude");
        assert_eq!(config.crawl.timeout_seconds, 300);
        assert_eq!(config.analysis.timeout_seconds, 600);
        assert_eq!(config.server.port, DEFAULT_PROXY_PORT);
        assert!(config.crawl.allowed_tools.contains("Bash"));
        assert!(!config.analysis.allowed_tools.contains("Bash"));
    }

    #[test]
    fn env_layer_overrides_file_layer() {
        let file = json!({ "crawl": { "timeout_seconds": 120, "output_dir": "from-file" } });
        let env = env_from(&[("CRAWL_TIMEOUT", "90"), ("MCP_HTTP_URL", "http://mcp:3000")]);
        let config = ProxyConfig::from_layers(file, env, empty_object()).expect("config");
        assert_eq!(config.crawl.timeout_seconds, 90);
        assert_eq!(config.crawl.output_dir, PathBuf::from("from-file"));
        assert_eq!(config.mcp.url, "http://mcp:3000");
    }

    #[test]
    fn unparseable_env_numbers_are_ignored() {
        let env = env_from(&[("CRAWL_TIMEOUT", "soon"), ("EAGLEEYE_PORT", "-1")]);
        let config = ProxyConfig::from_layers(empty_object(), env, empty_object()).expect("config");
        assert_eq!(config.crawl.timeout_seconds, 300);
        assert_eq!(config.server.port, DEFAULT_PROXY_PORT);
    }

    #[test]
    fn cli_layer_wins_and_nulls_do_not_clobber() {
        let env = env_from(&[("EAGLEEYE_AGENT_BINARY", "/opt/agent")]);
        let cli = json!({ "agent": { "binary": null }, "server": { "port": 9100 } });
        let config = ProxyConfig::from_layers(empty_object(), env, cli).expect("config");
        assert_eq!(config.agent.binary, "/opt/agent");
        assert_eq!(config.server.port, 9100);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let file = json!({ "analysis": { "timeout_seconds": 0 } });
        let err = ProxyConfig::from_layers(file, empty_object(), empty_object())
            .expect_err("zero timeout");
        assert!(err.to_string().contains("timeouts"));
    }

    #[test]
    fn relative_output_root_resolves_against_working_dir() {
        let file = json!({ "agent": { "working_dir": "/srv/eagleeye" } });
        let config = ProxyConfig::from_layers(file, empty_object(), empty_object())
            .expect("config");
        assert_eq!(
            config.crawl_output_root(),
            PathBuf::from("/srv/eagleeye/crawl_files")
        );
        assert_eq!(config.logs_dir(), PathBuf::from("/srv/eagleeye/logs"));
    }

    #[test]
    fn load_reads_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("proxy.json");
        std::fs::write(&path, r#"{"crawl":{"artifact_pattern":"*.txt"}}"#).expect("write");
        let config = ProxyConfig::load(Some(&path), None).expect("config");
        assert_eq!(config.crawl.artifact_pattern, "*.txt");
    }

    #[test]
    fn load_rejects_non_object_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("proxy.json");
        std::fs::write(&path, "[1,2]").expect("write");
        assert!(ProxyConfig::load(Some(&path), None).is_err());
    }
}
