use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::SearchConfig;
use crate::deadline::CallBudget;
use crate::error::Result;
use crate::http::HttpClient;
use crate::models::{FunctionDeclaration, ToolCall, ToolDeclaration};

pub mod duckduckgo;
pub mod news;
pub mod wikipedia;

pub use duckduckgo::DuckDuckGoTool;
pub use news::NewsTool;
pub use wikipedia::WikipediaTool;

const DEFAULT_MAX_RESULTS: usize = 5;
const MAX_RESULTS_CEILING: usize = 10;

/// Header of the web-findings block injected into the system instruction
pub const FINDINGS_HEADER: &str = "INFORMAÇÕES ATUAIS DA WEB";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    General,
    Encyclopedia,
    News,
}

impl ToolKind {
    pub fn tool_name(self) -> &'static str {
        match self {
            ToolKind::General => "duckduckgo_search",
            ToolKind::Encyclopedia => "wikipedia_search",
            ToolKind::News => "news_search",
        }
    }
}

fn default_max_results() -> Option<u32> {
    Some(DEFAULT_MAX_RESULTS as u32)
}

/// Arguments accepted by every search tool
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchArgs {
    #[schemars(description = "Search terms")]
    pub query: String,
    #[serde(rename = "maxResults", default = "default_max_results")]
    #[schemars(description = "Maximum number of results (1-10, default 5)")]
    pub max_results: Option<u32>,
    #[serde(default)]
    #[schemars(description = "Optional language code such as 'pt' or 'en'")]
    pub language: Option<String>,
}

impl SearchArgs {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_results: default_max_results(),
            language: None,
        }
    }

    pub fn limit(&self) -> usize {
        self.max_results
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .clamp(1, MAX_RESULTS_CEILING)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Article {
    pub title: String,
    pub snippet: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Normalized search output; each tool has its own shape
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchPayload {
    General {
        heading: Option<String>,
        abstract_text: Option<String>,
        abstract_url: Option<String>,
        related: Vec<Article>,
    },
    Encyclopedia {
        articles: Vec<Article>,
    },
    News {
        articles: Vec<Article>,
    },
}

impl SearchPayload {
    pub fn empty(kind: ToolKind) -> Self {
        match kind {
            ToolKind::General => SearchPayload::General {
                heading: None,
                abstract_text: None,
                abstract_url: None,
                related: Vec::new(),
            },
            ToolKind::Encyclopedia => SearchPayload::Encyclopedia {
                articles: Vec::new(),
            },
            ToolKind::News => SearchPayload::News {
                articles: Vec::new(),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            SearchPayload::General {
                abstract_text,
                related,
                ..
            } => abstract_text.as_deref().is_none_or(str::is_empty) && related.is_empty(),
            SearchPayload::Encyclopedia { articles } | SearchPayload::News { articles } => {
                articles.is_empty()
            }
        }
    }

    fn render(&self, out: &mut String) {
        match self {
            SearchPayload::General {
                heading,
                abstract_text,
                abstract_url,
                related,
            } => {
                if let Some(text) = abstract_text.as_deref().filter(|t| !t.is_empty()) {
                    match heading {
                        Some(h) if !h.is_empty() => out.push_str(&format!("Resumo ({h}): {text}\n")),
                        _ => out.push_str(&format!("Resumo: {text}\n")),
                    }
                    if let Some(url) = abstract_url.as_deref().filter(|u| !u.is_empty()) {
                        out.push_str(&format!("Link: {url}\n"));
                    }
                }
                render_articles(related, out);
            }
            SearchPayload::Encyclopedia { articles } | SearchPayload::News { articles } => {
                render_articles(articles, out)
            }
        }
    }
}

fn render_articles(articles: &[Article], out: &mut String) {
    for (i, a) in articles.iter().enumerate() {
        out.push_str(&format!("{}. {}", i + 1, a.title));
        if let Some(source) = &a.source {
            out.push_str(&format!(" ({source})"));
        }
        out.push('\n');
        if !a.snippet.is_empty() && a.snippet != a.title {
            out.push_str(&format!("   {}\n", a.snippet));
        }
        if !a.url.is_empty() {
            out.push_str(&format!("   Link: {}\n", a.url));
        }
    }
}

/// One tool's contribution to the run
#[derive(Debug, Clone, PartialEq)]
pub struct SearchFinding {
    pub tool: String,
    pub payload: SearchPayload,
}

/// Render findings into the block the completion prompt carries.
/// Returns an empty string when there is nothing to show.
pub fn render_findings(findings: &[SearchFinding]) -> String {
    let useful: Vec<&SearchFinding> = findings.iter().filter(|f| !f.payload.is_empty()).collect();
    if useful.is_empty() {
        return String::new();
    }
    let mut out = format!(
        "{FINDINGS_HEADER} (usa estas informações em vez do teu conhecimento de treino):\n"
    );
    for finding in useful {
        out.push_str(&format!("\n### Fonte: {}\n", finding.tool));
        finding.payload.render(&mut out);
    }
    out
}

#[async_trait]
pub trait SearchTool: Send + Sync {
    fn kind(&self) -> ToolKind;

    fn name(&self) -> &'static str {
        self.kind().tool_name()
    }

    fn description(&self) -> &'static str;

    async fn invoke(&self, args: &SearchArgs, budget: &CallBudget) -> Result<SearchPayload>;
}

/// Registered search tools plus the per-tool deadline they run under
pub struct ToolRegistry {
    tools: Vec<Arc<dyn SearchTool>>,
    tool_timeout: Duration,
}

impl ToolRegistry {
    pub fn new(tool_timeout: Duration) -> Self {
        Self {
            tools: Vec::new(),
            tool_timeout,
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn SearchTool>) -> Self {
        self.tools.push(tool);
        self
    }

    /// The three stock tools sharing one HTTP client
    pub fn from_config(http: Arc<dyn HttpClient>, config: &SearchConfig) -> Self {
        Self::new(Duration::from_millis(config.tool_timeout_ms))
            .with_tool(Arc::new(DuckDuckGoTool::new(
                http.clone(),
                config.duckduckgo_url.clone(),
            )))
            .with_tool(Arc::new(WikipediaTool::new(
                http.clone(),
                config.wikipedia_url.clone(),
                config.language.clone(),
            )))
            .with_tool(Arc::new(NewsTool::new(http, config.duckduckgo_url.clone())))
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn get(&self, kind: ToolKind) -> Option<&Arc<dyn SearchTool>> {
        self.tools.iter().find(|t| t.kind() == kind)
    }

    /// Exact-name lookup for provider-requested calls
    pub fn by_name(&self, name: &str) -> Option<&Arc<dyn SearchTool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Function declarations advertised to the completion provider
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        let parameters = args_schema();
        self.tools
            .iter()
            .map(|t| ToolDeclaration {
                kind: "function".to_string(),
                function: FunctionDeclaration {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    parameters: parameters.clone(),
                },
            })
            .collect()
    }

    /// Run one tool under its own deadline. Any failure yields the tool's empty shape.
    async fn run(&self, tool: &dyn SearchTool, args: &SearchArgs, budget: &CallBudget) -> SearchPayload {
        let child = budget.child(self.tool_timeout);
        match tool.invoke(args, &child).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Search tool {} failed: {}", tool.name(), e);
                SearchPayload::empty(tool.kind())
            }
        }
    }

    /// Try providers in order, one at a time, and stop at the first non-empty result
    pub async fn search_by_priority(
        &self,
        query: &str,
        priority: &[ToolKind],
        budget: &CallBudget,
    ) -> Option<SearchFinding> {
        let args = SearchArgs::new(query);
        for kind in priority {
            if budget.is_cancelled() {
                return None;
            }
            let Some(tool) = self.get(*kind) else {
                tracing::debug!("No tool registered for {:?}", kind);
                continue;
            };
            let payload = self.run(tool.as_ref(), &args, budget).await;
            if payload.is_empty() {
                tracing::info!("Search tool {} returned nothing, trying next", tool.name());
                continue;
            }
            tracing::info!("Search tool {} produced findings", tool.name());
            return Some(SearchFinding {
                tool: tool.name().to_string(),
                payload,
            });
        }
        None
    }

    /// Execute a provider-requested tool call. Unknown names, malformed
    /// arguments and empty results produce no finding.
    pub async fn dispatch(&self, call: &ToolCall, budget: &CallBudget) -> Option<SearchFinding> {
        let Some(tool) = self.by_name(&call.name) else {
            tracing::warn!("Provider requested unknown tool {}", call.name);
            return None;
        };
        let args: SearchArgs = match serde_json::from_str(&call.arguments) {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!("Malformed arguments for {}: {}", call.name, e);
                return None;
            }
        };
        let payload = self.run(tool.as_ref(), &args, budget).await;
        (!payload.is_empty()).then(|| SearchFinding {
            tool: tool.name().to_string(),
            payload,
        })
    }
}

fn args_schema() -> serde_json::Value {
    let schema = schemars::schema_for!(SearchArgs);
    let mut value = serde_json::to_value(&schema).unwrap_or_default();
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

/// Remove HTML tags and the handful of entities search snippets carry
pub(crate) fn strip_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
