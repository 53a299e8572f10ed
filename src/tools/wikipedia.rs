use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::{Article, SearchArgs, SearchPayload, SearchTool, ToolKind, strip_html};
use crate::deadline::CallBudget;
use crate::error::Result;
use crate::http::HttpClient;

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    query: Option<QueryBlock>,
}

#[derive(Debug, Default, Deserialize)]
struct QueryBlock {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
    #[serde(default)]
    snippet: String,
}

/// Encyclopedia search via the MediaWiki search API
pub struct WikipediaTool {
    http: Arc<dyn HttpClient>,
    /// Contains a `{lang}` placeholder
    endpoint_template: String,
    default_language: String,
}

impl WikipediaTool {
    pub fn new(http: Arc<dyn HttpClient>, endpoint_template: String, default_language: String) -> Self {
        Self {
            http,
            endpoint_template,
            default_language,
        }
    }

    fn language<'a>(&'a self, args: &'a SearchArgs) -> &'a str {
        args.language
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty() && l.chars().all(|c| c.is_ascii_alphabetic() || c == '-'))
            .unwrap_or(&self.default_language)
    }

    fn article_url(lang: &str, title: &str) -> String {
        format!("https://{}.wikipedia.org/wiki/{}", lang, title.replace(' ', "_"))
    }
}

#[async_trait]
impl SearchTool for WikipediaTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Encyclopedia
    }

    fn description(&self) -> &'static str {
        "Pesquisa artigos da Wikipédia. Útil para conceitos, história, ciência e biografias."
    }

    async fn invoke(&self, args: &SearchArgs, budget: &CallBudget) -> Result<SearchPayload> {
        let lang = self.language(args);
        let endpoint = self.endpoint_template.replace("{lang}", lang);
        let limit = args.limit().to_string();
        let params = [
            ("action", "query"),
            ("list", "search"),
            ("srsearch", args.query.as_str()),
            ("srlimit", limit.as_str()),
            ("format", "json"),
            ("utf8", "1"),
        ]
        .map(|(k, v)| (k.to_string(), v.to_string()));

        let raw = self.http.get_json(&endpoint, &params, budget).await?;
        let response: SearchResponse = serde_json::from_value(raw)?;

        let articles = response
            .query
            .unwrap_or_default()
            .search
            .into_iter()
            .take(args.limit())
            .map(|hit| Article {
                url: Self::article_url(lang, &hit.title),
                snippet: strip_html(&hit.snippet),
                title: hit.title,
                source: Some("Wikipédia".to_string()),
            })
            .collect();

        Ok(SearchPayload::Encyclopedia { articles })
    }
}
