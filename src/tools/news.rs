use std::sync::Arc;

use async_trait::async_trait;

use super::duckduckgo::fetch_instant_answer;
use super::{Article, SearchArgs, SearchPayload, SearchTool, ToolKind};
use crate::deadline::CallBudget;
use crate::error::Result;
use crate::http::HttpClient;

const NEWS_QUALIFIER: &str = "latest news";

/// News lookup: the general search re-queried with a recency qualifier
pub struct NewsTool {
    http: Arc<dyn HttpClient>,
    endpoint: String,
}

impl NewsTool {
    pub fn new(http: Arc<dyn HttpClient>, endpoint: String) -> Self {
        Self { http, endpoint }
    }
}

fn source_of(link: &str) -> Option<String> {
    let parsed = url::Url::parse(link).ok()?;
    let host = parsed.host_str()?;
    Some(host.strip_prefix("www.").unwrap_or(host).to_string())
}

#[async_trait]
impl SearchTool for NewsTool {
    fn kind(&self) -> ToolKind {
        ToolKind::News
    }

    fn description(&self) -> &'static str {
        "Pesquisa notícias recentes. Usar para acontecimentos atuais, eleições, cargos políticos e eventos de hoje."
    }

    async fn invoke(&self, args: &SearchArgs, budget: &CallBudget) -> Result<SearchPayload> {
        let query = format!("{} {}", NEWS_QUALIFIER, args.query);
        let answer = fetch_instant_answer(self.http.as_ref(), &self.endpoint, &query, budget).await?;

        let articles = answer
            .flattened_topics(args.limit())
            .into_iter()
            .map(|(text, link)| Article {
                title: text.split(" - ").next().unwrap_or(&text).trim().to_string(),
                source: source_of(&link),
                snippet: text,
                url: link,
            })
            .collect();

        Ok(SearchPayload::News { articles })
    }
}
