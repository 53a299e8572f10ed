use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::{Article, SearchArgs, SearchPayload, SearchTool, ToolKind};
use crate::deadline::CallBudget;
use crate::error::Result;
use crate::http::HttpClient;

/// Instant-answer response; only the fields the tools read
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct InstantAnswer {
    #[serde(default)]
    pub heading: String,
    #[serde(default)]
    pub abstract_text: String,
    #[serde(rename = "AbstractURL", default)]
    pub abstract_url: String,
    #[serde(default)]
    pub related_topics: Vec<RelatedTopic>,
}

/// Related topics are either leaves or named groups of leaves
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RelatedTopic {
    Group {
        #[serde(rename = "Topics")]
        topics: Vec<RelatedTopic>,
    },
    Leaf {
        #[serde(rename = "Text", default)]
        text: String,
        #[serde(rename = "FirstURL", default)]
        first_url: String,
    },
}

impl InstantAnswer {
    /// Depth-first leaves with text, at most `limit`
    pub(crate) fn flattened_topics(&self, limit: usize) -> Vec<(String, String)> {
        fn walk(topics: &[RelatedTopic], out: &mut Vec<(String, String)>, limit: usize) {
            for topic in topics {
                if out.len() >= limit {
                    return;
                }
                match topic {
                    RelatedTopic::Group { topics } => walk(topics, out, limit),
                    RelatedTopic::Leaf { text, first_url } if !text.is_empty() => {
                        out.push((text.clone(), first_url.clone()))
                    }
                    RelatedTopic::Leaf { .. } => {}
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.related_topics, &mut out, limit);
        out
    }
}

pub(crate) async fn fetch_instant_answer(
    http: &dyn HttpClient,
    endpoint: &str,
    query: &str,
    budget: &CallBudget,
) -> Result<InstantAnswer> {
    let params = [
        ("q", query),
        ("format", "json"),
        ("no_html", "1"),
        ("skip_disambig", "1"),
    ]
    .map(|(k, v)| (k.to_string(), v.to_string()));
    let raw = http.get_json(endpoint, &params, budget).await?;
    Ok(serde_json::from_value(raw)?)
}

/// General web search over the DuckDuckGo instant-answer API
pub struct DuckDuckGoTool {
    http: Arc<dyn HttpClient>,
    endpoint: String,
}

impl DuckDuckGoTool {
    pub fn new(http: Arc<dyn HttpClient>, endpoint: String) -> Self {
        Self { http, endpoint }
    }
}

#[async_trait]
impl SearchTool for DuckDuckGoTool {
    fn kind(&self) -> ToolKind {
        ToolKind::General
    }

    fn description(&self) -> &'static str {
        "Pesquisa geral na web (DuckDuckGo). Útil para preços, cotações e factos recentes."
    }

    async fn invoke(&self, args: &SearchArgs, budget: &CallBudget) -> Result<SearchPayload> {
        let answer = fetch_instant_answer(self.http.as_ref(), &self.endpoint, &args.query, budget).await?;
        let related = answer
            .flattened_topics(args.limit())
            .into_iter()
            .map(|(text, url)| Article {
                title: text.split(" - ").next().unwrap_or(&text).to_string(),
                snippet: text,
                url,
                source: None,
            })
            .collect();

        Ok(SearchPayload::General {
            heading: Some(answer.heading).filter(|h| !h.is_empty()),
            abstract_text: Some(answer.abstract_text).filter(|t| !t.is_empty()),
            abstract_url: Some(answer.abstract_url).filter(|u| !u.is_empty()),
            related,
        })
    }
}
