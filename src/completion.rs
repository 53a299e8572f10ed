use std::sync::Arc;

use crate::config::CompletionConfig;
use crate::deadline::CallBudget;
use crate::error::{Result, TutorError};
use crate::models::{ChatMessage, ChatRequest, CompletionCallResult, Platform, ProviderRouting, ToolCall};
use crate::router::Route;
use crate::tools::{SearchFinding, ToolRegistry};
use crate::transport::Transport;

/// Lifecycle of one completion. The engine records every state it enters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    Idle,
    FirstCallInFlight,
    ToolsRequested,
    SecondCallInFlight,
    AnswerReady,
    Done,
    Failed,
}

/// Everything the engine needs for one answer
#[derive(Debug, Clone)]
pub struct CompletionPlan {
    pub route: Route,
    pub system_prompt: String,
    pub user: ChatMessage,
    pub platform: Platform,
    /// Live data is required; tools are declared unless the route searches on its own
    pub wants_tools: bool,
}

#[derive(Debug, Clone)]
pub struct CompletionOutput {
    pub text: String,
    pub model: String,
    pub tools_used: Vec<String>,
    /// Findings gathered during the tool round-trip
    pub findings: Vec<SearchFinding>,
    pub tool_round_trip: bool,
    pub trace: Vec<CompletionState>,
}

struct Machine {
    state: CompletionState,
    trace: Vec<CompletionState>,
}

impl Machine {
    fn new() -> Self {
        Self {
            state: CompletionState::Idle,
            trace: vec![CompletionState::Idle],
        }
    }

    fn enter(&mut self, next: CompletionState) {
        tracing::debug!("Completion {:?} -> {:?}", self.state, next);
        self.state = next;
        self.trace.push(next);
    }

    fn fail(&mut self, err: TutorError) -> TutorError {
        tracing::error!("Completion failed in {:?}: {}", self.state, err);
        self.enter(CompletionState::Failed);
        err
    }
}

/// Two-phase completion with at most one tool round-trip
pub struct CompletionEngine {
    tx: Arc<dyn Transport>,
    tools: Arc<ToolRegistry>,
    params: CompletionConfig,
}

impl CompletionEngine {
    pub fn new(tx: Arc<dyn Transport>, tools: Arc<ToolRegistry>, params: CompletionConfig) -> Self {
        Self { tx, tools, params }
    }

    fn base_request(&self, plan: &CompletionPlan, messages: Vec<ChatMessage>) -> ChatRequest {
        let latency_sensitive = plan.platform.is_latency_sensitive();
        let mut req = ChatRequest::new(plan.route.model.clone(), messages);
        req.temperature = self.params.temperature;
        req.top_p = Some(self.params.top_p);
        req.frequency_penalty = Some(self.params.frequency_penalty);
        req.presence_penalty = Some(self.params.presence_penalty);
        req.max_tokens = self.params.max_tokens_for(plan.platform);
        req.stream = latency_sensitive;
        if latency_sensitive {
            req.provider = Some(ProviderRouting::lowest_latency());
        }
        req
    }

    fn declares_tools(&self, plan: &CompletionPlan) -> bool {
        plan.wants_tools && !plan.route.live_augmented && !plan.route.vision && !self.tools.is_empty()
    }

    pub async fn complete(&self, plan: &CompletionPlan, budget: &CallBudget) -> Result<CompletionOutput> {
        let mut machine = Machine::new();
        match self.drive(plan, budget, &mut machine).await {
            Ok((result, tool_results)) => {
                let text = result.text.trim().to_string();
                if text.is_empty() {
                    return Err(machine.fail(TutorError::EmptyCompletion));
                }
                machine.enter(CompletionState::AnswerReady);
                machine.enter(CompletionState::Done);
                tracing::info!(
                    "Completion done with {} ({} tool results)",
                    plan.route.model,
                    tool_results.len()
                );
                Ok(CompletionOutput {
                    text,
                    model: plan.route.model.clone(),
                    tools_used: tool_results.iter().map(|(_, f)| f.tool.clone()).collect(),
                    tool_round_trip: !tool_results.is_empty(),
                    findings: tool_results.into_iter().map(|(_, f)| f).collect(),
                    trace: machine.trace,
                })
            }
            Err(e) => Err(machine.fail(e)),
        }
    }

    async fn call(&self, req: &ChatRequest, plan: &CompletionPlan, budget: &CallBudget) -> Result<CompletionCallResult> {
        let child = budget.child(self.params.timeout_for(plan.platform));
        self.tx.chat(req, &child).await
    }

    async fn drive(
        &self,
        plan: &CompletionPlan,
        budget: &CallBudget,
        machine: &mut Machine,
    ) -> Result<(CompletionCallResult, Vec<(String, SearchFinding)>)> {
        let messages = vec![ChatMessage::system(plan.system_prompt.clone()), plan.user.clone()];
        let mut first = self.base_request(plan, messages);
        let offered = self.declares_tools(plan);
        if offered {
            first.tools = Some(self.tools.declarations());
            first.tool_choice = Some("auto".to_string());
        }

        machine.enter(CompletionState::FirstCallInFlight);
        let first_result = self.call(&first, plan, budget).await?;

        if first_result.tool_calls.is_empty() {
            return Ok((first_result, Vec::new()));
        }
        if !offered {
            // Image answers and live-augmented routes never run tools
            tracing::debug!(
                "Ignoring {} tool calls from a request without tools",
                first_result.tool_calls.len()
            );
            return Ok((first_result, Vec::new()));
        }

        machine.enter(CompletionState::ToolsRequested);
        let tool_results = self.execute_calls(&first_result.tool_calls, budget).await;
        if tool_results.is_empty() {
            tracing::info!("No tool produced results, keeping first answer");
            return Ok((first_result, Vec::new()));
        }

        let mut messages = first.messages;
        messages.push(ChatMessage::assistant_tool_calls(
            &first_result.text,
            &first_result.tool_calls,
        ));
        for call in &first_result.tool_calls {
            let content = tool_results
                .iter()
                .find(|(id, _)| *id == call.id)
                .and_then(|(_, f)| serde_json::to_string(&f.payload).ok())
                .unwrap_or_else(|| r#"{"error":"sem resultados"}"#.to_string());
            messages.push(ChatMessage::tool_result(call, content));
        }

        let second = self.base_request(plan, messages);
        machine.enter(CompletionState::SecondCallInFlight);
        let mut second_result = self.call(&second, plan, budget).await?;
        if !second_result.tool_calls.is_empty() {
            tracing::debug!("Ignoring a second round of tool calls");
            second_result.tool_calls.clear();
        }
        Ok((second_result, tool_results))
    }

    /// Run requested calls in order; results are keyed by call id
    async fn execute_calls(&self, calls: &[ToolCall], budget: &CallBudget) -> Vec<(String, SearchFinding)> {
        let mut results = Vec::new();
        for call in calls {
            if let Some(finding) = self.tools.dispatch(call, budget).await {
                results.push((call.id.clone(), finding));
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::test_support::{FakeHttpClient, ScriptedTransport};
    use serde_json::json;
    use std::time::Duration;

    fn registry(http: Arc<FakeHttpClient>) -> Arc<ToolRegistry> {
        Arc::new(ToolRegistry::from_config(http, &Config::default().search))
    }

    fn news_http() -> Arc<FakeHttpClient> {
        Arc::new(FakeHttpClient::new().respond(
            "duckduckgo",
            json!({"RelatedTopics": [
                {"Text": "Posse - novo presidente", "FirstURL": "https://www.example-news.com/posse"}
            ]}),
        ))
    }

    fn plan(platform: Platform, wants_tools: bool, live: bool, vision: bool) -> CompletionPlan {
        CompletionPlan {
            route: Route {
                model: "m".into(),
                live_augmented: live,
                vision,
            },
            system_prompt: "sistema".into(),
            user: ChatMessage::user("pergunta"),
            platform,
            wants_tools,
        }
    }

    fn budget() -> CallBudget {
        CallBudget::with_timeout(Duration::from_secs(5))
    }

    fn tool_call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: r#"{"query":"presidente eua"}"#.into(),
        }
    }

    #[tokio::test]
    async fn test_plain_answer_single_call() {
        let tx = Arc::new(ScriptedTransport::with_texts(&["  Bom dia! Em que posso ajudar?  "]));
        let engine = CompletionEngine::new(tx.clone(), registry(news_http()), Config::default().completion);

        let out = engine.complete(&plan(Platform::Web, false, false, false), &budget()).await.unwrap();

        assert_eq!(out.text, "Bom dia! Em que posso ajudar?");
        assert!(!out.tool_round_trip);
        assert_eq!(
            out.trace,
            vec![
                CompletionState::Idle,
                CompletionState::FirstCallInFlight,
                CompletionState::AnswerReady,
                CompletionState::Done
            ]
        );
        let req = &tx.requests()[0];
        assert!(req.tools.is_none());
        assert!(!req.stream);
        assert_eq!(req.max_tokens, 2000);
        assert_eq!(req.top_p, Some(0.9));
    }

    #[tokio::test]
    async fn test_tool_round_trip_exactly_once() {
        let tx = Arc::new(ScriptedTransport::with_results(vec![
            CompletionCallResult {
                text: String::new(),
                tool_calls: vec![tool_call("c1", "news_search"), tool_call("c2", "unknown_tool")],
            },
            CompletionCallResult {
                text: "O presidente tomou posse.".into(),
                tool_calls: vec![tool_call("c3", "news_search")],
            },
        ]));
        let engine = CompletionEngine::new(tx.clone(), registry(news_http()), Config::default().completion);

        let out = engine.complete(&plan(Platform::Web, true, false, false), &budget()).await.unwrap();

        assert_eq!(out.text, "O presidente tomou posse.");
        assert_eq!(out.tools_used, vec!["news_search".to_string()]);
        assert!(out.tool_round_trip);
        assert_eq!(
            out.trace,
            vec![
                CompletionState::Idle,
                CompletionState::FirstCallInFlight,
                CompletionState::ToolsRequested,
                CompletionState::SecondCallInFlight,
                CompletionState::AnswerReady,
                CompletionState::Done
            ]
        );

        let requests = tx.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tools.as_ref().map(Vec::len), Some(3));
        assert_eq!(requests[0].tool_choice.as_deref(), Some("auto"));
        let follow_up = &requests[1];
        assert!(follow_up.tools.is_none());
        assert_eq!(follow_up.messages.len(), 5);
        assert_eq!(follow_up.messages[2].role, "assistant");
        assert_eq!(follow_up.messages[3].tool_call_id.as_deref(), Some("c1"));
        assert!(follow_up.messages[3].text().unwrap().contains("Posse"));
        assert_eq!(follow_up.messages[4].tool_call_id.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn test_no_tool_results_keeps_first_text() {
        let tx = Arc::new(ScriptedTransport::with_results(vec![CompletionCallResult {
            text: "Resposta provisória".into(),
            tool_calls: vec![tool_call("c1", "news_search")],
        }]));
        let http = Arc::new(FakeHttpClient::new().respond("duckduckgo", json!({})));
        let engine = CompletionEngine::new(tx.clone(), registry(http), Config::default().completion);

        let out = engine.complete(&plan(Platform::Web, true, false, false), &budget()).await.unwrap();
        assert_eq!(out.text, "Resposta provisória");
        assert!(!out.tool_round_trip);
        assert_eq!(tx.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_live_route_and_image_attach_no_tools() {
        for (live, vision) in [(true, false), (false, true)] {
            let tx = Arc::new(ScriptedTransport::with_results(vec![CompletionCallResult {
                text: "ok".into(),
                tool_calls: vec![tool_call("c1", "news_search")],
            }]));
            let engine = CompletionEngine::new(tx.clone(), registry(news_http()), Config::default().completion);
            let out = engine.complete(&plan(Platform::Web, true, live, vision), &budget()).await.unwrap();
            assert_eq!(out.text, "ok");
            assert!(tx.requests()[0].tools.is_none());
            assert_eq!(tx.requests().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_whatsapp_streams_with_latency_routing() {
        let tx = Arc::new(ScriptedTransport::with_texts(&["Olá"]));
        let engine = CompletionEngine::new(tx.clone(), registry(news_http()), Config::default().completion);
        engine.complete(&plan(Platform::Whatsapp, false, false, false), &budget()).await.unwrap();

        let req = &tx.requests()[0];
        assert!(req.stream);
        assert_eq!(req.max_tokens, 1200);
        assert_eq!(req.provider, Some(ProviderRouting::lowest_latency()));
    }

    #[tokio::test]
    async fn test_empty_answer_is_fatal() {
        let tx = Arc::new(ScriptedTransport::with_texts(&["   "]));
        let engine = CompletionEngine::new(tx, registry(news_http()), Config::default().completion);
        let err = engine
            .complete(&plan(Platform::Web, false, false, false), &budget())
            .await
            .unwrap_err();
        assert!(matches!(err, TutorError::EmptyCompletion));
    }

    #[tokio::test]
    async fn test_deadline_is_fatal() {
        let tx = Arc::new(ScriptedTransport::hanging());
        let mut params = Config::default().completion;
        params.timeout_ms = 20;
        let engine = CompletionEngine::new(tx, registry(news_http()), params);
        let err = engine
            .complete(&plan(Platform::Web, false, false, false), &budget())
            .await
            .unwrap_err();
        assert!(err.is_interrupted());
    }
}
