use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::{self, Freshness, ResponseCache};
use crate::classifier::ContentClassifier;
use crate::completion::{CompletionEngine, CompletionPlan};
use crate::config::Config;
use crate::deadline::CallBudget;
use crate::error::{Result, TutorError};
use crate::history::HistoryWindow;
use crate::http::HttpClient;
use crate::models::{ContentNeed, Interaction, Requester, StudentProfile, TutorRequest};
use crate::normalize::ResponseNormalizer;
use crate::outcome::StageOutcome;
use crate::prompt::{self, HistoryLimits};
use crate::repository_traits::{CacheRepository, ContentRepository, InteractionRepository, StudentRepository};
use crate::router::ModelRouter;
use crate::temporal::{TemporalIntent, TemporalIntentDetector};
use crate::tools::{SearchFinding, ToolRegistry, render_findings};
use crate::transport::Transport;
use crate::usage::{UsageDenial, UsageGate};

const IMAGE_QUESTION_PLACEHOLDER: &str = "[imagem]";

/// External collaborators the pipeline is assembled from
pub struct Collaborators {
    pub students: Arc<dyn StudentRepository>,
    pub content: Arc<dyn ContentRepository>,
    pub interactions: Arc<dyn InteractionRepository>,
    pub cache: Arc<dyn CacheRepository>,
    pub transport: Arc<dyn Transport>,
    pub http: Arc<dyn HttpClient>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TutorAnswer {
    pub answer: String,
    /// Rendered findings block, when any web search produced results
    pub web_context: Option<String>,
    pub tools_used: Vec<String>,
    pub model_used: String,
    pub from_cache: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TutorOutcome {
    Answered(TutorAnswer),
    Rejected(UsageDenial),
}

/// Response orchestration pipeline: one sequential run per question
pub struct TutorService {
    config: Arc<Config>,
    students: Arc<dyn StudentRepository>,
    content: Arc<dyn ContentRepository>,
    usage: UsageGate,
    history: HistoryWindow,
    classifier: ContentClassifier,
    detector: TemporalIntentDetector,
    router: ModelRouter,
    tools: Arc<ToolRegistry>,
    engine: CompletionEngine,
    normalizer: ResponseNormalizer,
    cache: ResponseCache,
}

impl TutorService {
    pub fn new(config: Arc<Config>, deps: Collaborators) -> Self {
        Self::with_detector(config, deps, TemporalIntentDetector::default())
    }

    pub fn with_detector(config: Arc<Config>, deps: Collaborators, detector: TemporalIntentDetector) -> Self {
        tracing::info!("TutorService::new() - assembling pipeline");
        let tools = Arc::new(ToolRegistry::from_config(deps.http.clone(), &config.search));

        Self {
            usage: UsageGate::new(deps.interactions.clone(), config.usage.clone()),
            history: HistoryWindow::new(
                deps.interactions,
                config.history.window,
                Duration::from_millis(config.history.timeout_ms),
            ),
            classifier: ContentClassifier::new(
                deps.transport.clone(),
                Duration::from_millis(config.provider.classification_timeout_ms),
            ),
            detector,
            router: ModelRouter::from_config(&config.provider),
            engine: CompletionEngine::new(deps.transport, tools.clone(), config.completion.clone()),
            tools,
            normalizer: ResponseNormalizer::new(),
            cache: ResponseCache::new(deps.cache, &config.cache),
            students: deps.students,
            content: deps.content,
            config,
        }
    }

    /// Directory lookup; unknown or unreachable students get a generic profile
    pub async fn resolve_student(&self, requester: &Requester) -> StudentProfile {
        let res = match requester {
            Requester::StudentId(id) => self.students.find_by_id(id).await,
            Requester::Phone(phone) => self.students.find_by_phone(phone).await,
        };
        StageOutcome::degrade(res)
            .or_fallback("student lookup", || None)
            .ok()
            .flatten()
            .unwrap_or_else(|| {
                tracing::info!("No student record for {}, using generic profile", requester.key());
                StudentProfile::anonymous(requester.key())
            })
    }

    pub async fn answer(&self, request: TutorRequest, budget: &CallBudget) -> Result<TutorOutcome> {
        let started = Instant::now();
        let student = self.resolve_student(&request.requester).await;

        if let Err(denial) = self.usage.check(&student.id, budget).await {
            return Ok(TutorOutcome::Rejected(denial));
        }

        let history = self.history.load(&student.id, budget).await;
        let need = self.classify(&request, &student, budget).await;
        let content = self.fetch_content(&request, &need, &student, budget).await;

        let intent = if request.has_image() {
            TemporalIntent::offline()
        } else {
            self.detector.detect(&request.question)
        };
        let route = self.router.route(&request, &intent);
        tracing::info!(
            "Run for {}: current_events={} price={} model={} live={} vision={}",
            student.id,
            intent.current_events,
            intent.price_query,
            route.model,
            route.live_augmented,
            route.vision
        );

        let mut findings: Vec<SearchFinding> = Vec::new();
        if intent.requires_live_data() && !request.has_image() {
            if let Some(finding) = self
                .tools
                .search_by_priority(&request.question, &intent.priority, budget)
                .await
            {
                findings.push(finding);
            }
        }
        let findings_block = render_findings(&findings);

        let fingerprint = cache::fingerprint(&request.question, &student);
        let cacheable = !request.has_image() && !intent.requires_live_data();
        if cacheable {
            if let Some(answer) = self.cache.lookup(&fingerprint, budget).await {
                self.record(&student, &request, &answer, &route.model, budget).await;
                return Ok(TutorOutcome::Answered(TutorAnswer {
                    answer,
                    web_context: None,
                    tools_used: Vec::new(),
                    model_used: route.model,
                    from_cache: true,
                }));
            }
        }

        if budget.is_cancelled() {
            return Err(TutorError::Cancelled("tutor run"));
        }

        let blocks = prompt::build_blocks(
            &request,
            &student,
            &content,
            &history,
            &findings_block,
            HistoryLimits {
                window: self.config.history.prompt_window,
                answer_preview_chars: self.config.history.answer_preview_chars,
            },
        );
        let plan = CompletionPlan {
            system_prompt: prompt::render(&blocks),
            user: prompt::user_message(&request.question, request.image_url.as_deref()),
            platform: request.platform,
            wants_tools: intent.requires_live_data() && !request.has_image(),
            route,
        };

        let output = StageOutcome::fatal(self.engine.complete(&plan, budget).await).into_result()?;
        let answer = self.normalizer.normalize(&output.text);
        if answer.is_empty() {
            return Err(TutorError::EmptyCompletion);
        }

        let mut tools_used: Vec<String> = findings.iter().map(|f| f.tool.clone()).collect();
        tools_used.extend(output.tools_used.iter().cloned());
        findings.extend(output.findings);
        let web_context = Some(render_findings(&findings)).filter(|b| !b.is_empty());

        let freshness = Freshness {
            had_findings: !findings_block.is_empty(),
            tool_round_trip: output.tool_round_trip,
            live_route: plan.route.live_augmented,
            live_data: intent.requires_live_data(),
        };
        if cacheable {
            self.cache.store(&fingerprint, &answer, freshness, budget).await;
        }

        self.record(&student, &request, &answer, &output.model, budget).await;

        tracing::info!(
            "Answered {} in {}ms with {} (tools: {:?})",
            student.id,
            started.elapsed().as_millis(),
            output.model,
            tools_used
        );

        Ok(TutorOutcome::Answered(TutorAnswer {
            answer,
            web_context,
            tools_used,
            model_used: output.model,
            from_cache: false,
        }))
    }

    async fn classify(&self, request: &TutorRequest, student: &StudentProfile, budget: &CallBudget) -> ContentNeed {
        if request.question.is_empty() {
            return ContentNeed {
                needs_content: false,
                keywords: Vec::new(),
                reasoning: "Pergunta só com imagem".to_string(),
            };
        }
        self.classifier
            .classify(
                &request.question,
                student,
                request.effective_personality(),
                self.router.base_model(request),
                budget,
            )
            .await
    }

    async fn fetch_content(
        &self,
        request: &TutorRequest,
        need: &ContentNeed,
        student: &StudentProfile,
        budget: &CallBudget,
    ) -> Vec<crate::models::CuratedContent> {
        if !need.needs_content {
            return Vec::new();
        }
        let res = self
            .content
            .search(&request.question, &need.keywords, student, budget)
            .await;
        StageOutcome::degrade(res)
            .or_fallback("content search", Vec::new)
            .unwrap_or_default()
    }

    async fn record(
        &self,
        student: &StudentProfile,
        request: &TutorRequest,
        answer: &str,
        model: &str,
        budget: &CallBudget,
    ) {
        let question = if request.question.is_empty() {
            IMAGE_QUESTION_PLACEHOLDER.to_string()
        } else {
            request.question.clone()
        };
        self.history
            .record(
                &student.id,
                Interaction::new(question, answer.to_string(), Some(model.to_string())),
                budget,
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CompletionCallResult, CuratedContent, Platform, ToolCall};
    use crate::test_support::{
        FakeHttpClient, InMemoryCache, InMemoryInteractions, InMemoryStudents, ScriptedTransport, StaticContent,
    };
    use crate::tools::FINDINGS_HEADER;
    use crate::usage::DenialReason;
    use serde_json::json;

    struct Harness {
        service: TutorService,
        transport: Arc<ScriptedTransport>,
        http: Arc<FakeHttpClient>,
        interactions: Arc<InMemoryInteractions>,
        cache: Arc<InMemoryCache>,
        content: Arc<StaticContent>,
    }

    fn student() -> StudentProfile {
        StudentProfile {
            id: "s1".into(),
            name: "Ana".into(),
            school_id: Some("school-1".into()),
            school_name: Some("Escola Básica de Braga".into()),
            class_id: Some("class-7b".into()),
            class_name: Some("7ºB".into()),
            grade: Some("7".into()),
            special_context: None,
        }
    }

    fn news_http() -> FakeHttpClient {
        FakeHttpClient::new().respond(
            "duckduckgo",
            json!({"RelatedTopics": [
                {"Text": "Posse presidencial - novo presidente tomou posse", "FirstURL": "https://www.example-news.com/posse"}
            ]}),
        )
    }

    fn harness_with(config: Config, transport: ScriptedTransport, http: FakeHttpClient) -> Harness {
        let transport = Arc::new(transport);
        let http = Arc::new(http);
        let interactions = Arc::new(InMemoryInteractions::default());
        let cache = Arc::new(InMemoryCache::default());
        let content = Arc::new(StaticContent {
            items: vec![CuratedContent {
                title: "Fotossíntese".into(),
                subject: Some("Ciências".into()),
                body: "Processo pelo qual as plantas produzem alimento.".into(),
                source: None,
            }],
            ..Default::default()
        });
        let service = TutorService::with_detector(
            Arc::new(config),
            Collaborators {
                students: Arc::new(InMemoryStudents::default().with(student(), Some("+351900000000"))),
                content: content.clone(),
                interactions: interactions.clone(),
                cache: cache.clone(),
                transport: transport.clone(),
                http: http.clone(),
            },
            TemporalIntentDetector::new(2025),
        );
        Harness {
            service,
            transport,
            http,
            interactions,
            cache,
            content,
        }
    }

    fn request(question: &str) -> TutorRequest {
        TutorRequest {
            question: question.into(),
            requester: Requester::StudentId("s1".into()),
            hierarchical_context: None,
            custom_personality: None,
            requested_model: None,
            platform: Platform::Web,
            image_url: None,
            vision_model: None,
        }
    }

    fn budget() -> CallBudget {
        CallBudget::with_timeout(Duration::from_secs(10))
    }

    fn classification(needs: bool) -> String {
        json!({"needsContent": needs, "keywords": [], "reasoning": "teste"}).to_string()
    }

    fn answered(outcome: TutorOutcome) -> TutorAnswer {
        match outcome {
            TutorOutcome::Answered(a) => a,
            TutorOutcome::Rejected(d) => panic!("unexpected rejection {d:?}"),
        }
    }

    #[tokio::test]
    async fn test_scenario_a_greeting() {
        let h = harness_with(
            Config::default(),
            ScriptedTransport::with_texts(&[&classification(false), "## Bom dia!\n\n\n\nComo posso **ajudar**?"]),
            FakeHttpClient::new(),
        );

        let answer = answered(h.service.answer(request("Bom dia!"), &budget()).await.unwrap());

        assert_eq!(answer.answer, "*Bom dia!*\n\nComo posso *ajudar*?");
        assert!(answer.tools_used.is_empty());
        assert!(answer.web_context.is_none());
        assert!(!answer.from_cache);

        let requests = h.transport.requests();
        assert_eq!(requests.len(), 2, "one classification plus a single completion call");
        assert!(requests[1].tools.is_none());
        assert!(h.http.calls().is_empty());
        assert_eq!(*h.content.searches.lock().unwrap(), 0);
        assert_eq!(h.interactions.count("s1"), 1);
    }

    #[tokio::test]
    async fn test_scenario_b_current_events() {
        let h = harness_with(
            Config::default(),
            ScriptedTransport::with_texts(&[&classification(false), "O presidente atual tomou posse recentemente."]),
            news_http(),
        );

        let answer = answered(
            h.service
                .answer(request("Quem é o presidente atual dos EUA?"), &budget())
                .await
                .unwrap(),
        );

        assert_eq!(answer.tools_used, vec!["news_search".to_string()]);
        assert_eq!(answer.model_used, "deepseek/deepseek-chat:online");
        assert!(answer.web_context.unwrap().contains("Posse presidencial"));

        let calls = h.http.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].1.iter().any(|(k, v)| k == "q" && v.starts_with("latest news")));

        let completion = &h.transport.requests()[1];
        let system = completion.messages[0].text().unwrap();
        assert!(system.contains(FINDINGS_HEADER));
        assert!(system.contains("Posse presidencial"));
        // Live-augmented route: no tools declared
        assert!(completion.tools.is_none());

        assert_eq!(h.cache.len(), 0, "time-sensitive answers are never cached");
        assert_eq!(h.interactions.count("s1"), 1);
    }

    #[tokio::test]
    async fn test_scenario_c_history_window() {
        let texts: Vec<String> = (0..8)
            .flat_map(|i| [classification(false), format!("Resposta {i}")])
            .collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let h = harness_with(Config::default(), ScriptedTransport::with_texts(&refs), FakeHttpClient::new());

        for i in 0..8 {
            let outcome = h
                .service
                .answer(request(&format!("Pergunta número {i}")), &budget())
                .await
                .unwrap();
            answered(outcome);
        }

        assert_eq!(h.interactions.count("s1"), 7);
        let kept = h.service.history.load("s1", &budget()).await;
        assert!(kept.iter().all(|i| i.question != "Pergunta número 0"));
        assert_eq!(kept[0].question, "Pergunta número 7");
    }

    #[tokio::test]
    async fn test_scenario_d_daily_limit() {
        let mut config = Config::default();
        config.usage.enabled = true;
        let h = harness_with(config, ScriptedTransport::with_texts(&[]), FakeHttpClient::new());
        h.interactions
            .seed_activity("s1", chrono::Utc::now() - chrono::Duration::seconds(30), 50);

        let outcome = h.service.answer(request("Explica as frações"), &budget()).await.unwrap();
        let TutorOutcome::Rejected(denial) = outcome else {
            panic!("expected rejection");
        };
        assert_eq!(denial.reason, DenialReason::DailyLimit);
        assert!(denial.retry_after_secs() > 0);
        assert_eq!(denial.daily_count, 50);
        assert!(h.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_cache_hit_skips_completion_and_records_history() {
        let h = harness_with(
            Config::default(),
            ScriptedTransport::with_texts(&[&classification(false)]),
            FakeHttpClient::new(),
        );
        let fp = cache::fingerprint("O que é um átomo?", &student());
        h.cache.insert(&fp, "Resposta guardada");

        let answer = answered(h.service.answer(request("O que é um átomo?"), &budget()).await.unwrap());
        assert!(answer.from_cache);
        assert_eq!(answer.answer, "Resposta guardada");
        assert_eq!(h.transport.requests().len(), 1, "only the classification call");
        assert_eq!(h.interactions.count("s1"), 1);
    }

    #[tokio::test]
    async fn test_fresh_answer_is_cached_once() {
        let h = harness_with(
            Config::default(),
            ScriptedTransport::with_texts(&[&classification(true), "A fotossíntese é..."]),
            FakeHttpClient::new(),
        );
        let answer = answered(h.service.answer(request("Explica a fotossíntese"), &budget()).await.unwrap());
        assert_eq!(answer.answer, "A fotossíntese é...");
        assert_eq!(h.cache.len(), 1);
        assert_eq!(*h.content.searches.lock().unwrap(), 1);

        let system = h.transport.requests()[1].messages[0].text().unwrap().to_string();
        assert!(system.contains("CONTEÚDO EDUCACIONAL RELEVANTE"));
        assert!(system.contains("ESTUDANTE: Ana"));
    }

    #[tokio::test]
    async fn test_tool_round_trip_for_model_without_live_variant() {
        let mut config = Config::default();
        config.provider.live_variants.clear();
        let h = harness_with(
            config,
            ScriptedTransport::with_results(vec![
                CompletionCallResult {
                    text: classification(false),
                    tool_calls: Vec::new(),
                },
                CompletionCallResult {
                    text: String::new(),
                    tool_calls: vec![ToolCall {
                        id: "c1".into(),
                        name: "wikipedia_search".into(),
                        arguments: r#"{"query":"presidente EUA"}"#.into(),
                    }],
                },
                CompletionCallResult {
                    text: "Resposta com fontes.".into(),
                    tool_calls: Vec::new(),
                },
            ]),
            news_http().respond(
                "wikipedia.org",
                json!({"query": {"search": [{"title": "Presidente dos Estados Unidos", "snippet": "chefe de Estado"}]}}),
            ),
        );

        let answer = answered(
            h.service
                .answer(request("Quem é o presidente atual dos EUA?"), &budget())
                .await
                .unwrap(),
        );
        assert_eq!(answer.answer, "Resposta com fontes.");
        assert_eq!(answer.tools_used, vec!["news_search".to_string(), "wikipedia_search".to_string()]);
        assert!(h.transport.requests()[1].tools.is_some());
        assert_eq!(h.cache.len(), 0);
    }

    #[tokio::test]
    async fn test_live_question_is_never_cached() {
        let mut config = Config::default();
        config.provider.live_variants.clear();
        let h = harness_with(
            config,
            ScriptedTransport::with_texts(&[
                &classification(false),
                "O presidente é X.",
                &classification(false),
                "O presidente é Y.",
            ]),
            FakeHttpClient::new()
                .respond("duckduckgo", json!({}))
                .respond("wikipedia.org", json!({})),
        );

        let first = answered(
            h.service
                .answer(request("Quem é o presidente atual dos EUA?"), &budget())
                .await
                .unwrap(),
        );
        assert_eq!(first.answer, "O presidente é X.");
        assert!(first.tools_used.is_empty());
        assert_eq!(h.cache.len(), 0);

        let second = answered(
            h.service
                .answer(request("Quem é o presidente atual dos EUA?"), &budget())
                .await
                .unwrap(),
        );
        assert!(!second.from_cache);
        assert_eq!(second.answer, "O presidente é Y.");
        assert_eq!(h.cache.len(), 0);
        assert_eq!(h.transport.requests().len(), 4);
    }

    #[tokio::test]
    async fn test_image_question_uses_vision_without_search() {
        let h = harness_with(
            Config::default(),
            ScriptedTransport::with_texts(&["Vejo uma célula vegetal."]),
            news_http(),
        );
        let mut req = request("");
        req.image_url = Some("https://abc.supabase.co/storage/v1/object/sign/a.png?token=t".into());

        let answer = answered(h.service.answer(req, &budget()).await.unwrap());
        assert_eq!(answer.model_used, "qwen/qwen2.5-vl-7b-instruct");
        assert!(h.http.calls().is_empty());
        assert_eq!(h.cache.len(), 0);

        let requests = h.transport.requests();
        assert_eq!(requests.len(), 1, "image-only questions skip classification");
        assert!(requests[0].tools.is_none());
        let kept = h.service.history.load("s1", &budget()).await;
        assert_eq!(kept[0].question, IMAGE_QUESTION_PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_completion_failure_is_fatal() {
        let h = harness_with(
            Config::default(),
            ScriptedTransport::with_texts(&[&classification(false)]),
            FakeHttpClient::new(),
        );
        let err = h.service.answer(request("Olá, tudo bem?"), &budget()).await.unwrap_err();
        assert!(matches!(err, TutorError::Internal(_)));
        assert_eq!(h.interactions.count("s1"), 0);
    }

    #[tokio::test]
    async fn test_unknown_phone_gets_generic_profile() {
        let h = harness_with(Config::default(), ScriptedTransport::failing(), FakeHttpClient::new());
        let profile = h
            .service
            .resolve_student(&Requester::Phone("+351911111111".into()))
            .await;
        assert_eq!(profile.name, "Estudante");
        assert_eq!(profile.id, "+351911111111");

        let known = h
            .service
            .resolve_student(&Requester::Phone("+351900000000".into()))
            .await;
        assert_eq!(known.name, "Ana");
    }

    #[tokio::test]
    async fn test_cancelled_run_stops() {
        let h = harness_with(
            Config::default(),
            ScriptedTransport::with_texts(&[&classification(false), "nunca"]),
            FakeHttpClient::new(),
        );
        let budget = budget();
        budget.token().cancel();
        let err = h.service.answer(request("Explica a fotossíntese"), &budget).await.unwrap_err();
        assert!(err.is_interrupted());
    }
}
