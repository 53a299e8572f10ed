//! Deterministic fakes shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::deadline::CallBudget;
use crate::error::{Result, TutorError};
use crate::http::HttpClient;
use crate::models::{ChatRequest, CompletionCallResult, CuratedContent, Interaction, StudentProfile};
use crate::repository_traits::{
    ActivitySnapshot, CacheRepository, ContentRepository, InteractionRepository, StudentRepository,
};
use crate::transport::Transport;

enum Reply {
    Json(serde_json::Value),
    Fail,
}

/// Routes requests by URL substring; the first matching route answers
#[derive(Default)]
pub struct FakeHttpClient {
    routes: Vec<(String, Reply)>,
    calls: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl FakeHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, url_part: &str, body: serde_json::Value) -> Self {
        self.routes.push((url_part.to_string(), Reply::Json(body)));
        self
    }

    pub fn fail(mut self, url_part: &str) -> Self {
        self.routes.push((url_part.to_string(), Reply::Fail));
        self
    }

    pub fn calls(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.calls.lock().unwrap().clone()
    }

    fn reply(&self, url: &str) -> Result<serde_json::Value> {
        match self.routes.iter().find(|(part, _)| url.contains(part.as_str())) {
            Some((_, Reply::Json(v))) => Ok(v.clone()),
            Some((_, Reply::Fail)) => Err(TutorError::Provider {
                status: 503,
                body: "unavailable".to_string(),
            }),
            None => Err(TutorError::Internal(format!("no fake route for {url}"))),
        }
    }
}

#[async_trait]
impl HttpClient for FakeHttpClient {
    async fn get_json(
        &self,
        url: &str,
        query: &[(String, String)],
        budget: &CallBudget,
    ) -> Result<serde_json::Value> {
        self.calls.lock().unwrap().push((url.to_string(), query.to_vec()));
        budget.run("fake get", async { self.reply(url) }).await
    }

    async fn post_json(
        &self,
        url: &str,
        _bearer: Option<&str>,
        body: &serde_json::Value,
        budget: &CallBudget,
    ) -> Result<serde_json::Value> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), vec![("body".to_string(), body.to_string())]));
        budget.run("fake post", async { self.reply(url) }).await
    }
}

enum Script {
    Results(Mutex<VecDeque<CompletionCallResult>>),
    Fail,
    Hang,
}

/// Transport answering from a queue of scripted results, recording every request
pub struct ScriptedTransport {
    script: Script,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedTransport {
    pub fn with_results(results: Vec<CompletionCallResult>) -> Self {
        Self {
            script: Script::Results(Mutex::new(results.into())),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_texts(texts: &[&str]) -> Self {
        Self::with_results(
            texts
                .iter()
                .map(|t| CompletionCallResult {
                    text: t.to_string(),
                    tool_calls: Vec::new(),
                })
                .collect(),
        )
    }

    pub fn failing() -> Self {
        Self {
            script: Script::Fail,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn hanging() -> Self {
        Self {
            script: Script::Hang,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn chat(&self, req: &ChatRequest, budget: &CallBudget) -> Result<CompletionCallResult> {
        self.requests.lock().unwrap().push(req.clone());
        match &self.script {
            Script::Results(queue) => {
                let next = queue.lock().unwrap().pop_front();
                next.ok_or_else(|| TutorError::Internal("No more mock responses".to_string()))
            }
            Script::Fail => Err(TutorError::Provider {
                status: 500,
                body: "scripted failure".to_string(),
            }),
            Script::Hang => budget.run("scripted call", std::future::pending()).await,
        }
    }
}

/// Interactions in insertion order plus an activity log that pruning never touches
#[derive(Default)]
pub struct InMemoryInteractions {
    rows: Mutex<HashMap<String, Vec<Interaction>>>,
    activity: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
}

impl InMemoryInteractions {
    pub fn seed_activity(&self, student_id: &str, at: DateTime<Utc>, times: usize) {
        self.activity
            .lock()
            .unwrap()
            .entry(student_id.to_string())
            .or_default()
            .extend(std::iter::repeat_n(at, times));
    }

    pub fn count(&self, student_id: &str) -> usize {
        self.rows.lock().unwrap().get(student_id).map_or(0, Vec::len)
    }
}

#[async_trait]
impl InteractionRepository for InMemoryInteractions {
    async fn append(&self, student_id: &str, interaction: &Interaction) -> Result<()> {
        self.rows
            .lock()
            .unwrap()
            .entry(student_id.to_string())
            .or_default()
            .push(interaction.clone());
        self.activity
            .lock()
            .unwrap()
            .entry(student_id.to_string())
            .or_default()
            .push(interaction.timestamp);
        Ok(())
    }

    async fn list_newest_first(&self, student_id: &str) -> Result<Vec<Interaction>> {
        let mut list = self.rows.lock().unwrap().get(student_id).cloned().unwrap_or_default();
        list.reverse();
        // Stable: equal timestamps keep newest-inserted first
        list.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(list)
    }

    async fn delete(&self, student_id: &str, ids: &[uuid::Uuid]) -> Result<()> {
        if let Some(rows) = self.rows.lock().unwrap().get_mut(student_id) {
            rows.retain(|i| !ids.contains(&i.id));
        }
        Ok(())
    }

    async fn activity_since(&self, student_id: &str, since: DateTime<Utc>) -> Result<ActivitySnapshot> {
        let activity = self.activity.lock().unwrap();
        let stamps = activity.get(student_id).map(Vec::as_slice).unwrap_or(&[]);
        Ok(ActivitySnapshot {
            count: stamps.iter().filter(|t| **t >= since).count() as u32,
            latest: stamps.iter().max().copied(),
        })
    }
}

#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryCache {
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn insert(&self, fingerprint: &str, answer: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(fingerprint.to_string(), answer.to_string());
    }
}

#[async_trait]
impl CacheRepository for InMemoryCache {
    async fn get(&self, fingerprint: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().unwrap().get(fingerprint).cloned())
    }

    async fn put_if_absent(&self, fingerprint: &str, answer: &str, _ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(fingerprint) {
            return Ok(false);
        }
        entries.insert(fingerprint.to_string(), answer.to_string());
        Ok(true)
    }
}

#[derive(Default)]
pub struct InMemoryStudents {
    by_id: HashMap<String, StudentProfile>,
    phones: HashMap<String, String>,
}

impl InMemoryStudents {
    pub fn with(mut self, profile: StudentProfile, phone: Option<&str>) -> Self {
        if let Some(p) = phone {
            self.phones.insert(p.to_string(), profile.id.clone());
        }
        self.by_id.insert(profile.id.clone(), profile);
        self
    }
}

#[async_trait]
impl StudentRepository for InMemoryStudents {
    async fn find_by_id(&self, id: &str) -> Result<Option<StudentProfile>> {
        Ok(self.by_id.get(id).cloned())
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<StudentProfile>> {
        Ok(self.phones.get(phone).and_then(|id| self.by_id.get(id)).cloned())
    }
}

/// Content search returning a fixed list
#[derive(Default)]
pub struct StaticContent {
    pub items: Vec<CuratedContent>,
    pub searches: Mutex<u32>,
}

#[async_trait]
impl ContentRepository for StaticContent {
    async fn search(
        &self,
        _question: &str,
        _keywords: &[String],
        _student: &StudentProfile,
        _budget: &CallBudget,
    ) -> Result<Vec<CuratedContent>> {
        *self.searches.lock().unwrap() += 1;
        Ok(self.items.clone())
    }
}

/// Store whose every call never completes; exercises per-stage deadlines
#[derive(Default)]
pub struct StalledStore;

#[async_trait]
impl InteractionRepository for StalledStore {
    async fn append(&self, _student_id: &str, _interaction: &Interaction) -> Result<()> {
        std::future::pending().await
    }

    async fn list_newest_first(&self, _student_id: &str) -> Result<Vec<Interaction>> {
        std::future::pending().await
    }

    async fn delete(&self, _student_id: &str, _ids: &[uuid::Uuid]) -> Result<()> {
        std::future::pending().await
    }

    async fn activity_since(&self, _student_id: &str, _since: DateTime<Utc>) -> Result<ActivitySnapshot> {
        std::future::pending().await
    }
}

#[async_trait]
impl CacheRepository for StalledStore {
    async fn get(&self, _fingerprint: &str) -> Result<Option<String>> {
        std::future::pending().await
    }

    async fn put_if_absent(&self, _fingerprint: &str, _answer: &str, _ttl: Duration) -> Result<bool> {
        std::future::pending().await
    }
}
