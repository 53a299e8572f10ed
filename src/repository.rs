use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::config::ContentConfig;
use crate::deadline::CallBudget;
use crate::error::Result;
use crate::http::HttpClient;
use crate::models::{CuratedContent, Interaction, StudentProfile};
use crate::redis::RedisManager;
use crate::repository_traits::{
    ActivitySnapshot, CacheRepository, ContentRepository, InteractionRepository, StudentRepository,
};

const KEY_PREFIX: &str = "tutor";
/// Activity older than this is dropped on every write
const ACTIVITY_RETENTION_MS: i64 = 2 * 24 * 60 * 60 * 1000;

/// Student directory stored as JSON documents
pub struct RedisStudentRepository {
    redis: Arc<RedisManager>,
}

impl RedisStudentRepository {
    pub fn new(redis: Arc<RedisManager>) -> Self {
        Self { redis }
    }

    fn student_key(id: &str) -> String {
        format!("{KEY_PREFIX}:students:{id}")
    }

    fn phone_key(phone: &str) -> String {
        format!("{KEY_PREFIX}:students:phone:{phone}")
    }
}

#[async_trait]
impl StudentRepository for RedisStudentRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<StudentProfile>> {
        self.redis.get_json(&Self::student_key(id)).await
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<StudentProfile>> {
        match self.redis.get_string(&Self::phone_key(phone)).await? {
            Some(id) => self.find_by_id(&id).await,
            None => Ok(None),
        }
    }
}

/// Interactions live in a score-ordered index plus a payload hash; activity
/// timestamps are kept in a separate set so pruning history leaves the usage
/// count intact
pub struct RedisInteractionRepository {
    redis: Arc<RedisManager>,
}

impl RedisInteractionRepository {
    pub fn new(redis: Arc<RedisManager>) -> Self {
        Self { redis }
    }

    fn index_key(student_id: &str) -> String {
        format!("{KEY_PREFIX}:interactions:{student_id}")
    }

    fn data_key(student_id: &str) -> String {
        format!("{KEY_PREFIX}:interactions:{student_id}:data")
    }

    fn activity_key(student_id: &str) -> String {
        format!("{KEY_PREFIX}:activity:{student_id}")
    }
}

#[async_trait]
impl InteractionRepository for RedisInteractionRepository {
    async fn append(&self, student_id: &str, interaction: &Interaction) -> Result<()> {
        let score = interaction.timestamp.timestamp_millis();
        let member = interaction.id.to_string();
        let payload = serde_json::to_string(interaction)?;

        self.redis
            .index_payload(
                &Self::index_key(student_id),
                &Self::data_key(student_id),
                &member,
                score,
                &payload,
            )
            .await?;
        self.redis
            .record_event(
                &Self::activity_key(student_id),
                &member,
                score,
                score - ACTIVITY_RETENTION_MS,
            )
            .await
    }

    async fn list_newest_first(&self, student_id: &str) -> Result<Vec<Interaction>> {
        let payloads = self
            .redis
            .payloads_newest_first(&Self::index_key(student_id), &Self::data_key(student_id))
            .await?;
        Ok(payloads
            .iter()
            .filter_map(|p| match serde_json::from_str(p) {
                Ok(i) => Some(i),
                Err(e) => {
                    tracing::warn!("Skipping unreadable interaction for {}: {}", student_id, e);
                    None
                }
            })
            .collect())
    }

    async fn delete(&self, student_id: &str, ids: &[uuid::Uuid]) -> Result<()> {
        let members: Vec<String> = ids.iter().map(ToString::to_string).collect();
        self.redis
            .remove_payloads(&Self::index_key(student_id), &Self::data_key(student_id), &members)
            .await
    }

    async fn activity_since(&self, student_id: &str, since: DateTime<Utc>) -> Result<ActivitySnapshot> {
        let (count, latest) = self
            .redis
            .event_window(&Self::activity_key(student_id), since.timestamp_millis())
            .await?;
        Ok(ActivitySnapshot {
            count,
            latest: latest.and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        })
    }
}

pub struct RedisCacheRepository {
    redis: Arc<RedisManager>,
}

impl RedisCacheRepository {
    pub fn new(redis: Arc<RedisManager>) -> Self {
        Self { redis }
    }

    fn cache_key(fingerprint: &str) -> String {
        format!("{KEY_PREFIX}:cache:{fingerprint}")
    }
}

#[async_trait]
impl CacheRepository for RedisCacheRepository {
    async fn get(&self, fingerprint: &str) -> Result<Option<String>> {
        self.redis.get_string(&Self::cache_key(fingerprint)).await
    }

    async fn put_if_absent(&self, fingerprint: &str, answer: &str, ttl: Duration) -> Result<bool> {
        self.redis
            .set_nx_ex(&Self::cache_key(fingerprint), answer, ttl.as_secs().max(1))
            .await
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentSearchReply {
    Rows(Vec<CuratedContent>),
    Wrapped { data: Vec<CuratedContent> },
}

/// Similarity search over curated school content, served over HTTP as a
/// remote procedure that takes the question plus school/class scope
pub struct HttpContentRepository {
    http: Arc<dyn HttpClient>,
    config: ContentConfig,
}

impl HttpContentRepository {
    pub fn new(http: Arc<dyn HttpClient>, config: ContentConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl ContentRepository for HttpContentRepository {
    async fn search(
        &self,
        question: &str,
        keywords: &[String],
        student: &StudentProfile,
        budget: &CallBudget,
    ) -> Result<Vec<CuratedContent>> {
        if self.config.search_url.is_empty() {
            tracing::debug!("Content search not configured, skipping");
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "query_text": question,
            "keywords": keywords,
            "school_id": student.school_id,
            "class_id": student.class_id,
            "match_threshold": self.config.match_threshold,
            "match_count": self.config.match_count,
        });
        let bearer = (!self.config.api_key.is_empty()).then_some(self.config.api_key.as_str());
        let child = budget.child(Duration::from_millis(self.config.timeout_ms));

        let raw = self
            .http
            .post_json(&self.config.search_url, bearer, &body, &child)
            .await?;
        let mut rows = match serde_json::from_value(raw)? {
            ContentSearchReply::Rows(rows) | ContentSearchReply::Wrapped { data: rows } => rows,
        };
        rows.truncate(self.config.match_count as usize);
        tracing::info!("Content search returned {} items", rows.len());
        Ok(rows)
    }
}
