use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::deadline::CallBudget;
use crate::error::Result;
use crate::models::{CuratedContent, Interaction, StudentProfile};

#[cfg(test)]
use mockall::automock;

/// Request activity for one student, as seen by the usage gate
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivitySnapshot {
    /// Requests at or after the `since` bound
    pub count: u32,
    pub latest: Option<DateTime<Utc>>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait StudentRepository: Send + Sync + 'static {
    async fn find_by_id(&self, id: &str) -> Result<Option<StudentProfile>>;
    async fn find_by_phone(&self, phone: &str) -> Result<Option<StudentProfile>>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContentRepository: Send + Sync + 'static {
    /// Curated material for the student's school and class, best match first
    async fn search(
        &self,
        question: &str,
        keywords: &[String],
        student: &StudentProfile,
        budget: &CallBudget,
    ) -> Result<Vec<CuratedContent>>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait InteractionRepository: Send + Sync + 'static {
    /// Store an interaction and record one unit of activity at its timestamp
    async fn append(&self, student_id: &str, interaction: &Interaction) -> Result<()>;
    async fn list_newest_first(&self, student_id: &str) -> Result<Vec<Interaction>>;
    async fn delete(&self, student_id: &str, ids: &[uuid::Uuid]) -> Result<()>;
    async fn activity_since(&self, student_id: &str, since: DateTime<Utc>) -> Result<ActivitySnapshot>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CacheRepository: Send + Sync + 'static {
    async fn get(&self, fingerprint: &str) -> Result<Option<String>>;
    /// Returns false when an entry already existed
    async fn put_if_absent(&self, fingerprint: &str, answer: &str, ttl: Duration) -> Result<bool>;
}
