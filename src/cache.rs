use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::config::CacheConfig;
use crate::deadline::CallBudget;
use crate::models::StudentProfile;
use crate::outcome::StageOutcome;
use crate::repository_traits::CacheRepository;

/// Cache key for a question asked in a given student context
pub fn fingerprint(question: &str, student: &StudentProfile) -> String {
    let mut hasher = Sha256::new();
    for part in [
        question.trim(),
        student.id.as_str(),
        student.school_name.as_deref().unwrap_or(""),
        student.class_name.as_deref().unwrap_or(""),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())
}

/// Why an answer must not be reused
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Freshness {
    pub had_findings: bool,
    pub tool_round_trip: bool,
    pub live_route: bool,
    /// The question asked for current data
    pub live_data: bool,
}

impl Freshness {
    pub fn is_time_sensitive(&self) -> bool {
        self.had_findings || self.tool_round_trip || self.live_route || self.live_data
    }
}

/// Exact-fingerprint answer cache. Failures are misses, never errors.
pub struct ResponseCache {
    repo: Arc<dyn CacheRepository>,
    enabled: bool,
    ttl: Duration,
    lookup_timeout: Duration,
    store_timeout: Duration,
}

impl ResponseCache {
    pub fn new(repo: Arc<dyn CacheRepository>, config: &CacheConfig) -> Self {
        Self {
            repo,
            enabled: config.enabled,
            ttl: Duration::from_secs(config.ttl_seconds),
            lookup_timeout: Duration::from_millis(config.lookup_timeout_ms),
            store_timeout: Duration::from_millis(config.store_timeout_ms),
        }
    }

    pub async fn lookup(&self, fingerprint: &str, budget: &CallBudget) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let child = budget.child(self.lookup_timeout);
        let res = child.run("cache lookup", self.repo.get(fingerprint)).await;
        let hit = StageOutcome::degrade(res)
            .or_fallback("cache lookup", || None)
            .ok()
            .flatten();
        if hit.is_some() {
            tracing::info!("Cache hit for {}", &fingerprint[..fingerprint.len().min(12)]);
        }
        hit
    }

    /// Returns true when a new entry was written
    pub async fn store(
        &self,
        fingerprint: &str,
        answer: &str,
        freshness: Freshness,
        budget: &CallBudget,
    ) -> bool {
        if !self.enabled {
            return false;
        }
        if freshness.is_time_sensitive() {
            tracing::debug!("Not caching time-sensitive answer ({:?})", freshness);
            return false;
        }
        let child = budget.child(self.store_timeout);
        let res = child
            .run("cache store", self.repo.put_if_absent(fingerprint, answer, self.ttl))
            .await;
        match res {
            Ok(written) => written,
            Err(e) => {
                tracing::warn!("Cache store failed: {}", e);
                false
            }
        }
    }
}
