use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::UsageConfig;
use crate::deadline::CallBudget;
use crate::repository_traits::InteractionRepository;

const DAILY_RETRY: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    DailyLimit,
    RateLimited,
}

impl DenialReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DenialReason::DailyLimit => "daily_limit",
            DenialReason::RateLimited => "rate_limited",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageDenial {
    pub reason: DenialReason,
    pub retry_after: Duration,
    pub daily_count: u32,
    pub daily_limit: u32,
}

impl UsageDenial {
    /// Whole seconds, rounded up, never zero
    pub fn retry_after_secs(&self) -> u64 {
        let ms = self.retry_after.as_millis() as u64;
        ms.div_ceil(1000).max(1)
    }
}

/// Per-student daily cap and minimum spacing between questions
pub struct UsageGate {
    repo: Arc<dyn InteractionRepository>,
    config: UsageConfig,
}

impl UsageGate {
    pub fn new(repo: Arc<dyn InteractionRepository>, config: UsageConfig) -> Self {
        Self { repo, config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub async fn check(&self, student_id: &str, budget: &CallBudget) -> Result<(), UsageDenial> {
        self.check_at(student_id, Utc::now(), budget).await
    }

    /// Store errors and slow stores let the request through
    pub async fn check_at(
        &self,
        student_id: &str,
        now: DateTime<Utc>,
        budget: &CallBudget,
    ) -> Result<(), UsageDenial> {
        if !self.config.enabled {
            return Ok(());
        }

        let start_of_day = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|d| d.and_utc())
            .unwrap_or(now);

        let child = budget.child(Duration::from_millis(self.config.check_timeout_ms));
        let snapshot = match child
            .run("usage check", self.repo.activity_since(student_id, start_of_day))
            .await
        {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Usage check for {} failed, allowing: {}", student_id, e);
                return Ok(());
            }
        };

        if snapshot.count >= self.config.daily_limit {
            tracing::info!("{} reached the daily limit ({})", student_id, snapshot.count);
            return Err(UsageDenial {
                reason: DenialReason::DailyLimit,
                retry_after: DAILY_RETRY,
                daily_count: snapshot.count,
                daily_limit: self.config.daily_limit,
            });
        }

        if let Some(latest) = snapshot.latest {
            let min_interval = Duration::from_millis(self.config.min_interval_ms);
            let elapsed = (now - latest).to_std().unwrap_or(Duration::ZERO);
            if elapsed < min_interval {
                tracing::info!("{} is sending too fast ({}ms apart)", student_id, elapsed.as_millis());
                return Err(UsageDenial {
                    reason: DenialReason::RateLimited,
                    retry_after: min_interval - elapsed,
                    daily_count: snapshot.count,
                    daily_limit: self.config.daily_limit,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::TutorError;
    use crate::repository_traits::{ActivitySnapshot, MockInteractionRepository};
    use crate::test_support::StalledStore;
    use chrono::TimeZone;

    fn enabled() -> UsageConfig {
        UsageConfig {
            enabled: true,
            ..Config::default().usage
        }
    }

    fn budget() -> CallBudget {
        CallBudget::with_timeout(Duration::from_secs(5))
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    fn repo_with(snapshot: ActivitySnapshot) -> Arc<MockInteractionRepository> {
        let mut repo = MockInteractionRepository::new();
        repo.expect_activity_since()
            .withf(|id, since| id == "s1" && *since == Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap())
            .returning(move |_, _| Ok(snapshot.clone()));
        Arc::new(repo)
    }

    #[tokio::test]
    async fn test_daily_limit() {
        let gate = UsageGate::new(
            repo_with(ActivitySnapshot {
                count: 50,
                latest: Some(noon() - chrono::Duration::minutes(10)),
            }),
            enabled(),
        );
        let denial = gate.check_at("s1", noon(), &budget()).await.unwrap_err();
        assert_eq!(denial.reason, DenialReason::DailyLimit);
        assert_eq!(denial.retry_after_secs(), 3600);
        assert_eq!(denial.daily_count, 50);
    }

    #[tokio::test]
    async fn test_min_interval_rounds_up() {
        let gate = UsageGate::new(
            repo_with(ActivitySnapshot {
                count: 3,
                latest: Some(noon() - chrono::Duration::milliseconds(1000)),
            }),
            enabled(),
        );
        let denial = gate.check_at("s1", noon(), &budget()).await.unwrap_err();
        assert_eq!(denial.reason, DenialReason::RateLimited);
        assert_eq!(denial.retry_after, Duration::from_millis(1500));
        assert_eq!(denial.retry_after_secs(), 2);
    }

    #[tokio::test]
    async fn test_allows_after_interval() {
        let gate = UsageGate::new(
            repo_with(ActivitySnapshot {
                count: 3,
                latest: Some(noon() - chrono::Duration::seconds(5)),
            }),
            enabled(),
        );
        assert!(gate.check_at("s1", noon(), &budget()).await.is_ok());
    }

    #[tokio::test]
    async fn test_store_error_allows() {
        let mut repo = MockInteractionRepository::new();
        repo.expect_activity_since()
            .returning(|_, _| Err(TutorError::Internal("down".into())));
        let gate = UsageGate::new(Arc::new(repo), enabled());
        assert!(gate.check_at("s1", noon(), &budget()).await.is_ok());
    }

    #[tokio::test]
    async fn test_stalled_store_allows_within_deadline() {
        let config = UsageConfig {
            check_timeout_ms: 20,
            ..enabled()
        };
        let gate = UsageGate::new(Arc::new(StalledStore), config);
        let res = tokio::time::timeout(Duration::from_secs(2), gate.check_at("s1", noon(), &budget())).await;
        assert_eq!(res.expect("usage check must respect its own deadline"), Ok(()));
    }

    #[tokio::test]
    async fn test_disabled_gate_skips_store() {
        let mut repo = MockInteractionRepository::new();
        repo.expect_activity_since().never();
        let gate = UsageGate::new(Arc::new(repo), Config::default().usage);
        assert!(gate.check_at("s1", noon(), &budget()).await.is_ok());
    }

    #[test]
    fn test_retry_after_is_at_least_one_second() {
        let denial = UsageDenial {
            reason: DenialReason::RateLimited,
            retry_after: Duration::from_millis(1),
            daily_count: 0,
            daily_limit: 50,
        };
        assert_eq!(denial.retry_after_secs(), 1);
    }
}
