use std::sync::Arc;
use std::time::Duration;

use crate::deadline::CallBudget;
use crate::error::Result;
use crate::models::Interaction;
use crate::repository_traits::InteractionRepository;

/// Keeps each student's stored conversation bounded to the newest `window` interactions
pub struct HistoryWindow {
    repo: Arc<dyn InteractionRepository>,
    window: usize,
    timeout: Duration,
}

impl HistoryWindow {
    pub fn new(repo: Arc<dyn InteractionRepository>, window: usize, timeout: Duration) -> Self {
        Self {
            repo,
            window,
            timeout,
        }
    }

    /// Stored interactions, newest first. Failures read as an empty history.
    pub async fn load(&self, student_id: &str, budget: &CallBudget) -> Vec<Interaction> {
        let child = budget.child(self.timeout);
        match child.run("history load", self.repo.list_newest_first(student_id)).await {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!("Failed to load history for {}: {}", student_id, e);
                Vec::new()
            }
        }
    }

    /// Append then prune. Errors are logged and swallowed.
    pub async fn record(&self, student_id: &str, interaction: Interaction, budget: &CallBudget) {
        let child = budget.child(self.timeout);
        let res = child
            .run("history write", self.append_and_prune(student_id, &interaction))
            .await;
        if let Err(e) = res {
            tracing::warn!("History write for {} failed: {}", student_id, e);
        }
    }

    async fn append_and_prune(&self, student_id: &str, interaction: &Interaction) -> Result<()> {
        self.repo.append(student_id, interaction).await?;

        let all = self.repo.list_newest_first(student_id).await?;
        if all.len() <= self.window {
            return Ok(());
        }
        let stale: Vec<uuid::Uuid> = all[self.window..].iter().map(|i| i.id).collect();
        tracing::info!(
            "Pruning {} old interactions for {} (keeping {})",
            stale.len(),
            student_id,
            self.window
        );
        self.repo.delete(student_id, &stale).await
    }
}
