use async_trait::async_trait;
use reqwest::Client;

use crate::deadline::CallBudget;
use crate::error::{Result, TutorError};

/// JSON-over-HTTP seam shared by the search tools and the content search.
/// Every call carries the caller's deadline and cancellation token.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get_json(
        &self,
        url: &str,
        query: &[(String, String)],
        budget: &CallBudget,
    ) -> Result<serde_json::Value>;

    async fn post_json(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
        budget: &CallBudget,
    ) -> Result<serde_json::Value>;
}

pub struct ReqwestHttpClient {
    client: Client,
    user_agent: String,
}

impl ReqwestHttpClient {
    pub fn new(client: Client, user_agent: String) -> Self {
        Self { client, user_agent }
    }

    async fn read_json(response: reqwest::Response) -> Result<serde_json::Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TutorError::Provider {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get_json(
        &self,
        url: &str,
        query: &[(String, String)],
        budget: &CallBudget,
    ) -> Result<serde_json::Value> {
        let request = self
            .client
            .get(url)
            .query(query)
            .header("Accept", "application/json")
            .header("User-Agent", &self.user_agent);
        budget
            .run("http get", async move { Self::read_json(request.send().await?).await })
            .await
    }

    async fn post_json(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
        budget: &CallBudget,
    ) -> Result<serde_json::Value> {
        let mut request = self
            .client
            .post(url)
            .header("Accept", "application/json")
            .header("User-Agent", &self.user_agent)
            .json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token).header("apikey", token);
        }
        budget
            .run("http post", async move { Self::read_json(request.send().await?).await })
            .await
    }
}
