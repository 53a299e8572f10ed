use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use tutor_orchestrator::config::Config;
use tutor_orchestrator::handlers;
use tutor_orchestrator::http::ReqwestHttpClient;
use tutor_orchestrator::redis::RedisManager;
use tutor_orchestrator::repository::{
    HttpContentRepository, RedisCacheRepository, RedisInteractionRepository, RedisStudentRepository,
};
use tutor_orchestrator::service::{Collaborators, TutorService};
use tutor_orchestrator::transport::OpenRouterTransport;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Arc::new(Config::load());

    let redis_manager = Arc::new(RedisManager::new_with_config(&config).await?);

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("failed to build HTTP client")?;
    let http = Arc::new(ReqwestHttpClient::new(
        client.clone(),
        config.search.user_agent.clone(),
    ));
    let transport = Arc::new(OpenRouterTransport::new(
        client,
        config.provider.api_key.clone(),
        config.provider.base_url.clone(),
        config.provider.referer.clone(),
        config.provider.title.clone(),
    ));

    let service = Arc::new(TutorService::new(
        config.clone(),
        Collaborators {
            students: Arc::new(RedisStudentRepository::new(redis_manager.clone())),
            content: Arc::new(HttpContentRepository::new(http.clone(), config.content.clone())),
            interactions: Arc::new(RedisInteractionRepository::new(redis_manager.clone())),
            cache: Arc::new(RedisCacheRepository::new(redis_manager)),
            transport,
            http,
        },
    ));

    let bind: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid server.bind {:?} (expected host:port)", config.server.bind))?;
    let router = handlers::router(service, config.clone());

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(
        %bind,
        path = %config.server.path,
        auth = %config.server.bearer_token.as_deref().map(|_| "bearer").unwrap_or("none"),
        "Starting tutor HTTP server"
    );

    axum::serve(listener, router).await?;
    Ok(())
}
