/// HTTP surface for the tutor pipeline
pub mod tutor;

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;

use crate::config::Config;
use crate::service::TutorService;

pub use tutor::{TutorResponse, sanitize_web_context};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TutorService>,
    pub config: Arc<Config>,
}

/// Build the application router: the tutor endpoint at the configured path
/// plus an unauthenticated health check
pub fn router(service: Arc<TutorService>, config: Arc<Config>) -> Router {
    let path = config.server.path.clone();
    let bearer = config.server.bearer_token.clone();
    let state = AppState { service, config };

    let mut router = Router::new()
        .route(&path, post(tutor::answer))
        .with_state(state);
    if let Some(expected) = bearer {
        router = router.layer(middleware::from_fn_with_state(
            Arc::new(expected),
            require_bearer,
        ));
    }
    router.route("/health", get(|| async { "ok" }))
}

async fn require_bearer(
    State(expected): State<Arc<String>>,
    req: Request<Body>,
    next: Next,
) -> impl IntoResponse {
    let headers: &HeaderMap = req.headers();
    let authorized = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", expected.as_str()));
    if !authorized {
        tracing::warn!("Rejected request without a valid bearer token");
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    next.run(req).await
}
