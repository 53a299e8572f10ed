use std::sync::LazyLock;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use regex::Regex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::AppState;
use crate::deadline::CallBudget;
use crate::error::TutorError;
use crate::service::{TutorAnswer, TutorOutcome};
use crate::usage::{DenialReason, UsageDenial};
use crate::validation::{TutorRequestBody, validate_request};

const WEB_CONTEXT_MAX_CHARS: usize = 1000;
const APOLOGY: &str = "Desculpa, não consegui responder agora. Tenta novamente daqui a pouco.";

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"']+"#).expect("url pattern must compile"));

/// Response envelope shared by every outcome of `POST /tutor`
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TutorResponse {
    pub can_respond: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_search_context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools_used: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_sec: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_limit: Option<u32>,
}

impl TutorResponse {
    fn invalid(message: String) -> Self {
        Self {
            error: Some(message),
            ..Default::default()
        }
    }

    fn failed(err: &TutorError) -> Self {
        Self {
            answer: Some(APOLOGY.to_string()),
            error: Some(err.to_string()),
            ..Default::default()
        }
    }

    fn answered(answer: TutorAnswer) -> Self {
        Self {
            can_respond: true,
            answer: Some(answer.answer),
            web_search_context: answer.web_context.as_deref().map(sanitize_web_context),
            tools_used: Some(answer.tools_used).filter(|t| !t.is_empty()),
            model_used: Some(answer.model_used),
            ..Default::default()
        }
    }

    fn rejected(denial: &UsageDenial) -> Self {
        let retry = denial.retry_after_secs();
        let message = match denial.reason {
            DenialReason::DailyLimit => format!(
                "Atingiste o limite diário de {} interações. Tenta novamente mais tarde.",
                denial.daily_limit
            ),
            DenialReason::RateLimited => format!(
                "Estás a enviar mensagens muito rápido. Aguarda {retry} segundos e tenta novamente."
            ),
        };
        Self {
            error: Some(message),
            reason: Some(denial.reason),
            retry_after_sec: Some(retry),
            daily_count: Some(denial.daily_count),
            daily_limit: Some(denial.daily_limit),
            ..Default::default()
        }
    }
}

/// Replace links with a marker and cap the length for chat surfaces
pub fn sanitize_web_context(context: &str) -> String {
    let stripped = URL_PATTERN.replace_all(context, "[URL_REMOVED]");
    if stripped.chars().count() > WEB_CONTEXT_MAX_CHARS {
        let cut: String = stripped.chars().take(WEB_CONTEXT_MAX_CHARS).collect();
        format!("{cut}...")
    } else {
        stripped.into_owned()
    }
}

/// POST handler. Dropping the handler future (client gone) cancels the run.
pub async fn answer(
    State(state): State<AppState>,
    payload: Result<Json<TutorRequestBody>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => {
            tracing::warn!("Unreadable request body: {}", rejection);
            return (StatusCode::BAD_REQUEST, Json(TutorResponse::invalid(rejection.body_text())))
                .into_response();
        }
    };

    let request = match validate_request(body, &state.config.input) {
        Ok(r) => r,
        Err(e) => {
            tracing::info!("Rejected request: {}", e);
            return (StatusCode::BAD_REQUEST, Json(TutorResponse::invalid(e.to_string()))).into_response();
        }
    };

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let budget = CallBudget::new(
        Duration::from_millis(state.config.server.request_timeout_ms),
        cancel,
    );

    tracing::info!(
        "Question from {} via {} ({} chars, image: {})",
        request.requester.key(),
        request.platform.as_str(),
        request.question.chars().count(),
        request.has_image()
    );

    match budget.run("tutor run", state.service.answer(request, &budget)).await {
        Ok(TutorOutcome::Answered(answer)) => {
            (StatusCode::OK, Json(TutorResponse::answered(answer))).into_response()
        }
        Ok(TutorOutcome::Rejected(denial)) => {
            let retry = denial.retry_after_secs();
            let mut response =
                (StatusCode::TOO_MANY_REQUESTS, Json(TutorResponse::rejected(&denial))).into_response();
            if let Ok(value) = HeaderValue::from_str(&retry.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            response
        }
        Err(e) => {
            tracing::error!("Tutor run failed: {}", e);
            (StatusCode::OK, Json(TutorResponse::failed(&e))).into_response()
        }
    }
}
