use serde::Deserialize;

use crate::config::InputConfig;
use crate::error::{Result, TutorError};
use crate::models::{HierarchicalContext, Platform, Requester, TutorRequest};

const SIGNED_PATH: &str = "/storage/v1/object/sign/";
const MIN_QUESTION_CHARS: usize = 2;

/// JSON body accepted by `POST /tutor`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TutorRequestBody {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub ai_model: Option<String>,
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub custom_personality: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub vision_model: Option<String>,
    #[serde(default)]
    pub hierarchical_context: Option<HierarchicalContext>,
}

/// Strip control and zero-width characters, collapse whitespace and
/// repeated punctuation, and cap the length
pub fn sanitize_question(input: &str, max_chars: usize) -> String {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .filter(|c| !matches!(c, '\u{200B}'..='\u{200D}' | '\u{FEFF}'))
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut out = String::with_capacity(collapsed.len());
    let mut run_char = None;
    let mut run_len = 0usize;
    for c in collapsed.chars() {
        if Some(c) == run_char {
            run_len += 1;
        } else {
            run_char = Some(c);
            run_len = 1;
        }
        if matches!(c, '!' | '?' | '.' | ',') && run_len > 2 {
            continue;
        }
        out.push(c);
    }

    out.chars().take(max_chars).collect()
}

/// Signed object-storage URL on the configured host with a `token` parameter
pub fn is_signed_storage_url(candidate: &str, storage_base: &str) -> bool {
    let (Ok(url), Ok(base)) = (url::Url::parse(candidate), url::Url::parse(storage_base)) else {
        return false;
    };
    let same_host = url.host_str().is_some() && url.host_str() == base.host_str() && url.port() == base.port();
    same_host && url.path().contains(SIGNED_PATH) && url.query_pairs().any(|(k, _)| k == "token")
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Turn a raw body into a run request. Every rejection is a `Validation` error.
pub fn validate_request(body: TutorRequestBody, input: &InputConfig) -> Result<TutorRequest> {
    let question = sanitize_question(body.question.as_deref().unwrap_or(""), input.max_question_chars);
    let image_url = non_blank(body.image_url);

    if question.is_empty() && image_url.is_none() {
        return Err(TutorError::Validation(
            "question or imageUrl is required".to_string(),
        ));
    }

    let requester = match (non_blank(body.student_id), non_blank(body.phone_number)) {
        (Some(id), _) => Requester::StudentId(id),
        (None, Some(phone)) => Requester::Phone(phone),
        (None, None) => {
            return Err(TutorError::Validation(
                "studentId or phoneNumber is required".to_string(),
            ));
        }
    };

    if let Some(url) = &image_url {
        if !is_signed_storage_url(url, &input.storage_base_url) {
            return Err(TutorError::Validation(
                "imageUrl must be a signed storage URL".to_string(),
            ));
        }
    }

    if image_url.is_none() && question.chars().count() < MIN_QUESTION_CHARS {
        return Err(TutorError::Validation("question is too short".to_string()));
    }

    Ok(TutorRequest {
        question,
        requester,
        hierarchical_context: body.hierarchical_context,
        custom_personality: non_blank(body.custom_personality),
        requested_model: non_blank(body.ai_model),
        platform: body.platform.unwrap_or_default(),
        image_url,
        vision_model: non_blank(body.vision_model),
    })
}
