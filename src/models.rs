use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Messaging surface the request came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Web,
    Whatsapp,
    Discord,
    #[serde(other)]
    Other,
}

impl Platform {
    /// Platforms whose users wait on a phone; they get streaming and tighter deadlines
    pub fn is_latency_sensitive(self) -> bool {
        matches!(self, Platform::Whatsapp)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Web => "web",
            Platform::Whatsapp => "whatsapp",
            Platform::Discord => "discord",
            Platform::Other => "other",
        }
    }
}

/// How the caller identified the student
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requester {
    StudentId(String),
    Phone(String),
}

impl Requester {
    pub fn key(&self) -> &str {
        match self {
            Requester::StudentId(id) | Requester::Phone(id) => id,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalContext {
    #[serde(default)]
    pub personality: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeContext {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub guidelines: Option<String>,
}

/// Context registry snapshot sent by the caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HierarchicalContext {
    #[serde(default)]
    pub global: Option<GlobalContext>,
    #[serde(default)]
    pub school: Option<ScopeContext>,
    #[serde(default)]
    pub class: Option<ScopeContext>,
}

impl HierarchicalContext {
    pub fn registry_personality(&self) -> Option<&str> {
        self.global
            .as_ref()
            .and_then(|g| g.personality.as_deref())
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// One validated question, immutable for the whole run
#[derive(Debug, Clone)]
pub struct TutorRequest {
    pub question: String,
    pub requester: Requester,
    pub hierarchical_context: Option<HierarchicalContext>,
    pub custom_personality: Option<String>,
    pub requested_model: Option<String>,
    pub platform: Platform,
    pub image_url: Option<String>,
    pub vision_model: Option<String>,
}

impl TutorRequest {
    pub fn has_image(&self) -> bool {
        self.image_url.is_some()
    }

    /// Personality precedence: registry, then custom (ignoring the "original" sentinel)
    pub fn effective_personality(&self) -> Option<&str> {
        if let Some(p) = self
            .hierarchical_context
            .as_ref()
            .and_then(|h| h.registry_personality())
        {
            return Some(p);
        }
        self.custom_personality
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty() && *p != "original")
    }
}

/// Student record as returned by the directory collaborator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub school_id: Option<String>,
    #[serde(default)]
    pub school_name: Option<String>,
    #[serde(default)]
    pub class_id: Option<String>,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub special_context: Option<String>,
}

impl StudentProfile {
    /// Minimal profile used when the directory has no record
    pub fn anonymous(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: "Estudante".to_string(),
            ..Default::default()
        }
    }
}

/// Curated school material returned by the similarity search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuratedContent {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default, alias = "content_data", alias = "content")]
    pub body: String,
    #[serde(default)]
    pub source: Option<String>,
}

/// One stored question/answer pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: uuid::Uuid,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub model: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Interaction {
    pub fn new(question: String, answer: String, model: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            question,
            answer,
            model,
            timestamp: Utc::now(),
        }
    }
}

/// What the classifier decided about curated material
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentNeed {
    #[serde(rename = "needsContent")]
    pub needs_content: bool,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

/// Tool invocation requested by the completion provider
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Text and tool requests produced by one completion call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionCallResult {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

// ---- chat-completions wire format ----

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WireFunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub kind: String,
    pub function: WireFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

impl From<&ToolCall> for WireToolCall {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            kind: function_type(),
            function: WireFunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    fn plain(role: &str, content: MessageContent) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::plain("system", MessageContent::Text(text.into()))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::plain("user", MessageContent::Text(text.into()))
    }

    pub fn user_with_image(text: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self::plain(
            "user",
            MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image_url.into(),
                    },
                },
            ]),
        )
    }

    /// Assistant turn that carried tool-call requests
    pub fn assistant_tool_calls(text: &str, calls: &[ToolCall]) -> Self {
        Self {
            role: "assistant".to_string(),
            content: (!text.is_empty()).then(|| MessageContent::Text(text.to_string())),
            tool_calls: Some(calls.iter().map(WireToolCall::from).collect()),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn tool_result(call: &ToolCall, content: String) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(MessageContent::Text(content)),
            tool_calls: None,
            tool_call_id: Some(call.id.clone()),
            name: Some(call.name.clone()),
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.content {
            Some(MessageContent::Text(t)) => Some(t),
            Some(MessageContent::Parts(parts)) => parts.iter().find_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::ImageUrl { .. } => None,
            }),
            None => None,
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ToolDeclaration {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDeclaration,
}

/// Provider routing hints understood by OpenRouter-style gateways
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ProviderRouting {
    pub sort: String,
    pub allow_fallbacks: bool,
    pub require_parameters: bool,
    pub data_collection: String,
}

impl ProviderRouting {
    pub fn lowest_latency() -> Self {
        Self {
            sort: "latency".to_string(),
            allow_fallbacks: false,
            require_parameters: false,
            data_collection: "deny".to_string(),
        }
    }
}

// Chat-completions request
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDeclaration>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderRouting>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: 0.7,
            max_tokens: 2000,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            stream: false,
            tools: None,
            tool_choice: None,
            provider: None,
            response_format: None,
        }
    }
}

// Chat-completions buffered response
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
}

#[derive(Debug, Deserialize, Default)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<WireToolCall>>,
}

impl From<ChatResponse> for CompletionCallResult {
    fn from(resp: ChatResponse) -> Self {
        let message = resp
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .unwrap_or_default();
        Self {
            text: message.content.unwrap_or_default(),
            tool_calls: message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|c| ToolCall {
                    id: c.id,
                    name: c.function.name,
                    arguments: c.function.arguments,
                })
                .collect(),
        }
    }
}
