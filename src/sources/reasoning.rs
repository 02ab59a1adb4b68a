//! OpenAI-compatible chat-completions client used as the reasoning provider.

use std::borrow::Cow;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};

use crate::config::REASONING_BASE_ENV;
use crate::error::RxScreenError;
use crate::screening::augment::{ReasoningJudgment, ReasoningProvider, ReasoningRequest};

pub const DEFAULT_REASONING_BASE: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_REASONING_MODEL: &str = "llama-3.3-70b-versatile";
const REASONING_API: &str = "chat-completions";
const TEMPERATURE: f32 = 0.1;
const MAX_TOKENS: u32 = 2048;

const SYSTEM_PROMPT: &str = "You are a clinical pharmacology assistant reviewing a prescription \
against a patient's documented drug allergies. Deterministic rule findings are already listed \
and are authoritative: never contradict or remove them. Add concerns only for risks the rules \
did not flag. Respond with a single JSON object and nothing else:\n\
{\n  \"summary\": \"overall assessment naming each prescribed medicine\",\n  \
\"risk_level\": \"low|moderate|high|critical\",\n  \
\"recommendations\": [\"specific, actionable recommendation\"],\n  \
\"concerns\": [{\"medicine\": \"name\", \"allergen\": \"allergen or null\", \
\"reason\": \"why\", \"confidence\": \"low|medium|high\"}]\n}";

pub struct ChatReasoningClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    model: String,
    api_key: String,
}

impl ChatReasoningClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, RxScreenError> {
        let api_key = api_key.into().trim().to_string();
        if api_key.is_empty() {
            return Err(RxScreenError::InvalidArgument(
                "Reasoning API key is required".into(),
            ));
        }
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(DEFAULT_REASONING_BASE, REASONING_BASE_ENV),
            model: DEFAULT_REASONING_MODEL.to_string(),
            api_key,
        })
    }

    #[cfg(test)]
    fn new_for_test(base: String) -> Result<Self, RxScreenError> {
        Ok(Self::new("test-key")?.with_base(base))
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Cow::Owned(base.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn base(&self) -> &str {
        self.base.as_ref()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base.as_ref().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, RxScreenError> {
        let status = resp.status();
        let content_type = resp.headers().get(CONTENT_TYPE).cloned();
        let bytes = crate::sources::read_limited_body(resp, REASONING_API).await?;
        if !status.is_success() {
            let excerpt = crate::sources::body_excerpt(&bytes);
            return Err(RxScreenError::reasoning(
                REASONING_API,
                format!("HTTP {status}: {excerpt}"),
            ));
        }
        crate::sources::ensure_json_content_type(REASONING_API, content_type.as_ref(), &bytes)?;
        serde_json::from_slice(&bytes).map_err(|source| RxScreenError::ReasoningJson {
            provider: REASONING_API.to_string(),
            source,
        })
    }

    /// Sends one system + user exchange and returns the first choice's content.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String, RxScreenError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };
        let resp = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let parsed: ChatResponse = self.read_json(resp).await?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| {
                RxScreenError::reasoning(REASONING_API, "response contained no message content")
            })
    }

    /// Lists models to confirm the endpoint and key are usable.
    pub async fn ping(&self) -> Result<usize, RxScreenError> {
        let resp = self
            .client
            .get(self.endpoint("models"))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let parsed: ModelList = self.read_json(resp).await?;
        Ok(parsed.data.len())
    }
}

#[async_trait]
impl ReasoningProvider for ChatReasoningClient {
    fn name(&self) -> &str {
        REASONING_API
    }

    async fn analyze(
        &self,
        request: &ReasoningRequest,
    ) -> Result<ReasoningJudgment, RxScreenError> {
        let prompt = crate::render::markdown::reasoning_prompt(request)?;
        let content = self.complete(SYSTEM_PROMPT, &prompt).await?;
        crate::transform::judgment::parse_judgment(REASONING_API, &content)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}
