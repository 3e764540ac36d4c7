//! Google Gemini adapter for the `generateContent` endpoint.
//!
//! Gemini's envelope differs from the chat-completions one: the image travels
//! as an `inline_data` part, the instruction goes in `system_instruction`, and
//! the answer comes back under `candidates[0].content.parts`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::vision::{classify_failure, truncate, ErrorCode, GenerationParams, FOOD_RECOGNITION_PROMPT};
use super::{EncodedImage, RecognitionError, VisionProvider};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    system_instruction: GeminiContent,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    candidate_count: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    #[serde(default)]
    code: Option<ErrorCode>,
    message: String,
    #[serde(default)]
    status: Option<String>,
}

pub struct GeminiVisionProvider {
    model: String,
    base_url: String,
    params: GenerationParams,
    client: reqwest::Client,
}

impl GeminiVisionProvider {
    pub fn new(model: String) -> Self {
        Self {
            model,
            base_url: GEMINI_BASE_URL.to_string(),
            params: GenerationParams::default(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("⚠️ Could not build HTTP client with timeout ({}), using default client", e);
                reqwest::Client::new()
            });
        self
    }

    fn build_request(&self, image: &EncodedImage) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![
                    RequestPart::Text {
                        text: "What food is this? Reply with the JSON object only.".to_string(),
                    },
                    RequestPart::InlineData {
                        inline_data: InlineData {
                            mime_type: image.mime_type.clone(),
                            data: image.data.clone(),
                        },
                    },
                ],
            }],
            system_instruction: GeminiContent {
                role: None,
                parts: vec![RequestPart::Text {
                    text: FOOD_RECOGNITION_PROMPT.to_string(),
                }],
            },
            generation_config: GenerationConfig {
                temperature: self.params.temperature,
                max_output_tokens: self.params.max_tokens,
                candidate_count: 1,
            },
        }
    }

    fn map_api_error(status: u16, body: &str) -> RecognitionError {
        match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(envelope) => {
                // `status` carries RESOURCE_EXHAUSTED; numeric `code` mirrors HTTP
                let code = envelope
                    .error
                    .status
                    .or_else(|| envelope.error.code.as_ref().map(ErrorCode::as_string));
                classify_failure(status, code.as_deref(), &envelope.error.message)
            }
            Err(_) => classify_failure(status, None, &truncate(body, 500)),
        }
    }

    fn extract_text(body: &str) -> Result<String, RecognitionError> {
        let response: GeminiResponse = serde_json::from_str(body)
            .map_err(|e| RecognitionError::MalformedResponse(format!("invalid Gemini response: {}", e)))?;

        let parts = response
            .candidates
            .and_then(|candidates| candidates.into_iter().next())
            .and_then(|candidate| candidate.content)
            .map(|content| content.parts)
            .ok_or_else(|| RecognitionError::MalformedResponse("no content in first candidate".to_string()))?;

        let text: String = parts.into_iter().filter_map(|part| part.text).collect();
        if text.is_empty() {
            return Err(RecognitionError::MalformedResponse("first candidate has no text parts".to_string()));
        }
        Ok(text)
    }
}

#[async_trait::async_trait]
impl VisionProvider for GeminiVisionProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn recognize(&self, image: &EncodedImage, api_key: &str) -> Result<String, RecognitionError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let request = self.build_request(image);

        log::info!("🤖 Sending request to gemini with model: {}", self.model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
            .map_err(RecognitionError::from_transport)?;

        let status = response.status();
        log::debug!("📥 gemini response status: {}", status);

        let body = response.text().await.map_err(RecognitionError::from_transport)?;

        if !status.is_success() {
            log::error!("❌ gemini API error response: {}", truncate(&body, 500));
            return Err(Self::map_api_error(status.as_u16(), &body));
        }

        let content = Self::extract_text(&body)?;
        log::info!("💬 gemini response content: {}", truncate(&content, 300));
        Ok(content)
    }
}
