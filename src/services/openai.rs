use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::vision::{classify_failure, truncate, ErrorCode, GenerationParams, FOOD_RECOGNITION_PROMPT};
use super::{EncodedImage, RecognitionError, VisionProvider};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OPENROUTER_MODEL: &str = "meta-llama/llama-4-scout:free";

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ContentPart {
    Text {
        #[serde(rename = "type")]
        content_type: String,
        text: String,
    },
    ImageUrl {
        #[serde(rename = "type")]
        content_type: String,
        image_url: ImageData,
    },
}

#[derive(Debug, Serialize)]
struct ImageData {
    url: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[serde(default)]
    code: Option<ErrorCode>,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
}

/// OpenAI-compatible chat completions adapter (OpenAI itself and OpenRouter).
pub struct OpenAiVisionProvider {
    name: String,
    model: String,
    base_url: String,
    params: GenerationParams,
    extra_headers: Vec<(String, String)>,
    client: reqwest::Client,
}

impl OpenAiVisionProvider {
    pub fn new(model: String) -> Self {
        Self {
            name: "openai".to_string(),
            model,
            base_url: OPENAI_BASE_URL.to_string(),
            params: GenerationParams::default(),
            extra_headers: Vec::new(),
            client: reqwest::Client::new(),
        }
    }

    /// OpenRouter speaks the same protocol but wants attribution headers.
    pub fn openrouter(model: String) -> Self {
        let mut provider = Self::new(model).with_base_url(OPENROUTER_BASE_URL);
        provider.name = "openrouter".to_string();
        provider.extra_headers = vec![
            ("HTTP-Referer".to_string(), "https://github.com/nutrivision".to_string()),
            ("X-Title".to_string(), "NutriVision".to_string()),
        ];
        provider
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

    fn build_request(&self, image: &EncodedImage) -> ChatRequest {
        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: vec![ContentPart::Text {
                    content_type: "text".to_string(),
                    text: FOOD_RECOGNITION_PROMPT.to_string(),
                }],
            },
            ChatMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::Text {
                        content_type: "text".to_string(),
                        text: "What food is this? Reply with the JSON object only.".to_string(),
                    },
                    ContentPart::ImageUrl {
                        content_type: "image_url".to_string(),
                        image_url: ImageData { url: image.data_url() },
                    },
                ],
            },
        ];

        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.params.temperature,
            max_tokens: self.params.max_tokens,
        }
    }

    fn map_api_error(status: u16, body: &str) -> RecognitionError {
        match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(envelope) => {
                // OpenAI puts "insufficient_quota" in either field depending on endpoint
                let code = envelope
                    .error
                    .code
                    .as_ref()
                    .map(ErrorCode::as_string)
                    .or(envelope.error.error_type);
                classify_failure(status, code.as_deref(), &envelope.error.message)
            }
            Err(_) => classify_failure(status, None, &truncate(body, 500)),
        }
    }

    fn extract_text(body: &str) -> Result<String, RecognitionError> {
        let response: ChatResponse = serde_json::from_str(body)
            .map_err(|e| RecognitionError::MalformedResponse(format!("invalid chat completion: {}", e)))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| RecognitionError::MalformedResponse("no message content in first choice".to_string()))
    }
}

#[async_trait::async_trait]
impl VisionProvider for OpenAiVisionProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn recognize(&self, image: &EncodedImage, api_key: &str) -> Result<String, RecognitionError> {
        let request = self.build_request(image);
        let url = format!("{}/chat/completions", self.base_url);

        log::info!("🤖 Sending request to {} with model: {}", self.name, self.model);

        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json");
        for (name, value) in &self.extra_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .json(&request)
            .send()
            .await
            .map_err(RecognitionError::from_transport)?;

        let status = response.status();
        log::debug!("📥 {} response status: {}", self.name, status);

        let body = response.text().await.map_err(RecognitionError::from_transport)?;

        if !status.is_success() {
            log::error!("❌ {} API error response: {}", self.name, truncate(&body, 500));
            return Err(Self::map_api_error(status.as_u16(), &body));
        }

        log::debug!("📄 Raw {} response size: {} bytes", self.name, body.len());
        let content = Self::extract_text(&body)?;
        log::info!("💬 {} response content: {}", self.name, truncate(&content, 300));

        Ok(content)
    }
}
