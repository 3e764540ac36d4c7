use serde::Deserialize;

use super::{EncodedImage, RecognitionError};

/// Instruction sent with every image, regardless of vendor.
pub const FOOD_RECOGNITION_PROMPT: &str = "You are a nutrition assistant. Identify the food in this image \
and estimate its nutrition facts for the portion shown. Respond with ONLY a JSON object with exactly \
these fields: {\"name\": string, \"calories\": number, \"protein\": number, \"carbs\": number, \"fat\": number}. \
Calories in kcal, protein/carbs/fat in grams. No markdown, no explanation.";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 300,
        }
    }
}

/// A hosted model that can look at an image and answer in free text.
///
/// Each vendor adapter owns its own request and response envelopes; callers
/// only ever see the model's text or a classified `RecognitionError`.
#[async_trait::async_trait]
pub trait VisionProvider: Send + Sync {
    /// Identity used for credential and quota-flag keys (e.g. "openai").
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    async fn recognize(&self, image: &EncodedImage, api_key: &str) -> Result<String, RecognitionError>;
}

/// Vendor error codes that mean "out of quota / rate limited".
const QUOTA_CODES: &[&str] = &["429", "rate_limit_exceeded", "insufficient_quota", "resource_exhausted"];

/// Decide between `QuotaExceeded` and `UpstreamError` for a non-2xx response.
pub fn classify_failure(status: u16, code: Option<&str>, message: &str) -> RecognitionError {
    let code_signals_quota = code
        .map(|c| QUOTA_CODES.contains(&c.to_ascii_lowercase().as_str()))
        .unwrap_or(false);

    if status == 429 || code_signals_quota || message.to_lowercase().contains("quota") {
        RecognitionError::QuotaExceeded {
            message: message.to_string(),
        }
    } else {
        RecognitionError::UpstreamError {
            status,
            message: message.to_string(),
        }
    }
}

/// Error code as either a JSON string or number; vendors disagree.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ErrorCode {
    Text(String),
    Number(i64),
}

impl ErrorCode {
    pub(crate) fn as_string(&self) -> String {
        match self {
            ErrorCode::Text(s) => s.clone(),
            ErrorCode::Number(n) => n.to_string(),
        }
    }
}

/// Clip long bodies before they go into errors or logs.
pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let clipped: String = text.chars().take(max_chars).collect();
        format!("{}…", clipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_failure_by_status() {
        assert!(classify_failure(429, None, "Too Many Requests").is_quota());
        assert!(!classify_failure(500, None, "boom").is_quota());
    }

    #[test]
    fn test_classify_failure_by_code_and_message() {
        assert!(classify_failure(400, Some("insufficient_quota"), "x").is_quota());
        assert!(classify_failure(403, Some("RESOURCE_EXHAUSTED"), "x").is_quota());
        assert!(classify_failure(400, None, "You exceeded your current QUOTA").is_quota());

        match classify_failure(401, Some("invalid_api_key"), "Incorrect API key") {
            RecognitionError::UpstreamError { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Incorrect API key");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc…");
    }
}
