use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while turning one image into a `FoodRecord`.
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("No API key configured for {provider}")]
    MissingCredential { provider: String },

    #[error("Failed to read image {path}: {source}")]
    EncodingFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Vision API returned error: {status} - {message}")]
    UpstreamError { status: u16, message: String },

    #[error("Vision API quota exceeded: {message}")]
    QuotaExceeded { message: String },

    #[error("Unexpected response envelope: {0}")]
    MalformedResponse(String),

    #[error("Could not extract nutrition data from model output: {0}")]
    UnrecognizableResponse(String),

    #[error("Vision API request timed out")]
    Timeout,

    #[error("Vision API request failed: {0}")]
    RequestFailed(String),

    #[error("Credential store error: {0}")]
    Storage(String),
}

impl RecognitionError {
    pub fn is_quota(&self) -> bool {
        matches!(self, RecognitionError::QuotaExceeded { .. })
    }

    /// Classify a reqwest failure that happened before any status was received.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RecognitionError::Timeout
        } else {
            RecognitionError::RequestFailed(err.to_string())
        }
    }
}
