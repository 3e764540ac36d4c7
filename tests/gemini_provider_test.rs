use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use nutrivision::services::credentials;
use nutrivision::services::vision::GenerationParams;
use nutrivision::services::{GeminiVisionProvider, ImageRegistry, MemoryCredentialStore, RecognitionPipeline};
use nutrivision::RecognitionError;

const GENERATE_PATH: &str = "/models/gemini-1.5-flash:generateContent";

fn meal_photo() -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
    file.write_all(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]).unwrap();
    file
}

fn pipeline(server: &MockServer, store: Arc<MemoryCredentialStore>) -> RecognitionPipeline {
    let provider = GeminiVisionProvider::new("gemini-1.5-flash".to_string()).with_base_url(server.uri());
    RecognitionPipeline::new(Arc::new(provider), store, Arc::new(ImageRegistry::new()))
}

#[tokio::test]
async fn joins_text_parts_of_first_candidate() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(header("x-goog-api-key", "AIza-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        { "text": "{\"name\": \"Banana\", \"calories\": 105," },
                        { "text": " \"protein\": 1.3, \"carbs\": 27, \"fat\": 0.4}" }
                    ]
                },
                "finishReason": "STOP"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::with_api_key("gemini", "AIza-test"));
    let photo = meal_photo();

    let record = pipeline(&server, store).recognize(photo.path()).await.unwrap();

    assert_eq!(record.name, "Banana");
    assert_eq!(record.calories, 105.0);
    assert_eq!(record.carbs, 27.0);
}

#[tokio::test]
async fn resource_exhausted_is_quota() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {
                "code": 429,
                "message": "Resource has been exhausted (e.g. check quota).",
                "status": "RESOURCE_EXHAUSTED"
            }
        })))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::with_api_key("gemini", "AIza-test"));
    let photo = meal_photo();

    let err = pipeline(&server, store.clone()).recognize(photo.path()).await.unwrap_err();

    assert!(matches!(err, RecognitionError::QuotaExceeded { .. }));
    assert!(credentials::quota_issue(&*store, "gemini").await.unwrap());
}

#[tokio::test]
async fn invalid_key_is_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "code": 400,
                "message": "API key not valid. Please pass a valid API key.",
                "status": "INVALID_ARGUMENT"
            }
        })))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::with_api_key("gemini", "AIza-bad"));
    let photo = meal_photo();

    let err = pipeline(&server, store).recognize(photo.path()).await.unwrap_err();
    assert!(matches!(err, RecognitionError::UpstreamError { status: 400, .. }));
}

#[tokio::test]
async fn blocked_prompt_without_candidates_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "promptFeedback": { "blockReason": "SAFETY" }
        })))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::with_api_key("gemini", "AIza-test"));
    let photo = meal_photo();

    let err = pipeline(&server, store).recognize(photo.path()).await.unwrap_err();
    assert!(matches!(err, RecognitionError::MalformedResponse(_)));
}

#[tokio::test]
async fn generation_params_reach_generation_config() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(body_partial_json(json!({
            "generation_config": { "max_output_tokens": 64, "candidate_count": 1 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "content": { "parts": [{ "text": "{\"name\": \"Orange\", \"calories\": 62}" }] } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = GeminiVisionProvider::new("gemini-1.5-flash".to_string())
        .with_base_url(server.uri())
        .with_params(GenerationParams {
            temperature: 0.1,
            max_tokens: 64,
        });
    let store = Arc::new(MemoryCredentialStore::with_api_key("gemini", "AIza-test"));
    let pipeline = RecognitionPipeline::new(Arc::new(provider), store, Arc::new(ImageRegistry::new()));
    let photo = meal_photo();

    let record = pipeline.recognize(photo.path()).await.unwrap();
    assert_eq!(record.calories, 62.0);
}
