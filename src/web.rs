use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::handlers::{ApiKeyStatus, FoodLogHandler, UploadError};
use crate::models::FoodRecord;
use crate::services::encoder::detect_mime_type;
use crate::services::RecognitionError;

pub struct AppState {
    pub handler: Arc<FoodLogHandler>,
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    provider: String,
    model: String,
    api_key: ApiKeyStatus,
}

#[derive(Debug, Deserialize)]
struct ApiKeyRequest {
    api_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct GoalBody {
    goal: u32,
}

/// JSON error body: `{"error": "...", "kind": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    fn internal(err: anyhow::Error) -> Self {
        log::error!("❌ Internal error: {:#}", err);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", "Something went wrong, please try again")
    }

    fn bad_request(err: anyhow::Error) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", err.to_string())
    }
}

impl From<RecognitionError> for ApiError {
    fn from(err: RecognitionError) -> Self {
        let (status, kind) = match &err {
            RecognitionError::MissingCredential { .. } => (StatusCode::UNAUTHORIZED, "missing_credential"),
            RecognitionError::EncodingFailure { .. } => (StatusCode::BAD_REQUEST, "encoding_failure"),
            RecognitionError::UpstreamError { .. } => (StatusCode::BAD_GATEWAY, "upstream_error"),
            RecognitionError::QuotaExceeded { .. } => (StatusCode::TOO_MANY_REQUESTS, "quota_exceeded"),
            RecognitionError::MalformedResponse(_) => (StatusCode::BAD_GATEWAY, "malformed_response"),
            RecognitionError::UnrecognizableResponse(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "unrecognizable_response")
            }
            RecognitionError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            RecognitionError::RequestFailed(_) => (StatusCode::BAD_GATEWAY, "request_failed"),
            RecognitionError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
        };
        Self::new(status, kind, err.to_string())
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::NotAnImage => Self::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, "not_an_image", err.to_string()),
            UploadError::TooLarge { .. } => Self::new(StatusCode::PAYLOAD_TOO_LARGE, "too_large", err.to_string()),
            UploadError::Io(e) => Self::internal(e.into()),
            UploadError::Recognition(e) => e.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message, "kind": self.kind });
        (self.status, Json(body)).into_response()
    }
}

pub fn create_router(state: AppState, max_upload_bytes: usize, static_dir: Option<PathBuf>) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/key", put(save_api_key).delete(clear_api_key))
        .route(
            "/recognize",
            post(recognize).layer(DefaultBodyLimit::max(max_upload_bytes.saturating_add(1))),
        )
        .route("/foods", get(list_foods).post(add_food))
        .route("/foods/:id", delete(delete_food))
        .route("/goal", get(get_goal).put(set_goal))
        .route("/summary", get(get_summary))
        .route("/images/*handle", get(get_image).delete(discard_image));

    let router = Router::new()
        .route("/health", get(health_check))
        .nest("/api", api)
        .with_state(Arc::new(state));

    match static_dir {
        Some(dir) if dir.is_dir() => {
            log::info!("📁 Serving frontend from {}", dir.display());
            router.fallback_service(tower_http::services::ServeDir::new(dir))
        }
        _ => router.route("/", get(root_handler)),
    }
}

async fn root_handler() -> &'static str {
    "NutriVision API - POST a food photo to /api/recognize"
}

async fn health_check() -> &'static str {
    "OK"
}

async fn get_status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, ApiError> {
    let api_key = state.handler.api_key_status().await.map_err(ApiError::internal)?;
    Ok(Json(StatusResponse {
        provider: state.provider.clone(),
        model: state.model.clone(),
        api_key,
    }))
}

async fn save_api_key(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ApiKeyRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .handler
        .save_api_key(&body.api_key)
        .await
        .map_err(ApiError::bad_request)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_api_key(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.handler.clear_api_key().await.map_err(ApiError::internal)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn recognize(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<FoodRecord>, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());

    log::info!("📨 Recognition request: {} bytes ({:?})", body.len(), content_type);
    let record = state.handler.analyze_upload(&body, content_type).await?;
    Ok(Json(record))
}

async fn list_foods(State(state): State<Arc<AppState>>) -> Result<Json<Vec<FoodRecord>>, ApiError> {
    let items = state.handler.history().await.map_err(ApiError::internal)?;
    Ok(Json(items))
}

async fn add_food(
    State(state): State<Arc<AppState>>,
    Json(item): Json<FoodRecord>,
) -> Result<(StatusCode, Json<FoodRecord>), ApiError> {
    state.handler.add_food(&item).await.map_err(ApiError::bad_request)?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn delete_food(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    let removed = state.handler.delete_food(&id).await.map_err(ApiError::internal)?;
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::new(StatusCode::NOT_FOUND, "not_found", format!("No food item with id {}", id)))
    }
}

async fn get_goal(State(state): State<Arc<AppState>>) -> Result<Json<GoalBody>, ApiError> {
    let goal = state.handler.calorie_goal().await.map_err(ApiError::internal)?;
    Ok(Json(GoalBody { goal }))
}

async fn set_goal(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GoalBody>,
) -> Result<Json<GoalBody>, ApiError> {
    state.handler.set_goal(body.goal).await.map_err(ApiError::bad_request)?;
    Ok(Json(body))
}

async fn get_summary(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let summary = state.handler.today_summary().await.map_err(ApiError::internal)?;
    log::debug!("📊 {}", summary);
    Ok(Json(summary))
}

async fn get_image(State(state): State<Arc<AppState>>, Path(handle): Path<String>) -> Result<Response, ApiError> {
    let handle = handle.trim_start_matches('/');
    let path = state
        .handler
        .images()
        .resolve(handle)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "not_found", "Image handle is not live"))?;

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| ApiError::internal(anyhow::Error::from(e)))?;
    let mime_type = detect_mime_type(&bytes, &path);

    Ok(([(header::CONTENT_TYPE, mime_type)], bytes).into_response())
}

async fn discard_image(State(state): State<Arc<AppState>>, Path(handle): Path<String>) -> StatusCode {
    if state.handler.discard_pending(handle.trim_start_matches('/')).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{Database, EncodedImage, ImageRegistry, RecognitionPipeline, VisionProvider};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    struct QuotaProvider;

    #[async_trait::async_trait]
    impl VisionProvider for QuotaProvider {
        fn name(&self) -> &str {
            "openai"
        }

        fn model(&self) -> &str {
            "test-model"
        }

        async fn recognize(&self, _image: &EncodedImage, _api_key: &str) -> Result<String, RecognitionError> {
            Err(RecognitionError::QuotaExceeded {
                message: "You exceeded your current quota".to_string(),
            })
        }
    }

    async fn app(dir: &tempfile::TempDir) -> Router {
        let db = Arc::new(Database::new("sqlite::memory:", 2000).await.unwrap());
        let pipeline = Arc::new(RecognitionPipeline::new(
            Arc::new(QuotaProvider),
            db.clone(),
            Arc::new(ImageRegistry::new()),
        ));
        let handler = Arc::new(FoodLogHandler::new(db, pipeline, dir.path().to_path_buf(), chrono_tz::UTC, 1024));
        let state = AppState {
            handler,
            provider: "openai".to_string(),
            model: "test-model".to_string(),
        };
        create_router(state, 1024, None)
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_recognize_without_key_is_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(&dir)
            .await
            .oneshot(
                Request::post("/api/recognize")
                    .header("content-type", "image/jpeg")
                    .body(Body::from(vec![0xFF, 0xD8, 0xFF]))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["kind"], "missing_credential");
    }

    #[tokio::test]
    async fn test_quota_error_maps_to_429_and_status_reports_flag() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir).await;

        let response = app
            .clone()
            .oneshot(
                Request::put("/api/key")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"api_key":"sk-test"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/recognize")
                    .header("content-type", "image/jpeg")
                    .body(Body::from(vec![0xFF, 0xD8, 0xFF]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(json_body(response).await["kind"], "quota_exceeded");

        let response = app
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status = json_body(response).await;
        assert_eq!(status["api_key"]["configured"], true);
        assert_eq!(status["api_key"]["quota_issue"], true);
    }

    #[tokio::test]
    async fn test_food_log_routes() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir).await;

        let item = serde_json::json!({
            "id": "abc123",
            "name": "Garden Salad",
            "calories": 120,
            "protein": 3,
            "carbs": 10,
            "fat": 7,
            "imageUrl": null,
            "timestamp": chrono::Utc::now().to_rfc3339()
        });

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/foods")
                    .header("content-type", "application/json")
                    .body(Body::from(item.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(Request::get("/api/summary").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let summary = json_body(response).await;
        assert_eq!(summary["total_calories"], 120.0);
        assert_eq!(summary["progress_percentage"], 6);
        assert_eq!(summary["remaining_calories"], 1880.0);

        let response = app
            .clone()
            .oneshot(Request::delete("/api/foods/abc123").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(Request::delete("/api/foods/abc123").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_goal_routes() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir).await;

        let response = app
            .clone()
            .oneshot(
                Request::put("/api/goal")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"goal":0}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(
                Request::put("/api/goal")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"goal":1800}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/api/goal").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(response).await["goal"], 1800);
    }

    #[tokio::test]
    async fn test_unknown_image_handle() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(&dir)
            .await
            .oneshot(Request::get("/api/images/blob:nutrivision/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
