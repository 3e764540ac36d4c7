use anyhow::Result;
use chrono::Utc;
use chrono_tz::Tz;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::models::{DailySummary, FoodRecord};
use crate::services::credentials::{self, CredentialStore};
use crate::services::encoder::{detect_mime_type, extension_for};
use crate::services::{Database, ImageRegistry, RecognitionError, RecognitionPipeline};

/// Why an upload was refused or failed.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Please upload an image file")]
    NotAnImage,
    #[error("File is too large. Please upload an image smaller than {limit_mb}MB")]
    TooLarge { limit_mb: usize },
    #[error("Failed to store upload: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Recognition(#[from] RecognitionError),
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyStatus {
    pub provider: String,
    pub configured: bool,
    pub quota_issue: bool,
}

/// Application flow around the pipeline: upload checks, the food log,
/// the daily goal and the stored API key.
pub struct FoodLogHandler {
    db: Arc<Database>,
    pipeline: Arc<RecognitionPipeline>,
    upload_dir: PathBuf,
    timezone: Tz,
    max_upload_bytes: usize,
}

impl FoodLogHandler {
    pub fn new(
        db: Arc<Database>,
        pipeline: Arc<RecognitionPipeline>,
        upload_dir: PathBuf,
        timezone: Tz,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            db,
            pipeline,
            upload_dir,
            timezone,
            max_upload_bytes,
        }
    }

    pub fn images(&self) -> &Arc<ImageRegistry> {
        self.pipeline.images()
    }

    /// Validate, store and recognize an uploaded photo.
    ///
    /// The returned record is not logged yet; the caller confirms it with
    /// `add_food` or drops it with `discard_pending`.
    pub async fn analyze_upload(&self, bytes: &[u8], content_type: Option<&str>) -> Result<FoodRecord, UploadError> {
        let declared_image = content_type
            .map(|ct| ct.trim().to_lowercase().starts_with("image/"))
            .unwrap_or(true);
        if !declared_image || bytes.is_empty() {
            return Err(UploadError::NotAnImage);
        }
        if bytes.len() > self.max_upload_bytes {
            log::warn!("📸 Upload rejected: {} bytes over limit {}", bytes.len(), self.max_upload_bytes);
            return Err(UploadError::TooLarge {
                limit_mb: self.max_upload_bytes / (1024 * 1024),
            });
        }

        tokio::fs::create_dir_all(&self.upload_dir).await?;

        let mime_type = detect_mime_type(bytes, Path::new(""));
        let filename = self
            .upload_dir
            .join(format!("img_{}.{}", uuid::Uuid::new_v4(), extension_for(mime_type)));

        log::info!("💾 Writing {} bytes to: {}", bytes.len(), filename.display());
        tokio::fs::write(&filename, bytes).await?;

        match self.pipeline.recognize(&filename).await {
            Ok(record) => Ok(record),
            Err(e) => {
                log::error!("❌ Recognition failed for {}: {}", filename.display(), e);
                if let Err(rm) = tokio::fs::remove_file(&filename).await {
                    log::warn!("⚠️ Could not remove failed upload {}: {}", filename.display(), rm);
                }
                Err(e.into())
            }
        }
    }

    pub async fn add_food(&self, item: &FoodRecord) -> Result<()> {
        if item.name.trim().is_empty() {
            anyhow::bail!("Food name must not be empty");
        }
        for (label, amount) in [
            ("Calories", item.calories),
            ("Protein", item.protein),
            ("Carbs", item.carbs),
            ("Fat", item.fat),
        ] {
            if !amount.is_finite() || amount < 0.0 {
                anyhow::bail!("{} must be a non-negative number", label);
            }
        }

        let image_path = item.image_url.as_deref().and_then(|handle| self.images().resolve(handle));
        self.db.add_food(item, image_path.as_deref()).await?;
        log::info!("🍽️ Added {} ({:.0} kcal) to the food log", item.name, item.calories);
        Ok(())
    }

    /// Deletes the entry, its image handle and its stored upload. The upload
    /// path comes from the log when the handle died with an earlier process.
    pub async fn delete_food(&self, id: &str) -> Result<bool> {
        let stored_path = self.db.image_path(id).await?;
        match self.db.delete_food(id).await? {
            Some(item) => {
                let live_path = item.image_url.as_deref().and_then(|handle| self.images().revoke(handle));
                if let Some(path) = live_path.or(stored_path) {
                    self.remove_upload(&path).await;
                }
                log::info!("🗑️ Removed {} from the food log", item.name);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop a recognized-but-not-added record's image.
    pub async fn discard_pending(&self, handle: &str) -> bool {
        self.release_image(handle).await
    }

    pub async fn history(&self) -> Result<Vec<FoodRecord>> {
        self.db.list_foods().await
    }

    pub async fn today_summary(&self) -> Result<DailySummary> {
        let today = Utc::now().with_timezone(&self.timezone).date_naive();
        self.db.daily_summary(today, self.timezone).await
    }

    pub async fn calorie_goal(&self) -> Result<u32> {
        self.db.calorie_goal().await
    }

    pub async fn set_goal(&self, goal: u32) -> Result<()> {
        self.db.set_calorie_goal(goal).await?;
        log::info!("🎯 Daily calorie goal updated to {}", goal);
        Ok(())
    }

    /// Store a new key for the active provider; a fresh key starts with a
    /// clean quota flag.
    pub async fn save_api_key(&self, key: &str) -> Result<()> {
        let provider = self.pipeline.provider_name().to_string();
        credentials::validate_api_key_shape(&provider, key).map_err(anyhow::Error::msg)?;

        let store: &dyn CredentialStore = &*self.db;
        store.set(&credentials::api_key_key(&provider), key.trim()).await?;
        credentials::clear_quota_issue(store, &provider).await?;
        log::info!("🔑 API key saved for {}", provider);
        Ok(())
    }

    pub async fn clear_api_key(&self) -> Result<()> {
        let provider = self.pipeline.provider_name().to_string();
        let store: &dyn CredentialStore = &*self.db;
        store.remove(&credentials::api_key_key(&provider)).await?;
        credentials::clear_quota_issue(store, &provider).await?;
        log::info!("🔑 API key removed for {}", provider);
        Ok(())
    }

    pub async fn api_key_status(&self) -> Result<ApiKeyStatus> {
        let provider = self.pipeline.provider_name().to_string();
        let store: &dyn CredentialStore = &*self.db;
        Ok(ApiKeyStatus {
            configured: credentials::load_api_key(store, &provider).await?.is_some(),
            quota_issue: credentials::quota_issue(store, &provider).await?,
            provider,
        })
    }

    async fn release_image(&self, handle: &str) -> bool {
        match self.images().revoke(handle) {
            Some(path) => {
                self.remove_upload(&path).await;
                true
            }
            None => false,
        }
    }

    /// Only files this handler wrote are removed; `analyze` runs on user paths.
    async fn remove_upload(&self, path: &Path) {
        if !path.starts_with(&self.upload_dir) {
            return;
        }
        match tokio::fs::remove_file(path).await {
            Ok(()) => log::debug!("🗑️ Removed upload {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("⚠️ Could not remove image {}: {}", path.display(), e),
        }
    }
}
