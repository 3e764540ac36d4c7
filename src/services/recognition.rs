use chrono::Utc;
use std::path::Path;
use std::sync::Arc;

use super::credentials::{self, CredentialStore};
use super::encoder::{ImageEncoder, ImageRegistry};
use super::extraction::{self, LabeledFieldExtractor, TextExtractor};
use super::reference;
use super::{RecognitionError, VisionProvider};
use crate::models::FoodRecord;

/// Turns one image into one `FoodRecord`, or a classified failure.
///
/// Single pass, no retries, no caching. The only state it writes is the
/// provider's quota flag in the credential store.
pub struct RecognitionPipeline {
    provider: Arc<dyn VisionProvider>,
    credentials: Arc<dyn CredentialStore>,
    encoder: ImageEncoder,
    extractor: Box<dyn TextExtractor>,
}

impl RecognitionPipeline {
    pub fn new(
        provider: Arc<dyn VisionProvider>,
        credentials: Arc<dyn CredentialStore>,
        images: Arc<ImageRegistry>,
    ) -> Self {
        Self {
            provider,
            credentials,
            encoder: ImageEncoder::new(images),
            extractor: Box::new(LabeledFieldExtractor::new()),
        }
    }

    pub fn with_extractor(mut self, extractor: Box<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn images(&self) -> &Arc<ImageRegistry> {
        self.encoder.registry()
    }

    pub async fn recognize(&self, image_path: &Path) -> Result<FoodRecord, RecognitionError> {
        let provider = self.provider.name().to_string();

        let api_key = credentials::load_api_key(self.credentials.as_ref(), &provider)
            .await
            .map_err(|e| RecognitionError::Storage(e.to_string()))?
            .ok_or_else(|| RecognitionError::MissingCredential {
                provider: provider.clone(),
            })?;

        let quota_seen = credentials::quota_issue(self.credentials.as_ref(), &provider)
            .await
            .map_err(|e| RecognitionError::Storage(e.to_string()))?;
        if quota_seen {
            log::warn!("⚠️ A quota issue was already seen for {}, trying anyway", provider);
        }

        let image = self.encoder.encode(image_path).await?;

        match self.dispatch(&provider, &image, &api_key).await {
            Ok(record) => Ok(FoodRecord {
                image_url: Some(image.display_ref),
                ..record
            }),
            Err(e) => {
                self.encoder.registry().revoke(&image.display_ref);
                Err(e)
            }
        }
    }

    async fn dispatch(
        &self,
        provider: &str,
        image: &super::EncodedImage,
        api_key: &str,
    ) -> Result<FoodRecord, RecognitionError> {
        let text = match self.provider.recognize(image, api_key).await {
            Ok(text) => text,
            Err(e) if e.is_quota() => {
                log::error!("🚫 Quota exceeded for {}: {}", provider, e);
                if let Err(store_err) = credentials::flag_quota_issue(self.credentials.as_ref(), provider).await {
                    log::error!("❌ Failed to persist quota flag for {}: {}", provider, store_err);
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let facts = extraction::normalize(&text, self.extractor.as_ref())?;
        let repaired = reference::repair(facts);

        let record = FoodRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name: repaired.name,
            calories: repaired.calories,
            protein: repaired.protein,
            carbs: repaired.carbs,
            fat: repaired.fat,
            image_url: None,
            timestamp: Utc::now(),
        };

        log::info!("✅ Identified {} ({:.0} kcal)", record.name, record.calories);
        Ok(record)
    }
}
