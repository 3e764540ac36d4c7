use base64::{engine::general_purpose, Engine};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::RecognitionError;

const HANDLE_PREFIX: &str = "blob:nutrivision/";

/// An image ready to be embedded in a vision request.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub data: String,  // standard base64, no line breaks
    pub mime_type: String,
    pub display_ref: String,
    pub byte_len: usize,
}

impl EncodedImage {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        general_purpose::STANDARD.decode(&self.data)
    }
}

/// Process-local table of revocable display handles for uploaded images.
///
/// A handle only lives as long as the process; whoever holds the record that
/// carries it is responsible for calling `revoke` once the record is gone.
#[derive(Debug, Default)]
pub struct ImageRegistry {
    entries: Mutex<HashMap<String, PathBuf>>,
}

impl ImageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, path: &Path) -> String {
        let handle = format!("{}{}", HANDLE_PREFIX, uuid::Uuid::new_v4());
        self.lock().insert(handle.clone(), path.to_path_buf());
        handle
    }

    pub fn resolve(&self, handle: &str) -> Option<PathBuf> {
        self.lock().get(&normalize_handle(handle)).cloned()
    }

    /// Returns the path the handle pointed to, if it was still live.
    pub fn revoke(&self, handle: &str) -> Option<PathBuf> {
        let removed = self.lock().remove(&normalize_handle(handle));
        if removed.is_some() {
            log::debug!("🗑️ Revoked image handle {}", handle);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PathBuf>> {
        // A poisoned map is still a valid map.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Accepts both `blob:nutrivision/<id>` and the bare `<id>` used in URLs.
fn normalize_handle(handle: &str) -> String {
    if handle.starts_with(HANDLE_PREFIX) {
        handle.to_string()
    } else {
        format!("{}{}", HANDLE_PREFIX, handle)
    }
}

pub struct ImageEncoder {
    registry: Arc<ImageRegistry>,
}

impl ImageEncoder {
    pub fn new(registry: Arc<ImageRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ImageRegistry> {
        &self.registry
    }

    pub async fn encode(&self, path: &Path) -> Result<EncodedImage, RecognitionError> {
        log::debug!("📸 Encoding image: {}", path.display());

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| RecognitionError::EncodingFailure {
                path: path.to_path_buf(),
                source,
            })?;

        let data = general_purpose::STANDARD.encode(&bytes);
        let mime_type = detect_mime_type(&bytes, path).to_string();

        log::debug!("📊 Image file size: {} bytes", bytes.len());
        log::debug!("🔄 Base64 encoded size: {} bytes", data.len());

        Ok(EncodedImage {
            data,
            mime_type,
            display_ref: self.registry.register(path),
            byte_len: bytes.len(),
        })
    }
}

/// Magic bytes first, then the file extension, then JPEG.
pub fn detect_mime_type(bytes: &[u8], path: &Path) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        return "image/png";
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return "image/jpeg";
    }
    if bytes.starts_with(b"GIF8") {
        return "image/gif";
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return "image/webp";
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

/// File extension matching a MIME type, used when saving uploads.
pub fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "jpg",
    }
}
