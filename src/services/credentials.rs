use anyhow::Result;
use std::collections::HashMap;
use std::sync::Mutex;

/// Small key-value store holding API keys and quota flags.
///
/// The recognition pipeline reads through this once per call and writes to it
/// only to raise the quota flag.
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

pub fn api_key_key(provider: &str) -> String {
    format!("{}_api_key", provider)
}

pub fn quota_flag_key(provider: &str) -> String {
    format!("{}_quota_issue", provider)
}

/// The stored key, with blank values treated as absent.
pub async fn load_api_key(store: &dyn CredentialStore, provider: &str) -> Result<Option<String>> {
    let key = store.get(&api_key_key(provider)).await?;
    Ok(key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty()))
}

pub async fn quota_issue(store: &dyn CredentialStore, provider: &str) -> Result<bool> {
    let flag = store.get(&quota_flag_key(provider)).await?;
    Ok(flag.as_deref() == Some("true"))
}

pub async fn flag_quota_issue(store: &dyn CredentialStore, provider: &str) -> Result<()> {
    store.set(&quota_flag_key(provider), "true").await
}

pub async fn clear_quota_issue(store: &dyn CredentialStore, provider: &str) -> Result<()> {
    store.remove(&quota_flag_key(provider)).await
}

/// Minimal shape check applied when a key is saved; authenticity is the
/// vendor's business.
pub fn validate_api_key_shape(provider: &str, key: &str) -> std::result::Result<(), String> {
    let key = key.trim();
    if key.is_empty() {
        return Err("Please enter a valid API key".to_string());
    }
    if key.chars().any(char::is_whitespace) {
        return Err("API key must not contain whitespace".to_string());
    }
    match provider {
        "openai" | "openrouter" if !key.starts_with("sk-") => Err("API key should start with 'sk-'".to_string()),
        _ => Ok(()),
    }
}

/// In-process store, mostly for tests and one-shot CLI runs.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_key(provider: &str, key: &str) -> Self {
        let store = Self::new();
        store.lock().insert(api_key_key(provider), key.to_string());
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}
