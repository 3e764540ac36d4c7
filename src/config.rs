use anyhow::{Context, Result};
use chrono_tz::Tz;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::services::gemini::{GeminiVisionProvider, DEFAULT_GEMINI_MODEL};
use crate::services::openai::{OpenAiVisionProvider, DEFAULT_OPENAI_MODEL, DEFAULT_OPENROUTER_MODEL};
use crate::services::vision::GenerationParams;
use crate::services::VisionProvider;

pub const DEFAULT_CALORIE_GOAL: u32 = 2000;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    OpenRouter,
    Gemini,
}

impl ProviderKind {
    pub fn from_string(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Some(ProviderKind::OpenAi),
            "openrouter" => Some(ProviderKind::OpenRouter),
            "gemini" | "google" => Some(ProviderKind::Gemini),
            _ => None,
        }
    }

    /// Identity used for credential keys and env var names.
    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Gemini => "gemini",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => DEFAULT_OPENAI_MODEL,
            ProviderKind::OpenRouter => DEFAULT_OPENROUTER_MODEL,
            ProviderKind::Gemini => DEFAULT_GEMINI_MODEL,
        }
    }

    fn api_key_env(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::OpenRouter => "OPENROUTER_API_KEY",
            ProviderKind::Gemini => "GEMINI_API_KEY",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub provider: ProviderKind,
    pub model: String,
    pub base_url: Option<String>,
    pub generation: GenerationParams,
    /// Key from the environment, seeded into the store at startup.
    pub api_key: Option<String>,
    pub database_url: String,
    pub upload_dir: PathBuf,
    pub static_dir: Option<PathBuf>,
    pub timezone: Tz,
    pub default_calorie_goal: u32,
    pub request_timeout: Option<Duration>,
    pub max_upload_bytes: usize,
    pub bind_addr: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let provider = match env::var("VISION_PROVIDER") {
            Ok(value) => ProviderKind::from_string(&value)
                .with_context(|| format!("Unknown VISION_PROVIDER '{}' (expected openai, openrouter or gemini)", value))?,
            Err(_) => ProviderKind::OpenAi,
        };

        let model = env::var("VISION_MODEL").unwrap_or_else(|_| provider.default_model().to_string());

        let generation = generation_params(
            env::var("VISION_TEMPERATURE").ok(),
            env::var("VISION_MAX_TOKENS").ok(),
        )?;

        let timezone = match env::var("TIMEZONE") {
            Ok(value) => value
                .parse::<Tz>()
                .map_err(|e| anyhow::anyhow!("Invalid TIMEZONE '{}': {}", value, e))?,
            Err(_) => chrono_tz::UTC,
        };

        let default_calorie_goal = match env::var("DEFAULT_CALORIE_GOAL") {
            Ok(value) => value
                .parse::<u32>()
                .ok()
                .filter(|goal| *goal > 0)
                .with_context(|| format!("DEFAULT_CALORIE_GOAL must be a positive integer, got '{}'", value))?,
            Err(_) => DEFAULT_CALORIE_GOAL,
        };

        let request_timeout = match env::var("REQUEST_TIMEOUT_SECS") {
            Ok(value) => Some(Duration::from_secs(
                value
                    .parse::<u64>()
                    .with_context(|| format!("REQUEST_TIMEOUT_SECS must be a number of seconds, got '{}'", value))?,
            )),
            Err(_) => None,
        };

        let max_upload_bytes = match env::var("MAX_UPLOAD_BYTES") {
            Ok(value) => value
                .parse::<usize>()
                .with_context(|| format!("MAX_UPLOAD_BYTES must be a byte count, got '{}'", value))?,
            Err(_) => DEFAULT_MAX_UPLOAD_BYTES,
        };

        Ok(Self {
            provider,
            model,
            base_url: env::var("VISION_BASE_URL").ok().filter(|url| !url.trim().is_empty()),
            generation,
            api_key: env::var(provider.api_key_env()).ok().filter(|key| !key.trim().is_empty()),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://nutrivision.db?mode=rwc".to_string()),
            upload_dir: PathBuf::from(env::var("UPLOAD_DIR").unwrap_or_else(|_| "data/images".to_string())),
            static_dir: env::var("STATIC_DIR").ok().map(PathBuf::from),
            timezone,
            default_calorie_goal,
            request_timeout,
            max_upload_bytes,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        })
    }

    /// Build the vendor adapter this configuration asks for.
    pub fn vision_provider(&self) -> Arc<dyn VisionProvider> {
        match self.provider {
            ProviderKind::OpenAi | ProviderKind::OpenRouter => {
                let base = if self.provider == ProviderKind::OpenRouter {
                    OpenAiVisionProvider::openrouter(self.model.clone())
                } else {
                    OpenAiVisionProvider::new(self.model.clone())
                };
                let mut provider = base.with_params(self.generation);
                if let Some(url) = &self.base_url {
                    provider = provider.with_base_url(url.clone());
                }
                if let Some(timeout) = self.request_timeout {
                    provider = provider.with_timeout(timeout);
                }
                Arc::new(provider)
            }
            ProviderKind::Gemini => {
                let mut provider = GeminiVisionProvider::new(self.model.clone()).with_params(self.generation);
                if let Some(url) = &self.base_url {
                    provider = provider.with_base_url(url.clone());
                }
                if let Some(timeout) = self.request_timeout {
                    provider = provider.with_timeout(timeout);
                }
                Arc::new(provider)
            }
        }
    }
}

/// Sampling overrides; unset values keep the defaults.
fn generation_params(temperature: Option<String>, max_tokens: Option<String>) -> Result<GenerationParams> {
    let mut params = GenerationParams::default();
    if let Some(value) = temperature {
        params.temperature = value
            .trim()
            .parse::<f32>()
            .ok()
            .filter(|t| (0.0..=2.0).contains(t))
            .with_context(|| format!("VISION_TEMPERATURE must be between 0 and 2, got '{}'", value))?;
    }
    if let Some(value) = max_tokens {
        params.max_tokens = value
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .with_context(|| format!("VISION_MAX_TOKENS must be a positive integer, got '{}'", value))?;
    }
    Ok(params)
}
