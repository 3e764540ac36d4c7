pub mod credentials;
pub mod database;
pub mod encoder;
pub mod error;
pub mod extraction;
pub mod gemini; // Google Gemini generateContent
pub mod openai; // OpenAI-compatible chat completions (OpenAI, OpenRouter)
pub mod recognition;
pub mod reference;
pub mod vision;

pub use credentials::{CredentialStore, MemoryCredentialStore};
pub use database::Database;
pub use encoder::{EncodedImage, ImageEncoder, ImageRegistry};
pub use error::RecognitionError;
pub use extraction::{LabeledFieldExtractor, TextExtractor};
pub use gemini::GeminiVisionProvider;
pub use openai::OpenAiVisionProvider;
pub use recognition::RecognitionPipeline;
pub use vision::VisionProvider;
