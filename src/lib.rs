pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
#[cfg(feature = "web-server")]
pub mod web; // HTTP API for the food log

pub use config::Config;
pub use models::FoodRecord;
pub use services::{RecognitionError, RecognitionPipeline};
