use anyhow::{Context, Result};
use dotenv::dotenv;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use nutrivision::handlers::FoodLogHandler;
use nutrivision::services::credentials::{self, CredentialStore};
use nutrivision::services::{Database, ImageRegistry, RecognitionPipeline};
use nutrivision::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::init();

    // Load environment variables
    dotenv().ok();

    let config = Config::from_env()?;

    let db = Arc::new(Database::new(&config.database_url, config.default_calorie_goal).await?);
    log::info!("✅ SQLite database initialized ({})", config.database_url);

    // A key in the environment wins over whatever was saved before
    if let Some(key) = &config.api_key {
        db.set(&credentials::api_key_key(config.provider.id()), key).await?;
        credentials::clear_quota_issue(&*db, config.provider.id()).await?;
        log::info!("🔑 Using {} API key from environment", config.provider.id());
    }

    let provider = config.vision_provider();
    log::info!("✅ Vision provider: {} ({})", provider.name(), provider.model());

    let images = Arc::new(ImageRegistry::new());
    let pipeline = Arc::new(RecognitionPipeline::new(provider, db.clone(), images));

    let args: Vec<String> = env::args().skip(1).collect();
    if let Some(command) = args.first() {
        return match command.as_str() {
            "analyze" => {
                let path = args
                    .get(1)
                    .map(PathBuf::from)
                    .context("Usage: nutrivision analyze <image>")?;
                analyze(&pipeline, path).await
            }
            other => anyhow::bail!("Unknown command '{}'. Usage: nutrivision [analyze <image>]", other),
        };
    }

    let handler = Arc::new(FoodLogHandler::new(
        db.clone(),
        pipeline.clone(),
        config.upload_dir.clone(),
        config.timezone,
        config.max_upload_bytes,
    ));
    log::info!("✅ Food log handler initialized");

    #[cfg(feature = "web-server")]
    {
        use nutrivision::web::{create_router, AppState};

        let state = AppState {
            handler: handler.clone(),
            provider: config.provider.id().to_string(),
            model: config.model.clone(),
        };
        let app = create_router(state, config.max_upload_bytes, config.static_dir.clone());

        let listener = tokio::net::TcpListener::bind(&config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
        log::info!("🌐 Web server starting on {}", config.bind_addr);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("❌ Web server stopped: {}", e);
            }
        });

        log::info!("✅ Web server started");
    }

    #[cfg(not(feature = "web-server"))]
    {
        let _ = handler;
        log::warn!("⚠️ Built without the web-server feature; only `analyze` is available");
    }

    log::info!("🎉 NutriVision is ready!");

    println!("\n🍽️ NutriVision is running");
    println!("🌐 API: http://{}", config.bind_addr);
    println!("   POST /api/recognize   - food photo in, nutrition estimate out");
    println!("   GET  /api/summary     - today's calories against your goal");
    println!("   PUT  /api/key         - save your {} API key", config.provider.id());
    println!("\n🛑 Press Ctrl+C to stop\n");

    // Keep running
    tokio::signal::ctrl_c().await?;

    log::info!("🛑 Shutting down...");

    Ok(())
}

/// One-shot recognition from the command line; prints the record as JSON.
async fn analyze(pipeline: &RecognitionPipeline, path: PathBuf) -> Result<()> {
    log::info!("📸 Analyzing {}", path.display());
    let record = pipeline.recognize(&path).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
