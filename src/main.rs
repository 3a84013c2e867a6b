use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

mod config;
mod db;
mod error;
mod ingest;
mod llm;
mod pipeline;
mod sql;
mod util;
mod web;

use crate::config::{AppConfig, CliArgs};
use crate::db::Database;
use crate::ingest::IngestManager;
use crate::llm::LlmManager;
use crate::pipeline::{Assistant, AssistantSettings};
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_tracing();

    // Parse command line arguments
    let args = CliArgs::parse();

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Build the data file from the seed CSV on first start
    let db_path = Path::new(&config.database.path);
    if !db_path.exists() {
        if let Some(seed) = &config.ingest.seed_csv {
            info!("Database {} not found, loading {}", db_path.display(), seed);
            IngestManager::new().create_database(db_path, Path::new(seed), &config.ingest.table)?;
        }
    }

    let db = match Database::connect(db_path, config.database.pool_size as u32) {
        Ok(db) => db,
        Err(e) => {
            error!("Cannot start without the database: {}", e);
            return Err(e.into());
        }
    };

    info!("Loading schema");
    let schema = match db.schema().await {
        Ok(schema) => schema,
        Err(e) => {
            error!("Cannot answer questions without a schema: {}", e);
            return Err(e.into());
        }
    };
    let schema_context = db.table_context(&schema, config.database.sample_rows).await?;
    info!("Schema loaded: {} table(s)", schema.len());

    // Initialize LLM manager
    info!("Initializing LLM manager with backend: {}", config.llm.backend);
    let llm = Arc::new(LlmManager::new(&config.llm)?);

    let assistant = Assistant::new(
        db,
        llm,
        schema,
        schema_context,
        AssistantSettings::from_config(&config),
    );
    let app_state = Arc::new(AppState::new(config.clone(), assistant));

    // Start the web server
    info!("Starting SQL assistant on {}:{}", config.web.host, config.web.port);
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
