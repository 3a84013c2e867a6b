use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub path: String,
    pub pool_size: usize,
    /// Upper bound on rows returned for one query
    pub max_rows: usize,
    /// Sample rows per table included in the prompt context
    pub sample_rows: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub backend: String, // "remote" or "ollama"
    pub model: String,   // Model name
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AssistantConfig {
    /// How many times an invalid translation is sent back for correction
    pub max_corrections: usize,
    /// Statements SQLite refuses to compile also go back for correction
    pub correct_prepare_errors: bool,
    pub explain: bool,
    /// History entries shown in the UI panel
    pub history_display: usize,
    /// Sessions unused for this long are dropped with their history
    pub session_idle_secs: u64,
    pub examples: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IngestConfig {
    /// CSV used to build the database file when it does not exist yet
    pub seed_csv: Option<String>,
    pub table: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub llm: LlmConfig,
    pub assistant: AssistantConfig,
    pub ingest: IngestConfig,
}

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// SQLite database file to query
    #[arg(long, value_name = "FILE")]
    pub database: Option<String>,

    /// CSV file to load when the database file does not exist
    #[arg(long, value_name = "FILE")]
    pub seed_csv: Option<String>,
}

const ENV_PREFIX: &str = "SQLASSIST";

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        // Start with default configuration
        let mut config_builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

        // Add configuration from file if specified
        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            // Check for config in default locations
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/sql-assistant/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        // SQLASSIST__LLM__API_KEY and friends
        config_builder = config_builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        );

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        if config.llm.api_key.is_none() {
            config.llm.api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        }

        config.apply_args(args);
        Ok(config)
    }

    // Override with command line args if provided
    fn apply_args(&mut self, args: &CliArgs) {
        if let Some(host) = &args.host {
            self.web.host = host.clone();
        }
        if let Some(port) = args.port {
            self.web.port = port;
        }
        if let Some(database) = &args.database {
            self.database.path = database.clone();
        }
        if let Some(seed_csv) = &args.seed_csv {
            self.ingest.seed_csv = Some(seed_csv.clone());
        }
    }
}

// Default implementation
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                path: "coinmarketcap.sqlite".to_string(),
                pool_size: 4,
                max_rows: 1000,
                sample_rows: 3,
            },
            web: WebConfig {
                host: "127.0.0.1".to_string(),
                port: 8501,
            },
            llm: LlmConfig {
                backend: "remote".to_string(),
                model: "gpt-4o".to_string(),
                api_key: None,
                api_url: None,
                temperature: 0.0,
                max_tokens: 1000,
                timeout_secs: 60,
            },
            assistant: AssistantConfig {
                max_corrections: 2,
                correct_prepare_errors: true,
                explain: true,
                history_display: 5,
                session_idle_secs: 3600,
                examples: vec![
                    "Top 5 coins by market cap in 2021".to_string(),
                    "What was the highest price of Bitcoin in January 2020?".to_string(),
                    "Which coin had the lowest volume in March 2019?".to_string(),
                    "Show the top 3 coins with a market cap over $1B in July 2021".to_string(),
                    "List top 3 coins that dropped more than 10% in a day in 2020".to_string(),
                ],
            },
            ingest: IngestConfig {
                seed_csv: None,
                table: "coins".to_string(),
            },
        }
    }
}
