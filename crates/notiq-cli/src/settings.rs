use std::env;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use notiq_core::DispatcherConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub demo: DemoConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DemoConfig {
    /// Enqueue sample notifications on startup.
    #[serde(default = "default_true")]
    pub seed: bool,
    /// Retryable failures the demo handler reports before succeeding.
    #[serde(default = "default_failures")]
    pub failures: u32,
}

fn default_database_url() -> String {
    "sqlite://notiq.db".to_string()
}

fn default_true() -> bool {
    true
}

fn default_failures() -> u32 {
    1
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            seed: default_true(),
            failures: default_failures(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("database.url", default_database_url())?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // NOTIQ_DATABASE__URL, NOTIQ_DISPATCHER__BATCH_SIZE, ...
            .add_source(
                Environment::with_prefix("NOTIQ")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}
