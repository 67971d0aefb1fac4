//! fEMR On-Chain core library
//!
//! Clinic management service: patient intake, encounter recording, the
//! campaign formulary and the campaign-scoped CSV export pipeline.

pub mod access;
pub mod api;
pub mod audit;
pub mod db;
pub mod error;
pub mod export;
pub mod inventory;
pub mod jobs;
pub mod models;
pub mod notify;
pub mod storage;
pub mod units;

pub use error::{AppError, AppResult};

/// Application configuration
pub mod config {
    use serde::Deserialize;
    use url::Url;

    #[derive(Debug, Clone, Deserialize)]
    pub struct Settings {
        pub server: ServerConfig,
        pub database: DatabaseConfig,
        pub storage: StorageConfig,
        pub auth: AuthConfig,
        pub jobs: JobsConfig,
        #[serde(default)]
        pub mail: Option<MailConfig>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct ServerConfig {
        pub host: String,
        pub port: u16,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct DatabaseConfig {
        pub url: String,
        pub max_connections: u32,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct StorageConfig {
        pub export_dir: String,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct AuthConfig {
        pub jwt_secret: String,
        pub token_ttl_minutes: i64,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct JobsConfig {
        pub export_workers: usize,
        pub queue_capacity: usize,
        pub encounter_close_interval_secs: u64,
    }

    /// Outbound mail relay. Email notification is skipped unless both
    /// `endpoint` and `from` are set.
    #[derive(Debug, Clone, Deserialize)]
    pub struct MailConfig {
        pub endpoint: Option<Url>,
        #[serde(default)]
        pub from: String,
        #[serde(default)]
        pub api_key: Option<String>,
    }

    impl MailConfig {
        pub fn is_configured(&self) -> bool {
            self.endpoint.is_some() && !self.from.trim().is_empty()
        }
    }

    /// Load configuration from defaults, `config/` files and `FEMR_*` variables
    pub fn load_config() -> Result<Settings, config::ConfigError> {
        let env = std::env::var("FEMR_ENV").unwrap_or_else(|_| "development".into());

        config::Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("database.url", "sqlite://femr.db")?
            .set_default("database.max_connections", 5)?
            .set_default("storage.export_dir", "exports")?
            .set_default("auth.jwt_secret", "change-me-in-production")?
            .set_default("auth.token_ttl_minutes", 480)?
            .set_default("jobs.export_workers", 2)?
            .set_default("jobs.queue_capacity", 64)?
            .set_default("jobs.encounter_close_interval_secs", 3600)?
            .add_source(config::File::with_name("config/default").required(false))
            // Override with environment-specific settings
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                config::Environment::with_prefix("FEMR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

}
