use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for postqueue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            scheduler: SchedulerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &str) -> Result<Self, crate::Error> {
        use crate::Error;

        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, crate::Error> {
        // Try to load from POSTQUEUE_CONFIG env var first
        if let Ok(config_path) = std::env::var("POSTQUEUE_CONFIG") {
            return Self::load(&config_path);
        }

        // Try default locations
        let default_paths = [
            "./config/default.toml",
            "./config/production.toml",
            "/etc/postqueue/config.toml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        use crate::Error;

        if self.server.port == 0 {
            return Err(Error::Config("Invalid server port".to_string()));
        }

        if self.database.pool_size == 0 {
            return Err(Error::Config("Database pool size must be > 0".to_string()));
        }

        if self.scheduler.check_interval_secs == 0 {
            return Err(Error::Config(
                "Scheduler check interval must be > 0".to_string(),
            ));
        }

        match self.storage.backend.as_str() {
            "mysql" | "file" => {}
            other => {
                return Err(Error::Config(format!(
                    "Unknown storage backend '{}' (expected 'mysql' or 'file')",
                    other
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins; empty means allow any
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    #[serde(default = "default_db_user")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_db_name")]
    pub database: String,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            user: default_db_user(),
            password: String::new(),
            database: default_db_name(),
            pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl DatabaseConfig {
    /// Build the MySQL connection URL
    pub fn url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage backend: "mysql" (production) or "file"
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Directory for the file backend
    #[serde(default = "default_storage_dir")]
    pub dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            dir: default_storage_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between scheduler ticks
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Minimum seconds between storage reloads inside the loop
    #[serde(default = "default_reload_interval")]
    pub reload_interval_secs: u64,

    /// Quiet period after a save before a reload is allowed
    #[serde(default = "default_reload_check_delay")]
    pub reload_check_delay_secs: u64,

    /// Pause after a dispatch before the next tick sleep
    #[serde(default = "default_post_processing_delay")]
    pub post_processing_delay_secs: u64,

    /// Minutes a job may stay RUNNING before it counts as stuck
    #[serde(default = "default_max_running_minutes")]
    pub max_running_minutes: i64,

    /// Default retry budget for new jobs
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Skip ready jobs overdue by more than this many hours (None = no cap)
    #[serde(default)]
    pub overdue_threshold_hours: Option<i64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            reload_interval_secs: default_reload_interval(),
            reload_check_delay_secs: default_reload_check_delay(),
            post_processing_delay_secs: default_post_processing_delay(),
            max_running_minutes: default_max_running_minutes(),
            max_retries: default_max_retries(),
            overdue_threshold_hours: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON log lines instead of the human format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    3306
}

fn default_db_user() -> String {
    "postqueue".to_string()
}

fn default_db_name() -> String {
    "postqueue".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_backend() -> String {
    "mysql".to_string()
}

fn default_storage_dir() -> String {
    "./jobs".to_string()
}

fn default_check_interval() -> u64 {
    10
}

fn default_reload_interval() -> u64 {
    30
}

fn default_reload_check_delay() -> u64 {
    2
}

fn default_post_processing_delay() -> u64 {
    4
}

fn default_max_running_minutes() -> i64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.check_interval_secs, 10);
        assert_eq!(config.scheduler.reload_check_delay_secs, 2);
        assert_eq!(config.scheduler.max_running_minutes, 30);
        assert_eq!(config.scheduler.overdue_threshold_hours, None);
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
            [storage]
            backend = "file"
            dir = "/tmp/pq-jobs"

            [scheduler]
            check_interval_secs = 5
            overdue_threshold_hours = 6
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.storage.backend, "file");
        assert_eq!(config.scheduler.check_interval_secs, 5);
        assert_eq!(config.scheduler.overdue_threshold_hours, Some(6));
        // Untouched sections fall back to defaults
        assert_eq!(config.database.port, 3306);
    }

    #[test]
    fn test_invalid_backend_rejected() {
        let mut config = Config::default();
        config.storage.backend = "redis".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_url() {
        let db = DatabaseConfig {
            host: "db.internal".to_string(),
            port: 3307,
            user: "svc".to_string(),
            password: "pw".to_string(),
            database: "jobs".to_string(),
            ..DatabaseConfig::default()
        };
        assert_eq!(db.url(), "mysql://svc:pw@db.internal:3307/jobs");
    }
}
