use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;

pub use config::ConfigError;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub control_plane: ControlPlaneSettings,
    pub store: StoreSettings,
    pub cache: CacheSettings,
    pub communicator: CommunicatorSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    pub gateway_port: u16,
    pub communicator_port: u16,
    pub environment: String,
    pub upstream_timeout_seconds: u64,
}

impl ApplicationSettings {
    /// Edge mode is active when the gateway runs behind the rewriting edge
    /// proxy, which only fronts the production deployment.
    pub fn edge_mode(&self) -> bool {
        self.environment == "production"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ControlPlaneSettings {
    pub base_url: String,
    pub api_token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreSettings {
    pub redis_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    pub tenant_config_ttl_seconds: u64,
    pub usage_ceiling: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CommunicatorSettings {
    pub secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
    pub format: String,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("application.host", "127.0.0.1")?
            .set_default("application.gateway_port", 9090)?
            .set_default("application.communicator_port", 9050)?
            .set_default("application.environment", environment.clone())?
            .set_default("application.upstream_timeout_seconds", 30)?
            .set_default("control_plane.base_url", "http://localhost:8080")?
            .set_default("control_plane.api_token", "")?
            .set_default("store.redis_url", "redis://localhost:6379")?
            .set_default("cache.tenant_config_ttl_seconds", 3600)?
            .set_default("cache.usage_ceiling", 100_000)?
            .set_default("communicator.secret", "")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            // Add configuration file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{environment}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix
            .add_source(Environment::with_prefix("TOLLGATE").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_can_be_loaded() {
        let settings = Settings::new();
        assert!(settings.is_ok());
    }

    #[test]
    fn defaults_bind_locally() {
        let settings = Settings::new().unwrap();
        assert_eq!(settings.application.host, "127.0.0.1");
        assert_ne!(
            settings.application.gateway_port,
            settings.application.communicator_port
        );
    }

    #[test]
    fn logging_defaults_feed_the_subscriber() {
        let settings = Settings::new().unwrap();
        assert_eq!(settings.logging.level, "info");
        assert_eq!(settings.logging.format, "json");
    }

    #[test]
    fn edge_mode_tracks_the_environment() {
        let mut settings = Settings::new().unwrap();
        settings.application.environment = "development".to_string();
        assert!(!settings.application.edge_mode());
        settings.application.environment = "production".to_string();
        assert!(settings.application.edge_mode());
    }
}
