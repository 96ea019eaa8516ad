//! Configuration for the reconciler

use beacon_dispatch::DispatchConfig;
use beacon_registry::RegistryConfig;
use serde::{Deserialize, Serialize};

/// Prefix of environment overrides, e.g. `BEACON_REGISTRY__ACCESS_TOKEN`.
pub const ENV_PREFIX: &str = "BEACON";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory engine (development and tests)
    #[default]
    Memory,

    /// PostgreSQL engine; requires the `postgres` feature.
    Postgres {
        url: String,

        #[serde(default = "default_pool_size")]
        max_connections: u32,

        #[serde(default = "default_connection_timeout")]
        connect_timeout_secs: u64,
    },
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

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

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ReconcileConfig {
    /// Load configuration: defaults, then the optional file, then `BEACON_*`
    /// environment variables (nested keys separated by `__`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&ReconcileConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Parse a TOML document layered over the defaults.
    pub fn from_toml(document: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Config::try_from(&ReconcileConfig::default())?)
            .add_source(config::File::from_str(document, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ReconcileConfig::default();
        assert!(matches!(config.storage, StorageConfig::Memory));
        assert_eq!(
            config.registry.endpoint,
            "https://proximitybeacon.googleapis.com/v1beta1"
        );
        assert_eq!(config.registry.namespaced_type, "com.google.nearby/en");
        assert_eq!(config.registry.short_link_base, "https://our.sharecro.ws/bkn/");
        assert_eq!(config.registry.short_suffix_len, 6);
        assert_eq!(config.dispatch.max_in_flight, None);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_without_file_keeps_defaults() {
        let config = ReconcileConfig::load(None).unwrap();
        assert!(matches!(config.storage, StorageConfig::Memory));
        assert_eq!(config.registry.request_timeout_secs, 30);
    }

    #[test]
    fn test_toml_overrides() {
        let config = ReconcileConfig::from_toml(
            r#"
            [storage]
            type = "postgres"
            url = "postgres://localhost/beacons"

            [registry]
            access_token = "secret"
            short_suffix_len = 4

            [dispatch]
            max_in_flight = 64

            [logging]
            json = true
            "#,
        )
        .unwrap();

        match config.storage {
            StorageConfig::Postgres {
                url,
                max_connections,
                connect_timeout_secs,
            } => {
                assert_eq!(url, "postgres://localhost/beacons");
                assert_eq!(max_connections, 10);
                assert_eq!(connect_timeout_secs, 5);
            }
            other => panic!("unexpected storage config: {other:?}"),
        }
        assert_eq!(config.registry.access_token.as_deref(), Some("secret"));
        assert_eq!(config.registry.short_suffix_len, 4);
        assert_eq!(config.registry.namespaced_type, "com.google.nearby/en");
        assert_eq!(config.dispatch.max_in_flight, Some(64));
        assert!(config.logging.json);
    }
}
