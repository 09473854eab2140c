use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Command-line flags. Only flags the user actually passed are merged over
/// the file and environment layers.
#[derive(Parser, Serialize, Debug, Default)]
#[command(name = "campus-relay", version, about = "Campus presence and chat relay")]
pub struct Cli {
    /// Path to TOML config file
    #[arg(long, default_value = "./relay.toml")]
    #[serde(skip)]
    pub config: String,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip)]
    pub generate_config: bool,

    /// Port to listen on
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Data directory for persistent state (DB, generated JWT secret)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Storage backend: "sqlite" or "memory"
    #[arg(long, value_enum)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_backend: Option<StorageBackend>,
}

/// Resolved relay configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub json_logs: bool,
    /// Data directory for the SQLite database and generated JWT secret
    pub data_dir: String,
    pub storage_backend: StorageBackend,
    /// HS256 secret shared with the platform backend that issues JWTs
    #[serde(default)]
    pub jwt_secret: Option<String>,
    /// Hub tuning (loaded from [hub] section in TOML)
    #[serde(default)]
    pub hub: HubConfig,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

/// Presence hub tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Seconds between unconditional online-user broadcasts (default: 10)
    #[serde(default = "default_presence_interval")]
    pub presence_interval_secs: u64,

    /// Deadline for each persistence call in milliseconds (default: 5000)
    #[serde(default = "default_persistence_timeout")]
    pub persistence_timeout_ms: u64,

    /// Outbound frames buffered per connection before frames are dropped (default: 256)
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    /// Events a single connection may have in flight at once (default: 32)
    #[serde(default = "default_max_inflight")]
    pub max_inflight_events: usize,

    /// Require a valid JWT on the WebSocket upgrade (default: true)
    #[serde(default = "default_require_token")]
    pub require_token: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            presence_interval_secs: 10,
            persistence_timeout_ms: 5000,
            outbound_buffer: 256,
            max_inflight_events: 32,
            require_token: true,
        }
    }
}

impl HubConfig {
    pub fn presence_interval(&self) -> Duration {
        Duration::from_secs(self.presence_interval_secs.max(1))
    }

    pub fn persistence_timeout(&self) -> Duration {
        Duration::from_millis(self.persistence_timeout_ms.max(1))
    }
}

fn default_presence_interval() -> u64 {
    10
}

fn default_persistence_timeout() -> u64 {
    5000
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_max_inflight() -> usize {
    32
}

fn default_require_token() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4000,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            data_dir: "./data".to_string(),
            storage_backend: StorageBackend::Sqlite,
            jwt_secret: None,
            hub: HubConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (RELAY_*) < CLI args
    pub fn load(cli: &Cli) -> Result<Self, figment::Error> {
        Self::figment(cli).extract()
    }

    fn figment(cli: &Cli) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("RELAY_").split("__"))
            .merge(Serialized::defaults(cli))
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Campus Relay Configuration
# Place this file at ./relay.toml or specify with --config <path>
# All settings can be overridden via environment variables (RELAY_PORT,
# RELAY_HUB__PRESENCE_INTERVAL_SECS, etc.) or CLI flags (--port, etc.)

# Server port (default: 4000)
# port = 4000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and generated JWT secret
# data_dir = "./data"

# Storage backend: "sqlite" (file in data_dir) or "memory" (lost on restart)
# storage_backend = "sqlite"

# HS256 secret shared with the platform API that issues access tokens.
# If unset, a random secret is generated in data_dir (tokens from other
# services will then fail to validate).
# jwt_secret = ""

# ---- Presence Hub ----
# [hub]

# Seconds between unconditional online-user broadcasts
# presence_interval_secs = 10

# Deadline for each chat/notification persistence call (ms)
# persistence_timeout_ms = 5000

# Frames buffered per connection before a slow client starts losing frames
# outbound_buffer = 256

# Events one connection may have in flight before its reader pauses
# max_inflight_events = 32

# Require a valid JWT on WebSocket upgrade; join must match the token subject
# require_token = true
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.port, 4000);
        assert_eq!(config.storage_backend, StorageBackend::Sqlite);
        assert_eq!(config.hub.presence_interval(), Duration::from_secs(10));
        assert_eq!(config.hub.persistence_timeout(), Duration::from_millis(5000));
        assert!(config.hub.require_token);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "relay.toml",
                r#"
                port = 5000
                storage_backend = "memory"

                [hub]
                presence_interval_secs = 3
                "#,
            )?;

            let config: Config = Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(Toml::file("relay.toml"))
                .extract()?;

            assert_eq!(config.port, 5000);
            assert_eq!(config.storage_backend, StorageBackend::Memory);
            assert_eq!(config.hub.presence_interval_secs, 3);
            // Unset keys in [hub] keep their defaults
            assert_eq!(config.hub.outbound_buffer, 256);
            Ok(())
        });
    }

    #[test]
    fn test_cli_flags_override_file_and_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("relay.toml", "port = 5000\nbind_address = \"127.0.0.1\"")?;
            jail.set_env("RELAY_DATA_DIR", "/var/lib/relay");
            jail.set_env("RELAY_HUB__MAX_INFLIGHT_EVENTS", "4");

            let cli = Cli {
                config: "relay.toml".to_string(),
                port: Some(6000),
                ..Cli::default()
            };
            let config = Config::load(&cli)?;

            assert_eq!(config.port, 6000);
            assert_eq!(config.bind_address, "127.0.0.1");
            assert_eq!(config.data_dir, "/var/lib/relay");
            assert_eq!(config.hub.max_inflight_events, 4);
            assert!(!config.json_logs);
            Ok(())
        });
    }

    #[test]
    fn test_zero_durations_are_clamped() {
        let hub = HubConfig {
            presence_interval_secs: 0,
            persistence_timeout_ms: 0,
            ..HubConfig::default()
        };
        assert_eq!(hub.presence_interval(), Duration::from_secs(1));
        assert_eq!(hub.persistence_timeout(), Duration::from_millis(1));
    }

    #[test]
    fn test_template_is_valid_toml() {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(&generate_config_template()))
            .extract()
            .unwrap();
        assert_eq!(config.port, 4000);
    }
}
