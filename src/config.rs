//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::controller::state::{parse_battery, parse_mac, ConnectionType, DEFAULT_MOTOR_COUNT};
use crate::controller::store::SlotProfile;
use crate::error::{DsuError, Result};
use crate::lifecycle::SlotAssignment;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub clients: ClientConfig,

    #[serde(default)]
    pub push: PushConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub slots: Vec<SlotConfig>,
}

/// UDP endpoint configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Sender id placed in every packet; derived from the clock if unset
    #[serde(default)]
    pub server_id: Option<u32>,
}

/// Client subscription configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    #[serde(default = "default_client_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

/// Proactive pad data push configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PushConfig {
    /// Push as soon as a slot changes
    #[serde(default = "default_push_on_change")]
    pub on_change: bool,

    /// Periodic refresh of every active slot; 0 disables it
    #[serde(default = "default_push_interval_ms")]
    pub interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files; console only if unset
    #[serde(default)]
    pub directory: Option<String>,

    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
}

/// One `[[slots]]` entry
#[derive(Debug, Deserialize, Clone)]
pub struct SlotConfig {
    pub index: u32,

    /// `none`, `idle` or a script name
    #[serde(default = "default_slot_script")]
    pub script: String,

    #[serde(default)]
    pub mac: Option<String>,

    #[serde(default = "default_connection_type")]
    pub connection_type: String,

    #[serde(default = "default_battery")]
    pub battery: String,

    #[serde(default = "default_motor_count")]
    pub motor_count: u8,
}

// Default value functions
fn default_bind_address() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 26760 }

fn default_client_timeout_ms() -> u64 { 5000 }
fn default_sweep_interval_ms() -> u64 { 1000 }

fn default_push_on_change() -> bool { true }
fn default_push_interval_ms() -> u64 { 16 }

fn default_log_level() -> String { "info".to_string() }
fn default_log_file_prefix() -> String { "dsu-server.log".to_string() }

fn default_slot_script() -> String { "idle".to_string() }
fn default_connection_type() -> String { "none".to_string() }
fn default_battery() -> String { "full".to_string() }
fn default_motor_count() -> u8 { DEFAULT_MOTOR_COUNT }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            server_id: None,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_client_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            on_change: default_push_on_change(),
            interval_ms: default_push_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            level: default_log_level(),
            file_prefix: default_log_file_prefix(),
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> DsuError {
    DsuError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use dsu_server::config::Config;
    ///
    /// let config = Config::load("dsu-server.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;

        if self.clients.timeout_ms == 0 || self.clients.timeout_ms > 600_000 {
            return Err(invalid("clients.timeout_ms must be between 1 and 600000"));
        }

        if self.clients.sweep_interval_ms == 0 || self.clients.sweep_interval_ms > 60_000 {
            return Err(invalid("clients.sweep_interval_ms must be between 1 and 60000"));
        }

        if self.push.interval_ms > 10_000 {
            return Err(invalid("push.interval_ms must be between 0 and 10000"));
        }

        if self.logging.level.trim().is_empty() {
            return Err(invalid("logging.level cannot be empty"));
        }
        if let Err(e) = EnvFilter::try_new(&self.logging.level) {
            return Err(invalid(format!("logging.level is not a valid filter: {}", e)));
        }

        if self.logging.directory.as_deref().is_some_and(|dir| dir.trim().is_empty()) {
            return Err(invalid("logging.directory cannot be empty when set"));
        }

        let mut seen = HashSet::new();
        for slot in &self.slots {
            if !seen.insert(slot.index) {
                return Err(invalid(format!("slot {} is configured more than once", slot.index)));
            }
            slot.assignment()?;
            slot.profile()?;
        }

        Ok(())
    }

    /// Socket address to bind the UDP server to
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .server
            .bind_address
            .trim()
            .parse()
            .map_err(|e| invalid(format!("server.bind_address '{}': {}", self.server.bind_address, e)))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    /// Configured server id, or one derived from the current time
    pub fn server_id(&self) -> u32 {
        self.server.server_id.unwrap_or_else(|| {
            let now = chrono::Utc::now();
            (now.timestamp() as u32) ^ now.timestamp_subsec_nanos().rotate_left(16)
        })
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.clients.timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.clients.sweep_interval_ms)
    }

    /// Periodic push interval, `None` when disabled
    pub fn push_interval(&self) -> Option<Duration> {
        (self.push.interval_ms > 0).then(|| Duration::from_millis(self.push.interval_ms))
    }
}

impl SlotConfig {
    /// What should drive this slot
    pub fn assignment(&self) -> Result<SlotAssignment> {
        self.script
            .parse::<SlotAssignment>()
            .map_err(|e| invalid(format!("slot {}: {}", self.index, e)))
    }

    /// Values applied whenever this slot is allocated
    pub fn profile(&self) -> Result<SlotProfile> {
        let mac = match &self.mac {
            Some(text) => Some(
                parse_mac(text).ok_or_else(|| invalid(format!("slot {}: invalid mac '{}'", self.index, text)))?,
            ),
            None => None,
        };

        let connection_type: ConnectionType = self
            .connection_type
            .parse()
            .map_err(|e| invalid(format!("slot {}: {}", self.index, e)))?;
        if connection_type == ConnectionType::Disconnect {
            return Err(invalid(format!("slot {}: connection_type cannot be 'disconnect'", self.index)));
        }

        let battery = parse_battery(&self.battery)
            .ok_or_else(|| invalid(format!("slot {}: unknown battery status '{}'", self.index, self.battery)))?;

        Ok(SlotProfile {
            mac,
            connection_type,
            battery,
            motor_count: self.motor_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsu::protocol::BatteryStatus;

    fn create_valid_config() -> Config {
        Config {
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 26760,
                server_id: Some(42),
            },
            clients: ClientConfig::default(),
            push: PushConfig::default(),
            logging: LoggingConfig::default(),
            slots: vec![SlotConfig {
                index: 0,
                script: "circle_loop".to_string(),
                mac: None,
                connection_type: default_connection_type(),
                battery: default_battery(),
                motor_count: default_motor_count(),
            }],
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.bind_addr().unwrap(), "0.0.0.0:26760".parse().unwrap());
        assert_eq!(config.client_timeout(), Duration::from_millis(5000));
        assert_eq!(config.sweep_interval(), Duration::from_millis(1000));
        assert_eq!(config.push_interval(), Some(Duration::from_millis(16)));
        assert!(config.push.on_change);
        assert!(config.slots.is_empty());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.port, 26760);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_valid_config() {
        let config = create_valid_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.server_id(), 42);
    }

    #[test]
    fn test_full_config_parses() {
        let config = Config::parse(
            r#"
[server]
bind_address = "127.0.0.1"
port = 0
server_id = 7

[clients]
timeout_ms = 2000
sweep_interval_ms = 250

[push]
on_change = false
interval_ms = 0

[logging]
directory = "./logs"
level = "debug"

[[slots]]
index = 0
script = "circle_loop"
mac = "AA:BB:CC:DD:EE:10"
connection_type = "bluetooth"
battery = "charging"
motor_count = 1

[[slots]]
index = 1
script = "IDLE"
"#,
        )
        .unwrap();

        assert_eq!(config.bind_addr().unwrap(), "127.0.0.1:0".parse().unwrap());
        assert_eq!(config.server_id(), 7);
        assert_eq!(config.push_interval(), None);
        assert_eq!(config.logging.directory.as_deref(), Some("./logs"));

        assert_eq!(config.slots.len(), 2);
        assert_eq!(
            config.slots[0].assignment().unwrap(),
            SlotAssignment::Script("circle_loop".to_string())
        );
        assert_eq!(config.slots[1].assignment().unwrap(), SlotAssignment::Idle);

        let profile = config.slots[0].profile().unwrap();
        assert_eq!(profile.mac, Some([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x10]));
        assert_eq!(profile.connection_type, ConnectionType::Bluetooth);
        assert_eq!(profile.battery, BatteryStatus::Charging);
        assert_eq!(profile.motor_count, 1);

        let idle = config.slots[1].profile().unwrap();
        assert_eq!(idle, SlotProfile::default());
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[server]
port = 26761

[[slots]]
index = 3
script = "none"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.server.port, 26761);
        assert_eq!(config.slots[0].assignment().unwrap(), SlotAssignment::None);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(Config::load("/nonexistent/dsu.toml"), Err(DsuError::Io(_))));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(Config::parse("[server\nport = 1"), Err(DsuError::Config(_))));
        assert!(matches!(Config::parse("[server]\nport = 70000"), Err(DsuError::Config(_))));
    }

    #[test]
    fn test_invalid_bind_address() {
        let mut config = create_valid_config();
        config.server.bind_address = "localhost".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_ms_zero() {
        let mut config = create_valid_config();
        config.clients.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sweep_interval_too_high() {
        let mut config = create_valid_config();
        config.clients.sweep_interval_ms = 60_001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_push_interval_too_high() {
        let mut config = create_valid_config();
        config.push.interval_ms = 10_001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = create_valid_config();
        config.logging.level = "dsu_server=loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = " ".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "WARN".to_string();
        assert!(config.validate().is_ok());

        config.logging.level = "info,dsu_server::server=debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_log_directory() {
        let mut config = create_valid_config();
        config.logging.directory = Some("  ".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_slot_index() {
        let mut config = create_valid_config();
        config.slots.push(config.slots[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_slot_script() {
        let mut config = create_valid_config();
        config.slots[0].script = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_slot_mac() {
        let mut config = create_valid_config();
        config.slots[0].mac = Some("AA:BB:CC".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_connection_type() {
        let mut config = create_valid_config();
        config.slots[0].connection_type = "serial".to_string();
        assert!(config.validate().is_err());

        config.slots[0].connection_type = "disconnect".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_battery() {
        let mut config = create_valid_config();
        config.slots[0].battery = "empty".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_generated_server_id() {
        let mut config = create_valid_config();
        config.server.server_id = None;
        let _ = config.server_id();
    }
}
