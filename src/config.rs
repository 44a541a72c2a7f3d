use crate::controller::{PollLimits, TransportSettings};
use crate::error::{BridgeError, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File names tried in the working directory when no path is given.
pub const CONFIG_CANDIDATES: [&str; 2] = ["config.yml", "config.yaml"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub tracers: Vec<TracerConfig>,
    pub bridge: BridgeConfig,
    pub mqtt: MqttConfig,
}

/// One controller to poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracerConfig {
    pub name: String,
    pub host: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Only these device names are imported when set.
    pub devices: Option<Vec<String>>,
    pub max_spaces: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub discover_devices: bool,
    pub discover_spaces: bool,
    pub ha_discovery: bool,
    pub ha_discovery_prefix: String,
    pub log_level: LogLevel,
    /// Seconds between poll cycles.
    pub poll_interval: u64,
    pub device_concurrency: usize,
    pub point_concurrency: usize,
    pub request_timeout_secs: u64,
    pub request_retries: u32,
    /// Poll cycles between full discovery passes; `0` disables them.
    /// Unreachable controllers are retried every cycle regardless.
    pub rediscover_interval: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttConfig {
    pub server: String,
    pub port: u16,
    pub client_id: String,
    pub base_topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Critical,
}

impl LogLevel {
    pub fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warning => LevelFilter::Warn,
            LogLevel::Critical => LevelFilter::Error,
        }
    }
}

fn default_scheme() -> String {
    "https".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            discover_devices: false,
            discover_spaces: false,
            ha_discovery: true,
            ha_discovery_prefix: "homeassistant".to_string(),
            log_level: LogLevel::Info,
            poll_interval: 60,
            device_concurrency: 4,
            point_concurrency: 8,
            request_timeout_secs: 10,
            request_retries: 2,
            rediscover_interval: 60,
        }
    }
}

impl BridgeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            timeout: Duration::from_secs(self.request_timeout_secs),
            retries: self.request_retries,
            ..TransportSettings::default()
        }
    }

    pub fn poll_limits(&self) -> PollLimits {
        PollLimits {
            devices: self.device_concurrency,
            points: self.point_concurrency,
        }
    }
}

impl Config {
    /// Load from `path`, or from the first of [`CONFIG_CANDIDATES`] in the
    /// working directory, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => find_config(Path::new(".")).ok_or_else(|| {
                BridgeError::ConfigurationFailure(format!(
                    "no configuration file found (tried {})",
                    CONFIG_CANDIDATES.join(", ")
                ))
            })?,
        };

        let mut config = Self::from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            BridgeError::ConfigurationFailure(format!("unable to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
            .map_err(|e| BridgeError::ConfigurationFailure(format!("{}: {}", path.display(), e)))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Apply `MQTT_*` overrides. `var` looks up one variable by name.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(server) = var("MQTT_SERVER") {
            self.mqtt.server = server;
        }
        if let Some(port) = var("MQTT_PORT") {
            self.mqtt.port = port.parse().map_err(|_| {
                BridgeError::ConfigurationFailure(format!("MQTT_PORT is not a valid port: {port}"))
            })?;
        }
        if let Some(username) = var("MQTT_USERNAME") {
            self.mqtt.username = Some(username);
        }
        if let Some(password) = var("MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.tracers.is_empty() {
            return Err(BridgeError::ConfigurationFailure(
                "at least one tracer must be configured".to_string(),
            ));
        }
        for tracer in &self.tracers {
            if tracer.host.trim().is_empty() {
                return Err(BridgeError::ConfigurationFailure(format!(
                    "tracer {} has no host",
                    tracer.name
                )));
            }
            if tracer.username.is_some() != tracer.password.is_some() {
                return Err(BridgeError::ConfigurationFailure(format!(
                    "tracer {} needs both username and password",
                    tracer.name
                )));
            }
        }
        if self.mqtt.server.trim().is_empty() {
            return Err(BridgeError::ConfigurationFailure(
                "mqtt.server must not be empty".to_string(),
            ));
        }
        if self.bridge.poll_interval == 0 {
            return Err(BridgeError::ConfigurationFailure(
                "bridge.poll_interval must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}

/// First existing candidate file in `dir`.
pub fn find_config(dir: &Path) -> Option<PathBuf> {
    CONFIG_CANDIDATES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"
tracers:
  - name: Main Building
    host: 10.0.0.5
bridge: {}
mqtt:
  server: 10.0.0.2
  port: 1883
  client_id: tracer2mqtt
  base_topic: tracer
"#;

    const FULL: &str = r#"
tracers:
  - name: Main Building
    host: 10.0.0.5
    scheme: http
    username: admin
    password: secret
    devices: [RTU-1, RTU-2]
    max_spaces: 20
bridge:
  discover_devices: true
  discover_spaces: true
  ha_discovery: false
  ha_discovery_prefix: ha
  log_level: DEBUG
  poll_interval: 30
  device_concurrency: 2
  point_concurrency: 16
  request_timeout_secs: 5
  request_retries: 0
  rediscover_interval: 5
mqtt:
  server: broker.local
  port: 8883
  client_id: bridge-1
  base_topic: building
  username: user
  password: pass
"#;

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        let tracer = &config.tracers[0];
        assert_eq!(tracer.scheme, "https");
        assert_eq!(tracer.devices, None);
        assert_eq!(tracer.max_spaces, None);

        assert_eq!(config.bridge, BridgeConfig::default());
        assert!(!config.bridge.discover_devices);
        assert!(config.bridge.ha_discovery);
        assert_eq!(config.bridge.poll_interval(), Duration::from_secs(60));

        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.client_id, "tracer2mqtt");
        assert_eq!(config.mqtt.base_topic, "tracer");
        config.validate().unwrap();
    }

    #[test]
    fn test_full_file() {
        let config = Config::from_yaml(FULL).unwrap();
        let tracer = &config.tracers[0];
        assert_eq!(tracer.scheme, "http");
        assert_eq!(tracer.devices.as_deref(), Some(&["RTU-1".to_string(), "RTU-2".to_string()][..]));
        assert_eq!(tracer.max_spaces, Some(20));

        assert_eq!(config.bridge.log_level, LogLevel::Debug);
        assert_eq!(config.bridge.ha_discovery_prefix, "ha");

        let settings = config.bridge.transport_settings();
        assert_eq!(settings.timeout, Duration::from_secs(5));
        assert_eq!(settings.retries, 0);

        let limits = config.bridge.poll_limits();
        assert_eq!(limits.devices, 2);
        assert_eq!(limits.points, 16);

        assert_eq!(config.bridge.rediscover_interval, 5);
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.username.as_deref(), Some("user"));
    }

    #[test]
    fn test_missing_sections_are_errors() {
        let no_mqtt = "tracers: []\nbridge: {}\n";
        assert!(Config::from_yaml(no_mqtt).is_err());

        let no_host = "tracers:\n  - name: A\nbridge: {}\nmqtt:\n  server: x\n";
        assert!(Config::from_yaml(no_host).is_err());

        for key in ["port", "client_id", "base_topic"] {
            let yaml: String = MINIMAL
                .lines()
                .filter(|line| !line.trim_start().starts_with(&format!("{key}:")))
                .map(|line| format!("{line}\n"))
                .collect();
            assert!(Config::from_yaml(&yaml).is_err(), "{key} should be required");
        }
    }

    #[test]
    fn test_log_levels() {
        for (text, filter) in [
            ("DEBUG", LevelFilter::Debug),
            ("INFO", LevelFilter::Info),
            ("WARNING", LevelFilter::Warn),
            ("CRITICAL", LevelFilter::Error),
        ] {
            let yaml = MINIMAL.replace("bridge: {}", &format!("bridge:\n  log_level: {text}"));
            let config = Config::from_yaml(&yaml).unwrap();
            assert_eq!(config.bridge.log_level.filter(), filter);
        }

        let yaml = MINIMAL.replace("bridge: {}", "bridge:\n  log_level: VERBOSE");
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_environment_overrides() {
        let mut config = Config::from_yaml(MINIMAL).unwrap();
        let env: HashMap<&str, &str> = [
            ("MQTT_SERVER", "override.local"),
            ("MQTT_PORT", "1884"),
            ("MQTT_USERNAME", "env-user"),
            ("MQTT_PASSWORD", "env-pass"),
        ]
        .into_iter()
        .collect();

        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.mqtt.server, "override.local");
        assert_eq!(config.mqtt.port, 1884);
        assert_eq!(config.mqtt.username.as_deref(), Some("env-user"));
        assert_eq!(config.mqtt.password.as_deref(), Some("env-pass"));
    }

    #[test]
    fn test_invalid_port_override() {
        let mut config = Config::from_yaml(MINIMAL).unwrap();
        let result = config.apply_overrides(|key| (key == "MQTT_PORT").then(|| "not-a-port".to_string()));
        assert!(matches!(result, Err(BridgeError::ConfigurationFailure(_))));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::from_yaml(MINIMAL).unwrap();
        config.tracers.clear();
        assert!(config.validate().is_err());

        let mut config = Config::from_yaml(MINIMAL).unwrap();
        config.tracers[0].username = Some("admin".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::from_yaml(MINIMAL).unwrap();
        config.bridge.poll_interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_lookup_order() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_config(dir.path()), None);

        fs::write(dir.path().join("config.yaml"), MINIMAL).unwrap();
        assert_eq!(find_config(dir.path()), Some(dir.path().join("config.yaml")));

        fs::write(dir.path().join("config.yml"), FULL).unwrap();
        let found = find_config(dir.path()).unwrap();
        assert_eq!(found, dir.path().join("config.yml"));
        assert_eq!(Config::from_file(&found).unwrap().mqtt.port, 8883);
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.yml");
        fs::write(&path, MINIMAL).unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.tracers[0].name, "Main Building");

        let missing = dir.path().join("missing.yml");
        assert!(matches!(
            Config::load(Some(&missing)),
            Err(BridgeError::ConfigurationFailure(_))
        ));
    }
}
