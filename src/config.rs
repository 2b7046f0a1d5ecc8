use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::pattern::{CompiledMatcher, PatternKind};

/// Maximum detector entry name length.
pub const MAX_NAME_LENGTH: usize = 64;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub detectors: HashMap<String, DetectorConfig>,
}

impl Default for Config {
    fn default() -> Self {
        let mut detectors = HashMap::new();

        detectors.insert(
            "example".to_string(),
            DetectorConfig {
                enabled: false,
                protocol: Protocol::Udp,
                port: 9999,
                multicast: false,
                multicast_group: default_multicast_group(),
                pattern_type: PatternKind::String,
                pattern_value: "ALERT".to_string(),
                cooldown_seconds: default_cooldown(),
                sensor_duration_seconds: default_sensor_duration(),
                source_ip: None,
            },
        );

        Self {
            general: GeneralConfig::default(),
            detectors,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load config from default locations or create default
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("/etc/framewatch/config.toml"),
            dirs_next::config_dir()
                .map(|p| p.join("framewatch/config.toml"))
                .unwrap_or_default(),
            PathBuf::from("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Validates every detector entry, plus the cross-entry check that no
    /// two enabled detectors bind the same protocol and port.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut bound: HashMap<(Protocol, u16), &str> = HashMap::new();

        for (name, detector) in &self.detectors {
            detector.validate(name)?;

            if detector.enabled {
                if let Some(other) = bound.insert((detector.protocol, detector.port), name) {
                    return Err(ConfigError::DuplicatePort {
                        name: name.clone(),
                        other: other.to_string(),
                        protocol: detector.protocol.as_str(),
                        port: detector.port,
                    });
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Detection event channel capacity
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            event_buffer: default_event_buffer(),
        }
    }
}

/// Supported network protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Udp,
    Tcp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One pattern listener bound to one port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Whether this detector is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Transport to bind
    pub protocol: Protocol,

    /// Port to bind (1-65535)
    pub port: u16,

    /// Join a multicast group in addition to unicast traffic (UDP only)
    #[serde(default)]
    pub multicast: bool,

    /// Group joined when `multicast` is set
    #[serde(default = "default_multicast_group")]
    pub multicast_group: Ipv4Addr,

    /// Pattern matching type (string, hex, regex)
    pub pattern_type: PatternKind,

    /// Pattern value; empty means the detector never signals
    #[serde(default)]
    pub pattern_value: String,

    /// Minimum seconds between two accepted detections (0-3600)
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: f64,

    /// Seconds the detection signal stays on after the most recent
    /// accepted detection (1-3600)
    #[serde(default = "default_sensor_duration")]
    pub sensor_duration_seconds: f64,

    /// Only accept traffic from this exact source address
    #[serde(default)]
    pub source_ip: Option<String>,
}

impl DetectorConfig {
    /// Parsed source filter. Empty and whitespace-only values count as
    /// absent; anything else must have passed [`validate`](Self::validate).
    pub fn source_filter(&self) -> Option<IpAddr> {
        self.source_ip
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse().ok())
    }

    /// Cooldown as a duration. Requires a validated configuration.
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_seconds)
    }

    /// Sensor duration as a duration. Requires a validated configuration.
    pub fn sensor_duration(&self) -> Duration {
        Duration::from_secs_f64(self.sensor_duration_seconds)
    }

    /// Validates every field range and compiles the pattern. A malformed
    /// pattern is an error here, never a silently dead detector.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if name.is_empty() || name.len() > MAX_NAME_LENGTH {
            return Err(ConfigError::InvalidName {
                name: name.to_string(),
            });
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidPort {
                name: name.to_string(),
            });
        }

        if !(0.0..=3600.0).contains(&self.cooldown_seconds) {
            return Err(ConfigError::InvalidCooldown {
                name: name.to_string(),
                value: self.cooldown_seconds,
            });
        }

        if !(1.0..=3600.0).contains(&self.sensor_duration_seconds) {
            return Err(ConfigError::InvalidSensorDuration {
                name: name.to_string(),
                value: self.sensor_duration_seconds,
            });
        }

        CompiledMatcher::compile(self.pattern_type, &self.pattern_value).map_err(|source| {
            ConfigError::Pattern {
                name: name.to_string(),
                source,
            }
        })?;

        if let Some(raw) = self
            .source_ip
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            raw.parse::<IpAddr>()
                .map_err(|_| ConfigError::InvalidSourceIp {
                    name: name.to_string(),
                    value: raw.to_string(),
                })?;
        }

        if self.multicast && !self.multicast_group.is_multicast() {
            return Err(ConfigError::InvalidMulticastGroup {
                name: name.to_string(),
                group: self.multicast_group,
            });
        }

        Ok(())
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_event_buffer() -> usize {
    100
}

fn default_multicast_group() -> Ipv4Addr {
    // mDNS group
    Ipv4Addr::new(224, 0, 0, 251)
}

fn default_cooldown() -> f64 {
    5.0
}

fn default_sensor_duration() -> f64 {
    30.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> DetectorConfig {
        DetectorConfig {
            enabled: true,
            protocol: Protocol::Udp,
            port: 9999,
            multicast: false,
            multicast_group: default_multicast_group(),
            pattern_type: PatternKind::String,
            pattern_value: "ALERT".to_string(),
            cooldown_seconds: 5.0,
            sensor_duration_seconds: 30.0,
            source_ip: None,
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.detectors.contains_key("example"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.detectors.len(), config.detectors.len());
        assert_eq!(parsed.general.event_buffer, config.general.event_buffer);
    }

    #[test]
    fn test_detector_deserialization_defaults() {
        let toml_str = r#"
            protocol = "tcp"
            port = 8080
            pattern_type = "regex"
            pattern_value = "^foo"
        "#;
        let det: DetectorConfig = toml::from_str(toml_str).unwrap();
        assert!(det.enabled);
        assert!(!det.multicast);
        assert_eq!(det.cooldown_seconds, 5.0);
        assert_eq!(det.sensor_duration_seconds, 30.0);
        assert!(det.validate("web").is_ok());
    }

    #[test]
    fn test_validate_rejects_port_zero() {
        let mut det = detector();
        det.port = 0;
        assert!(matches!(
            det.validate("x"),
            Err(ConfigError::InvalidPort { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_range_timings() {
        let mut det = detector();
        det.cooldown_seconds = 3600.5;
        assert!(matches!(
            det.validate("x"),
            Err(ConfigError::InvalidCooldown { .. })
        ));

        let mut det = detector();
        det.cooldown_seconds = -1.0;
        assert!(matches!(
            det.validate("x"),
            Err(ConfigError::InvalidCooldown { .. })
        ));

        let mut det = detector();
        det.sensor_duration_seconds = 0.5;
        assert!(matches!(
            det.validate("x"),
            Err(ConfigError::InvalidSensorDuration { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_malformed_pattern() {
        let mut det = detector();
        det.pattern_type = PatternKind::Hex;
        det.pattern_value = "ABC".to_string();
        assert!(matches!(
            det.validate("x"),
            Err(ConfigError::Pattern { .. })
        ));
    }

    #[test]
    fn test_validate_source_ip() {
        let mut det = detector();
        det.source_ip = Some("192.168.1.50".to_string());
        assert!(det.validate("x").is_ok());
        assert_eq!(det.source_filter(), Some("192.168.1.50".parse().unwrap()));

        det.source_ip = Some("::1".to_string());
        assert!(det.validate("x").is_ok());

        det.source_ip = Some("  ".to_string());
        assert!(det.validate("x").is_ok());
        assert_eq!(det.source_filter(), None);

        det.source_ip = Some("not-an-ip".to_string());
        assert!(matches!(
            det.validate("x"),
            Err(ConfigError::InvalidSourceIp { .. })
        ));
    }

    #[test]
    fn test_validate_multicast_group() {
        let mut det = detector();
        det.multicast = true;
        assert!(det.validate("x").is_ok());

        det.multicast_group = Ipv4Addr::new(192, 168, 1, 1);
        assert!(matches!(
            det.validate("x"),
            Err(ConfigError::InvalidMulticastGroup { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_long_name() {
        let det = detector();
        let name = "x".repeat(MAX_NAME_LENGTH + 1);
        assert!(matches!(
            det.validate(&name),
            Err(ConfigError::InvalidName { .. })
        ));
    }

    #[test]
    fn test_duplicate_port_rejected() {
        let mut config = Config {
            general: GeneralConfig::default(),
            detectors: HashMap::new(),
        };
        config.detectors.insert("a".to_string(), detector());
        config.detectors.insert("b".to_string(), detector());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicatePort { .. })
        ));

        // A disabled entry does not conflict.
        config.detectors.get_mut("b").unwrap().enabled = false;
        assert!(config.validate().is_ok());

        // Same port on a different protocol does not conflict either.
        config.detectors.get_mut("b").unwrap().enabled = true;
        config.detectors.get_mut("b").unwrap().protocol = Protocol::Tcp;
        assert!(config.validate().is_ok());
    }
}
