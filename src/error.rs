use thiserror::Error;

/// Errors from compiling a pattern specification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("pattern exceeds {limit} {unit}")]
    PatternTooLong { limit: usize, unit: &'static str },

    #[error("hex pattern must have an even number of digits")]
    OddLength,

    #[error("invalid hex digit '{0}'")]
    InvalidHexDigit(char),

    #[error("invalid regex: {0}")]
    InvalidRegex(String),
}

/// Errors from validating a detector configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("detector name '{name}' must be 1-64 characters")]
    InvalidName { name: String },

    #[error("detector '{name}': port must be between 1 and 65535")]
    InvalidPort { name: String },

    #[error("detector '{name}': cooldown_seconds must be between 0 and 3600, got {value}")]
    InvalidCooldown { name: String, value: f64 },

    #[error("detector '{name}': sensor_duration_seconds must be between 1 and 3600, got {value}")]
    InvalidSensorDuration { name: String, value: f64 },

    #[error("detector '{name}': invalid pattern: {source}")]
    Pattern {
        name: String,
        #[source]
        source: PatternError,
    },

    #[error("detector '{name}': '{value}' is not a valid source IP address")]
    InvalidSourceIp { name: String, value: String },

    #[error("detector '{name}': {group} is not a multicast group address")]
    InvalidMulticastGroup {
        name: String,
        group: std::net::Ipv4Addr,
    },

    #[error("detectors '{name}' and '{other}' both bind {protocol} port {port}")]
    DuplicatePort {
        name: String,
        other: String,
        protocol: &'static str,
        port: u16,
    },
}
