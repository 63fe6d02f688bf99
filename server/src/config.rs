//! Server configuration.
//!
//! Loaded from a TOML file; every section and field has a default so the
//! server also runs with no file at all. Protocol limits are compile-time
//! constants in `protocol-wire`; this covers the ambient knobs.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

/// Server configuration loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Listening socket configuration.
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listening socket configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    /// Address to listen on.
    #[serde(default = "default_address")]
    pub address: SocketAddr,

    /// Accept backlog.
    #[serde(default = "default_backlog")]
    pub backlog: u32,

    /// Connections with no readiness activity for this long are closed.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Per-read scratch buffer size (e.g. "64KB").
    #[serde(
        default = "default_read_buffer_size",
        deserialize_with = "deserialize_size"
    )]
    pub read_buffer_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            backlog: default_backlog(),
            idle_timeout_ms: default_idle_timeout_ms(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level filter (overridden by RUST_LOG when set).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

fn default_address() -> SocketAddr {
    "0.0.0.0:8080".parse().expect("valid default address")
}

fn default_backlog() -> u32 {
    4096
}

fn default_idle_timeout_ms() -> u64 {
    15_000
}

fn default_read_buffer_size() -> usize {
    64 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Deserialize a size given as a number or a string like "64KB".
fn deserialize_size<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SizeValue {
        Number(usize),
        String(String),
    }

    match SizeValue::deserialize(deserializer)? {
        SizeValue::Number(n) => Ok(n),
        SizeValue::String(s) => parse_size(&s).map_err(D::Error::custom),
    }
}

/// Parse a size string like "64KB" or "1MB" into bytes.
pub fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| c.is_alphabetic()) {
        Some(idx) => (&s[..idx], s[idx..].to_uppercase()),
        None => (s, String::new()),
    };

    let num: usize = num_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid number: {num_str}"))?;

    let multiplier: usize = match suffix.as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        _ => return Err(format!("unknown size suffix: {suffix}")),
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| "size overflow".to_string())
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.listener.backlog == 0 {
            return Err("backlog must be nonzero".into());
        }
        if self.listener.idle_timeout_ms == 0 {
            return Err("idle_timeout_ms must be nonzero".into());
        }
        if self.listener.read_buffer_size < 4096 {
            return Err(format!(
                "read_buffer_size ({}) must be at least 4096",
                self.listener.read_buffer_size
            )
            .into());
        }
        Ok(())
    }
}
