use std::path::PathBuf;
use std::time::Duration;

use crate::limits::*;
use crate::time::{OverlapPolicy, to_minutes};
use crate::validator::ValidationRules;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    /// `ROOMSYNC_OPENING` must be before `ROOMSYNC_CLOSING`.
    EmptyDay,
    /// Both notification paths switched off.
    NoChangeSource,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: {value:?}"),
            ConfigError::EmptyDay => write!(f, "opening time must be before closing time"),
            ConfigError::NoChangeSource => {
                write!(f, "at least one of native feed and explicit notify must be enabled")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub metrics_port: Option<u16>,
    pub rooms_file: Option<PathBuf>,
    pub heartbeat: Duration,
    pub channel_capacity: usize,
    pub native_feed: bool,
    pub explicit_notify: bool,
    pub rules: ValidationRules,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            metrics_port: None,
            rooms_file: None,
            heartbeat: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            native_feed: true,
            explicit_notify: true,
            rules: ValidationRules::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Unset or blank variables keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &'static str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(|v| (var, v))
        };
        let mut cfg = Config::default();

        if let Some((_, v)) = get("ROOMSYNC_BIND") {
            cfg.bind = v;
        }
        if let Some(kv) = get("ROOMSYNC_PORT") {
            cfg.port = parse(kv)?;
        }
        if let Some(kv) = get("ROOMSYNC_METRICS_PORT") {
            cfg.metrics_port = Some(parse(kv)?);
        }
        if let Some((_, v)) = get("ROOMSYNC_ROOMS_FILE") {
            cfg.rooms_file = Some(PathBuf::from(v));
        }
        if let Some(kv) = get("ROOMSYNC_HEARTBEAT_SECS") {
            let secs: u64 = parse_nonzero(kv)?;
            cfg.heartbeat = Duration::from_secs(secs);
        }
        if let Some(kv) = get("ROOMSYNC_CHANNEL_CAPACITY") {
            cfg.channel_capacity = parse_nonzero(kv)?;
        }
        if let Some(kv) = get("ROOMSYNC_NATIVE_FEED") {
            cfg.native_feed = parse_bool(kv)?;
        }
        if let Some(kv) = get("ROOMSYNC_EXPLICIT_NOTIFY") {
            cfg.explicit_notify = parse_bool(kv)?;
        }
        if let Some(kv) = get("ROOMSYNC_OVERLAP_POLICY") {
            cfg.rules.overlap_policy = parse::<OverlapPolicy>(kv)?;
        }
        if let Some(kv) = get("ROOMSYNC_OPENING") {
            cfg.rules.opening = parse_hhmm(kv)?;
        }
        if let Some(kv) = get("ROOMSYNC_CLOSING") {
            cfg.rules.closing = parse_hhmm(kv)?;
        }
        if let Some(kv) = get("ROOMSYNC_MAX_DURATION_MINUTES") {
            cfg.rules.max_duration = parse_nonzero(kv)?;
        }

        if cfg.rules.opening >= cfg.rules.closing {
            return Err(ConfigError::EmptyDay);
        }
        if !cfg.native_feed && !cfg.explicit_notify {
            return Err(ConfigError::NoChangeSource);
        }
        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse<T: std::str::FromStr>((var, value): (&'static str, String)) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid { var, value })
}

fn parse_nonzero<T: std::str::FromStr + Default + PartialEq>(
    kv: (&'static str, String),
) -> Result<T, ConfigError> {
    let (var, value) = (kv.0, kv.1.clone());
    match parse::<T>(kv)? {
        n if n == T::default() => Err(ConfigError::Invalid { var, value }),
        n => Ok(n),
    }
}

fn parse_bool((var, value): (&'static str, String)) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid { var, value }),
    }
}

fn parse_hhmm((var, value): (&'static str, String)) -> Result<u32, ConfigError> {
    // 24:00 is allowed as a closing time.
    if value == "24:00" {
        return Ok(24 * 60);
    }
    to_minutes(&value).ok_or(ConfigError::Invalid { var, value })
}
