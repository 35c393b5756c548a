// src/config.rs
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Unset means the in-memory store: nothing survives a restart.
    pub database_url: Option<String>,
    pub bind_addr: IpAddr,
    pub port: u16,
    pub db_max_connections: u32,
    /// Interval of the optional deadline sweep. `None` keeps expiry purely lazy.
    pub deadline_sweep: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Config {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            bind_addr: parse_or(&lookup, "BIND_ADDR", IpAddr::from([0, 0, 0, 0]))?,
            port: parse_or(&lookup, "PORT", 3030)?,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 5)?,
            deadline_sweep: match lookup("DEADLINE_SWEEP_SECS") {
                Some(raw) => match raw.parse::<u64>() {
                    Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
                    _ => {
                        return Err(ConfigError::Invalid {
                            key: "DEADLINE_SWEEP_SECS",
                            value: raw,
                        })
                    }
                },
                None => None,
            },
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}
