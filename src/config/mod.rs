use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{RelayError, Result};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;
pub const DEFAULT_MAX_CONNECTION_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub relay: RelayConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub static_dir: PathBuf,
}

/// Tunables for the peer relay core
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Bound of each peer's outbound queue. Messages past this are dropped.
    pub queue_capacity: usize,
    /// Backstop on a single connection's lifetime, independent of liveness.
    pub max_connection_lifetime: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_connection_lifetime: Duration::from_secs(DEFAULT_MAX_CONNECTION_SECS),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup("SERVER_PORT").or_else(|| lookup("PORT")) {
            Some(raw) => parse_value("SERVER_PORT", &raw)?,
            None => DEFAULT_PORT,
        };

        let queue_capacity = match lookup("RELAY_QUEUE_CAPACITY") {
            Some(raw) => parse_value("RELAY_QUEUE_CAPACITY", &raw)?,
            None => DEFAULT_QUEUE_CAPACITY,
        };
        if queue_capacity == 0 {
            return Err(RelayError::InvalidConfiguration(
                "RELAY_QUEUE_CAPACITY must be at least 1".to_string(),
            ));
        }

        let max_connection_secs = match lookup("RELAY_MAX_CONNECTION_SECS") {
            Some(raw) => parse_value("RELAY_MAX_CONNECTION_SECS", &raw)?,
            None => DEFAULT_MAX_CONNECTION_SECS,
        };

        let static_dir = lookup("STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_static_dir);

        Ok(Self {
            server: ServerConfig {
                host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port,
                static_dir,
            },
            relay: RelayConfig {
                queue_capacity,
                max_connection_lifetime: Duration::from_secs(max_connection_secs),
            },
        })
    }

    pub fn bind_address(&self) -> ([u8; 4], u16) {
        let ip_addr = self.parse_host_to_ipv4();
        (ip_addr.octets(), self.server.port)
    }

    fn parse_host_to_ipv4(&self) -> Ipv4Addr {
        if let Ok(addr) = self.server.host.parse::<IpAddr>() {
            match addr {
                IpAddr::V4(ipv4) => return ipv4,
                IpAddr::V6(_) => {
                    tracing::warn!(
                        host = %self.server.host,
                        "IPv6 address provided but only IPv4 supported, using 0.0.0.0"
                    );
                    return Ipv4Addr::new(0, 0, 0, 0);
                }
            }
        }

        match self.server.host.as_str() {
            "localhost" => Ipv4Addr::new(127, 0, 0, 1),
            "" | "0.0.0.0" => Ipv4Addr::new(0, 0, 0, 0),
            _ => {
                tracing::warn!(
                    host = %self.server.host,
                    "Unable to parse host as IPv4, using 0.0.0.0"
                );
                Ipv4Addr::new(0, 0, 0, 0)
            }
        }
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| RelayError::ConfigurationParseFailed(format!("{}={:?}", name, raw)))
}

/// Looks for the frontend next to the working directory, then one level up.
fn default_static_dir() -> PathBuf {
    ["./frontend", "../frontend"]
        .iter()
        .map(Path::new)
        .find(|candidate| candidate.is_dir())
        .unwrap_or_else(|| Path::new("./frontend"))
        .to_path_buf()
}
