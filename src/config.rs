//! Runtime configuration: the [`PowerPlantConfig`] passed to
//! [`crate::powerplant::PowerPlant::new`], and a `clap`-derived
//! [`CliArgs`] for applications that want a command line on top of it.
//!
//! A derive-based `clap::Parser` struct with per-field doc comments becoming
//! `--help` text, plus an environment-variable fallback for the log level.

use std::net::Ipv4Addr;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Configuration for a [`crate::powerplant::PowerPlant`].
///
/// `#[serde(deny_unknown_fields)]` so a typo'd field in a config file is a
/// hard startup error rather than a silently-ignored default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PowerPlantConfig {
    /// Worker count for the implicitly-created "default" pool. Other pools
    /// are created on demand the first time a reaction names them, with
    /// concurrency taken from [`PoolConfig`] if supplied, or defaulted to 1.
    #[serde(default = "default_pool_concurrency")]
    pub default_pool_concurrency: usize,

    /// Network configuration for `Scope::Udp`/`Scope::Network` emits. `None`
    /// disables outbound network delivery entirely; a reaction that asks for
    /// `Network<T>` still receives locally-emitted values.
    #[serde(default)]
    pub network: Option<NetworkConfig>,

    /// Explicitly-sized non-default pools, keyed by pool name.
    #[serde(default)]
    pub pools: Vec<PoolConfig>,

    /// Default level passed to [`crate::log::init`] when the application
    /// doesn't override it via `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_pool_concurrency() -> usize {
    1
}

fn default_log_level() -> String {
    "nuclear=info".to_string()
}

impl Default for PowerPlantConfig {
    fn default() -> Self {
        Self {
            default_pool_concurrency: default_pool_concurrency(),
            network: None,
            pools: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

/// Sizing for one explicitly-declared, non-default pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    pub name: String,
    pub concurrency: usize,
    #[serde(default)]
    pub counts_for_idle: bool,
    #[serde(default)]
    pub persistent: bool,
}

/// Multicast delivery settings for `NETWORK` scope emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    /// Name this instance announces to peers.
    pub name: String,
    pub multicast_group: Ipv4Addr,
    pub port: u16,
}

/// Command-line front end for applications built on this crate. Optional
/// sugar: library users can build a [`PowerPlantConfig`] directly and skip
/// `clap` entirely.
#[derive(Debug, Clone, Parser)]
#[clap(name = "nuclear", about = "NUClear-style reactive runtime demo", version)]
pub struct CliArgs {
    /// Path to a JSON config file (see [`PowerPlantConfig`]). When absent,
    /// built-in defaults plus the flags below are used.
    #[clap(short = 'c', long = "config")]
    pub config_path: Option<String>,

    /// Worker count for the default pool.
    #[clap(short = 'j', long, default_value = "1")]
    pub default_pool_concurrency: usize,

    /// Log filter directive, e.g. `nuclear=debug`. Overridden by `RUST_LOG`.
    #[clap(short = 'L', long, default_value = "nuclear=info", env = "NUCLEAR_LOG")]
    pub log_level: String,

    /// Enable outbound network delivery on this multicast group:port.
    #[clap(long)]
    pub network_group: Option<Ipv4Addr>,

    #[clap(long, default_value = "7447")]
    pub network_port: u16,

    /// Name this instance announces on the network, when network delivery
    /// is enabled.
    #[clap(long, default_value = "nuclear-node")]
    pub network_name: String,
}

impl CliArgs {
    /// Build a [`PowerPlantConfig`] from parsed flags, loading `config_path`
    /// over the flag defaults when given.
    pub fn into_config(self) -> Result<PowerPlantConfig, ConfigError> {
        let mut config = if let Some(path) = &self.config_path {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?
        } else {
            PowerPlantConfig {
                default_pool_concurrency: self.default_pool_concurrency,
                log_level: self.log_level.clone(),
                ..PowerPlantConfig::default()
            }
        };

        if let Some(group) = self.network_group {
            config.network = Some(NetworkConfig {
                name: self.network_name,
                multicast_group: group,
                port: self.network_port,
            });
        }

        Ok(config)
    }
}

/// Errors raised while loading a [`PowerPlantConfig`] from disk.
#[derive(Debug, snafu::Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("failed to read config file {}: {}", path, source))]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("failed to parse config file {}: {}", path, source))]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let config = PowerPlantConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: PowerPlantConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.default_pool_concurrency, config.default_pool_concurrency);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let json = r#"{"default_pool_concurrency": 2, "bogus_field": true}"#;
        let result: Result<PowerPlantConfig, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn cli_args_without_config_path_uses_flags() {
        let args = CliArgs {
            config_path: None,
            default_pool_concurrency: 4,
            log_level: "nuclear=debug".to_string(),
            network_group: None,
            network_port: 7447,
            network_name: "node".to_string(),
        };
        let config = args.into_config().unwrap();
        assert_eq!(config.default_pool_concurrency, 4);
        assert!(config.network.is_none());
    }
}
