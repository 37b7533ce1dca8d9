//! Process configuration: CLI flags plus the INI file they point at.
//!
//! A missing config file or a malformed integer in it is treated as a fatal
//! startup error: we log it and exit with status code 2 rather than limping
//! along with partially-applied defaults.

use std::path::Path;
use std::process::exit;

use clap::Parser;
use ini::Ini;
use log::error;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Authoritative multi-snake game server")]
pub struct Args {
    /// Path to the server's INI configuration file.
    #[clap(short, long, default_value = "config.ini")]
    pub config: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub tick_interval_ms: u64,
    pub game_speed: u32,
    pub initial_chunk_amount: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8888,
            tick_interval_ms: 50,
            game_speed: 1,
            initial_chunk_amount: 4,
        }
    }
}

impl ServerConfig {
    /// Load from `[snake_server]` in the INI file at `path`. Exits the
    /// process with status 2 on a missing file or a malformed integer,
    /// matching the fatal-at-startup contract for configuration errors.
    pub fn load(path: &str) -> ServerConfig {
        if !Path::new(path).exists() {
            error!("config file not found: {path}");
            exit(2);
        }
        let ini = match Ini::load_from_file(path) {
            Ok(ini) => ini,
            Err(e) => {
                error!("failed to parse config file {path}: {e}");
                exit(2);
            }
        };
        let section = ini.section(Some("snake_server"));
        let defaults = ServerConfig::default();

        let get_str = |key: &str, default: &str| -> String {
            section
                .and_then(|s| s.get(key))
                .map(str::to_string)
                .unwrap_or_else(|| default.to_string())
        };
        let get_int = |key: &str, default: u64| -> u64 {
            match section.and_then(|s| s.get(key)) {
                Some(raw) => raw.parse::<u64>().unwrap_or_else(|_| {
                    error!("config key \"{key}\" is not a valid integer: \"{raw}\"");
                    exit(2);
                }),
                None => default,
            }
        };

        ServerConfig {
            host: get_str("host", &defaults.host),
            port: get_int("port", defaults.port as u64) as u16,
            tick_interval_ms: get_int("tick_interval", defaults.tick_interval_ms),
            game_speed: get_int("game_speed", defaults.game_speed as u64) as u32,
            initial_chunk_amount: get_int(
                "initial_chunk_amount",
                defaults.initial_chunk_amount as u64,
            ) as usize,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = ServerConfig::default();
        assert_eq!(c.port, 8888);
        assert_eq!(c.tick_interval_ms, 50);
        assert_eq!(c.game_speed, 1);
        assert_eq!(c.initial_chunk_amount, 4);
    }

    #[test]
    fn bind_addr_formats_host_and_port() {
        let c = ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 9999,
            ..ServerConfig::default()
        };
        assert_eq!(c.bind_addr(), "0.0.0.0:9999");
    }
}
