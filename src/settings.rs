//! Process settings read from the environment.

use crate::error::ConfigError;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_BIND_ADDR: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 3000));
const DEFAULT_SCHEMA_PATH: &str = "schema.json";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_JSON_BODY_LIMIT: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind_addr: SocketAddr,
    pub schema_path: PathBuf,
    /// `None` selects the in-memory engine.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub json_body_limit: usize,
}

impl Settings {
    /// Reads `BIND_ADDR`, `SCHEMA_PATH`, `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS`
    /// and `MAX_JSON_BODY_BYTES`. Call `dotenvy::dotenv()` first to honour a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Ok(Self {
            bind_addr: parse_or("BIND_ADDR", get("BIND_ADDR"), DEFAULT_BIND_ADDR)?,
            schema_path: get("SCHEMA_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SCHEMA_PATH)),
            database_url: get("DATABASE_URL"),
            database_max_connections: parse_or(
                "DATABASE_MAX_CONNECTIONS",
                get("DATABASE_MAX_CONNECTIONS"),
                DEFAULT_MAX_CONNECTIONS,
            )?,
            json_body_limit: parse_or("MAX_JSON_BODY_BYTES", get("MAX_JSON_BODY_BYTES"), DEFAULT_JSON_BODY_LIMIT)?,
        })
    }
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Validation(format!("{} has an invalid value '{}'", key, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.bind_addr, "127.0.0.1:3000".parse::<SocketAddr>().unwrap());
        assert_eq!(s.schema_path, PathBuf::from("schema.json"));
        assert_eq!(s.database_url, None);
        assert_eq!(s.database_max_connections, 5);
        assert_eq!(s.json_body_limit, 1024 * 1024);
    }

    #[test]
    fn reads_overrides() {
        let s = settings(&[
            ("BIND_ADDR", "0.0.0.0:8080"),
            ("SCHEMA_PATH", "/etc/app/schema.json"),
            ("DATABASE_URL", "postgres://localhost/app"),
            ("DATABASE_MAX_CONNECTIONS", "12"),
            ("MAX_JSON_BODY_BYTES", "2048"),
        ])
        .unwrap();
        assert_eq!(s.bind_addr.port(), 8080);
        assert_eq!(s.database_url.as_deref(), Some("postgres://localhost/app"));
        assert_eq!(s.database_max_connections, 12);
        assert_eq!(s.json_body_limit, 2048);
    }

    #[test]
    fn blank_database_url_means_memory() {
        assert_eq!(settings(&[("DATABASE_URL", "  ")]).unwrap().database_url, None);
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        assert!(matches!(
            settings(&[("DATABASE_MAX_CONNECTIONS", "many")]),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(settings(&[("BIND_ADDR", "nowhere")]), Err(ConfigError::Validation(_))));
    }
}
