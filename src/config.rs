use std::env;
use thiserror::Error;

use crate::appmax::error::AppmaxError;
use crate::appmax::AppmaxConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },

    #[error(transparent)]
    Appmax(#[from] AppmaxError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub db_max_connections: u32,
    pub admin_session_secret: Option<String>,
    pub appmax: AppmaxConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let store = match get("STORE").as_deref().map(str::trim) {
            None | Some("postgres") => StoreBackend::Postgres,
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "STORE",
                    value: other.to_string(),
                })
            }
        };

        let database_url = get("DATABASE_URL");
        if store == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let port = parse_or(get("PORT"), "PORT", 8080u16)?;
        let db_max_connections = parse_or(get("DB_MAX_CONNECTIONS"), "DB_MAX_CONNECTIONS", 10u32)?;

        Ok(Self {
            store,
            database_url,
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            db_max_connections,
            admin_session_secret: get("ADMIN_SESSION_SECRET"),
            appmax: AppmaxConfig::from_lookup(&lookup)?,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    value: Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(v) => v.trim().parse().map_err(|_| ConfigError::Invalid { var, value: v }),
        None => Ok(default),
    }
}
