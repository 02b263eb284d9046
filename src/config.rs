//! Configuration management for the course port server

use serde::Deserialize;
use std::env;
use std::path::PathBuf;

use crate::upload::STAGING_EXPIRY_HOURS;

/// Default request body limit for one upload chunk
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 100 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub access: AccessConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Request body limit for one upload chunk
    pub max_chunk_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Staging directories live under this root
    pub data_root: PathBuf,

    /// Abandoned staging directories older than this are swept
    pub staging_max_age_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Import statuses stay in memory when unset
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    /// Users with author access to every course
    pub staff_users: Vec<String>,

    /// Any authenticated user may import and export
    pub allow_all_authors: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
                max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            },
            storage: StorageConfig {
                data_root: PathBuf::from("./data"),
                staging_max_age_hours: STAGING_EXPIRY_HOURS,
            },
            database: DatabaseConfig { url: None },
            access: AccessConfig {
                staff_users: Vec::new(),
                allow_all_authors: false,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .unwrap_or(3000),
                max_chunk_bytes: env::var("MAX_UPLOAD_CHUNK_BYTES")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_MAX_CHUNK_BYTES),
            },
            storage: StorageConfig {
                data_root: env::var("DATA_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("./data")),
                staging_max_age_hours: env::var("STAGING_MAX_AGE_HOURS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(STAGING_EXPIRY_HOURS),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            },
            access: AccessConfig {
                staff_users: parse_list(&env::var("STAFF_USERS").unwrap_or_default()),
                allow_all_authors: env::var("ALLOW_ALL_AUTHORS")
                    .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                    .unwrap_or(false),
            },
        })
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
