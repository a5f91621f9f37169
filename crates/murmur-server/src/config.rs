//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server starts with zero configuration
//! for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use murmur_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_MESSAGE_PAGE_SIZE};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file. Parent directories are created on open.
    /// Env: `DATABASE_PATH`
    /// Default: `./murmur.db`
    pub database_path: PathBuf,

    /// Rows fetched per query when listing a conversation's messages.
    /// Env: `MESSAGE_PAGE_SIZE`
    /// Default: `100`
    pub message_page_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./murmur.db"),
            message_page_size: DEFAULT_MESSAGE_PAGE_SIZE,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = PathBuf::from(path);
            }
        }

        if let Some(val) = lookup("MESSAGE_PAGE_SIZE") {
            match parse_page_size(&val) {
                Some(n) => config.message_page_size = n,
                None => tracing::warn!(value = %val, "Invalid MESSAGE_PAGE_SIZE, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

fn parse_page_size(val: &str) -> Option<u32> {
    val.trim().parse::<u32>().ok().filter(|n| *n > 0)
}
