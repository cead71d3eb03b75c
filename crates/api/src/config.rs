//! API server configuration

use anyhow::Context;

/// Server configuration loaded from the environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string
    pub database_url: String,
    /// Address the HTTP server binds to
    pub bind_address: String,
    /// Base URL of the web app; checkout and portal sessions return here
    pub app_base_url: String,
    /// Master switch for billing endpoints
    pub enable_billing: bool,
    /// Comma-separated CORS origin allowlist
    pub allowed_origins: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            app_base_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            enable_billing: std::env::var("ENABLE_BILLING")
                .map(|v| v != "false")
                .unwrap_or(true),
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string()),
        })
    }
}
