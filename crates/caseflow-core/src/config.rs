// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

/// Caseflow configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL
    pub database_url: String,
    /// Maximum pooled database connections
    pub max_connections: u32,
    /// Apply embedded migrations on connect
    pub run_migrations: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `CASEFLOW_DATABASE_URL`: SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `CASEFLOW_DB_MAX_CONNECTIONS`: Pool size (default: 5)
    /// - `CASEFLOW_RUN_MIGRATIONS`: Run migrations on connect (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("CASEFLOW_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("CASEFLOW_DATABASE_URL"))?;

        let max_connections: u32 = std::env::var("CASEFLOW_DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "CASEFLOW_DB_MAX_CONNECTIONS",
                "must be a positive integer",
            ))?;

        let run_migrations = match std::env::var("CASEFLOW_RUN_MIGRATIONS")
            .unwrap_or_else(|_| "true".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => {
                return Err(ConfigError::Invalid(
                    "CASEFLOW_RUN_MIGRATIONS",
                    "must be true or false",
                ));
            }
        };

        Ok(Self {
            database_url,
            max_connections,
            run_migrations,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
