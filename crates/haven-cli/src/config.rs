//! Connection settings.
//!
//! Values come from flags or the environment (`DATABASE_URL`,
//! `DATABASE_PASSWORD`, `HAVEN_SCHEMA`); `main` loads a `.env` file first
//! if one exists.

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use thiserror::Error;
use tokio_postgres::NoTls;

/// Database flags shared by every subcommand.
#[derive(Debug, Clone, clap::Args)]
pub struct DbArgs {
    /// Database connection URL
    #[arg(long, env = "DATABASE_URL", hide_env_values = true, global = true)]
    pub database_url: Option<String>,

    /// Database password; overrides any password in the URL
    #[arg(long, env = "DATABASE_PASSWORD", hide_env_values = true, global = true)]
    pub database_password: Option<String>,

    /// Target schema (default: the connection's current schema)
    #[arg(long, env = "HAVEN_SCHEMA", global = true)]
    pub schema: Option<String>,

    /// Maximum pooled connections
    #[arg(long, default_value_t = 2, global = true)]
    pub pool_size: usize,
}

/// Validated connection settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub pg: tokio_postgres::Config,
    /// The URL with its password masked, safe to log.
    pub display_url: String,
    pub schema: Option<String>,
    pub pool_size: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DATABASE_URL is not set (pass --database-url or add it to .env)")]
    MissingUrl,

    #[error("invalid database URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("no database credential: set DATABASE_PASSWORD or put a password in the URL")]
    MissingCredential,

    #[error("failed to build connection pool: {0}")]
    Pool(String),
}

impl Config {
    pub fn from_args(args: &DbArgs) -> Result<Self, ConfigError> {
        let url = args
            .database_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::MissingUrl)?;

        let mut pg: tokio_postgres::Config =
            url.parse().map_err(|e: tokio_postgres::Error| ConfigError::InvalidUrl {
                url: mask_password(url),
                reason: e.to_string(),
            })?;

        match args.database_password.as_deref() {
            Some(password) if !password.is_empty() => {
                pg.password(password);
            }
            _ if pg.get_password().is_some() => {}
            _ => return Err(ConfigError::MissingCredential),
        }

        Ok(Self {
            pg,
            display_url: mask_password(url),
            schema: args.schema.clone().filter(|s| !s.is_empty()),
            pool_size: args.pool_size.max(1),
        })
    }

    pub fn pool(&self) -> Result<Pool, ConfigError> {
        let mut manager_config = ManagerConfig::default();
        manager_config.recycling_method = RecyclingMethod::Fast;
        let manager = Manager::from_config(self.pg.clone(), NoTls, manager_config);
        Pool::builder(manager)
            .max_size(self.pool_size)
            .build()
            .map_err(|e| ConfigError::Pool(e.to_string()))
    }
}

/// Mask password in database URL for display
pub fn mask_password(url: &str) -> String {
    // Simple masking: replace password between :// and @
    if let Some(start) = url.find("://")
        && let Some(at) = url.rfind('@')
        && at > start
        && let Some(colon) = url[start + 3..at].find(':')
    {
        let prefix = &url[..start + 3];
        let user = &url[start + 3..start + 3 + colon];
        let suffix = &url[at..];
        return format!("{}{}:***{}", prefix, user, suffix);
    }

    // key=value form
    url.split_whitespace()
        .map(|part| match part.split_once('=') {
            Some((key, _)) if key.eq_ignore_ascii_case("password") => format!("{key}=***"),
            _ => part.to_owned(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
