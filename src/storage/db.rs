use anyhow::{ Context, Result };
use sqlx::sqlite::{ SqliteConnectOptions, SqlitePoolOptions };
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: String,
    pub pool_size: Option<u32>,
    pub connect_timeout: Option<u64>,
}

impl DatabaseConfig {
    pub fn build_url(&self) -> String {
        if self.path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}", self.path)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        let url = config.build_url();
        debug!("Opening database: {}", config.path);

        // An in-memory database exists per connection; a pool of one keeps
        // every caller on the same database.
        let max_connections = if config.path == ":memory:" {
            1
        } else {
            config.pool_size.unwrap_or(5)
        };

        let mut pool_options = SqlitePoolOptions::new().max_connections(max_connections);
        if let Some(secs) = config.connect_timeout {
            pool_options = pool_options.acquire_timeout(Duration::from_secs(secs));
        }

        let connect_options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);

        let pool = pool_options
            .connect_with(connect_options).await
            .context("Failed to open SQLite database")?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
