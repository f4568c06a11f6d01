use anyhow::Result;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

use crate::util::env as env_util;

const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

/// Handle to the apsviz database. Cloning shares the pool.
#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    /// Build the pool without opening a connection. Connectivity failures
    /// surface from the first query as `sqlx::Error`.
    ///
    /// Must be called inside a tokio runtime (the pool spawns its reaper).
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub fn connect_lazy(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let mut connect_options = PgConnectOptions::from_str(database_url)?;

        if database_url.contains("sslmode=require") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }

        // PgBouncer transaction pooling cannot hold prepared statements
        if !env_util::env_flag("USE_PREPARED", false) {
            connect_options = connect_options.statement_cache_capacity(0);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(acquire_timeout)
            .idle_timeout(Duration::from_secs(600))
            .connect_lazy_with(connect_options);
        info!(max_connections, ?acquire_timeout, "db pool configured");

        Ok(Self { pool })
    }

    /// Pool from `util::env::db_url()`, `DB_MAX_CONNS` (default 2) and
    /// `DB_ACQUIRE_TIMEOUT_SECS` (default 10).
    pub fn connect_from_env() -> Result<Self> {
        let url = env_util::db_url()?;
        let max_conns: u32 = env_util::env_parse("DB_MAX_CONNS", 2);
        let acquire_secs: u64 =
            env_util::env_parse("DB_ACQUIRE_TIMEOUT_SECS", DEFAULT_ACQUIRE_TIMEOUT_SECS);
        Self::connect_lazy(&url, max_conns, Duration::from_secs(acquire_secs.max(1)))
    }
}
