// chatstats-server/src/context.rs

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use chatstats_core::kv::StateStore;
use chatstats_core::platforms::telegram::client::ClientFactory;
use chatstats_core::pool::ConnectionPool;
use chatstats_core::repositories::{BotRepo, UserRepo};
use chatstats_core::Error;

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub postgres_dsn: String,
    pub clickhouse_url: String,
    pub clickhouse_database: String,
    pub clickhouse_user: Option<String>,
    pub clickhouse_password: Option<String>,
    pub events_table: String,
    pub api_id: i32,
    pub api_hash: String,
    pub gateway_url: String,
    pub token_salt: String,
    pub api_host: String,
    pub state_db_path: PathBuf,
    pub log_level: String,
}

fn required(name: &str) -> Result<String, Error> {
    env::var(name).map_err(|_| Error::Config(format!("{name} is not set")))
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        let api_id = required("APP_ID")?
            .parse::<i32>()
            .map_err(|_| Error::Config("APP_ID is not an integer".to_string()))?;

        Ok(Self {
            postgres_dsn: required("POSTGRES_DSN")?,
            clickhouse_url: required("CLICKHOUSE_URL")?,
            clickhouse_database: env::var("CLICKHOUSE_DATABASE").unwrap_or_else(|_| "bots".to_string()),
            clickhouse_user: env::var("CLICKHOUSE_USER").ok(),
            clickhouse_password: env::var("CLICKHOUSE_PASSWORD").ok(),
            events_table: env::var("CLICKHOUSE_EVENTS_TABLE").unwrap_or_else(|_| "events".to_string()),
            api_id,
            api_hash: required("APP_HASH")?,
            gateway_url: required("TG_GATEWAY_URL")?,
            token_salt: env::var("BOT_TOKEN_SALT").unwrap_or_default(),
            api_host: required("API_HOST")?,
            state_db_path: env::var("STATE_DB_PATH")
                .unwrap_or_else(|_| "storage/state.redb".to_string())
                .into(),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// Shared dependencies for the control-plane handlers.
pub struct AppContext {
    pub config: Config,
    pub bots: Arc<dyn BotRepo>,
    pub users: Arc<dyn UserRepo>,
    pub state: StateStore,
    pub factory: Arc<dyn ClientFactory>,
    pub pool: Arc<ConnectionPool>,
}
