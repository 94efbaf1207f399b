// chatstats-server/src/main.rs
//
// Wires the collector together: relational store, analytics sink, durable
// state store, bot connection pool and the control-plane API, under one
// process-level cancellation token.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use chatstats_core::kv::StateStore;
use chatstats_core::platforms::telegram::client::GatewayClientFactory;
use chatstats_core::pool::{ConnectionPool, PoolDeps};
use chatstats_core::repositories::{
    BotRepo, PostgresBotRepository, PostgresChatMemberRepository, PostgresChatRepository,
    PostgresUserRepository,
};
use chatstats_core::sink::{
    spawn_event_writer, ClickHouseSink, EVENT_QUEUE_CAPACITY, FLUSH_INTERVAL_SECS,
};
use chatstats_core::{Database, Error};

mod api;
mod context;

use context::{AppContext, Config};

/// Millisecond stagger between bot starts, against a thundering-herd
/// reconnect on the platform.
const STARTUP_STAGGER: Duration = Duration::from_millis(3);

#[derive(Parser, Debug)]
#[command(name = "chatstats")]
#[command(author, version, about = "Multi-tenant analytics collector for a chat-bot fleet")]
struct Args {
    /// Logging level: "info", "warn", "debug", "error" or "trace"
    #[arg(long = "log-level", short = 'L')]
    log_level: Option<String>,
}

fn init_tracing(level: &str) {
    let default_filter = format!("chatstats_core={0},chatstats_server={0}", level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };
    init_tracing(args.log_level.as_deref().unwrap_or(&config.log_level));

    if config.token_salt.is_empty() {
        warn!("BOT_TOKEN_SALT not set, hashing tokens with an empty salt");
    }

    if let Err(e) = run(config).await {
        error!("fatal: {e}");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Error> {
    let cancel = CancellationToken::new();

    // Relational store
    let db = Database::new(&config.postgres_dsn).await?;
    db.migrate().await?;

    let bots = Arc::new(PostgresBotRepository::new(db.pool().clone()));
    let users = Arc::new(PostgresUserRepository::new(db.pool().clone()));
    let chats = Arc::new(PostgresChatRepository::new(db.pool().clone()));
    let members = Arc::new(PostgresChatMemberRepository::new(db.pool().clone()));

    // Analytics sink and the single batch writer
    let mut click = clickhouse::Client::default()
        .with_url(config.clickhouse_url.as_str())
        .with_database(config.clickhouse_database.as_str());
    if let Some(user) = &config.clickhouse_user {
        click = click.with_user(user.as_str());
    }
    if let Some(password) = &config.clickhouse_password {
        click = click.with_password(password.as_str());
    }
    let sink = ClickHouseSink::new(click, &config.events_table);

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let writer_handle = spawn_event_writer(
        events_rx,
        sink,
        Duration::from_secs(FLUSH_INTERVAL_SECS),
        cancel.child_token(),
    );

    // Durable per-bot sync state
    if let Some(parent) = config.state_db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let state = StateStore::open(&config.state_db_path)?;

    // Bot supervisor
    let factory = Arc::new(GatewayClientFactory::new(
        &config.gateway_url,
        config.api_id,
        &config.api_hash,
    )?);
    let pool = Arc::new(ConnectionPool::new(
        PoolDeps {
            bots: bots.clone(),
            users: users.clone(),
            chats: chats.clone(),
            members: members.clone(),
            state: state.clone(),
            events_tx,
            factory: factory.clone(),
        },
        cancel.clone(),
    ));

    // Resurrect every logged-in bot, staggered.
    let resume_ids = bots.list_logged_in().await?;
    info!(count = resume_ids.len(), "starting registered bots");
    for bot_id in resume_ids {
        if let Err(e) = pool.add_bot(bot_id).await {
            error!(bot_id, "failed to register bot: {e}");
            continue;
        }
        if let Err(e) = pool.run_bot(bot_id, false).await {
            error!(bot_id, "failed to start bot: {e}");
        }
        sleep(STARTUP_STAGGER).await;
    }

    // Control plane
    let ctx = Arc::new(AppContext {
        config: config.clone(),
        bots,
        users,
        state,
        factory,
        pool,
    });
    let app = api::router(ctx);
    let listener = tokio::net::TcpListener::bind(&config.api_host).await?;
    info!(host = %config.api_host, "control plane listening");

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        let shutdown = server_cancel.cancelled_owned();
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
            error!("control plane error: {e}");
        }
    });

    // Ctrl-C fans out through the cancellation token.
    let ctrlc_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {e}");
            return;
        }
        info!("shutdown signal received");
        ctrlc_cancel.cancel();
    });

    cancel.cancelled().await;

    // Let the writer drain and flush once more before exiting.
    if let Err(e) = writer_handle.await {
        warn!("event writer join error: {e}");
    }
    if let Err(e) = server_handle.await {
        warn!("control plane join error: {e}");
    }

    info!("shutdown complete");
    Ok(())
}
